//! Per-tenant account state.
//!
//! A [`ServerAccount`] is the mutable record for one tenant; mutators keep
//! the invariants (non-negative balance, history capped at ten entries,
//! pending inbox only holding transactions addressed to the account) and
//! flip the `modified` bit the storage layer checks on release.
//!
//! Accounts move through the system as [`SharedAccount`] handles so that a
//! deduplicated fetch can hand out aliases of the same underlying record.

use crate::backup::EncodedAccount;
use crate::currency::Currency;
use crate::exchange::exchange_rate;
use crate::transaction::Transaction;
use crate::util::{constant_time_compare, generate_token, homogenise_username};
use crate::webhook;
use num_rational::BigRational;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tokio::sync::{Mutex, MutexGuard};

/// Accounts keep at most this many history entries, newest first.
pub const HISTORY_LENGTH: usize = 10;

/// The default target balance for new accounts.
pub const DEFAULT_TARGET_BALANCE: i64 = 500_000;

/// The upper bound for configurable target balances.
pub static MAX_TARGET_BALANCE: LazyLock<Currency> =
    LazyLock::new(|| Currency::from_units(500_000_000));

#[derive(Clone, Debug)]
pub struct ServerAccount {
    uid: String,
    name: String,
    balance: Currency,
    target_balance: Currency,
    history: Vec<Transaction>,
    pending: Vec<Transaction>,
    token: String,
    webhook_url: String,
    modified: bool,
}

/// The per-account view served by `/v3/summary`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Summary {
    pub uid: String,
    pub name: String,
    pub bal: Currency,
    pub balance: String,
    pub history: Vec<Transaction>,
    pub interest_rate: f64,
    pub target_balance: Currency,
}

impl ServerAccount {
    /// A fresh account: zero balance, the default target and a newly minted
    /// token. Created accounts start `modified` so they persist on commit.
    pub fn new(name: &str) -> Self {
        ServerAccount {
            uid: homogenise_username(name),
            name: name.to_string(),
            balance: Currency::default(),
            target_balance: Currency::from_units(DEFAULT_TARGET_BALANCE),
            history: Vec::new(),
            pending: Vec::new(),
            token: generate_token(),
            webhook_url: String::new(),
            modified: true,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self) -> Currency {
        self.balance.clone()
    }

    pub fn target_balance(&self) -> Currency {
        self.target_balance.clone()
    }

    pub fn history(&self) -> Vec<Transaction> {
        self.history.clone()
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.pending.clone()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn webhook_url(&self) -> Option<String> {
        if self.webhook_url.is_empty() {
            None
        } else {
            Some(self.webhook_url.clone())
        }
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self) {
        self.modified = true;
    }

    /// Applies `delta` to the balance. Returns false, leaving the account
    /// untouched, if the result would be negative.
    pub fn change_balance(&mut self, delta: &Currency) -> bool {
        let new_balance = &self.balance + delta;
        if new_balance.lt_zero() {
            return false;
        }
        self.balance = new_balance;
        self.modified = true;
        true
    }

    /// Prepends a transaction to the history, dropping the oldest entry past
    /// [`HISTORY_LENGTH`]. Transactions addressed to this account also land
    /// in the pending inbox; the returned URL, if any, is the webhook to
    /// notify about the new pending entry.
    #[must_use = "the returned webhook URL must be dispatched"]
    pub fn add_to_history(&mut self, transaction: Transaction) -> Option<String> {
        self.modified = true;
        let addressed_here =
            transaction.target_server == self.name && !transaction.target.is_empty();
        self.history.insert(0, transaction.clone());
        self.history.truncate(HISTORY_LENGTH);

        if !addressed_here {
            return None;
        }
        self.pending.push(transaction);
        self.webhook_url()
    }

    /// Removes the first pending transaction with the given ID and returns
    /// it. Unknown IDs are a no-op.
    pub fn remove_pending(&mut self, id: &str) -> Option<Transaction> {
        let index = self.pending.iter().position(|t| t.id == id)?;
        self.modified = true;
        Some(self.pending.remove(index))
    }

    /// Rejects a pending transaction. Returns the removed transaction when
    /// it was revertable, in which case the caller owes the source a
    /// compensating payment on a fresh ledger transaction.
    pub fn reject_pending(&mut self, id: &str) -> Option<Transaction> {
        self.remove_pending(id).filter(|t| t.revertable)
    }

    /// Sets the target balance. Returns false for values outside
    /// `[0, MAX_TARGET_BALANCE]`.
    pub fn set_target_balance(&mut self, target_balance: Currency) -> bool {
        if target_balance.lt_zero() || target_balance > *MAX_TARGET_BALANCE {
            return false;
        }
        self.target_balance = target_balance;
        self.modified = true;
        true
    }

    /// Validates and stores a webhook URL; an empty string clears it.
    /// Returns false if the URL does not survive normalisation.
    pub fn set_webhook_url(&mut self, webhook_url: &str) -> bool {
        let safe_url = if webhook_url.is_empty() {
            String::new()
        } else {
            match webhook::validate_url(webhook_url) {
                Some(url) => url,
                None => return false,
            }
        };
        self.webhook_url = safe_url;
        self.modified = true;
        true
    }

    /// Replaces the API token with a freshly minted one and returns it.
    pub fn regenerate_token(&mut self) -> String {
        self.token = generate_token();
        self.modified = true;
        self.token.clone()
    }

    /// Constant-time token check. Accounts with an empty stored token can
    /// never authenticate.
    pub fn check_token(&self, token: &str) -> bool {
        if self.token.is_empty() {
            return false;
        }
        constant_time_compare(&self.token, token)
    }

    /// Converts `amount` at this account's current rate; see
    /// [`exchange_rate`].
    pub fn exchange_rate(&self, amount: &Currency, to_base: bool) -> (Currency, BigRational) {
        exchange_rate(&self.balance, &self.target_balance, amount, to_base)
    }

    pub fn summary(&self) -> Summary {
        Summary {
            uid: self.uid.clone(),
            name: self.name.clone(),
            bal: self.balance.clone(),
            balance: self.balance.display_string(),
            history: self.history.clone(),
            interest_rate: 0.0,
            target_balance: self.target_balance.clone(),
        }
    }

    pub fn encode(&self) -> EncodedAccount {
        EncodedAccount {
            version: 0,
            name: self.name.clone(),
            balance: self.balance.clone(),
            target_balance: self.target_balance.clone(),
            history: self.history.clone(),
            pending_transactions: self.pending.clone(),
            token: self.token.clone(),
            webhook_url: self.webhook_url.clone(),
        }
    }

    pub(crate) fn from_encoded(encoded: &EncodedAccount) -> Self {
        ServerAccount {
            uid: homogenise_username(&encoded.name),
            name: encoded.name.clone(),
            balance: encoded.balance.clone(),
            target_balance: encoded.target_balance.clone(),
            history: encoded.history.clone(),
            pending: encoded.pending_transactions.clone(),
            token: encoded.token.clone(),
            webhook_url: encoded.webhook_url.clone(),
            modified: false,
        }
    }
}

/// A shared handle to an account checked out from storage. Clones alias the
/// same underlying record, which is what lets a deduplicated fetch return
/// the same account at several positions.
#[derive(Clone, Debug)]
pub struct SharedAccount {
    uid: String,
    inner: Arc<Mutex<ServerAccount>>,
}

impl SharedAccount {
    pub fn new(account: ServerAccount) -> Self {
        SharedAccount {
            uid: account.uid.clone(),
            inner: Arc::new(Mutex::new(account)),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// True when both handles alias the same underlying account.
    pub fn same_account(&self, other: &SharedAccount) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Locks the underlying record for direct access.
    pub async fn lock(&self) -> MutexGuard<'_, ServerAccount> {
        self.inner.lock().await
    }

    pub async fn name(&self) -> String {
        self.lock().await.name().to_string()
    }

    pub async fn balance(&self) -> Currency {
        self.lock().await.balance()
    }

    pub async fn target_balance(&self) -> Currency {
        self.lock().await.target_balance()
    }

    pub async fn change_balance(&self, delta: &Currency) -> bool {
        self.lock().await.change_balance(delta)
    }

    pub async fn history(&self) -> Vec<Transaction> {
        self.lock().await.history()
    }

    pub async fn pending(&self) -> Vec<Transaction> {
        self.lock().await.pending()
    }

    pub async fn has_pending(&self) -> bool {
        self.lock().await.has_pending()
    }

    /// Records a transaction, and fires the account's webhook when the
    /// transaction lands in the pending inbox. Delivery happens on a
    /// background task and never blocks the caller.
    pub async fn add_to_history(&self, transaction: Transaction) {
        let notify = self.lock().await.add_to_history(transaction);
        if let Some(url) = notify {
            webhook::notify(&url);
        }
    }

    pub async fn remove_pending(&self, id: &str) {
        self.lock().await.remove_pending(id);
    }

    pub async fn reject_pending(&self, id: &str) -> Option<Transaction> {
        self.lock().await.reject_pending(id)
    }

    pub async fn set_target_balance(&self, target_balance: Currency) -> bool {
        self.lock().await.set_target_balance(target_balance)
    }

    pub async fn set_webhook_url(&self, webhook_url: &str) -> bool {
        self.lock().await.set_webhook_url(webhook_url)
    }

    pub async fn webhook_url(&self) -> Option<String> {
        self.lock().await.webhook_url()
    }

    pub async fn regenerate_token(&self) -> String {
        self.lock().await.regenerate_token()
    }

    pub async fn check_token(&self, token: &str) -> bool {
        self.lock().await.check_token(token)
    }

    pub async fn exchange_rate(&self, amount: &Currency, to_base: bool) -> (Currency, BigRational) {
        self.lock().await.exchange_rate(amount, to_base)
    }

    pub async fn summary(&self) -> Summary {
        self.lock().await.summary()
    }
}
