//! Scoped ledger transactions.
//!
//! A [`LedgerTransaction`] fronts one cross-cutting operation with a single
//! atomic acquisition of account locks, a cache of the checked-out accounts
//! and a commit/abort decision. The cache is what makes duplicate names
//! cheap: `fetch(["a", "b", "a"])` acquires two locks and returns three
//! aliases.

use crate::account::{ServerAccount, SharedAccount};
use crate::currency::Currency;
use crate::error::{Error, Result};
use crate::payment::pay;
use crate::storage::Backend;
use crate::transaction::Transaction;
use crate::util::homogenise_username;
use std::collections::HashMap;

pub struct LedgerTransaction<B: Backend> {
    backend: B,
    accounts: Option<HashMap<String, SharedAccount>>,
    finished: bool,
}

impl<B: Backend> LedgerTransaction<B> {
    pub fn begin(backend: B) -> Self {
        LedgerTransaction {
            backend,
            accounts: None,
            finished: false,
        }
    }

    /// The backend this transaction runs against.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Checks out all named accounts in one atomic acquisition. Legal at
    /// most once per transaction: later calls are served from the cache and
    /// panic if they name an account outside the original set, because that
    /// second acquisition is exactly what the transaction exists to prevent.
    ///
    /// Duplicate names are deduplicated before hitting the backend; the
    /// returned list matches the input order, with duplicates aliasing the
    /// same account.
    pub async fn fetch(&mut self, names: &[&str]) -> Result<Vec<SharedAccount>> {
        assert!(!self.finished, "fetch() on a finished ledger transaction");
        if self.accounts.is_some() {
            return Ok(self.from_cache(names));
        }

        let mut uids: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            let uid = homogenise_username(name);
            if !uids.contains(&uid) {
                uids.push(uid);
            }
        }

        let fetched = self.backend.fetch(uids).await?;
        let mut cache = HashMap::with_capacity(fetched.len());
        for account in fetched {
            cache.insert(account.uid().to_string(), account);
        }
        self.accounts = Some(cache);
        Ok(self.from_cache(names))
    }

    fn from_cache(&self, names: &[&str]) -> Vec<SharedAccount> {
        let cache = match &self.accounts {
            Some(cache) => cache,
            None => panic!("from_cache() before fetch()"),
        };
        names
            .iter()
            .map(|name| {
                let uid = homogenise_username(name);
                match cache.get(&uid) {
                    Some(account) => account.clone(),
                    None => panic!(
                        "multiple fetch() calls on one ledger transaction (account {:?})",
                        uid
                    ),
                }
            })
            .collect()
    }

    pub async fn fetch_one(&mut self, name: &str) -> Result<SharedAccount> {
        let mut accounts = self.fetch(&[name]).await?;
        Ok(accounts.remove(0))
    }

    /// An account already checked out by this transaction, if any.
    pub fn cached(&self, name: &str) -> Option<SharedAccount> {
        self.accounts
            .as_ref()?
            .get(&homogenise_username(name))
            .cloned()
    }

    /// Creates an account and adds it to the cache. The creation only
    /// persists if the transaction commits.
    pub async fn create(&mut self, name: &str) -> Result<SharedAccount> {
        assert!(!self.finished, "create() on a finished ledger transaction");
        let account = self.backend.create(name).await?;
        self.accounts
            .get_or_insert_with(HashMap::new)
            .insert(account.uid().to_string(), account.clone());
        Ok(account)
    }

    pub async fn get_or_create(&mut self, name: &str) -> Result<SharedAccount> {
        match self.fetch_one(name).await {
            Ok(account) => Ok(account),
            Err(Error::ServerNotFound(_)) => self.create(name).await,
            Err(error) => Err(error),
        }
    }

    /// Runs `f` over every stored account, each inside its own nested
    /// single-account transaction released with `save`. Accounts deleted
    /// between the snapshot and their turn are skipped; the first error
    /// from `f` stops the iteration.
    pub async fn for_each<F>(&self, mut f: F, save: bool) -> Result<()>
    where
        F: FnMut(&mut ServerAccount) -> Result<()>,
    {
        let mut uids = self.backend.list().await;
        uids.sort();

        for uid in uids {
            let mut nested = LedgerTransaction::begin(self.backend.clone());
            let account = match nested.fetch_one(&uid).await {
                Ok(account) => account,
                Err(Error::ServerNotFound(_)) => continue,
                Err(error) => return Err(error),
            };
            let result = f(&mut *account.lock().await);
            match result {
                Ok(()) => nested.free(save).await?,
                Err(error) => {
                    nested.abort().await?;
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    async fn free(&mut self, save: bool) -> Result<()> {
        self.finished = true;
        match self.accounts.take() {
            Some(accounts) => {
                self.backend
                    .release(accounts.into_values().collect(), save)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Releases every checked-out account, persisting modified ones.
    /// Idempotent after the first terminal call.
    pub async fn commit(&mut self) -> Result<()> {
        self.free(true).await
    }

    /// Releases every checked-out account, discarding changes. Idempotent.
    pub async fn abort(&mut self) -> Result<()> {
        self.free(false).await
    }
}

impl<B: Backend> Drop for LedgerTransaction<B> {
    /// A transaction dropped mid-flight still releases its locks (without
    /// saving), so an early `?` return can never wedge an account.
    fn drop(&mut self) {
        let Some(accounts) = self.accounts.take() else {
            return;
        };
        let backend = self.backend.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) =
                        backend.release(accounts.into_values().collect(), false).await
                    {
                        log::error!("Failed to release dropped transaction: {}", error);
                    }
                });
            }
            Err(_) => {
                log::error!("Ledger transaction dropped outside a runtime; locks leaked")
            }
        }
    }
}

/// Authenticates `username`/`token` and checks out that account together
/// with `other_names` in one atomic acquisition.
///
/// When one of the other accounts does not exist, the accounts named before
/// it are checked out instead: the caller still gets an authenticated
/// transaction and can report the missing account itself, without leaking
/// account existence to unauthenticated clients.
pub async fn authenticate<B: Backend>(
    backend: &B,
    username: &str,
    token: &str,
    other_names: &[&str],
) -> Result<(LedgerTransaction<B>, SharedAccount)> {
    let mut names: Vec<&str> = Vec::with_capacity(other_names.len() + 1);
    names.push(username);
    names.extend_from_slice(other_names);

    let mut tx = LedgerTransaction::begin(backend.clone());
    let accounts = match tx.fetch(&names).await {
        Ok(accounts) => accounts,
        Err(Error::ServerNotFound(bad)) => {
            let prefix: Vec<&str> = names
                .iter()
                .take_while(|name| homogenise_username(name) != bad)
                .copied()
                .collect();
            if prefix.is_empty() {
                return Err(Error::InvalidLogin);
            }
            tx.fetch(&prefix).await?
        }
        Err(error) => return Err(error),
    };

    let account = match accounts.into_iter().next() {
        Some(account) => account,
        None => return Err(Error::InvalidLogin),
    };
    if account.check_token(token).await {
        Ok((tx, account))
    } else {
        tx.abort().await?;
        Err(Error::InvalidLogin)
    }
}

/// Quotes a conversion between two tenants' local currencies through the
/// base unit. Either side may be empty to denote the base currency itself.
/// The two lookups run in separate short transactions; this is a quote, not
/// a trade, so no cross-account atomicity is needed.
pub async fn exchange_rate_between<B: Backend>(
    backend: &B,
    source: &str,
    target: &str,
    amount: Currency,
) -> Result<Currency> {
    let source = homogenise_username(source);
    let target = homogenise_username(target);
    if source == target {
        return Ok(amount);
    }

    let mut amount = amount;
    if !source.is_empty() {
        let mut tx = LedgerTransaction::begin(backend.clone());
        let account = tx.fetch_one(&source).await.map_err(|error| match error {
            Error::ServerNotFound(_) => Error::SourceServerNotFound,
            other => other,
        })?;
        amount = account.exchange_rate(&amount, true).await.0;
        tx.abort().await?;
    }
    if !target.is_empty() {
        let mut tx = LedgerTransaction::begin(backend.clone());
        let account = tx.fetch_one(&target).await.map_err(|error| match error {
            Error::ServerNotFound(_) => Error::TargetServerNotFound,
            other => other,
        })?;
        amount = account.exchange_rate(&amount, false).await.0;
        tx.abort().await?;
    }
    Ok(amount)
}

/// Reverts a rejected transaction by paying the received amount back from
/// the rejecting account to the original source. Exchange rates are
/// re-quoted from the received amount so a reject/resend loop cannot mint
/// money. Runs on its own transaction; call it only after the rejecting
/// request's transaction has released its holds.
pub async fn revert_rejected<B: Backend>(
    backend: &B,
    rejecter_uid: &str,
    transaction: &Transaction,
) -> Result<()> {
    let mut tx = LedgerTransaction::begin(backend.clone());
    let accounts = tx
        .fetch(&[rejecter_uid, transaction.source_server.as_str()])
        .await?;

    // Source and target swap places here.
    let result = pay(
        &accounts[0],
        &transaction.target,
        &transaction.source,
        &accounts[1],
        transaction.received_amount.clone(),
        true,
        false,
    )
    .await;
    match result {
        Ok(_) => tx.commit().await,
        Err(error) => {
            tx.abort().await?;
            Err(error)
        }
    }
}
