//! Snapshot and restore.
//!
//! A backup is a JSON array of [`EncodedAccount`] records. Balances travel
//! as integer counts of hundredths so restores never re-parse decimal text.
//! Restore is deliberately non-atomic across records: the snapshot carries
//! no cross-account invariants, so a partial restore is still a set of
//! internally consistent accounts.

use crate::account::{ServerAccount, SharedAccount};
use crate::currency::Currency;
use crate::error::Result;
use crate::ledger::LedgerTransaction;
use crate::storage::Backend;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// The stable wire form of one account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncodedAccount {
    /// Bumped on breaking changes; decoding anything newer than 0 aborts.
    #[serde(default)]
    pub version: u8,

    /// The display name (not homogenised).
    pub name: String,

    /// The balance as an integer where 1234 is ¤12.34.
    #[serde(with = "crate::currency::scaled")]
    pub balance: Currency,

    /// The target balance, same scale as `balance`.
    #[serde(with = "crate::currency::scaled")]
    pub target_balance: Currency,

    #[serde(default)]
    pub history: Vec<Transaction>,
    #[serde(default)]
    pub pending_transactions: Vec<Transaction>,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub webhook_url: String,
}

impl EncodedAccount {
    /// Decodes into a live account.
    ///
    /// Panics on an unrecognised version: a snapshot from a newer build must
    /// fail loudly rather than load with fields silently dropped.
    pub fn decode(&self) -> ServerAccount {
        assert!(
            self.version == 0,
            "unrecognised encoded account version {}",
            self.version
        );
        ServerAccount::from_encoded(self)
    }
}

/// Encodes every account in the store. Runs read-only; nothing is held for
/// longer than one account at a time.
pub async fn backup<B: Backend>(backend: &B) -> Result<Vec<EncodedAccount>> {
    let tx = LedgerTransaction::begin(backend.clone());
    let mut encoded = Vec::new();
    tx.for_each(
        |account| {
            encoded.push(account.encode());
            Ok(())
        },
        false,
    )
    .await?;
    Ok(encoded)
}

/// Restores a snapshot, overwriting or creating each named account in its
/// own transaction.
pub async fn restore<B: Backend>(backend: &B, encoded: Vec<EncodedAccount>) -> Result<()> {
    for encoded_account in encoded {
        let mut tx = LedgerTransaction::begin(backend.clone());
        let account: SharedAccount = tx.get_or_create(&encoded_account.name).await?;
        {
            let mut guard = account.lock().await;
            *guard = encoded_account.decode();
            guard.set_modified();
        }
        tx.commit().await?;
    }
    Ok(())
}
