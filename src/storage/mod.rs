//! Pluggable account storage.
//!
//! A [`Backend`] owns the persistent form of every account plus the
//! per-account locks. Accounts are checked out with [`Backend::fetch`] (or
//! [`Backend::create`]) and stay exclusively held until [`Backend::release`];
//! concurrent fetches for any overlapping uid block until then. The last
//! release with `save` is what the next fetch observes.
//!
//! Callers normally go through a
//! [`LedgerTransaction`](crate::ledger::LedgerTransaction) instead of using a
//! backend directly: the transaction deduplicates uids (duplicate uids in one
//! `fetch` call would self-deadlock) and guarantees release on every path.

pub mod memory;
pub mod plaintext;

use crate::account::SharedAccount;
use crate::error::Result;
use std::future::Future;

pub trait Backend: Clone + Send + Sync + 'static {
    /// Atomically checks out all named accounts, homogenising the names
    /// first. On a miss, nothing stays held and the error carries the
    /// missing uid. The returned accounts match the input order.
    fn fetch(&self, names: Vec<String>) -> impl Future<Output = Result<Vec<SharedAccount>>> + Send;

    /// Releases held accounts. With `save`, every account whose modified
    /// bit is set is written back first.
    fn release(
        &self,
        accounts: Vec<SharedAccount>,
        save: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Creates a new account and returns it under a hold. The account only
    /// persists once it is released with `save`. Fails if the uid is taken.
    fn create(&self, name: &str) -> impl Future<Output = Result<SharedAccount>> + Send;

    /// A snapshot of all stored uids.
    fn list(&self) -> impl Future<Output = Vec<String>> + Send;

    /// Deletes an account, returning whether it existed.
    fn delete(&self, name: &str) -> impl Future<Output = Result<bool>> + Send;
}
