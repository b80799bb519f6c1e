//! # lurkcoin
//!
//! A multi-tenant ledger server. Each tenant (a *server account*) holds a
//! balance in a fixed-point base currency; payments between tenants convert
//! through the base unit at a rate derived from each tenant's balance and
//! configured target. The ledger is exposed over an authenticated JSON HTTP
//! API and persists through a pluggable storage backend.
//!
//! ## Design
//!
//! - **Exact money**: [`Currency`] is a big-integer count of hundredths;
//!   arithmetic never rounds and exchange rates are computed with exact
//!   rationals.
//! - **Per-account locking**: backends hand out accounts under exclusive
//!   holds, and a [`LedgerTransaction`] acquires everything an operation
//!   touches in one atomic, deduplicated batch.
//! - **Pending inboxes**: received payments wait in the target's pending
//!   inbox until acknowledged; rejected revertable payments flow back
//!   automatically.

pub mod account;
pub mod api;
pub mod backup;
pub mod config;
pub mod currency;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod locks;
pub mod payment;
pub mod storage;
pub mod transaction;
pub mod util;
pub mod webhook;

pub use account::{ServerAccount, SharedAccount, Summary};
pub use currency::Currency;
pub use error::{Error, Result};
pub use ledger::LedgerTransaction;
pub use payment::pay;
pub use storage::Backend;
pub use transaction::Transaction;
