//! The cross-account payment engine.

use crate::account::SharedAccount;
use crate::currency::Currency;
use crate::error::{Error, Result};
use crate::transaction::Transaction;
use crate::util::pasteurise_username;
use std::sync::LazyLock;

/// The largest amount a single transaction may move, in any of its three
/// denominations. 1e11 keeps clients that parse JSON numbers as 64-bit
/// floats out of trouble.
pub static TRANSACTION_LIMIT: LazyLock<Currency> =
    LazyLock::new(|| Currency::from_units(100_000_000_000));

const MAX_USERNAME_LENGTH: usize = 48;

/// Sends a payment from `source` to `target`.
///
/// When `local_currency` is set, `sent_amount` is denominated in the source
/// account's local currency and converted to base units at the source's
/// current rate; otherwise it already is the base amount. The received
/// amount is always quoted at the target's rate.
///
/// Both accounts must be held by the caller's ledger transaction: the debit
/// and credit are individually atomic, and any rejection after the debit
/// restores the source balance before returning.
pub async fn pay(
    source: &SharedAccount,
    source_user: &str,
    target_user: &str,
    target: &SharedAccount,
    sent_amount: Currency,
    local_currency: bool,
    revertable: bool,
) -> Result<Transaction> {
    let (source_user, length) = pasteurise_username(source_user);
    if length > MAX_USERNAME_LENGTH {
        return Err(Error::SourceUsernameTooLong);
    }
    let (target_user, length) = pasteurise_username(target_user);
    if length > MAX_USERNAME_LENGTH {
        return Err(Error::UsernameTooLong);
    }

    let amount = if local_currency {
        source.exchange_rate(&sent_amount, true).await.0
    } else {
        sent_amount.clone()
    };

    // No stealing.
    if !sent_amount.gt_zero() || !amount.gt_zero() {
        return Err(Error::InvalidAmount);
    }
    if sent_amount > *TRANSACTION_LIMIT || amount > *TRANSACTION_LIMIT {
        return Err(Error::TransactionLimit);
    }

    if !source.change_balance(&-&amount).await {
        return Err(Error::CannotAfford);
    }

    let received_amount = target.exchange_rate(&amount, false).await.0;
    if !received_amount.gt_zero() {
        source.change_balance(&amount).await;
        return Err(Error::CannotPayNothing);
    }
    if received_amount > *TRANSACTION_LIMIT {
        source.change_balance(&amount).await;
        return Err(Error::TransactionLimit);
    }

    if !target.change_balance(&amount).await {
        // Unreachable: crediting cannot push a balance negative.
        source.change_balance(&amount).await;
        return Err(Error::Internal("target credit failed".to_string()));
    }

    let mut transaction = Transaction::new(
        source_user,
        source.name().await,
        target_user,
        target.name().await,
        amount,
        sent_amount,
        received_amount,
    );
    if revertable {
        transaction.revertable = true;
    }

    if !source.same_account(target) {
        source.add_to_history(transaction.clone()).await;
    }
    target.add_to_history(transaction.clone()).await;

    log::info!("{}", transaction);
    Ok(transaction)
}
