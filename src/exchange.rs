//! Balance-derived exchange rates.
//!
//! Each tenant's local currency floats against the base unit: the further the
//! tenant's balance sits below its target, the more base units a local unit is
//! worth. Quotes average the current rate with the rate that would hold after
//! the quoted payment, so the very payment being priced dampens its own rate
//! move and large conversions get progressively less favourable.

use crate::currency::Currency;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::One;

/// Converts `amount` for a tenant with the given balance and target balance.
/// `to_base` converts local units into base units; otherwise base units into
/// local units. Returns the converted amount and the rate used.
///
/// A zero target means the tenant is pinned 1:1 to the base currency.
pub fn exchange_rate(
    balance: &Currency,
    target_balance: &Currency,
    amount: &Currency,
    to_base: bool,
) -> (Currency, BigRational) {
    if amount.is_zero() || target_balance.is_zero() {
        return (amount.clone(), BigRational::one());
    }

    // bal = max(balance, 0.01) so empty accounts still quote a finite rate.
    let bal = if balance.gt_zero() {
        balance.clone()
    } else {
        Currency::from_raw(BigInt::from(1))
    };

    let target = target_balance.to_ratio();
    let base_rate = &target / bal.to_ratio();

    let adjusted = if to_base {
        // The intermediate quotient is truncated to hundredths before the
        // subtraction, matching the stored precision of balances.
        &bal - &Currency::from_ratio(&(amount.to_ratio() / &base_rate))
    } else {
        &bal + amount
    };
    if adjusted.is_zero() {
        // Draining the entire float would make the pre-emptive rate
        // unbounded; the converted amount collapses to nothing.
        return (Currency::default(), base_rate);
    }

    let preemptive = &target / adjusted.to_ratio();
    let rate = (base_rate + preemptive) / BigRational::from_integer(BigInt::from(2));

    let converted = if to_base {
        amount.to_ratio() / &rate
    } else {
        amount.to_ratio() * &rate
    };
    (Currency::from_ratio(&converted), rate)
}
