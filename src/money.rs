// 💰 Money - fixed-point currency amounts
//
// All amounts are rust_decimal::Decimal. A Decimal cannot be NaN or infinite,
// so finiteness is checked exactly once: where an f64 or a string from the
// outside world becomes Money.

use crate::error::{LedgerError, Result};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

pub type Money = Decimal;

/// Balances and transfer remainders within this distance of zero are settled
pub const SETTLE_TOLERANCE: Money = Decimal::from_parts(1, 0, 0, false, 2);

/// Largest amount a single item, payment or menu price may carry.
/// Sums of bounded amounts stay far below `Decimal::MAX`.
pub const MAX_AMOUNT: Money = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0); // 1e12

/// Convert an untrusted float (JSON body, form input) into Money
pub fn from_f64(value: f64) -> Result<Money> {
    if !value.is_finite() {
        return Err(LedgerError::InvalidAmount(value.to_string()));
    }

    Decimal::from_f64(value).ok_or_else(|| LedgerError::InvalidAmount(value.to_string()))
}

/// Parse an amount from text ("120", "45.50", " 3 ")
pub fn parse_amount(raw: &str) -> Result<Money> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidAmount("empty amount".to_string()));
    }

    Decimal::from_str(trimmed).map_err(|_| LedgerError::InvalidAmount(trimmed.to_string()))
}

/// Reject negative and out-of-range amounts on the write path
pub fn ensure_amount(amount: Money) -> Result<Money> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must not be negative: {}",
            amount
        )));
    }
    if amount > MAX_AMOUNT {
        return Err(LedgerError::InvalidAmount(format!(
            "amount exceeds {}: {}",
            MAX_AMOUNT, amount
        )));
    }
    Ok(amount)
}

/// Sum that clamps at `Decimal::MAX`/`MIN` instead of panicking
pub fn saturating_sum<I>(amounts: I) -> Money
where
    I: IntoIterator<Item = Money>,
{
    amounts
        .into_iter()
        .fold(Money::ZERO, |total, amount| total.saturating_add(amount))
}

/// Round to the nearest whole currency unit, halves away from zero
pub fn round_whole(amount: Money) -> Money {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// True when |amount| is below the settle tolerance
pub fn is_negligible(amount: Money, tolerance: Money) -> bool {
    amount.abs() < tolerance
}
