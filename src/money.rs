//! Money Parsing Module
//!
//! All client-supplied amounts enter the system through this module.
//! Amounts are `rust_decimal::Decimal` with at most [`AMOUNT_SCALE`]
//! fractional digits, matching the `NUMERIC(19, 4)` storage columns.
//!
//! ## Rules
//! 1. Strictly positive: zero and negative amounts are rejected
//! 2. No silent truncation: extra fractional digits are an error
//! 3. Plain notation only: no exponent, sign, grouping or hex
//! 4. At most [`MAX_INTEGER_DIGITS`] whole digits
//!
//! ```rust
//! use bank_ledger::money::parse_amount;
//!
//! let amount = parse_amount("100.50").unwrap();
//! assert_eq!(amount.to_string(), "100.50");
//! ```

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

/// Fractional digits carried by every stored amount
pub const AMOUNT_SCALE: u32 = 4;

/// Whole digits that fit `NUMERIC(19, 4)`
pub const MAX_INTEGER_DIGITS: u32 = 15;

/// Money parsing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount must be greater than zero")]
    NotPositive,

    #[error("amount has {provided} fractional digits, at most {max} allowed")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("invalid amount format: {0}")]
    InvalidFormat(String),

    #[error("amount exceeds {max_digits} integer digits")]
    TooLarge { max_digits: u32 },
}

/// Parse a client amount string into a positive Decimal.
///
/// A leading `-` is reported as [`MoneyError::NotPositive`] rather than a
/// format error so that `"-50.00"` and `"0"` produce the same message.
pub fn parse_amount(amount_str: &str) -> Result<Decimal, MoneyError> {
    let s = amount_str.trim();
    if s.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    let unsigned = s.strip_prefix('-');
    let body = unsigned.unwrap_or(s);

    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(MoneyError::InvalidFormat(format!("'{}'", s)));
    }

    let parts: Vec<&str> = body.split('.').collect();
    match parts.as_slice() {
        [whole] if !whole.is_empty() => {}
        [whole, frac] if !whole.is_empty() && !frac.is_empty() => {}
        _ => return Err(MoneyError::InvalidFormat(format!("'{}'", s))),
    }

    let value = Decimal::from_str(body).map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;

    if unsigned.is_some() || value.is_zero() {
        return Err(MoneyError::NotPositive);
    }

    check_amount(value)?;
    Ok(value)
}

/// Validate an already-decoded Decimal (e.g. from a JSON body).
pub fn check_amount(value: Decimal) -> Result<(), MoneyError> {
    if value.is_sign_negative() || value.is_zero() {
        return Err(MoneyError::NotPositive);
    }
    // "1.2300" has scale 4 but "1.23000" is still only two significant digits
    let normalized = value.normalize();
    if normalized.scale() > AMOUNT_SCALE {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: AMOUNT_SCALE,
        });
    }
    if value.trunc() >= Decimal::from(10i64.pow(MAX_INTEGER_DIGITS)) {
        return Err(MoneyError::TooLarge {
            max_digits: MAX_INTEGER_DIGITS,
        });
    }
    Ok(())
}
