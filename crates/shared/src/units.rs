//! Conversion between human-facing ether amounts and base units.

use alloy_primitives::utils::{self, UnitsError};
use thiserror::Error;

use crate::domain::Wei;

/// Number of decimal places between one ether and one wei.
pub const ETHER_DECIMALS: usize = 18;
/// Widest whole-ether part that still fits in 256 bits of wei.
const MAX_WHOLE_DIGITS: usize = 59;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("invalid amount: {0}")]
    Invalid(String),
    #[error("amount has more than 18 decimal places: {0}")]
    TooPrecise(String),
    #[error("amount is too large: {0}")]
    Overflow(String),
}

/// Parses a non-negative decimal ether string ("1", "0.1", ".5") into wei.
pub fn parse_ether(raw: &str) -> Result<Wei, AmountError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }

    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(AmountError::Invalid(trimmed.to_string()));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(AmountError::Invalid(trimmed.to_string()));
    }
    if fraction.len() > ETHER_DECIMALS {
        return Err(AmountError::TooPrecise(trimmed.to_string()));
    }
    if whole.trim_start_matches('0').len() > MAX_WHOLE_DIGITS {
        return Err(AmountError::Overflow(trimmed.to_string()));
    }

    let whole = if whole.is_empty() { "0" } else { whole };
    let normalized = if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    };
    utils::parse_ether(&normalized).map_err(|err: UnitsError| {
        AmountError::Overflow(format!("{trimmed} ({err})"))
    })
}

/// Formats wei as the shortest exact ether string.
pub fn format_ether(amount: Wei) -> String {
    let formatted = utils::format_ether(amount);
    match formatted.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => formatted,
    }
}
