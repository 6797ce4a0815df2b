//! American ↔ decimal odds conversion.
//!
//! Decimal prices are kept as `Decimal` so the common quotes (+150, -200,
//! -110) convert without float drift. American odds with `|a| < 100` are
//! not valid quotes and are rejected here rather than upstream.

use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;

use crate::types::EngineError;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Reject American odds that cannot be converted.
pub fn validate_american(american: i32) -> Result<i32, EngineError> {
    if american.unsigned_abs() < 100 {
        return Err(EngineError::InvalidOdds(format!(
            "American odds {american} out of range (|odds| must be >= 100)"
        )));
    }
    Ok(american)
}

/// American → decimal: `1 + a/100` for positive odds, `1 + 100/|a|` otherwise.
pub fn american_to_decimal(american: i32) -> Result<Decimal, EngineError> {
    let american = validate_american(american)?;
    let a = Decimal::from(american);
    let decimal = if american > 0 {
        Decimal::ONE + a / HUNDRED
    } else {
        Decimal::ONE + HUNDRED / a.abs()
    };
    Ok(decimal)
}

/// Decimal → American, rounding half away from zero.
///
/// Returns `0` for `decimal_odds <= 1` and for prices whose American
/// equivalent does not fit; callers must treat that as "no valid odds".
/// Even money (2.0) maps to +100.
pub fn decimal_to_american(decimal_odds: Decimal) -> i32 {
    if decimal_odds <= Decimal::ONE {
        return 0;
    }
    let net = decimal_odds - Decimal::ONE;
    let raw = if decimal_odds >= Decimal::TWO {
        net.checked_mul(HUNDRED)
    } else {
        (-HUNDRED).checked_div(net)
    };
    raw.and_then(|r| {
        r.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i32()
    })
    .unwrap_or(0)
}

/// Validate a quoted decimal price (must pay out more than the stake).
pub fn validate_decimal(decimal_odds: Decimal) -> Result<Decimal, EngineError> {
    if decimal_odds <= Decimal::ONE {
        return Err(EngineError::InvalidOdds(format!(
            "decimal odds {decimal_odds} must be greater than 1"
        )));
    }
    Ok(decimal_odds)
}

/// Probability implied by a decimal price, with no margin adjustment.
pub fn implied_probability(decimal_odds: Decimal) -> Result<Decimal, EngineError> {
    let decimal_odds = validate_decimal(decimal_odds)?;
    Ok(Decimal::ONE / decimal_odds)
}

/// Resolve both representations from whatever an observation carried.
///
/// A present decimal price wins; the American price is taken as quoted
/// when present and derived otherwise.
pub fn normalize_quote(
    american: Option<i32>,
    decimal: Option<Decimal>,
) -> Result<(Decimal, i32), EngineError> {
    match (decimal, american) {
        (Some(d), Some(a)) => {
            let d = validate_decimal(d)?;
            let a = validate_american(a)?;
            Ok((d, a))
        }
        (Some(d), None) => {
            let d = validate_decimal(d)?;
            match decimal_to_american(d) {
                0 => Err(EngineError::InvalidOdds(format!(
                    "decimal odds {d} have no American equivalent"
                ))),
                a => Ok((d, a)),
            }
        }
        (None, Some(a)) => Ok((american_to_decimal(a)?, a)),
        (None, None) => Err(EngineError::InvalidOdds(
            "observation carries neither American nor decimal odds".to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
