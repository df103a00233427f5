//! Entry validator: requires trade_archetype, invalidation fields, a
//! future time_stop satisfying the archetype's minimum hold,
//! take_profit_r >= 1, and a valid trail_mode.

use super::normalize::{NormalizedOrderInput, TrailMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryViolation {
    MissingInvalidation,
    TimeStopNotFuture,
    TimeStopBelowMinimumHold(&'static str),
    MissingTimeStop,
    TakeProfitBelowOne,
    MissingTakeProfit,
    MissingTrailMode,
}

impl std::fmt::Display for EntryViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryViolation::MissingInvalidation => write!(
                f,
                "missing invalidation_type (and invalidation_price for a price-level invalidation)"
            ),
            EntryViolation::TimeStopNotFuture => write!(f, "time_stop_at_ms must be in the future"),
            EntryViolation::TimeStopBelowMinimumHold(archetype) => write!(
                f,
                "time_stop_at_ms does not satisfy the {archetype} archetype's minimum hold"
            ),
            EntryViolation::MissingTimeStop => write!(f, "missing time_stop_at_ms"),
            EntryViolation::TakeProfitBelowOne => write!(f, "take_profit_r must be >= 1"),
            EntryViolation::MissingTakeProfit => write!(f, "missing take_profit_r"),
            EntryViolation::MissingTrailMode => write!(f, "missing trail_mode"),
        }
    }
}
impl std::error::Error for EntryViolation {}

/// `now_ms` is threaded in rather than read from the clock so tests are
/// deterministic.
pub fn validate_entry(order: &NormalizedOrderInput, now_ms: i64) -> Result<(), EntryViolation> {
    if order.invalidation_type.as_deref().unwrap_or("").is_empty() {
        return Err(EntryViolation::MissingInvalidation);
    }
    let price_level = order
        .invalidation_type
        .as_deref()
        .map(|t| t.eq_ignore_ascii_case("price_level"))
        .unwrap_or(false);
    if price_level && order.invalidation_price.is_none() {
        return Err(EntryViolation::MissingInvalidation);
    }

    let time_stop = order.time_stop_at_ms.ok_or(EntryViolation::MissingTimeStop)?;
    if time_stop <= now_ms {
        return Err(EntryViolation::TimeStopNotFuture);
    }
    let min_hold = order.trade_archetype.min_hold();
    if time_stop - now_ms < min_hold.num_milliseconds() {
        return Err(EntryViolation::TimeStopBelowMinimumHold(order.trade_archetype.as_str()));
    }

    let tp_r = order.take_profit_r.ok_or(EntryViolation::MissingTakeProfit)?;
    if tp_r < 1.0 {
        return Err(EntryViolation::TakeProfitBelowOne);
    }

    if order.trail_mode.is_none() {
        return Err(EntryViolation::MissingTrailMode);
    }

    Ok(())
}

/// Used only so `TrailMode::None` is a valid, explicit choice rather than
/// the validator treating "no trailing stop" as a missing field.
pub fn trail_mode_is_explicit_none(order: &NormalizedOrderInput) -> bool {
    order.trail_mode == Some(TrailMode::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade_contract::normalize::{normalize_order_input, RawOrderInput};
    use serde_json::Value;

    fn valid_raw(archetype: &str, hold_ms: i64) -> RawOrderInput {
        RawOrderInput {
            symbol: Some("BTC".to_string()),
            side: Some("buy".to_string()),
            size: Some(Value::from(1.0)),
            trade_archetype: Some(archetype.to_string()),
            invalidation_type: Some("price_level".to_string()),
            invalidation_price: Some(Value::from(60000.0)),
            time_stop_at_ms: Some(Value::from(hold_ms)),
            take_profit_r: Some(Value::from(1.5)),
            trail_mode: Some("atr".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn scalp_requires_only_a_few_minutes() {
        let now = 1_000_000_i64;
        let raw = valid_raw("scalp", now + 4 * 60 * 1000);
        let n = normalize_order_input(&raw);
        assert!(validate_entry(&n, now).is_ok());
    }

    #[test]
    fn intraday_rejects_sub_hour_hold() {
        let now = 1_000_000_i64;
        let raw = valid_raw("intraday", now + 20 * 60 * 1000);
        let n = normalize_order_input(&raw);
        assert_eq!(
            validate_entry(&n, now),
            Err(EntryViolation::TimeStopBelowMinimumHold("intraday"))
        );
    }

    #[test]
    fn take_profit_below_one_rejected() {
        let now = 1_000_000_i64;
        let mut raw = valid_raw("swing", now + 5 * 3600 * 1000);
        raw.take_profit_r = Some(Value::from(0.5));
        let n = normalize_order_input(&raw);
        assert_eq!(validate_entry(&n, now), Err(EntryViolation::TakeProfitBelowOne));
    }
}
