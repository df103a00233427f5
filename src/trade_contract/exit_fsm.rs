//! Exit FSM validator: reduce-only orders must carry a non-discretionary
//! `exit_mode`. `manual`/missing is blocked unless `emergency_override=true`
//! with a non-empty `emergency_reason`. `thesis_invalidation_hit` must
//! agree with `exit_mode`.

use super::normalize::{ExitMode, NormalizedOrderInput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitFsmViolation {
    ManualOrUnknownBlocked,
    InconsistentInvalidationFlag,
}

impl std::fmt::Display for ExitFsmViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitFsmViolation::ManualOrUnknownBlocked => {
                write!(f, "manual/unknown reduce-only exits are blocked")
            }
            ExitFsmViolation::InconsistentInvalidationFlag => {
                write!(f, "thesis_invalidation_hit is inconsistent with exit_mode")
            }
        }
    }
}
impl std::error::Error for ExitFsmViolation {}

/// Normalizes a missing `exit_mode` to `manual` before validating.
pub fn validate_exit(order: &NormalizedOrderInput) -> Result<(), ExitFsmViolation> {
    if !order.reduce_only {
        return Ok(());
    }

    let exit_mode = order.exit_mode.unwrap_or(ExitMode::Manual);

    if exit_mode == ExitMode::Manual {
        let override_ok = order.emergency_override
            && order.emergency_reason.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        if !override_ok {
            return Err(ExitFsmViolation::ManualOrUnknownBlocked);
        }
        return Ok(());
    }

    let expected_hit = exit_mode == ExitMode::ThesisInvalidation;
    if order.thesis_invalidation_hit != expected_hit {
        return Err(ExitFsmViolation::InconsistentInvalidationFlag);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade_contract::normalize::{normalize_order_input, RawOrderInput};
    use serde_json::Value;

    #[test]
    fn manual_reduce_only_blocked_without_override() {
        // {reduce_only:true, exit_mode:"manual", thesis_invalidation_hit:false}
        let raw = RawOrderInput {
            reduce_only: Some(Value::Bool(true)),
            exit_mode: Some("manual".to_string()),
            thesis_invalidation_hit: Some(Value::Bool(false)),
            ..Default::default()
        };
        let n = normalize_order_input(&raw);
        assert_eq!(validate_exit(&n), Err(ExitFsmViolation::ManualOrUnknownBlocked));
    }

    #[test]
    fn manual_reduce_only_allowed_with_emergency_override() {
        let raw = RawOrderInput {
            reduce_only: Some(Value::Bool(true)),
            exit_mode: Some("manual".to_string()),
            thesis_invalidation_hit: Some(Value::Bool(false)),
            emergency_override: Some(Value::Bool(true)),
            emergency_reason: Some("venue outage, flattening".to_string()),
            ..Default::default()
        };
        let n = normalize_order_input(&raw);
        assert!(validate_exit(&n).is_ok());
    }

    #[test]
    fn missing_exit_mode_normalizes_to_manual_and_is_blocked() {
        let raw = RawOrderInput { reduce_only: Some(Value::Bool(true)), ..Default::default() };
        let n = normalize_order_input(&raw);
        assert!(n.exit_mode.is_none());
        assert_eq!(validate_exit(&n), Err(ExitFsmViolation::ManualOrUnknownBlocked));
    }

    #[test]
    fn take_profit_requires_hit_flag_false() {
        let raw = RawOrderInput {
            reduce_only: Some(Value::Bool(true)),
            exit_mode: Some("take_profit".to_string()),
            thesis_invalidation_hit: Some(Value::Bool(true)),
            ..Default::default()
        };
        let n = normalize_order_input(&raw);
        assert_eq!(validate_exit(&n), Err(ExitFsmViolation::InconsistentInvalidationFlag));
    }

    #[test]
    fn thesis_invalidation_requires_hit_flag_true() {
        let raw = RawOrderInput {
            reduce_only: Some(Value::Bool(true)),
            exit_mode: Some("stop_loss".to_string()),
            ..Default::default()
        };
        // normalize_order_input already sets thesis_invalidation_hit=true for this combination.
        let n = normalize_order_input(&raw);
        assert!(validate_exit(&n).is_ok());
    }
}
