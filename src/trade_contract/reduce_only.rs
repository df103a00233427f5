//! Reduce-only reconciliation against the venue's live position. Caps
//! oversized reduce-only requests to the live size rather than failing
//! them; rejects orders with no position or that would increase exposure.

use super::exit_fsm::{validate_exit, ExitFsmViolation};
use super::normalize::{ExitMode, NormalizedOrderInput};
use crate::venue::{ClearinghouseState, Side};

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileError {
    NoPosition,
    WouldIncreasePosition,
    ExitFsm(ExitFsmViolation),
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::NoPosition => write!(f, "reduce-only order but no live position on this symbol"),
            ReconcileError::WouldIncreasePosition => {
                write!(f, "reduce-only order side would increase the live position")
            }
            ReconcileError::ExitFsm(e) => write!(f, "{e}"),
        }
    }
}
impl std::error::Error for ReconcileError {}

/// Runs the exit FSM and caps size to the live position. `enforce_fsm`
/// gates whether the exit FSM applies at all — modes that don't require
/// it (e.g. `admin`) skip straight to sizing.
pub fn reconcile_reduce_only(
    order: &NormalizedOrderInput,
    state: &ClearinghouseState,
    enforce_fsm: bool,
) -> Result<NormalizedOrderInput, ReconcileError> {
    debug_assert!(order.reduce_only, "reconcile_reduce_only called on a non reduce-only order");

    if enforce_fsm {
        let mut normalized_for_fsm = order.clone();
        if normalized_for_fsm.exit_mode.is_none() {
            normalized_for_fsm.exit_mode = Some(ExitMode::Manual);
        }
        validate_exit(&normalized_for_fsm).map_err(ReconcileError::ExitFsm)?;
    }

    let position = state.position_for(&order.symbol).ok_or(ReconcileError::NoPosition)?;
    if position.szi == 0.0 {
        return Err(ReconcileError::NoPosition);
    }

    let live_is_long = position.szi > 0.0;
    let order_would_increase = match order.side {
        Side::Buy => live_is_long,
        Side::Sell => !live_is_long,
    };
    if order_would_increase {
        return Err(ReconcileError::WouldIncreasePosition);
    }

    let live_size = position.szi.abs();
    let mut capped = order.clone();
    if capped.size > live_size {
        capped.size = live_size;
    }
    Ok(capped)
}
