//! Trade contract: deterministic input normalization, entry/exit
//! validators, reduce-only reconciliation against live positions, and the
//! retry-with-widening execution strategy.
//!
//! Raw tool input is a loosely-typed struct (`RawOrderInput` has
//! `Option<String>`/stringly fields the way a planner's JSON would arrive);
//! [`normalize::normalize_order_input`] turns it into the fully-typed
//! [`normalize::NormalizedOrderInput`] rather than threading a dynamic map
//! through the interior of the code.

pub mod entry_validator;
pub mod exit_fsm;
pub mod normalize;
pub mod reduce_only;
pub mod retry;
pub mod terminal;

pub use normalize::{normalize_order_input, NormalizedOrderInput, RawOrderInput};
