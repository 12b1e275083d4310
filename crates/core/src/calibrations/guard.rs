//! Decides whether an observation change warrants calibration recalculation.
//!
//! Recalculation fires only on a genuine transition into `Ready` of a
//! non-calibration observation that was created or updated. Calibrations are
//! themselves produced by the recalculation, so their state changes must never
//! trigger it.

use crate::events::{CalculationState, EditType, ObservationChange};

/// The part of the guard that depends on the element alone.
pub fn is_ready_transition(change: &ObservationChange) -> bool {
    change.new_state == Some(CalculationState::Ready)
        && change.old_state != change.new_state
        && matches!(change.edit_type, EditType::Created | EditType::Updated)
}

/// The complete guard, given the result of the calibration lookup for the
/// element's observation.
pub fn should_recalculate(change: &ObservationChange, is_calibration: bool) -> bool {
    !is_calibration && is_ready_transition(change)
}
