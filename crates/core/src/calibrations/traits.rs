use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::events::{ObservationId, ProgramId};
use crate::session::Session;

/// Calibration recalculation operations.
///
/// Every call runs on the session of the transaction the caller opened; the
/// implementation decides what a recalculation actually produces.
#[async_trait]
pub trait RecalculationService: Send + Sync {
    /// Whether the observation is itself a calibration.
    async fn is_calibration(
        &self,
        session: &mut dyn Session,
        observation_id: &ObservationId,
    ) -> Result<bool>;

    /// Recomputes the program's calibrations as of `as_of`.
    async fn recalculate_calibrations(
        &self,
        session: &mut dyn Session,
        program_id: &ProgramId,
        as_of: DateTime<Utc>,
    ) -> Result<()>;

    /// Recomputes the calibration target of one observation.
    async fn recalculate_calibration_target(
        &self,
        session: &mut dyn Session,
        program_id: &ProgramId,
        observation_id: &ObservationId,
    ) -> Result<()>;
}
