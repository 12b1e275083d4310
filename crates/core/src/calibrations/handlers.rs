use std::sync::Arc;

use async_trait::async_trait;

use super::dispatcher::{ElementHandler, Outcome};
use super::guard;
use super::traits::RecalculationService;
use crate::errors::Result;
use crate::events::{CalibrationTimeChange, ObservationChange};
use crate::session::{run_transactional, ElevatedContext, SessionProvider};
use crate::utils::{utc_midnight, Clock};

/// Collaborators shared by the calibration handlers.
#[derive(Clone)]
pub struct CalibrationDeps {
    pub sessions: Arc<dyn SessionProvider>,
    pub elevated: Arc<dyn ElevatedContext>,
    pub service: Arc<dyn RecalculationService>,
    pub clock: Arc<dyn Clock>,
}

/// Recalculates a program's calibrations when one of its science
/// observations becomes `Ready`.
pub struct ObservationChangeHandler {
    deps: CalibrationDeps,
}

impl ObservationChangeHandler {
    pub fn new(deps: CalibrationDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ElementHandler<ObservationChange> for ObservationChangeHandler {
    async fn handle(&self, element: &ObservationChange) -> Result<Outcome> {
        // Cheap part of the guard first; only candidates open a transaction.
        if !guard::is_ready_transition(element) {
            return Ok(Outcome::Skipped);
        }

        let as_of = utc_midnight(self.deps.clock.now());
        let service = self.deps.service.clone();
        let change = element.clone();

        let recalculated = run_transactional(
            self.deps.sessions.as_ref(),
            self.deps.elevated.as_ref(),
            move |session| {
                Box::pin(async move {
                    let is_calibration = service
                        .is_calibration(session, &change.observation_id)
                        .await?;
                    if !guard::should_recalculate(&change, is_calibration) {
                        return Ok(false);
                    }
                    service
                        .recalculate_calibrations(session, &change.program_id, as_of)
                        .await?;
                    Ok(true)
                })
            },
        )
        .await?;

        Ok(if recalculated {
            Outcome::Recalculated
        } else {
            Outcome::Skipped
        })
    }

    fn describe(&self, element: &ObservationChange) -> String {
        format!(
            "observation {} of program {} ({:?}: {:?} -> {:?})",
            element.observation_id,
            element.program_id,
            element.edit_type,
            element.old_state,
            element.new_state
        )
    }
}

/// Recalculates the calibration target of every observation whose
/// calibration time changed. There is no guard.
pub struct CalibrationTimeHandler {
    deps: CalibrationDeps,
}

impl CalibrationTimeHandler {
    pub fn new(deps: CalibrationDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ElementHandler<CalibrationTimeChange> for CalibrationTimeHandler {
    async fn handle(&self, element: &CalibrationTimeChange) -> Result<Outcome> {
        let service = self.deps.service.clone();
        let change = element.clone();

        run_transactional(
            self.deps.sessions.as_ref(),
            self.deps.elevated.as_ref(),
            move |session| {
                Box::pin(async move {
                    service
                        .recalculate_calibration_target(
                            session,
                            &change.program_id,
                            &change.observation_id,
                        )
                        .await
                })
            },
        )
        .await?;

        Ok(Outcome::Recalculated)
    }

    fn describe(&self, element: &CalibrationTimeChange) -> String {
        format!(
            "observation {} of program {}",
            element.observation_id, element.program_id
        )
    }
}
