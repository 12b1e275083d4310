//! Recording recalculation service for tests and dry runs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::traits::RecalculationService;
use crate::errors::{Error, Result};
use crate::events::{ObservationId, ProgramId};
use crate::session::Session;

/// A completed call into the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecalculationCall {
    Calibrations {
        program_id: ProgramId,
        as_of: DateTime<Utc>,
    },
    CalibrationTarget {
        program_id: ProgramId,
        observation_id: ObservationId,
    },
}

/// Records successful recalculations instead of performing them.
///
/// Failures, panics and latency can be injected per program.
#[derive(Default)]
pub struct RecordingRecalculationService {
    calibrations: Mutex<HashSet<ObservationId>>,
    failing: Mutex<HashSet<ProgramId>>,
    panicking: Mutex<HashSet<ProgramId>>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<RecalculationCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl RecordingRecalculationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `is_calibration` answer true for this observation.
    pub fn mark_calibration(&self, observation_id: impl Into<ObservationId>) {
        lock(&self.calibrations).insert(observation_id.into());
    }

    /// Recalculations for this program return an error.
    pub fn fail_for(&self, program_id: impl Into<ProgramId>) {
        lock(&self.failing).insert(program_id.into());
    }

    /// Recalculations for this program panic.
    pub fn panic_for(&self, program_id: impl Into<ProgramId>) {
        lock(&self.panicking).insert(program_id.into());
    }

    /// Every recalculation takes this long before completing.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn calls(&self) -> Vec<RecalculationCall> {
        lock(&self.calls).clone()
    }

    /// Recalculations currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of recalculations ever running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn record(&self, program_id: &ProgramId, call: RecalculationCall) -> Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.panicking).contains(program_id) {
            panic!("recalculation panicked for program {}", program_id);
        }
        if lock(&self.failing).contains(program_id) {
            return Err(Error::Recalculation(format!(
                "injected failure for program {}",
                program_id
            )));
        }

        lock(&self.calls).push(call);
        Ok(())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl RecalculationService for RecordingRecalculationService {
    async fn is_calibration(
        &self,
        _session: &mut dyn Session,
        observation_id: &ObservationId,
    ) -> Result<bool> {
        Ok(lock(&self.calibrations).contains(observation_id))
    }

    async fn recalculate_calibrations(
        &self,
        _session: &mut dyn Session,
        program_id: &ProgramId,
        as_of: DateTime<Utc>,
    ) -> Result<()> {
        let call = RecalculationCall::Calibrations {
            program_id: program_id.clone(),
            as_of,
        };
        self.record(program_id, call).await
    }

    async fn recalculate_calibration_target(
        &self,
        _session: &mut dyn Session,
        program_id: &ProgramId,
        observation_id: &ObservationId,
    ) -> Result<()> {
        let call = RecalculationCall::CalibrationTarget {
            program_id: program_id.clone(),
            observation_id: observation_id.clone(),
        };
        self.record(program_id, call).await
    }
}
