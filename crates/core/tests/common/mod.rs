//! Shared wiring for the core integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use calwatch_core::calibrations::{
    CalibrationDeps, CalibrationTimeHandler, Dispatcher, ObservationChangeHandler,
    RecordingRecalculationService,
};
use calwatch_core::events::{CalculationState, CalibrationTimeChange, EditType, ObservationChange};
use calwatch_core::session::{InMemorySessionProvider, ServiceAccountContext};
use calwatch_core::topic::Topic;
use calwatch_core::utils::ManualClock;

pub struct World {
    pub service: Arc<RecordingRecalculationService>,
    pub sessions: Arc<InMemorySessionProvider>,
    pub elevated: Arc<ServiceAccountContext>,
    pub clock: Arc<ManualClock>,
    pub observations: Topic<ObservationChange>,
    pub calibration_times: Topic<CalibrationTimeChange>,
}

impl World {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            service: Arc::new(RecordingRecalculationService::new()),
            sessions: Arc::new(InMemorySessionProvider::new(max_sessions)),
            elevated: Arc::new(ServiceAccountContext::new("calwatch-it").unwrap()),
            clock: Arc::new(ManualClock::new(at(2025, 6, 1, 15, 42))),
            observations: Topic::new("observations"),
            calibration_times: Topic::new("calibration-times"),
        }
    }

    pub fn deps(&self) -> CalibrationDeps {
        CalibrationDeps {
            sessions: self.sessions.clone(),
            elevated: self.elevated.clone(),
            service: self.service.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn observation_dispatcher(&self, depth: usize) -> Arc<Dispatcher<ObservationChange>> {
        Arc::new(Dispatcher::new(
            "observation-calculation-state",
            self.observations.clone(),
            depth,
            Arc::new(ObservationChangeHandler::new(self.deps())),
        ))
    }

    pub fn calibration_time_dispatcher(
        &self,
        depth: usize,
    ) -> Arc<Dispatcher<CalibrationTimeChange>> {
        Arc::new(Dispatcher::new(
            "calibration-time",
            self.calibration_times.clone(),
            depth,
            Arc::new(CalibrationTimeHandler::new(self.deps())),
        ))
    }
}

pub fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, hh, mm, 0).unwrap()
}

pub fn became_ready(observation: &str, program: &str) -> ObservationChange {
    ObservationChange::new(
        observation,
        program,
        EditType::Updated,
        Some(CalculationState::Calculating),
        Some(CalculationState::Ready),
    )
}

/// Polls `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
