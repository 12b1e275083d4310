use std::sync::Arc;
use std::time::{Duration, Instant};

use calwatch_core::calibrations::{
    CalibrationDeps, ElementHandler, ObservationChangeHandler, Outcome,
};
use calwatch_core::events::{CalculationState, EditType, ObservationChange, ObservationId};
use calwatch_core::session::{ElevatedContext, ServiceAccountContext, SessionProvider};
use calwatch_core::telluric::{
    PollingConfig, PollingDaemon, RecordingTelluricRecalculator, TelluricDeps, TelluricWorkSource,
};
use calwatch_core::utils::SystemClock;

use super::*;
use crate::recalculations::SqliteRecalculationLedger;
use crate::test_support::migrated_provider;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_telluric_item_does_not_block_calibration_writes() {
    let (_dir, sessions) = migrated_provider(4);
    let elevated: Arc<dyn ElevatedContext> =
        Arc::new(ServiceAccountContext::new("calwatch-svc").unwrap());

    let queue = Arc::new(SqliteTelluricQueue::new());
    {
        let mut session = sessions.acquire().await.unwrap();
        queue
            .enqueue(
                session.as_mut(),
                "t1",
                &ObservationId::from("O7"),
                &serde_json::Value::Null,
            )
            .unwrap();
    }

    let recalculator = Arc::new(RecordingTelluricRecalculator::new());
    recalculator.set_delay(Duration::from_millis(1_500));
    let daemon = Arc::new(
        PollingDaemon::new(
            PollingConfig {
                poll_period: Duration::from_secs(60),
                batch_size: 5,
                connections_limit: 2,
            },
            TelluricDeps {
                sessions: sessions.clone(),
                elevated: elevated.clone(),
                source: queue.clone(),
                recalculator: recalculator.clone(),
            },
        )
        .unwrap(),
    );
    let batch = {
        let daemon = daemon.clone();
        tokio::spawn(async move { daemon.run_batch().await })
    };

    let deadline = Instant::now() + Duration::from_secs(1);
    while recalculator.peak_in_flight() == 0 {
        assert!(Instant::now() < deadline, "telluric item never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let ledger = Arc::new(SqliteRecalculationLedger::new(Arc::new(SystemClock)));
    let handler = ObservationChangeHandler::new(CalibrationDeps {
        sessions: sessions.clone(),
        elevated,
        service: ledger.clone(),
        clock: Arc::new(SystemClock),
    });
    let change = ObservationChange::new(
        "O1",
        "P1",
        EditType::Updated,
        Some(CalculationState::Calculating),
        Some(CalculationState::Ready),
    );

    let started = Instant::now();
    let outcome = handler.handle(&change).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome, Outcome::Recalculated);
    assert!(
        elapsed < Duration::from_millis(500),
        "calibration write waited {:?} behind the telluric item",
        elapsed
    );
    assert!(recalculator.processed().is_empty());

    let report = batch.await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(recalculator.processed(), vec!["t1".to_string()]);

    let mut session = sessions.acquire().await.unwrap();
    let rows = ledger.load_calibration_requests(session.as_mut()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].program_id, "P1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_transaction_leaves_the_write_lock_free() {
    let (_dir, sessions) = migrated_provider(2);
    let queue = SqliteTelluricQueue::new();

    let mut reader = sessions.acquire().await.unwrap();
    reader.begin_read().await.unwrap();
    assert!(queue.fetch_batch(reader.as_mut(), 10).await.unwrap().is_empty());

    let mut writer = sessions.acquire().await.unwrap();
    let started = Instant::now();
    writer.begin().await.unwrap();
    queue
        .enqueue(
            writer.as_mut(),
            "t1",
            &ObservationId::from("O1"),
            &serde_json::Value::Null,
        )
        .unwrap();
    writer.commit().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    reader.commit().await.unwrap();
}
