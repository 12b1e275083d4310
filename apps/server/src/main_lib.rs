use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use calwatch_core::calibrations::{
    CalibrationDeps, CalibrationTimeHandler, Dispatcher, ObservationChangeHandler,
};
use calwatch_core::constants::{
    CALIBRATION_TIME_DISPATCHER, CALIBRATION_TIME_STREAM, OBSERVATION_CHANGE_DISPATCHER,
    OBSERVATION_CHANGE_STREAM, TELLURIC_DAEMON,
};
use calwatch_core::events::{CalibrationTimeChange, ObservationChange};
use calwatch_core::feed::{run_feed_bridge, ChangeFeed};
use calwatch_core::session::{ServiceAccountContext, Session, SessionProvider};
use calwatch_core::tasks::{TaskGroup, TaskSummary};
use calwatch_core::telluric::{PollingDaemon, TelluricDeps};
use calwatch_core::topic::Topic;
use calwatch_core::utils::SystemClock;
use calwatch_storage_sqlite::{
    db, SqliteOutboxFeed, SqliteRecalculationLedger, SqliteSessionProvider, SqliteTelluricQueue,
};

use crate::config::{Config, LogFormat};
use crate::telluric_client::HttpTelluricRecalculator;

/// The running orchestrator: topics, dispatchers, the optional telluric
/// daemon and the task group supervising them.
pub struct Orchestrator {
    pub sessions: Arc<SqliteSessionProvider>,
    pub observation_topic: Topic<ObservationChange>,
    pub calibration_time_topic: Topic<CalibrationTimeChange>,
    pub observation_dispatcher: Arc<Dispatcher<ObservationChange>>,
    pub calibration_time_dispatcher: Arc<Dispatcher<CalibrationTimeChange>>,
    pub telluric_daemon: Option<Arc<PollingDaemon>>,
    tasks: TaskGroup,
}

impl Orchestrator {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stops every task, letting in-flight work finish for up to `grace`.
    pub async fn shutdown(self, grace: Duration) -> anyhow::Result<Vec<TaskSummary>> {
        let Orchestrator {
            sessions,
            observation_topic,
            calibration_time_topic,
            tasks,
            ..
        } = self;

        let summaries = match tokio::time::timeout(grace, tasks.shutdown()).await {
            Ok(summaries) => summaries,
            Err(_) => {
                anyhow::bail!("background tasks did not stop within {:?}", grace);
            }
        };

        observation_topic.close();
        calibration_time_topic.close();
        for summary in &summaries {
            if summary.restarts > 0 {
                tracing::warn!(
                    "Task '{}' was restarted {} time(s); last panic: {}",
                    summary.name,
                    summary.restarts,
                    summary.last_panic.as_deref().unwrap_or("-")
                );
            }
        }
        drop(sessions);
        tracing::info!("Orchestrator stopped");
        Ok(summaries)
    }
}

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init(),
    }
}

pub async fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    let elevated = Arc::new(ServiceAccountContext::new(config.service_user.as_str())?);
    tracing::info!("Acting as service user '{}'", elevated.identity());

    let db_path = db::init(&config.db_path)?;
    tracing::info!("Database path in use: {}", db_path);
    let pool = db::create_pool(&db_path, config.max_calibration_connections)?;
    db::run_migrations(&pool)?;

    let sessions = Arc::new(SqliteSessionProvider::new(pool));
    check_sessions(sessions.as_ref()).await?;

    let clock = Arc::new(SystemClock);
    let ledger = Arc::new(SqliteRecalculationLedger::new(clock.clone()));
    let deps = CalibrationDeps {
        sessions: sessions.clone(),
        elevated: elevated.clone(),
        service: ledger,
        clock,
    };

    let observation_topic: Topic<ObservationChange> = Topic::new(OBSERVATION_CHANGE_STREAM);
    let calibration_time_topic: Topic<CalibrationTimeChange> = Topic::new(CALIBRATION_TIME_STREAM);

    let observation_dispatcher = Arc::new(Dispatcher::new(
        OBSERVATION_CHANGE_DISPATCHER,
        observation_topic.clone(),
        config.dispatcher_queue_depth,
        Arc::new(ObservationChangeHandler::new(deps.clone())),
    ));
    let calibration_time_dispatcher = Arc::new(Dispatcher::new(
        CALIBRATION_TIME_DISPATCHER,
        calibration_time_topic.clone(),
        config.dispatcher_queue_depth,
        Arc::new(CalibrationTimeHandler::new(deps)),
    ));

    let telluric_daemon = match &config.telluric_service_url {
        Some(url) => {
            let queue = Arc::new(SqliteTelluricQueue::new());
            let recalculator = Arc::new(HttpTelluricRecalculator::new(url.clone(), queue.clone())?);
            let daemon = PollingDaemon::new(
                config.telluric,
                TelluricDeps {
                    sessions: sessions.clone(),
                    elevated: elevated.clone(),
                    source: queue,
                    recalculator,
                },
            )?;
            tracing::info!("Telluric daemon will post to {}", url);
            Some(Arc::new(daemon))
        }
        None => {
            tracing::info!("CALWATCH_TELLURIC_SERVICE_URL not set; telluric daemon disabled");
            None
        }
    };

    let mut tasks = TaskGroup::new(config.restart_policy);

    // Dispatchers subscribe before the bridges start publishing. Each bridge
    // moves at most `topic_backlog` elements per read.
    {
        let dispatcher = observation_dispatcher.clone();
        tasks.spawn(OBSERVATION_CHANGE_DISPATCHER, move |cancel| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run(cancel).await }
        });
    }
    {
        let dispatcher = calibration_time_dispatcher.clone();
        tasks.spawn(CALIBRATION_TIME_DISPATCHER, move |cancel| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run(cancel).await }
        });
    }
    wait_for_subscribers(&observation_topic, &calibration_time_topic).await;

    let observation_feed: Arc<dyn ChangeFeed<ObservationChange>> = Arc::new(
        SqliteOutboxFeed::new(sessions.clone(), OBSERVATION_CHANGE_STREAM, config.outbox_poll_interval)
            .with_batch_limit(config.topic_backlog),
    );
    spawn_bridge(
        &mut tasks,
        OBSERVATION_CHANGE_STREAM,
        observation_feed,
        observation_topic.clone(),
    );
    let calibration_time_feed: Arc<dyn ChangeFeed<CalibrationTimeChange>> = Arc::new(
        SqliteOutboxFeed::new(sessions.clone(), CALIBRATION_TIME_STREAM, config.outbox_poll_interval)
            .with_batch_limit(config.topic_backlog),
    );
    spawn_bridge(
        &mut tasks,
        CALIBRATION_TIME_STREAM,
        calibration_time_feed,
        calibration_time_topic.clone(),
    );

    if let Some(daemon) = &telluric_daemon {
        let daemon = daemon.clone();
        tasks.spawn(TELLURIC_DAEMON, move |cancel| {
            let daemon = daemon.clone();
            async move { daemon.run(cancel).await }
        });
    }

    tracing::info!("Orchestrator started with {} task(s)", tasks.len());

    Ok(Orchestrator {
        sessions,
        observation_topic,
        calibration_time_topic,
        observation_dispatcher,
        calibration_time_dispatcher,
        telluric_daemon,
        tasks,
    })
}

fn spawn_bridge<E>(
    tasks: &mut TaskGroup,
    stream: &'static str,
    feed: Arc<dyn ChangeFeed<E>>,
    topic: Topic<E>,
) where
    E: Clone + Send + Sync + 'static,
{
    tasks.spawn(format!("{}-feed", stream), move |cancel| {
        run_feed_bridge(stream, feed.clone(), topic.clone(), cancel)
    });
}

/// One session round-trip, so an unreachable store fails startup.
async fn check_sessions(sessions: &dyn SessionProvider) -> anyhow::Result<()> {
    let mut session = sessions.acquire().await?;
    session.begin().await?;
    session.commit().await?;
    Ok(())
}

async fn wait_for_subscribers(
    observations: &Topic<ObservationChange>,
    calibration_times: &Topic<CalibrationTimeChange>,
) {
    for _ in 0..100 {
        if observations.subscriber_count() > 0 && calibration_times.subscriber_count() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tracing::warn!("Dispatchers did not subscribe within 1s; starting feeds anyway");
}
