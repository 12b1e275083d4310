use std::time::Duration;

/// Backlog of the topics fed by the change-feed bridges.
pub const DEFAULT_TOPIC_BACKLOG: usize = 1024;

/// Queue depth of each dispatcher's subscription.
pub const DEFAULT_DISPATCHER_QUEUE_DEPTH: usize = 100;

/// Pending telluric items pulled per poll.
pub const DEFAULT_TELLURIC_BATCH_SIZE: usize = 10;

/// Sessions the telluric daemon may hold at once.
pub const DEFAULT_TELLURIC_CONNECTIONS_LIMIT: usize = 2;

pub const DEFAULT_TELLURIC_POLL_PERIOD: Duration = Duration::from_secs(60);

/// Delay before a feed bridge retries after `next_batch` fails.
pub const FEED_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Dispatcher names, used in logs and task names.
pub const OBSERVATION_CHANGE_DISPATCHER: &str = "observation-calculation-state";
pub const CALIBRATION_TIME_DISPATCHER: &str = "calibration-time";
pub const TELLURIC_DAEMON: &str = "telluric-polling";

/// Outbox stream names the feed bridges read.
pub const OBSERVATION_CHANGE_STREAM: &str = "observation-changes";
pub const CALIBRATION_TIME_STREAM: &str = "calibration-time-changes";
