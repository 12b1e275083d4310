use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What the group does when a task panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restarts allowed per task. Zero leaves a crashed task down.
    pub max_restarts: u32,
    /// Delay before the first restart; doubles on each further restart.
    pub backoff: Duration,
}

impl RestartPolicy {
    pub const fn never() -> Self {
        Self {
            max_restarts: 0,
            backoff: Duration::ZERO,
        }
    }

    fn delay_for(&self, restart: u32) -> Duration {
        let factor = 1u32.checked_shl(restart.min(16)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// How a supervised task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub name: String,
    /// Times the task was restarted after a panic.
    pub restarts: u32,
    /// Message of the last panic, if the task ever panicked.
    pub last_panic: Option<String>,
}

/// Owns a fixed set of background loops and stops them together.
///
/// Each task is built by a factory from the group's cancellation token. A
/// panic is caught at the task boundary and never reaches sibling tasks; the
/// [`RestartPolicy`] decides whether the factory is invoked again.
pub struct TaskGroup {
    cancel: CancellationToken,
    policy: RestartPolicy,
    tasks: Vec<(String, JoinHandle<TaskSummary>)>,
}

impl TaskGroup {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            cancel: CancellationToken::new(),
            policy,
            tasks: Vec::new(),
        }
    }

    /// A token that is cancelled when the group shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Starts a supervised task.
    ///
    /// The future returned by `factory` should return once the token it was
    /// given is cancelled. Returning normally ends the task without restart.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let cancel = self.cancel.clone();
        let policy = self.policy;
        let task_name = name.clone();

        let handle = tokio::spawn(async move { supervise(task_name, factory, cancel, policy).await });
        info!("Started background task '{}'", name);
        self.tasks.push((name, handle));
    }

    /// Cancels every task and waits for all of them to finish.
    ///
    /// Tasks finish their in-flight unit of work before observing the
    /// cancellation, so this only returns once no work is left open.
    pub async fn shutdown(self) -> Vec<TaskSummary> {
        info!("Shutting down {} background task(s)", self.tasks.len());
        self.cancel.cancel();

        let mut summaries = Vec::with_capacity(self.tasks.len());
        for (name, handle) in self.tasks {
            match handle.await {
                Ok(summary) => {
                    debug!("Background task '{}' stopped", name);
                    summaries.push(summary);
                }
                Err(join_err) => {
                    error!("Background task '{}' failed to join: {}", name, join_err);
                    summaries.push(TaskSummary {
                        name,
                        restarts: 0,
                        last_panic: Some(join_err.to_string()),
                    });
                }
            }
        }
        summaries
    }
}

async fn supervise<F, Fut>(
    name: String,
    factory: F,
    cancel: CancellationToken,
    policy: RestartPolicy,
) -> TaskSummary
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut summary = TaskSummary {
        name,
        restarts: 0,
        last_panic: None,
    };

    loop {
        let run = AssertUnwindSafe(factory(cancel.clone())).catch_unwind().await;
        let panic = match run {
            Ok(()) => return summary,
            Err(payload) => panic_message(payload.as_ref()),
        };

        error!("Background task '{}' panicked: {}", summary.name, panic);
        summary.last_panic = Some(panic);

        if cancel.is_cancelled() {
            return summary;
        }
        if summary.restarts >= policy.max_restarts {
            warn!(
                "Background task '{}' stays down after {} restart(s)",
                summary.name, summary.restarts
            );
            return summary;
        }

        let delay = policy.delay_for(summary.restarts);
        tokio::select! {
            _ = cancel.cancelled() => return summary,
            _ = tokio::time::sleep(delay) => {}
        }
        summary.restarts += 1;
        warn!(
            "Restarting background task '{}' (restart {} of {})",
            summary.name, summary.restarts, policy.max_restarts
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
