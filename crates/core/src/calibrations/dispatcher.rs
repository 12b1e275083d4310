//! Topic dispatcher.
//!
//! Attaches to one topic and hands elements to an [`ElementHandler`] strictly
//! one at a time in arrival order, so a subscription never has two
//! recalculations in flight. Per-element failures are logged and counted and
//! the loop moves on to the next element.
//!
//! Cancellation is only observed between elements: an element whose handler
//! has started always runs to completion (and commits or rolls back) before
//! the loop exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::topic::{RecvError, Subscription, Topic};

/// Result of handling one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The guard rejected the element.
    Skipped,
    /// The recalculation ran and committed.
    Recalculated,
}

/// Per-element work run by a [`Dispatcher`].
#[async_trait]
pub trait ElementHandler<E>: Send + Sync {
    async fn handle(&self, element: &E) -> Result<Outcome>;

    /// Short description of the element for log lines.
    fn describe(&self, element: &E) -> String;
}

/// Running counters of a dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    received: AtomicU64,
    lagged: AtomicU64,
    skipped: AtomicU64,
    recalculated: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`DispatcherStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStatsSnapshot {
    pub received: u64,
    /// Elements dropped because the subscription fell behind.
    pub lagged: u64,
    pub skipped: u64,
    pub recalculated: u64,
    pub failed: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            received: self.received.load(Ordering::SeqCst),
            lagged: self.lagged.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            recalculated: self.recalculated.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

pub struct Dispatcher<E> {
    name: String,
    topic: Topic<E>,
    queue_depth: usize,
    handler: Arc<dyn ElementHandler<E>>,
    stats: Arc<DispatcherStats>,
}

impl<E> Dispatcher<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        topic: Topic<E>,
        queue_depth: usize,
        handler: Arc<dyn ElementHandler<E>>,
    ) -> Self {
        Self {
            name: name.into(),
            topic,
            queue_depth,
            handler,
            stats: Arc::new(DispatcherStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        self.stats.clone()
    }

    /// Subscribes to the topic and processes elements until cancelled or
    /// until the topic closes.
    pub async fn run(&self, cancel: CancellationToken) {
        match self.topic.subscribe(self.queue_depth) {
            Ok(subscription) => self.run_subscription(subscription, cancel).await,
            Err(e) => error!("Dispatcher '{}' could not subscribe: {}", self.name, e),
        }
    }

    /// Processes elements from an existing subscription.
    pub async fn run_subscription(
        &self,
        mut subscription: Subscription<E>,
        cancel: CancellationToken,
    ) {
        info!(
            "Dispatcher '{}' attached to topic '{}'",
            self.name,
            subscription.topic()
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = subscription.recv() => next,
            };

            match next {
                Ok(element) => self.process(&element).await,
                Err(RecvError::Lagged(missed)) => {
                    self.stats.lagged.fetch_add(missed, Ordering::SeqCst);
                    warn!(
                        "Dispatcher '{}' fell behind; {} element(s) dropped",
                        self.name, missed
                    );
                }
                Err(RecvError::Closed) => {
                    info!("Dispatcher '{}' topic closed", self.name);
                    break;
                }
            }
        }

        info!("Dispatcher '{}' stopped", self.name);
    }

    async fn process(&self, element: &E) {
        self.stats.received.fetch_add(1, Ordering::SeqCst);

        match self.handler.handle(element).await {
            Ok(Outcome::Recalculated) => {
                self.stats.recalculated.fetch_add(1, Ordering::SeqCst);
                info!(
                    "Dispatcher '{}' recalculated for {}",
                    self.name,
                    self.handler.describe(element)
                );
            }
            Ok(Outcome::Skipped) => {
                self.stats.skipped.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "Dispatcher '{}' skipped {}",
                    self.name,
                    self.handler.describe(element)
                );
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                warn!(
                    "Dispatcher '{}' failed for {}: {}",
                    self.name,
                    self.handler.describe(element),
                    e
                );
            }
        }
    }
}
