//! In-memory telluric queue and recalculator.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{TelluricBatchItem, TelluricRecalculator, TelluricWorkSource};
use crate::errors::{Error, Result};
use crate::events::ObservationId;
use crate::session::Session;

/// A FIFO work source. Fetching claims items; a recorded failure puts the
/// item back at the end with its attempt count bumped.
#[derive(Default)]
pub struct InMemoryTelluricQueue {
    pending: Mutex<VecDeque<TelluricBatchItem>>,
    failures: Mutex<Vec<(String, String)>>,
}

impl InMemoryTelluricQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: &str, observation_id: &str) {
        lock(&self.pending).push_back(TelluricBatchItem {
            id: id.to_string(),
            observation_id: ObservationId::from(observation_id),
            payload: serde_json::Value::Null,
            attempts: 0,
        });
    }

    pub fn pending(&self) -> Vec<TelluricBatchItem> {
        lock(&self.pending).iter().cloned().collect()
    }

    /// `(item id, reason)` for every recorded failure.
    pub fn failures(&self) -> Vec<(String, String)> {
        lock(&self.failures).clone()
    }
}

#[async_trait]
impl TelluricWorkSource for InMemoryTelluricQueue {
    async fn fetch_batch(
        &self,
        _session: &mut dyn Session,
        limit: usize,
    ) -> Result<Vec<TelluricBatchItem>> {
        let mut pending = lock(&self.pending);
        let take = limit.min(pending.len());
        Ok(pending.drain(..take).collect())
    }

    async fn record_failure(
        &self,
        _session: &mut dyn Session,
        item: &TelluricBatchItem,
        reason: &str,
    ) -> Result<()> {
        lock(&self.failures).push((item.id.clone(), reason.to_string()));
        let mut retried = item.clone();
        retried.attempts += 1;
        lock(&self.pending).push_back(retried);
        Ok(())
    }
}

/// Records processed item ids. Latency and failures can be injected.
#[derive(Default)]
pub struct RecordingTelluricRecalculator {
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    processed: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl RecordingTelluricRecalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, item_id: &str) {
        lock(&self.failing).insert(item_id.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn processed(&self) -> Vec<String> {
        lock(&self.processed).clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelluricRecalculator for RecordingTelluricRecalculator {
    async fn recalculate(&self, item: &TelluricBatchItem) -> Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if lock(&self.failing).contains(&item.id) {
            return Err(Error::Telluric(format!("injected failure for item {}", item.id)));
        }
        Ok(())
    }

    async fn resolve(&self, _session: &mut dyn Session, item: &TelluricBatchItem) -> Result<()> {
        lock(&self.processed).push(item.id.clone());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
