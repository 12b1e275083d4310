use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::events::ObservationId;
use crate::session::Session;

/// A pending unit of telluric work. The payload is opaque to the daemon.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelluricBatchItem {
    pub id: String,
    pub observation_id: ObservationId,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Failed attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

/// Where pending telluric work comes from.
#[async_trait]
pub trait TelluricWorkSource: Send + Sync {
    /// Returns at most `limit` pending items.
    async fn fetch_batch(
        &self,
        session: &mut dyn Session,
        limit: usize,
    ) -> Result<Vec<TelluricBatchItem>>;

    /// Records that processing `item` failed.
    async fn record_failure(
        &self,
        session: &mut dyn Session,
        item: &TelluricBatchItem,
        reason: &str,
    ) -> Result<()>;
}

/// Resolves one telluric item in two steps.
///
/// `recalculate` runs elevated but outside any transaction, so slow work
/// never holds a session's locks. `resolve` records the outcome and runs in
/// its own short transaction once `recalculate` has succeeded.
#[async_trait]
pub trait TelluricRecalculator: Send + Sync {
    async fn recalculate(&self, item: &TelluricBatchItem) -> Result<()>;

    async fn resolve(&self, session: &mut dyn Session, item: &TelluricBatchItem) -> Result<()>;
}
