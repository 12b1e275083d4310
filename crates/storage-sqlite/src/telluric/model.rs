//! Database models for the telluric work queue.

use diesel::prelude::*;
use log::warn;

use calwatch_core::events::ObservationId;
use calwatch_core::telluric::TelluricBatchItem;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RESOLVED: &str = "resolved";

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::telluric_queue)]
pub struct TelluricQueueDB {
    pub id: String,
    pub observation_id: String,
    pub payload: String,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub enqueued_at: String,
    pub resolved_at: Option<String>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::telluric_queue)]
pub struct NewTelluricQueueDB {
    pub id: String,
    pub observation_id: String,
    pub payload: String,
    pub enqueued_at: String,
}

impl From<TelluricQueueDB> for TelluricBatchItem {
    fn from(db: TelluricQueueDB) -> Self {
        let payload = serde_json::from_str(&db.payload).unwrap_or_else(|e| {
            warn!("Telluric item {} has an unreadable payload: {}", db.id, e);
            serde_json::Value::Null
        });
        Self {
            id: db.id,
            observation_id: ObservationId::from(db.observation_id),
            payload,
            attempts: db.attempts.max(0) as u32,
        }
    }
}
