use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use diesel::prelude::*;

use calwatch_core::errors::Result;
use calwatch_core::events::ObservationId;
use calwatch_core::session::Session;
use calwatch_core::telluric::{TelluricBatchItem, TelluricWorkSource};

use super::model::{NewTelluricQueueDB, TelluricQueueDB, STATUS_PENDING, STATUS_RESOLVED};
use crate::errors::IntoCore;
use crate::schema::telluric_queue;
use crate::session::SqliteSession;

/// Items that failed this many times are left out of further batches.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

pub struct SqliteTelluricQueue {
    max_attempts: i32,
}

impl Default for SqliteTelluricQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteTelluricQueue {
    pub fn new() -> Self {
        SqliteTelluricQueue {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        SqliteTelluricQueue {
            max_attempts: max_attempts.min(i32::MAX as u32) as i32,
        }
    }

    pub fn enqueue(
        &self,
        session: &mut dyn Session,
        id: &str,
        observation_id: &ObservationId,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let row = NewTelluricQueueDB {
            id: id.to_string(),
            observation_id: observation_id.to_string(),
            payload: serde_json::to_string(payload)?,
            enqueued_at: timestamp(),
        };
        let conn = SqliteSession::from_dyn(session)?.connection();
        diesel::insert_into(telluric_queue::table)
            .values(&row)
            .execute(conn)
            .into_core()?;
        Ok(())
    }

    pub fn mark_resolved(&self, session: &mut dyn Session, id: &str) -> Result<()> {
        let conn = SqliteSession::from_dyn(session)?.connection();
        diesel::update(telluric_queue::table.find(id))
            .set((
                telluric_queue::status.eq(STATUS_RESOLVED),
                telluric_queue::resolved_at.eq(Some(timestamp())),
            ))
            .execute(conn)
            .into_core()?;
        Ok(())
    }

    pub fn get(&self, session: &mut dyn Session, id: &str) -> Result<Option<TelluricQueueDB>> {
        let conn = SqliteSession::from_dyn(session)?.connection();
        telluric_queue::table
            .find(id)
            .select(TelluricQueueDB::as_select())
            .first(conn)
            .optional()
            .into_core()
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl TelluricWorkSource for SqliteTelluricQueue {
    async fn fetch_batch(
        &self,
        session: &mut dyn Session,
        limit: usize,
    ) -> Result<Vec<TelluricBatchItem>> {
        let conn = SqliteSession::from_dyn(session)?.connection();
        let rows = telluric_queue::table
            .filter(telluric_queue::status.eq(STATUS_PENDING))
            .filter(telluric_queue::attempts.lt(self.max_attempts))
            .order((telluric_queue::enqueued_at.asc(), telluric_queue::id.asc()))
            .limit(limit as i64)
            .select(TelluricQueueDB::as_select())
            .load(conn)
            .into_core()?;
        Ok(rows.into_iter().map(TelluricBatchItem::from).collect())
    }

    async fn record_failure(
        &self,
        session: &mut dyn Session,
        item: &TelluricBatchItem,
        reason: &str,
    ) -> Result<()> {
        let conn = SqliteSession::from_dyn(session)?.connection();
        diesel::update(telluric_queue::table.find(&item.id))
            .set((
                telluric_queue::attempts.eq(telluric_queue::attempts + 1),
                telluric_queue::last_error.eq(Some(reason)),
            ))
            .execute(conn)
            .into_core()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use calwatch_core::session::SessionProvider;
    use serde_json::json;

    use super::*;
    use crate::test_support::migrated_provider;

    #[tokio::test]
    async fn test_fetch_returns_oldest_pending_items_up_to_limit() {
        let (_dir, sessions) = migrated_provider(1);
        let queue = SqliteTelluricQueue::new();
        let mut session = sessions.acquire().await.unwrap();
        for i in 0..4 {
            queue
                .enqueue(
                    session.as_mut(),
                    &format!("t{}", i),
                    &ObservationId::from(format!("O{}", i)),
                    &json!({ "band": "K" }),
                )
                .unwrap();
        }
        queue.mark_resolved(session.as_mut(), "t0").unwrap();

        let batch = queue.fetch_batch(session.as_mut(), 2).await.unwrap();

        let ids: Vec<&str> = batch.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert_eq!(batch[0].payload, json!({ "band": "K" }));
        assert_eq!(batch[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_failures_count_up_to_max_attempts() {
        let (_dir, sessions) = migrated_provider(1);
        let queue = SqliteTelluricQueue::with_max_attempts(2);
        let mut session = sessions.acquire().await.unwrap();
        queue
            .enqueue(
                session.as_mut(),
                "t1",
                &ObservationId::from("O1"),
                &serde_json::Value::Null,
            )
            .unwrap();

        for attempt in 1..=2 {
            let batch = queue.fetch_batch(session.as_mut(), 10).await.unwrap();
            assert_eq!(batch.len(), 1, "attempt {}", attempt);
            queue
                .record_failure(session.as_mut(), &batch[0], "service unavailable")
                .await
                .unwrap();
        }

        assert!(queue.fetch_batch(session.as_mut(), 10).await.unwrap().is_empty());
        let row = queue.get(session.as_mut(), "t1").unwrap().unwrap();
        assert_eq!(row.attempts, 2);
        assert_eq!(row.last_error.as_deref(), Some("service unavailable"));
        assert_eq!(row.status, STATUS_PENDING);
    }

    #[tokio::test]
    async fn test_mark_resolved_stamps_resolution() {
        let (_dir, sessions) = migrated_provider(1);
        let queue = SqliteTelluricQueue::new();
        let mut session = sessions.acquire().await.unwrap();
        queue
            .enqueue(
                session.as_mut(),
                "t1",
                &ObservationId::from("O1"),
                &serde_json::Value::Null,
            )
            .unwrap();

        queue.mark_resolved(session.as_mut(), "t1").unwrap();

        let row = queue.get(session.as_mut(), "t1").unwrap().unwrap();
        assert_eq!(row.status, STATUS_RESOLVED);
        assert!(row.resolved_at.is_some());
    }
}
