use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use diesel::prelude::*;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use calwatch_core::errors::Result;
use calwatch_core::feed::ChangeFeed;
use calwatch_core::session::Session;

use super::model::{NewOutboxRowDB, OutboxRowDB};
use crate::errors::IntoCore;
use crate::schema::change_outbox;
use crate::session::{SqliteSession, SqliteSessionProvider};

const DEFAULT_BATCH_LIMIT: i64 = 256;

/// Appends `element` to `stream` inside the caller's session.
pub fn append_change<E: Serialize>(
    session: &mut dyn Session,
    stream: &str,
    element: &E,
) -> Result<()> {
    let row = NewOutboxRowDB {
        stream: stream.to_string(),
        payload: serde_json::to_string(element)?,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    let conn = SqliteSession::from_dyn(session)?.connection();
    diesel::insert_into(change_outbox::table)
        .values(&row)
        .execute(conn)
        .into_core()?;
    Ok(())
}

/// Drains one outbox stream in id order.
///
/// Rows are deleted in the same transaction that reads them. Payloads that
/// do not deserialize are logged and discarded.
pub struct SqliteOutboxFeed<E> {
    sessions: Arc<SqliteSessionProvider>,
    stream: String,
    batch_limit: i64,
    poll_interval: Duration,
    _element: PhantomData<fn() -> E>,
}

impl<E> SqliteOutboxFeed<E> {
    pub fn new(
        sessions: Arc<SqliteSessionProvider>,
        stream: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sessions,
            stream: stream.into(),
            batch_limit: DEFAULT_BATCH_LIMIT,
            poll_interval,
            _element: PhantomData,
        }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1) as i64;
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    async fn drain(&self) -> Result<Vec<OutboxRowDB>> {
        let mut session = self.sessions.checkout().await?;
        session.begin().await?;

        let conn = session.connection();
        let rows = change_outbox::table
            .filter(change_outbox::stream.eq(&self.stream))
            .order(change_outbox::id.asc())
            .limit(self.batch_limit)
            .select(OutboxRowDB::as_select())
            .load(conn)
            .into_core()?;

        if let Some(last) = rows.last() {
            diesel::delete(
                change_outbox::table
                    .filter(change_outbox::stream.eq(&self.stream))
                    .filter(change_outbox::id.le(last.id)),
            )
            .execute(conn)
            .into_core()?;
        }

        session.commit().await?;
        Ok(rows)
    }
}

#[async_trait]
impl<E> ChangeFeed<E> for SqliteOutboxFeed<E>
where
    E: DeserializeOwned + Send + 'static,
{
    async fn next_batch(&self) -> Result<Vec<E>> {
        let rows = self.drain().await?;
        if rows.is_empty() {
            tokio::time::sleep(self.poll_interval).await;
            return Ok(Vec::new());
        }

        let elements = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_str::<E>(&row.payload) {
                Ok(element) => Some(element),
                Err(e) => {
                    warn!(
                        "Discarding malformed outbox row {} on stream '{}': {}",
                        row.id, self.stream, e
                    );
                    None
                }
            })
            .collect();
        Ok(elements)
    }
}

#[cfg(test)]
mod tests {
    use calwatch_core::events::{
        CalculationState, CalibrationTimeChange, EditType, ObservationChange,
    };
    use calwatch_core::session::SessionProvider;

    use super::*;
    use crate::test_support::migrated_provider;

    #[tokio::test]
    async fn test_drains_stream_in_order_and_deletes_rows() {
        let (_dir, sessions) = migrated_provider(2);
        let mut session = sessions.acquire().await.unwrap();
        for program in ["P1", "P2", "P3"] {
            let change = ObservationChange::new(
                "O1",
                program,
                EditType::Updated,
                Some(CalculationState::Calculating),
                Some(CalculationState::Ready),
            );
            append_change(session.as_mut(), "observations", &change).unwrap();
        }
        append_change(
            session.as_mut(),
            "calibration-times",
            &CalibrationTimeChange::new("P9", "O9"),
        )
        .unwrap();
        drop(session);

        let feed: SqliteOutboxFeed<ObservationChange> =
            SqliteOutboxFeed::new(sessions.clone(), "observations", Duration::from_millis(5));
        let batch = feed.next_batch().await.unwrap();
        let programs: Vec<&str> = batch.iter().map(|c| c.program_id.as_str()).collect();
        assert_eq!(programs, vec!["P1", "P2", "P3"]);

        assert!(feed.next_batch().await.unwrap().is_empty());

        let other: SqliteOutboxFeed<CalibrationTimeChange> =
            SqliteOutboxFeed::new(sessions, "calibration-times", Duration::from_millis(5));
        assert_eq!(
            other.next_batch().await.unwrap(),
            vec![CalibrationTimeChange::new("P9", "O9")]
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_is_discarded() {
        let (_dir, sessions) = migrated_provider(2);
        let mut session = sessions.acquire().await.unwrap();
        append_change(session.as_mut(), "calibration-times", &"not a change").unwrap();
        append_change(
            session.as_mut(),
            "calibration-times",
            &CalibrationTimeChange::new("P1", "O1"),
        )
        .unwrap();
        drop(session);

        let feed: SqliteOutboxFeed<CalibrationTimeChange> =
            SqliteOutboxFeed::new(sessions, "calibration-times", Duration::from_millis(5));

        assert_eq!(
            feed.next_batch().await.unwrap(),
            vec![CalibrationTimeChange::new("P1", "O1")]
        );
        assert!(feed.next_batch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_limit_bounds_each_read() {
        let (_dir, sessions) = migrated_provider(2);
        let mut session = sessions.acquire().await.unwrap();
        for i in 0..5 {
            let change = CalibrationTimeChange::new("P1", format!("O{}", i));
            append_change(session.as_mut(), "calibration-times", &change).unwrap();
        }
        drop(session);

        let feed: SqliteOutboxFeed<CalibrationTimeChange> =
            SqliteOutboxFeed::new(sessions, "calibration-times", Duration::from_millis(5))
                .with_batch_limit(2);

        let sizes = [
            feed.next_batch().await.unwrap().len(),
            feed.next_batch().await.unwrap().len(),
            feed.next_batch().await.unwrap().len(),
        ];
        assert_eq!(sizes, [2, 2, 1]);
    }
}
