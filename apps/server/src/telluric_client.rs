//! Telluric recalculation over HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use calwatch_core::errors::{Error, Result};
use calwatch_core::session::Session;
use calwatch_core::telluric::{TelluricBatchItem, TelluricRecalculator};
use calwatch_storage_sqlite::SqliteTelluricQueue;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// POSTs each item to the telluric service. An item the service accepted
/// with a 2xx reply is then marked resolved.
pub struct HttpTelluricRecalculator {
    client: reqwest::Client,
    endpoint: String,
    queue: Arc<SqliteTelluricQueue>,
}

impl HttpTelluricRecalculator {
    pub fn new(endpoint: impl Into<String>, queue: Arc<SqliteTelluricQueue>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Telluric(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            queue,
        })
    }
}

#[async_trait]
impl TelluricRecalculator for HttpTelluricRecalculator {
    async fn recalculate(&self, item: &TelluricBatchItem) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(item)
            .send()
            .await
            .map_err(|e| Error::Telluric(format!("Request for item {} failed: {}", item.id, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Telluric(format!(
                "Telluric service answered {} for item {}",
                status, item.id
            )));
        }

        tracing::debug!("Telluric item {} accepted ({})", item.id, status);
        Ok(())
    }

    async fn resolve(&self, session: &mut dyn Session, item: &TelluricBatchItem) -> Result<()> {
        self.queue.mark_resolved(session, &item.id)
    }
}

#[cfg(test)]
mod tests {
    use calwatch_core::events::ObservationId;
    use calwatch_core::session::SessionProvider;
    use calwatch_storage_sqlite::db::{create_pool, init, run_migrations};
    use calwatch_storage_sqlite::telluric::{STATUS_PENDING, STATUS_RESOLVED};
    use calwatch_storage_sqlite::SqliteSessionProvider;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Answers every connection with `status_line` and an empty body.
    async fn stub_service(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    status_line
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{}/telluric", addr)
    }

    async fn queue_with_item() -> (
        tempfile::TempDir,
        Arc<SqliteSessionProvider>,
        Arc<SqliteTelluricQueue>,
        TelluricBatchItem,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = init(dir.path().join("calwatch.db").to_str().unwrap()).unwrap();
        let pool = create_pool(&db_path, 2).unwrap();
        run_migrations(&pool).unwrap();
        let sessions = Arc::new(SqliteSessionProvider::new(pool));
        let queue = Arc::new(SqliteTelluricQueue::new());

        let mut session = sessions.acquire().await.unwrap();
        queue
            .enqueue(
                session.as_mut(),
                "t1",
                &ObservationId::from("O1"),
                &serde_json::json!({ "band": "K" }),
            )
            .unwrap();
        let item = TelluricBatchItem {
            id: "t1".to_string(),
            observation_id: ObservationId::from("O1"),
            payload: serde_json::json!({ "band": "K" }),
            attempts: 0,
        };
        (dir, sessions, queue, item)
    }

    #[tokio::test]
    async fn test_accepted_item_is_resolved() {
        let (_dir, sessions, queue, item) = queue_with_item().await;
        let endpoint = stub_service("200 OK").await;
        let recalculator = HttpTelluricRecalculator::new(endpoint, queue.clone()).unwrap();

        recalculator.recalculate(&item).await.unwrap();
        let mut session = sessions.acquire().await.unwrap();
        recalculator.resolve(session.as_mut(), &item).await.unwrap();

        let row = queue.get(session.as_mut(), "t1").unwrap().unwrap();
        assert_eq!(row.status, STATUS_RESOLVED);
    }

    #[tokio::test]
    async fn test_error_status_leaves_item_pending() {
        let (_dir, sessions, queue, item) = queue_with_item().await;
        let endpoint = stub_service("503 Service Unavailable").await;
        let recalculator = HttpTelluricRecalculator::new(endpoint, queue.clone()).unwrap();

        let result = recalculator.recalculate(&item).await;

        assert!(matches!(result, Err(Error::Telluric(_))));
        let mut session = sessions.acquire().await.unwrap();
        let row = queue.get(session.as_mut(), "t1").unwrap().unwrap();
        assert_eq!(row.status, STATUS_PENDING);
    }
}
