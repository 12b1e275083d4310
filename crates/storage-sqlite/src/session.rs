//! Pooled SQLite sessions.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use diesel::connection::SimpleConnection;
use diesel::SqliteConnection;
use log::warn;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use calwatch_core::errors::{DatabaseError, Error, Result};
use calwatch_core::session::{Session, SessionProvider};

use crate::db::{get_connection, DbConnection, DbPool};
use crate::errors::StorageError;

/// Hands out [`SqliteSession`]s from an r2d2 pool.
///
/// A semaphore sized to the pool is acquired before `pool.get()`, so callers
/// wait asynchronously instead of blocking a runtime thread on the pool.
pub struct SqliteSessionProvider {
    pool: Arc<DbPool>,
    permits: Arc<Semaphore>,
    max_sessions: usize,
}

impl SqliteSessionProvider {
    pub fn new(pool: Arc<DbPool>) -> Self {
        let max_sessions = pool.max_size() as usize;
        Self {
            pool,
            permits: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
        }
    }

    pub fn pool(&self) -> &Arc<DbPool> {
        &self.pool
    }

    /// Like [`SessionProvider::acquire`] but keeps the concrete type.
    pub async fn checkout(&self) -> Result<SqliteSession> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Database(DatabaseError::PoolError(e.to_string())))?;
        let conn = get_connection(&self.pool)?;
        Ok(SqliteSession {
            conn,
            in_transaction: false,
            _permit: permit,
        })
    }
}

#[async_trait]
impl SessionProvider for SqliteSessionProvider {
    async fn acquire(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(self.checkout().await?))
    }

    fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

/// A pooled connection. Dropping it returns the connection to the pool,
/// rolling back any transaction still open.
pub struct SqliteSession {
    conn: DbConnection,
    in_transaction: bool,
    _permit: OwnedSemaphorePermit,
}

impl SqliteSession {
    /// Downcasts a session handed out by [`SqliteSessionProvider`].
    pub fn from_dyn(session: &mut dyn Session) -> Result<&mut SqliteSession> {
        session
            .as_any_mut()
            .downcast_mut::<SqliteSession>()
            .ok_or_else(|| {
                Error::Database(DatabaseError::SessionMismatch(
                    "expected a SQLite session".to_string(),
                ))
            })
    }

    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn execute_control(&mut self, statement: &str) -> Result<()> {
        self.conn.batch_execute(statement).map_err(|e| {
            Error::from(StorageError::TransactionFailed(format!("{}: {}", statement, e)))
        })
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::Database(DatabaseError::TransactionFailed(
                "transaction already open".to_string(),
            )));
        }
        self.execute_control("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    /// Deferred: under WAL a reader never takes the write lock.
    async fn begin_read(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::Database(DatabaseError::TransactionFailed(
                "transaction already open".to_string(),
            )));
        }
        self.execute_control("BEGIN DEFERRED")?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::Database(DatabaseError::TransactionFailed(
                "no open transaction".to_string(),
            )));
        }
        // A failed COMMIT leaves the transaction open; drop rolls it back.
        self.execute_control("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::Database(DatabaseError::TransactionFailed(
                "no open transaction".to_string(),
            )));
        }
        self.in_transaction = false;
        self.execute_control("ROLLBACK")
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Err(e) = self.conn.batch_execute("ROLLBACK") {
                warn!("Rollback of abandoned transaction failed: {}", e);
            }
        }
    }
}
