//! In-memory session provider for tests and dry runs.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{Session, SessionProvider};
use crate::errors::{DatabaseError, Error, Result};

/// Counters describing everything sessions of an [`InMemorySessionProvider`]
/// did.
#[derive(Debug, Default)]
pub struct SessionJournal {
    acquired: AtomicU64,
    begun: AtomicU64,
    begun_read_only: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    released: AtomicU64,
    open_transactions: AtomicUsize,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
}

impl SessionJournal {
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn begun(&self) -> u64 {
        self.begun.load(Ordering::SeqCst)
    }

    /// Transactions opened with [`Session::begin_read`].
    pub fn begun_read_only(&self) -> u64 {
        self.begun_read_only.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Transactions begun but not yet committed or rolled back.
    pub fn open_transactions(&self) -> usize {
        self.open_transactions.load(Ordering::SeqCst)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of sessions ever checked out at once.
    pub fn peak_in_use(&self) -> usize {
        self.peak_in_use.load(Ordering::SeqCst)
    }
}

/// Session provider backed by nothing but a semaphore and a journal.
pub struct InMemorySessionProvider {
    permits: Arc<Semaphore>,
    max_sessions: usize,
    journal: Arc<SessionJournal>,
    unavailable: AtomicBool,
}

impl InMemorySessionProvider {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            journal: Arc::new(SessionJournal::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn journal(&self) -> Arc<SessionJournal> {
        self.journal.clone()
    }

    /// While set, `acquire` fails as if the pool had lost its connection.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionProvider for InMemorySessionProvider {
    async fn acquire(&self) -> Result<Box<dyn Session>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Database(DatabaseError::PoolError(
                "session pool unavailable".to_string(),
            )));
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Database(DatabaseError::PoolError(e.to_string())))?;

        let journal = self.journal.clone();
        journal.acquired.fetch_add(1, Ordering::SeqCst);
        let in_use = journal.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        journal.peak_in_use.fetch_max(in_use, Ordering::SeqCst);

        Ok(Box::new(InMemorySession {
            journal,
            in_transaction: false,
            _permit: permit,
        }))
    }

    fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

/// A session checked out of an [`InMemorySessionProvider`].
pub struct InMemorySession {
    journal: Arc<SessionJournal>,
    in_transaction: bool,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Session for InMemorySession {
    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(Error::Database(DatabaseError::TransactionFailed(
                "transaction already open".to_string(),
            )));
        }
        self.in_transaction = true;
        self.journal.begun.fetch_add(1, Ordering::SeqCst);
        self.journal.open_transactions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn begin_read(&mut self) -> Result<()> {
        self.begin().await?;
        self.journal.begun_read_only.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.close_transaction()?;
        self.journal.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.close_transaction()?;
        self.journal.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl InMemorySession {
    fn close_transaction(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::Database(DatabaseError::TransactionFailed(
                "no open transaction".to_string(),
            )));
        }
        self.in_transaction = false;
        self.journal.open_transactions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        if self.in_transaction {
            self.in_transaction = false;
            self.journal.open_transactions.fetch_sub(1, Ordering::SeqCst);
            self.journal.rolled_back.fetch_add(1, Ordering::SeqCst);
        }
        self.journal.in_use.fetch_sub(1, Ordering::SeqCst);
        self.journal.released.fetch_add(1, Ordering::SeqCst);
    }
}
