//! Session, session-provider and elevated-execution traits.

use std::any::Any;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::errors::Result;

/// A pooled transactional session checked out of a [`SessionProvider`].
///
/// # Implementation Notes
///
/// - Dropping a session returns it to its pool; this is the release path and
///   it must run on every exit, including errors and panics.
/// - A session dropped with an open transaction must roll it back first.
#[async_trait]
pub trait Session: Send {
    /// Opens a transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Opens a transaction that will only read. Stores that can defer
    /// locking until the first write override this.
    async fn begin_read(&mut self) -> Result<()> {
        self.begin().await
    }

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Gives a store implementation access to its own concrete session type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Hands out pooled sessions, never more than `max_sessions()` at a time.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Waits for a free session.
    async fn acquire(&self) -> Result<Box<dyn Session>>;

    /// The provider's concurrent-session ceiling.
    fn max_sessions(&self) -> usize;
}

/// Runs work under a service-level (non end-user) authorization.
///
/// This is a stateless capability applied per call.
#[async_trait]
pub trait ElevatedContext: Send + Sync {
    async fn run_as_privileged<'a>(&'a self, work: BoxFuture<'a, Result<()>>) -> Result<()>;
}
