use futures::future::BoxFuture;
use log::warn;

use super::{ElevatedContext, Session, SessionProvider};
use crate::errors::{Error, Result};

/// Runs `work` elevated, inside its own transaction on a freshly acquired
/// session, and returns what `work` produced.
///
/// Commits when `work` succeeds and rolls back when it fails. A failed
/// rollback is logged and the error from `work` is returned. The session is
/// released when this returns or unwinds.
pub async fn run_transactional<T, F>(
    sessions: &dyn SessionProvider,
    elevated: &dyn ElevatedContext,
    work: F,
) -> Result<T>
where
    T: Send,
    F: for<'s> FnOnce(&'s mut dyn Session) -> BoxFuture<'s, Result<T>> + Send,
{
    run_in_transaction(sessions, elevated, false, work).await
}

/// Like [`run_transactional`], but opens the transaction with
/// [`Session::begin_read`] so a store can serve it without taking its write
/// lock.
pub async fn run_read_only<T, F>(
    sessions: &dyn SessionProvider,
    elevated: &dyn ElevatedContext,
    work: F,
) -> Result<T>
where
    T: Send,
    F: for<'s> FnOnce(&'s mut dyn Session) -> BoxFuture<'s, Result<T>> + Send,
{
    run_in_transaction(sessions, elevated, true, work).await
}

async fn run_in_transaction<T, F>(
    sessions: &dyn SessionProvider,
    elevated: &dyn ElevatedContext,
    read_only: bool,
    work: F,
) -> Result<T>
where
    T: Send,
    F: for<'s> FnOnce(&'s mut dyn Session) -> BoxFuture<'s, Result<T>> + Send,
{
    let mut output = None;
    let slot = &mut output;

    elevated
        .run_as_privileged(Box::pin(async move {
            let mut session = sessions.acquire().await?;
            if read_only {
                session.begin_read().await?;
            } else {
                session.begin().await?;
            }

            match work(session.as_mut()).await {
                Ok(value) => {
                    session.commit().await?;
                    *slot = Some(value);
                    Ok(())
                }
                Err(err) => {
                    if let Err(rollback_err) = session.rollback().await {
                        warn!("Rollback after failed unit of work also failed: {}", rollback_err);
                    }
                    Err(err)
                }
            }
        }))
        .await?;

    output.ok_or_else(|| {
        Error::Unexpected("elevated context returned without running the unit of work".to_string())
    })
}
