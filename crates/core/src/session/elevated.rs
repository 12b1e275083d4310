//! Service-account elevation backed by a task-local identity.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::ElevatedContext;
use crate::errors::{Error, Result};

tokio::task_local! {
    static ACTING_IDENTITY: ServiceIdentity;
}

/// The service account work runs as while elevated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceIdentity(String);

impl ServiceIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the identity of the enclosing elevated scope, if any.
pub fn acting_identity() -> Option<ServiceIdentity> {
    ACTING_IDENTITY.try_with(|identity| identity.clone()).ok()
}

/// [`ElevatedContext`] that scopes a fixed service identity around each call.
#[derive(Clone, Debug)]
pub struct ServiceAccountContext {
    identity: ServiceIdentity,
}

impl ServiceAccountContext {
    /// Resolves the elevated identity. A blank name is refused.
    pub fn new(service_user: impl Into<String>) -> Result<Self> {
        let name = service_user.into().trim().to_string();
        if name.is_empty() {
            return Err(Error::Unauthorized(
                "no service identity configured for elevated execution".to_string(),
            ));
        }
        Ok(Self {
            identity: ServiceIdentity(name),
        })
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }
}

#[async_trait]
impl ElevatedContext for ServiceAccountContext {
    async fn run_as_privileged<'a>(&'a self, work: BoxFuture<'a, Result<()>>) -> Result<()> {
        ACTING_IDENTITY.scope(self.identity.clone(), work).await
    }
}
