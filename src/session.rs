//! Session boundary for stateful external resources.
//!
//! A [`Session`] owns one id and the resources bound to it. [`Session::scope`]
//! opens every resource, runs the agent, and closes them again on every exit
//! path, including errors.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} is already open")]
    AlreadyOpen(String),

    #[error("session {0} is not open")]
    NotOpen(String),

    #[error("{resource} failed for session {session_id}: {source}")]
    Resource {
        resource: String,
        session_id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A resource with acquire/release semantics keyed by session id.
///
/// Implementations must allow at most one open handle per session id.
#[async_trait]
pub trait SessionResource: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, session_id: &str) -> Result<(), SessionError>;

    async fn close(&self, session_id: &str) -> Result<(), SessionError>;
}

/// One session id plus the resources that live for its duration.
pub struct Session {
    id: String,
    resources: Vec<Arc<dyn SessionResource>>,
}

impl Session {
    /// New session with a random id.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resources: Vec::new(),
        }
    }

    pub fn with_resource(mut self, resource: Arc<dyn SessionResource>) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Open all resources, run `f`, then close them in reverse order.
    ///
    /// If opening fails, the resources already opened are closed before the
    /// error is returned. Close failures are logged and never replace the
    /// result of `f`. A panic in `f` is resumed after the resources are closed.
    pub async fn scope<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SessionError>,
    {
        tracing::info!(session_id = %self.id, "Entering session");

        for (opened, resource) in self.resources.iter().enumerate() {
            if let Err(e) = resource.open(&self.id).await {
                tracing::error!(session_id = %self.id, resource = resource.name(), "Failed to open resource: {}", e);
                self.close_all(&self.resources[..opened]).await;
                return Err(e.into());
            }
        }

        let outcome = AssertUnwindSafe(f(self.id.clone())).catch_unwind().await;

        self.close_all(&self.resources).await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!(session_id = %self.id, "Session aborted by a panic");
                std::panic::resume_unwind(panic);
            }
        };
        if result.is_err() {
            tracing::error!(session_id = %self.id, "Session ended with an error");
        }
        tracing::info!(session_id = %self.id, "Exiting session");
        result
    }

    async fn close_all(&self, resources: &[Arc<dyn SessionResource>]) {
        for resource in resources.iter().rev() {
            if let Err(e) = resource.close(&self.id).await {
                tracing::warn!(session_id = %self.id, resource = resource.name(), "Failed to close resource: {}", e);
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
