//! Per-reconcile scopes
//!
//! A scope bundles the state one reconcile pass works on together with the
//! means to persist it. It is built at the start of the pass, handed to the
//! actuators, and committed exactly once when the pass ends.

pub mod cluster;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{error::Elapsed, Instant};

use crate::azure::AuthError;
use crate::patch::PatchError;

pub use cluster::{ClusterScope, ClusterScopeParams};

/// Errors raised while building or committing a scope
#[derive(Debug, Error)]
pub enum Error {
    /// A required input was missing
    #[error("failed to generate new scope from {0}")]
    InvalidArgument(&'static str),

    /// Credentials for the subscription could not be resolved
    #[error("failed to create Azure session: {0}")]
    Authentication(#[source] AuthError),

    /// The patch helper could not be bound to the object
    #[error("failed to init patch helper: {0}")]
    Initialization(#[source] PatchError),

    /// Persisting the object failed
    #[error("failed to patch AzureCluster {object}: {source}")]
    Commit {
        object: String,
        #[source]
        source: PatchError,
    },
}

impl Error {
    /// Whether the error prevented a scope from being built
    pub fn is_construction_failure(&self) -> bool {
        !matches!(self, Error::Commit { .. })
    }
}

/// Optional point in time by which an operation must finish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline
    pub fn none() -> Self {
        Self(None)
    }

    /// Finish by `instant`
    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Finish within `timeout` from now, unbounded if that instant is unrepresentable
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// Drive `future` to completion unless the deadline passes first
    pub async fn run<F: Future>(self, future: F) -> Result<F::Output, Elapsed> {
        match self.0 {
            Some(instant) => tokio::time::timeout_at(instant, future).await,
            None => Ok(future.await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_none_waits() {
        let result = Deadline::none().run(async { 7 }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        let result = Deadline::after(Duration::from_millis(10))
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_deadline_after_huge_timeout_is_unbounded() {
        let deadline = Deadline::after(Duration::from_secs(u64::MAX));
        assert_eq!(deadline, Deadline::none());
        assert_eq!(deadline.run(async { 1 }).await.unwrap(), 1);
    }

    #[test]
    fn test_error_messages() {
        let err = Error::InvalidArgument("nil Cluster");
        assert_eq!(err.to_string(), "failed to generate new scope from nil Cluster");
        assert!(err.is_construction_failure());

        let err = Error::Authentication(AuthError::MissingSubscriptionId);
        assert!(err.to_string().starts_with("failed to create Azure session"));
    }
}
