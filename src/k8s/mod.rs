/// Kubernetes persistence clients for AzureCluster objects
pub mod client;
pub mod file;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::api::ObjectReference;

pub use client::KubeClient;
pub use file::FileClient;

/// Errors returned by persistence clients
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API server returned {status} for {object}: {message}")]
    Api {
        object: String,
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("invalid API server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("object {0} not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// JSON merge patches for the object body and its status subresource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePatch {
    /// Changes to metadata and spec
    pub object: Option<Value>,
    /// Changes to status
    pub status: Option<Value>,
}

impl MergePatch {
    /// Whether there is nothing to send
    pub fn is_empty(&self) -> bool {
        self.object.is_none() && self.status.is_none()
    }
}

/// Client capable of persisting AzureCluster changes
#[async_trait]
pub trait Client: Send + Sync {
    /// Apply merge patches to the referenced AzureCluster
    async fn patch(&self, object: &ObjectReference, patch: &MergePatch) -> Result<(), ClientError>;
}
