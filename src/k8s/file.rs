/// Client persisting AzureCluster patches into a local manifest file
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

use super::{Client, ClientError, MergePatch};
use crate::api::ObjectReference;
use crate::patch::apply_merge_patch;

/// Key under which the AzureCluster lives in the manifest
pub const AZURE_CLUSTER_KEY: &str = "azureCluster";

/// Applies merge patches to the `azureCluster` document of a YAML file
pub struct FileClient {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileClient {
    /// Create a client writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn locate<'a>(
        document: &'a mut Value,
        object: &ObjectReference,
    ) -> Result<&'a mut Value, ClientError> {
        let azure_cluster = document
            .get_mut(AZURE_CLUSTER_KEY)
            .ok_or_else(|| ClientError::NotFound(object.to_string()))?;

        let metadata = &azure_cluster["metadata"];
        let name = metadata["name"].as_str().unwrap_or_default();
        let namespace = metadata["namespace"].as_str().unwrap_or_default();
        if name != object.name || namespace != object.namespace {
            return Err(ClientError::NotFound(object.to_string()));
        }

        Ok(azure_cluster)
    }
}

#[async_trait]
impl Client for FileClient {
    async fn patch(&self, object: &ObjectReference, patch: &MergePatch) -> Result<(), ClientError> {
        let _guard = self.lock.lock().await;

        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut document: Value = serde_yaml::from_str(&content)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;

        let target = Self::locate(&mut document, object)?;
        for body in [&patch.object, &patch.status].into_iter().flatten() {
            apply_merge_patch(target, body);
        }

        let rendered =
            serde_yaml::to_string(&document).map_err(|e| ClientError::Serialization(e.to_string()))?;
        tokio::fs::write(&self.path, rendered).await?;

        info!("Persisted {} to {}", object, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MANIFEST: &str = r#"
cluster:
  metadata:
    name: c1
    namespace: default
azureCluster:
  metadata:
    name: c1
    namespace: default
  spec:
    resourceGroup: rg1
"#;

    fn object(name: &str) -> ObjectReference {
        ObjectReference {
            namespace: "default".to_string(),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_patch_updates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yaml");
        std::fs::write(&path, MANIFEST).unwrap();

        let client = FileClient::new(&path);
        let patch = MergePatch {
            object: Some(json!({"spec": {"location": "eastus"}})),
            status: Some(json!({"status": {"ready": true}})),
        };
        client.patch(&object("c1"), &patch).await.unwrap();

        let written: Value =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["azureCluster"]["spec"]["resourceGroup"], "rg1");
        assert_eq!(written["azureCluster"]["spec"]["location"], "eastus");
        assert_eq!(written["azureCluster"]["status"]["ready"], true);
        assert_eq!(written["cluster"]["metadata"]["name"], "c1");
    }

    #[tokio::test]
    async fn test_patch_unknown_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yaml");
        std::fs::write(&path, MANIFEST).unwrap();

        let client = FileClient::new(&path);
        let result = client.patch(&object("other"), &MergePatch::default()).await;
        assert!(matches!(result, Err(ClientError::NotFound(_))));
    }
}
