/// Patch helper computing and applying AzureCluster deltas
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::api::{AzureCluster, ObjectReference};
use crate::k8s::{Client, ClientError, MergePatch};

/// Errors raised by the patch helper
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("object has no name")]
    MissingName,

    #[error("failed to serialize object: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("object reference changed from {expected} to {actual}")]
    ObjectChanged {
        expected: ObjectReference,
        actual: ObjectReference,
    },

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("deadline exceeded while patching")]
    DeadlineExceeded,
}

/// Tracks the last persisted state of an AzureCluster and sends only what changed
pub struct Helper {
    client: Arc<dyn Client>,
    reference: ObjectReference,
    before: Value,
}

impl Helper {
    /// Bind a helper to an object, snapshotting its current state
    pub fn new(object: &AzureCluster, client: Arc<dyn Client>) -> Result<Self, PatchError> {
        if object.metadata.name.is_empty() {
            return Err(PatchError::MissingName);
        }

        Ok(Self {
            client,
            reference: object.object_ref(),
            before: serde_json::to_value(object)?,
        })
    }

    /// Persist the differences between the snapshot and `object`
    pub async fn patch(&mut self, object: &AzureCluster) -> Result<(), PatchError> {
        let actual = object.object_ref();
        if actual != self.reference {
            return Err(PatchError::ObjectChanged {
                expected: self.reference.clone(),
                actual,
            });
        }

        let after = serde_json::to_value(object)?;
        let patch = split_patch(&self.before, &after);

        if patch.is_empty() {
            debug!("No changes to persist for {}", self.reference);
        } else {
            debug!("Patching {}", self.reference);
            self.client.patch(&self.reference, &patch).await?;
        }

        self.before = after;
        Ok(())
    }
}

/// Build separate body and status patches
fn split_patch(before: &Value, after: &Value) -> MergePatch {
    let status = create_merge_patch(
        before.get("status").unwrap_or(&Value::Null),
        after.get("status").unwrap_or(&Value::Null),
    );

    let strip_status = |value: &Value| match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != "status")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    };
    let object = create_merge_patch(&strip_status(before), &strip_status(after));

    MergePatch {
        object,
        status: status.map(|status| {
            let mut map = Map::new();
            map.insert("status".to_string(), status);
            Value::Object(map)
        }),
    }
}

/// Compute an RFC 7386 merge patch turning `before` into `after`
///
/// Returns `None` when the documents are equal.
pub fn create_merge_patch(before: &Value, after: &Value) -> Option<Value> {
    if before == after {
        return None;
    }

    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, old_value) in old {
                match new.get(key) {
                    Some(new_value) => {
                        if let Some(diff) = create_merge_patch(old_value, new_value) {
                            patch.insert(key.clone(), diff);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                }
            }
            for (key, new_value) in new {
                if !old.contains_key(key) {
                    patch.insert(key.clone(), new_value.clone());
                }
            }
            Some(Value::Object(patch))
        }
        _ => Some(after.clone()),
    }
}

/// Apply an RFC 7386 merge patch in place
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}
