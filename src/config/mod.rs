/// Configuration management for capz-scope
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::api::{
    AzureCluster, AzureClusterSpec, Cluster, NetworkSpec, ObjectMeta, SubnetRole, SubnetSpec,
    VnetSpec,
};

/// Manifest describing one cluster and where to persist it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeConfig {
    /// Cluster API cluster
    pub cluster: Cluster,

    /// Azure infrastructure for the cluster
    pub azure_cluster: AzureCluster,

    /// Kubernetes API server to persist to, the manifest file itself when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubernetesConfig>,
}

/// Kubernetes API server connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    /// API server URL (e.g., "https://127.0.0.1:6443")
    pub server: String,

    /// Bearer token (can also be set via KUBE_TOKEN env var)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Skip TLS verification of the API server certificate
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

impl ScopeConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScopeConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cluster.metadata.name.is_empty() {
            anyhow::bail!("cluster.metadata.name cannot be empty");
        }

        if self.azure_cluster.metadata.name.is_empty() {
            anyhow::bail!("azureCluster.metadata.name cannot be empty");
        }

        if self.azure_cluster.spec.location.is_empty() {
            anyhow::bail!("azureCluster.spec.location cannot be empty");
        }

        for subnet in &self.azure_cluster.spec.network_spec.subnets {
            if !subnet.cidr_block.is_empty() {
                self.validate_cidr(&subnet.cidr_block)?;
            }
        }

        Ok(())
    }

    /// Validate CIDR notation
    fn validate_cidr(&self, cidr: &str) -> anyhow::Result<()> {
        if !cidr.contains('/') {
            anyhow::bail!("Invalid CIDR notation: {}", cidr);
        }
        Ok(())
    }

    /// Get the Kubernetes bearer token from config or environment
    pub fn kube_token(&self) -> Option<String> {
        self.kubernetes
            .as_ref()
            .and_then(|k| k.token.clone())
            .or_else(|| std::env::var("KUBE_TOKEN").ok())
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        let name = "azure-cluster".to_string();
        let metadata = ObjectMeta {
            name: name.clone(),
            namespace: "default".to_string(),
            ..Default::default()
        };

        Self {
            cluster: Cluster {
                metadata: metadata.clone(),
                spec: Default::default(),
            },
            azure_cluster: AzureCluster {
                metadata,
                spec: AzureClusterSpec {
                    subscription_id: String::new(),
                    resource_group: name.clone(),
                    location: "eastus".to_string(),
                    additional_tags: Some(BTreeMap::from([(
                        "managed-by".to_string(),
                        "capz-scope".to_string(),
                    )])),
                    network_spec: NetworkSpec {
                        vnet: VnetSpec {
                            name: format!("{}-vnet", name),
                            cidr_block: "10.0.0.0/8".to_string(),
                            ..Default::default()
                        },
                        subnets: vec![
                            SubnetSpec {
                                name: format!("{}-controlplane-subnet", name),
                                role: Some(SubnetRole::ControlPlane),
                                cidr_block: "10.0.0.0/16".to_string(),
                                internal_lb_ip_address: "10.0.0.100".to_string(),
                            },
                            SubnetSpec {
                                name: format!("{}-node-subnet", name),
                                role: Some(SubnetRole::Node),
                                cidr_block: "10.1.0.0/16".to_string(),
                                internal_lb_ip_address: String::new(),
                            },
                        ],
                    },
                },
                status: Default::default(),
            },
            kubernetes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = ScopeConfig::example();
        assert!(config.validate().is_ok());

        config.azure_cluster.spec.location = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cidr_validation() {
        let config = ScopeConfig::example();
        assert!(config.validate_cidr("10.0.0.0/16").is_ok());
        assert!(config.validate_cidr("invalid").is_err());
    }

    #[test]
    fn test_example_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yaml");
        std::fs::write(&path, serde_yaml::to_string(&ScopeConfig::example()).unwrap()).unwrap();

        let config = ScopeConfig::from_file(&path).unwrap();
        assert_eq!(config.cluster.metadata.name, "azure-cluster");
        assert!(config.kubernetes.is_none());
        assert!(config.azure_cluster.spec.network_spec.control_plane_subnet().is_some());
    }
}
