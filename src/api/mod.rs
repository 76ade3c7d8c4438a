/// Cluster API and Azure infrastructure resource models
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API group of the Azure infrastructure resources
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// API version of the Azure infrastructure resources
pub const INFRASTRUCTURE_VERSION: &str = "v1alpha3";

/// Label applied by Cluster API to every object owned by a cluster
pub const CLUSTER_LABEL_NAME: &str = "cluster.x-k8s.io/cluster-name";

/// Resource tags applied to Azure resources
pub type Tags = BTreeMap<String, String>;

/// Failure domains keyed by their identifier
pub type FailureDomains = BTreeMap<String, FailureDomainSpec>;

/// Object metadata shared by all resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// Cluster API `Cluster` resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterSpec,
}

/// Desired state of a Cluster API cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_network: Option<ClusterNetwork>,
}

/// Cluster-wide network settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    /// Port the API server binds to, defaults to 6443 when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_port: Option<i32>,
}

/// Failure domain advertised by an infrastructure provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomainSpec {
    /// Whether control plane machines may be placed in this domain
    #[serde(default)]
    pub control_plane: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// `AzureCluster` infrastructure resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureCluster {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: AzureClusterSpec,
    #[serde(default)]
    pub status: AzureClusterStatus,
}

/// Desired state of an Azure cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterSpec {
    #[serde(rename = "subscriptionID", default)]
    pub subscription_id: String,
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub location: String,
    /// Extra tags added to every Azure resource, may be absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_tags: Option<Tags>,
    #[serde(default)]
    pub network_spec: NetworkSpec,
}

/// Network layout of an Azure cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default)]
    pub vnet: VnetSpec,
    #[serde(default)]
    pub subnets: Subnets,
}

impl NetworkSpec {
    /// First subnet with the control plane role
    pub fn control_plane_subnet(&self) -> Option<&SubnetSpec> {
        self.subnet_with_role(SubnetRole::ControlPlane)
    }

    /// First subnet with the node role
    pub fn node_subnet(&self) -> Option<&SubnetSpec> {
        self.subnet_with_role(SubnetRole::Node)
    }

    fn subnet_with_role(&self, role: SubnetRole) -> Option<&SubnetSpec> {
        self.subnets.iter().find(|s| s.role == Some(role))
    }
}

/// Virtual network configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnetSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cidr_block: String,
}

/// Ordered list of subnets
pub type Subnets = Vec<SubnetSpec>;

/// Subnet configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<SubnetRole>,
    #[serde(default)]
    pub cidr_block: String,
    /// Static private IP for the internal API server load balancer
    #[serde(
        rename = "internalLBIPAddress",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub internal_lb_ip_address: String,
}

/// Role a subnet plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetRole {
    ControlPlane,
    Node,
}

impl std::fmt::Display for SubnetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubnetRole::ControlPlane => write!(f, "control-plane"),
            SubnetRole::Node => write!(f, "node"),
        }
    }
}

/// Observed state of an Azure cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterStatus {
    #[serde(default)]
    pub network: Network,
    /// Allocated on first write only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domains: Option<FailureDomains>,
    #[serde(default)]
    pub ready: bool,
}

/// Provisioned network resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    #[serde(rename = "apiServerIp", default)]
    pub api_server_ip: PublicIp,
}

/// Public IP recorded in status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIp {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub dns_name: String,
}

/// Reference identifying a namespaced object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    pub namespace: String,
    pub name: String,
}

impl AzureCluster {
    /// Reference used when addressing this object through a client
    pub fn object_ref(&self) -> ObjectReference {
        ObjectReference {
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }
}

impl std::fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
