/// Azure provisioning specs, naming and credentials
pub mod auth;
pub mod environment;

use serde::Serialize;

pub use auth::{
    AuthError, Authorizer, CredentialBundle, CredentialResolver, EnvironmentCredentialResolver,
};
pub use environment::Environment;

/// Public IP address to provision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIPSpec {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dns_name: String,
}

/// Load balancer to provision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LBSpec {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subnet_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subnet_cidr: String,
    #[serde(rename = "privateIPAddress", skip_serializing_if = "String::is_empty")]
    pub private_ip_address: String,
    /// Zero for load balancers that do not front the API server
    pub api_server_port: i32,
    pub role: LBRole,
    #[serde(rename = "publicIPName", skip_serializing_if = "String::is_empty")]
    pub public_ip_name: String,
}

/// Purpose of a load balancer, used by actuators to reconcile it idempotently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LBRole {
    Internal,
    ApiServer,
    NodeOutbound,
}

impl std::fmt::Display for LBRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LBRole::Internal => write!(f, "internal"),
            LBRole::ApiServer => write!(f, "api-server"),
            LBRole::NodeOutbound => write!(f, "node-outbound"),
        }
    }
}

/// Name of the internal control plane load balancer
pub fn generate_internal_lb_name(cluster_name: &str) -> String {
    format!("{}-internal-lb", cluster_name)
}

/// Name of the public API server load balancer
pub fn generate_public_lb_name(cluster_name: &str) -> String {
    format!("{}-public-lb", cluster_name)
}

/// Name of the public IP used for node outbound traffic
pub fn generate_node_outbound_ip_name(cluster_name: &str) -> String {
    format!("pip-{}-node-outbound", cluster_name)
}

/// Name of the public IP fronting the API server
pub fn generate_api_server_ip_name(cluster_name: &str) -> String {
    format!("pip-{}-apiserver", cluster_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_generators() {
        assert_eq!(generate_internal_lb_name("c1"), "c1-internal-lb");
        assert_eq!(generate_public_lb_name("c1"), "c1-public-lb");
        assert_eq!(generate_node_outbound_ip_name("c1"), "pip-c1-node-outbound");
        assert_eq!(generate_api_server_ip_name("c1"), "pip-c1-apiserver");
    }

    #[test]
    fn test_lb_spec_serialization_skips_empty_fields() {
        let spec = LBSpec {
            name: "c1".to_string(),
            subnet_name: String::new(),
            subnet_cidr: String::new(),
            private_ip_address: String::new(),
            api_server_port: 0,
            role: LBRole::NodeOutbound,
            public_ip_name: "pip-c1-node-outbound".to_string(),
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["role"], "node-outbound");
        assert_eq!(value["publicIPName"], "pip-c1-node-outbound");
        assert!(value.get("subnetName").is_none());
    }
}
