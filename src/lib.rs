//! capz-scope - per-reconcile scopes for Azure Kubernetes cluster infrastructure
//!
//! A [`scope::ClusterScope`] holds one reconcile pass's view of a Cluster and
//! its AzureCluster, derives load balancer and public IP specs for the
//! provisioning actuators, and persists the AzureCluster once the pass ends.

pub mod api;
pub mod azure;
pub mod config;
pub mod k8s;
pub mod patch;
pub mod scope;

pub use scope::{ClusterScope, ClusterScopeParams, Deadline, Error};
