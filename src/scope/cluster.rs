/// Cluster scope used by the AzureCluster reconciler
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument, Span};

use super::{Deadline, Error};
use crate::api::{
    AzureCluster, Cluster, FailureDomainSpec, Network, SubnetSpec, Tags, VnetSpec,
    CLUSTER_LABEL_NAME,
};
use crate::azure::{
    self, AuthError, Authorizer, CredentialBundle, CredentialResolver, LBRole, LBSpec,
    PublicIPSpec,
};
use crate::k8s::Client;
use crate::patch::{Helper, PatchError};

/// API server port used when the Cluster does not set one
pub const DEFAULT_API_SERVER_PORT: i32 = 6443;

/// Inputs for building a [`ClusterScope`]
pub struct ClusterScopeParams {
    pub cluster: Option<Cluster>,
    pub azure_cluster: Option<AzureCluster>,
    /// Client the patch helper persists through
    pub client: Arc<dyn Client>,
    pub credentials: Arc<dyn CredentialResolver>,
    /// Span log events are recorded under, one is created when absent
    pub span: Option<Span>,
    /// Bounds credential resolution
    pub deadline: Deadline,
}

/// State of one AzureCluster reconcile pass
///
/// Actuators read and mutate the AzureCluster through the scope. All changes
/// are persisted by [`ClusterScope::close`], which consumes the scope.
pub struct ClusterScope {
    span: Span,
    patch_helper: Helper,
    credentials: CredentialBundle,
    cluster: Cluster,
    azure_cluster: AzureCluster,
    closed: bool,
}

impl ClusterScope {
    /// Build a scope for one reconcile pass
    ///
    /// Fails without returning a scope when an input is missing, credentials
    /// cannot be resolved, or the patch helper cannot be bound.
    pub async fn new(params: ClusterScopeParams) -> Result<Self, Error> {
        let cluster = params.cluster.ok_or(Error::InvalidArgument("nil Cluster"))?;
        let azure_cluster = params
            .azure_cluster
            .ok_or(Error::InvalidArgument("nil AzureCluster"))?;

        let span = params.span.unwrap_or_else(|| {
            info_span!(
                "cluster_scope",
                cluster = %cluster.metadata.name,
                namespace = %cluster.metadata.namespace
            )
        });

        let credentials = params
            .deadline
            .run(
                params
                    .credentials
                    .resolve(&azure_cluster.spec.subscription_id),
            )
            .instrument(span.clone())
            .await
            .unwrap_or(Err(AuthError::DeadlineExceeded))
            .map_err(Error::Authentication)?;

        let patch_helper =
            Helper::new(&azure_cluster, params.client).map_err(Error::Initialization)?;

        span.in_scope(|| {
            debug!(
                "Scope ready for subscription {} in {}",
                credentials.subscription_id, credentials.resource_manager_endpoint
            )
        });

        Ok(Self {
            span,
            patch_helper,
            credentials,
            cluster,
            azure_cluster,
            closed: false,
        })
    }

    /// Azure subscription ID
    pub fn subscription_id(&self) -> &str {
        &self.credentials.subscription_id
    }

    /// Azure Resource Manager endpoint
    pub fn base_uri(&self) -> &str {
        &self.credentials.resource_manager_endpoint
    }

    /// Authorizer for Azure requests
    pub fn authorizer(&self) -> Arc<dyn Authorizer> {
        Arc::clone(&self.credentials.authorizer)
    }

    /// Span the scope logs under
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn azure_cluster(&self) -> &AzureCluster {
        &self.azure_cluster
    }

    pub fn azure_cluster_mut(&mut self) -> &mut AzureCluster {
        &mut self.azure_cluster
    }

    /// Network status of the cluster
    pub fn network(&self) -> &Network {
        &self.azure_cluster.status.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.azure_cluster.status.network
    }

    /// Public IPs to provision: node outbound first, API server second
    pub fn public_ip_specs(&self) -> Vec<PublicIPSpec> {
        let api_server_ip = &self.network().api_server_ip;
        vec![
            PublicIPSpec {
                name: azure::generate_node_outbound_ip_name(self.cluster_name()),
                dns_name: String::new(),
            },
            PublicIPSpec {
                name: api_server_ip.name.clone(),
                dns_name: api_server_ip.dns_name.clone(),
            },
        ]
    }

    /// Load balancers to provision
    ///
    /// The order is internal, API server, node outbound. Actuators depend on it.
    pub fn lb_specs(&self) -> Vec<LBSpec> {
        let control_plane = self.control_plane_subnet().cloned().unwrap_or_default();
        let api_server_port = self.api_server_port();
        let cluster_name = self.cluster_name();

        vec![
            LBSpec {
                name: azure::generate_internal_lb_name(cluster_name),
                subnet_name: control_plane.name,
                subnet_cidr: control_plane.cidr_block,
                private_ip_address: control_plane.internal_lb_ip_address,
                api_server_port,
                role: LBRole::Internal,
                public_ip_name: String::new(),
            },
            LBSpec {
                name: azure::generate_public_lb_name(cluster_name),
                subnet_name: String::new(),
                subnet_cidr: String::new(),
                private_ip_address: String::new(),
                api_server_port,
                role: LBRole::ApiServer,
                public_ip_name: self.network().api_server_ip.name.clone(),
            },
            LBSpec {
                name: cluster_name.to_string(),
                subnet_name: String::new(),
                subnet_cidr: String::new(),
                private_ip_address: String::new(),
                api_server_port: 0,
                role: LBRole::NodeOutbound,
                public_ip_name: azure::generate_node_outbound_ip_name(cluster_name),
            },
        ]
    }

    pub fn vnet(&self) -> &VnetSpec {
        &self.azure_cluster.spec.network_spec.vnet
    }

    pub fn vnet_mut(&mut self) -> &mut VnetSpec {
        &mut self.azure_cluster.spec.network_spec.vnet
    }

    pub fn subnets(&self) -> &[SubnetSpec] {
        &self.azure_cluster.spec.network_spec.subnets
    }

    /// First subnet with the control plane role, if any
    pub fn control_plane_subnet(&self) -> Option<&SubnetSpec> {
        self.azure_cluster.spec.network_spec.control_plane_subnet()
    }

    /// First subnet with the node role, if any
    pub fn node_subnet(&self) -> Option<&SubnetSpec> {
        self.azure_cluster.spec.network_spec.node_subnet()
    }

    pub fn resource_group(&self) -> &str {
        &self.azure_cluster.spec.resource_group
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.cluster.metadata.namespace
    }

    pub fn location(&self) -> &str {
        &self.azure_cluster.spec.location
    }

    /// Fully qualified domain name of the API server public IP
    ///
    /// Components are joined as-is, callers supply well-formed names.
    pub fn generate_fqdn(&self) -> String {
        format!(
            "{}.{}.{}",
            self.network().api_server_ip.name,
            self.location(),
            self.credentials.resource_manager_vm_dns_suffix
        )
    }

    /// Label selector matching objects that belong to this cluster
    pub fn list_options_label_selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            CLUSTER_LABEL_NAME.to_string(),
            self.cluster.metadata.name.clone(),
        )])
    }

    /// Copy of the additional tags, empty when none are set
    pub fn additional_tags(&self) -> Tags {
        self.azure_cluster
            .spec
            .additional_tags
            .clone()
            .unwrap_or_default()
    }

    /// API server port, 6443 unless the Cluster overrides it
    pub fn api_server_port(&self) -> i32 {
        self.cluster
            .spec
            .cluster_network
            .as_ref()
            .and_then(|network| network.api_server_port)
            .unwrap_or(DEFAULT_API_SERVER_PORT)
    }

    /// Record a failure domain, replacing any previous entry with the same id
    pub fn set_failure_domain(&mut self, id: impl Into<String>, spec: FailureDomainSpec) {
        self.azure_cluster
            .status
            .failure_domains
            .get_or_insert_with(BTreeMap::new)
            .insert(id.into(), spec);
    }

    /// Persist the cluster configuration and status without ending the pass
    pub async fn patch_object(&mut self, deadline: Deadline) -> Result<(), Error> {
        let object = self.azure_cluster.object_ref().to_string();
        deadline
            .run(self.patch_helper.patch(&self.azure_cluster))
            .instrument(self.span.clone())
            .await
            .unwrap_or(Err(PatchError::DeadlineExceeded))
            .map_err(|source| Error::Commit { object, source })
    }

    /// End the pass, persisting the cluster configuration and status
    pub async fn close(mut self, deadline: Deadline) -> Result<(), Error> {
        self.closed = true;
        self.patch_object(deadline).await
    }

    /// Run a reconcile pass against this scope and commit afterwards
    ///
    /// The scope is closed whether or not `body` succeeds. An error from
    /// `body` takes precedence over a commit error, which is then only logged.
    pub async fn reconcile<T, E, F>(mut self, deadline: Deadline, body: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut ClusterScope) -> BoxFuture<'a, Result<T, E>>,
        E: From<Error>,
    {
        let result = body(&mut self).await;
        let span = self.span.clone();
        let closed = self.close(deadline).await;

        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(commit_err)) => {
                span.in_scope(|| warn!("Failed to commit after failed reconcile: {}", commit_err));
                Err(err)
            }
        }
    }
}

impl Drop for ClusterScope {
    fn drop(&mut self) {
        if !self.closed {
            self.span.in_scope(|| {
                warn!(
                    "Scope for {} dropped without being closed, changes were not persisted",
                    self.azure_cluster.object_ref()
                )
            });
        }
    }
}
