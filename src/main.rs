/// capz-scope - Azure cluster reconcile scope
///
/// Builds a reconcile scope for an AzureCluster manifest, shows the
/// infrastructure it derives and persists status changes back.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capz_scope::api::FailureDomainSpec;
use capz_scope::azure::{self, EnvironmentCredentialResolver};
use capz_scope::config::ScopeConfig;
use capz_scope::k8s::{Client, FileClient, KubeClient};
use capz_scope::{ClusterScope, ClusterScopeParams, Deadline};

#[derive(Parser)]
#[command(name = "capz-scope")]
#[command(about = "Derive and persist Azure cluster infrastructure state", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "cluster.yaml")]
    config: PathBuf,

    /// Seconds allowed for credential resolution and for the final commit
    #[arg(short, long, default_value_t = 60)]
    timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate example configuration file
    Init,

    /// Show the load balancers and public IPs derived for the cluster
    Plan,

    /// Record API server IP and failure domains, then persist the AzureCluster
    Sync {
        /// Availability zone to register as a failure domain (repeatable)
        #[arg(long = "zone")]
        zones: Vec<String>,

        /// Do not allow control plane machines in the registered zones
        #[arg(long)]
        workers_only: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("capz_scope={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Init => init_config(&cli).await,
        Commands::Plan => plan(&cli).await,
        Commands::Sync {
            ref zones,
            workers_only,
        } => sync(&cli, zones, workers_only).await,
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Build a scope from the configuration file
async fn open_scope(cli: &Cli) -> Result<ClusterScope> {
    let config = ScopeConfig::from_file(&cli.config).context("Failed to load configuration")?;

    let client: Arc<dyn Client> = match &config.kubernetes {
        Some(kubernetes) => {
            let token = config.kube_token();
            Arc::new(
                KubeClient::new(
                    &kubernetes.server,
                    token.as_deref(),
                    kubernetes.insecure_skip_tls_verify,
                )
                .context("Failed to create Kubernetes client")?,
            )
        }
        None => Arc::new(FileClient::new(&cli.config)),
    };

    let scope = ClusterScope::new(ClusterScopeParams {
        cluster: Some(config.cluster),
        azure_cluster: Some(config.azure_cluster),
        client,
        credentials: Arc::new(EnvironmentCredentialResolver::from_env()),
        span: None,
        deadline: Deadline::after(Duration::from_secs(cli.timeout)),
    })
    .await?;

    Ok(scope)
}

/// Show derived infrastructure specs
async fn plan(cli: &Cli) -> Result<()> {
    let scope = open_scope(cli).await?;

    info!("Cluster: {}/{}", scope.namespace(), scope.cluster_name());
    info!("Subscription: {}", scope.subscription_id());
    info!("Resource group: {}", scope.resource_group());
    info!("Location: {}", scope.location());
    info!("API server port: {}", scope.api_server_port());

    #[derive(serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Plan {
        public_ips: Vec<azure::PublicIPSpec>,
        load_balancers: Vec<azure::LBSpec>,
        tags: capz_scope::api::Tags,
    }

    let plan = Plan {
        public_ips: scope.public_ip_specs(),
        load_balancers: scope.lb_specs(),
        tags: scope.additional_tags(),
    };
    println!("{}", serde_yaml::to_string(&plan)?);

    scope
        .close(Deadline::after(Duration::from_secs(cli.timeout)))
        .await?;

    Ok(())
}

/// Record network status and failure domains, then commit
async fn sync(cli: &Cli, zones: &[String], workers_only: bool) -> Result<()> {
    let scope = open_scope(cli).await?;
    let deadline = Deadline::after(Duration::from_secs(cli.timeout));
    let zones = zones.to_vec();

    scope
        .reconcile(deadline, move |scope| {
            async move {
                if scope.network().api_server_ip.name.is_empty() {
                    let name = azure::generate_api_server_ip_name(scope.cluster_name());
                    info!("Assigning API server public IP name: {}", name);
                    scope.network_mut().api_server_ip.name = name;
                }
                if scope.network().api_server_ip.dns_name.is_empty() {
                    let fqdn = scope.generate_fqdn();
                    info!("Assigning API server DNS name: {}", fqdn);
                    scope.network_mut().api_server_ip.dns_name = fqdn;
                }

                for zone in zones {
                    info!("Registering failure domain: {}", zone);
                    scope.set_failure_domain(
                        zone,
                        FailureDomainSpec {
                            control_plane: !workers_only,
                            ..Default::default()
                        },
                    );
                }

                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        })
        .await?;

    info!("✓ AzureCluster synchronized");
    Ok(())
}

/// Initialize example configuration file
async fn init_config(cli: &Cli) -> Result<()> {
    if cli.config.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            cli.config.display()
        );
    }

    let example_config = ScopeConfig::example();
    let yaml = serde_yaml::to_string(&example_config)?;

    tokio::fs::write(&cli.config, yaml)
        .await
        .context("Failed to write configuration file")?;

    info!("Example configuration created: {}", cli.config.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the configuration file to match your requirements");
    info!("  2. Set your Azure credentials:");
    info!("     export AZURE_SUBSCRIPTION_ID=... AZURE_TENANT_ID=... AZURE_CLIENT_ID=... AZURE_CLIENT_SECRET=...");
    info!("  3. Inspect the derived infrastructure:");
    info!("     capz-scope plan");

    Ok(())
}
