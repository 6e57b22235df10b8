//! Cephalon Operator - Ceph credentials and CephFS lifecycle on Kubernetes

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use cephalon::config::{OperatorConfig, DEFAULT_CEPH_BINARY, DEFAULT_CONFIG_ROOT};
use cephalon::controller::{error_policy, reconcile_client, reconcile_filesystem, Context};
use cephalon::crd::{CephClient, CephCluster, CephFilesystem};
use cephalon::retry::{retry_retryable, RetryConfig};
use cephalon::telemetry::{init_logging, LogFormat};

/// Cephalon - Kubernetes operator for Ceph credentials and CephFS lifecycle
#[derive(Parser, Debug)]
#[command(name = "cephalon", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches CephClient and CephFilesystem resources and reconciles them
    /// against the cluster named by the namespace's CephCluster.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Path to the ceph CLI
    #[arg(long, env = "CEPHALON_CEPH_BINARY", default_value = DEFAULT_CEPH_BINARY)]
    ceph_binary: PathBuf,

    /// Directory holding `<namespace>/<namespace>.config` and admin keyrings
    #[arg(long, env = "CEPHALON_CONFIG_ROOT", default_value = DEFAULT_CONFIG_ROOT)]
    config_root: PathBuf,

    /// Timeout for bounded cluster commands, in seconds
    #[arg(long, env = "CEPHALON_COMMAND_TIMEOUT_SECS", default_value = "15")]
    command_timeout_secs: u64,

    /// Interval between standby checks during filesystem removal, in seconds
    #[arg(long, env = "CEPHALON_STANDBY_POLL_INTERVAL_SECS", default_value = "2")]
    standby_poll_interval_secs: u64,

    /// Give up waiting for standby daemons after this many seconds
    #[arg(long, env = "CEPHALON_STANDBY_WAIT_TIMEOUT_SECS", default_value = "30")]
    standby_wait_timeout_secs: u64,

    /// Log output format (text or json)
    #[arg(long, env = "CEPHALON_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

impl Default for ControllerArgs {
    fn default() -> Self {
        Self {
            ceph_binary: PathBuf::from(DEFAULT_CEPH_BINARY),
            config_root: PathBuf::from(DEFAULT_CONFIG_ROOT),
            command_timeout_secs: 15,
            standby_poll_interval_secs: 2,
            standby_wait_timeout_secs: 30,
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerArgs {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            ceph_binary: self.ceph_binary.clone(),
            config_root: self.config_root.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            standby_poll_interval: Duration::from_secs(self.standby_poll_interval_secs),
            standby_wait_timeout: Duration::from_secs(self.standby_wait_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [CephClient::crd(), CephFilesystem::crd(), CephCluster::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    let args = match cli.command {
        Some(Commands::Controller(args)) => args,
        None => ControllerArgs::default(),
    };
    run_controller(args).await
}

/// Install the CRDs this operator serves
///
/// Server-side apply keeps the installed schema in step with the binary.
/// `CephCluster` is installed too so the readiness gate can be watched in
/// clusters where no other operator provides it.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("cephalon-controller").force();

    for crd in [CephClient::crd(), CephFilesystem::crd(), CephCluster::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD...");
        retry_retryable(&RetryConfig::with_max_attempts(10), "install CRD", || async {
            crds.patch(&name, &params, &Patch::Apply(&crd))
                .await
                .map_err(cephalon::Error::from)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install {} CRD: {}", name, e))?;
    }

    tracing::info!("All cephalon CRDs installed/updated");
    Ok(())
}

/// Run the CephClient and CephFilesystem controllers until shutdown
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    init_logging(args.log_format)?;

    let config = args.operator_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing::info!(
        ceph_binary = %config.ceph_binary.display(),
        config_root = %config.config_root.display(),
        "Starting cephalon controller"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(
        Context::builder(client.clone())
            .config(config)
            .shutdown(shutdown.clone())
            .build(),
    );

    let clients: Api<CephClient> = Api::all(client.clone());
    let filesystems: Api<CephFilesystem> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());

    tracing::info!("Starting CephClient and CephFilesystem controllers...");

    let client_controller = Controller::new(clients, WatcherConfig::default())
        .owns(secrets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_client, error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "CephClient reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "CephClient reconciliation error");
                }
            }
        });

    let filesystem_controller = Controller::new(filesystems, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_filesystem, error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "CephFilesystem reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "CephFilesystem reconciliation error");
                }
            }
        });

    tokio::select! {
        _ = client_controller => {
            tracing::info!("CephClient controller completed");
        }
        _ = filesystem_controller => {
            tracing::info!("CephFilesystem controller completed");
        }
    }

    // Ends any standby wait still polling
    shutdown.cancel();
    tracing::info!("Cephalon controller shutting down");
    Ok(())
}
