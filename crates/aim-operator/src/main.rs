//! AIM operator - reconciles AIMService resources into inference runtimes

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::DynamicObject;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use aim_common::crd::{
    AIMClusterModel, AIMClusterRuntimeConfig, AIMClusterServiceTemplate, AIMModel, AIMModelCache,
    AIMRuntimeConfig, AIMService, AIMServiceTemplate, AIMTemplateCache,
};
use aim_common::kube_utils::HasApiResource;
use aim_common::runtime::inference::InferenceService;
use aim_common::telemetry::{init_telemetry, TelemetryConfig};
use aim_service::controller::{error_policy, reconcile, AimServiceContext};
use aim_service::ReconcilePolicy;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// AIM - serves AI models on AMD GPUs from declarative AIMService resources
#[derive(Parser, Debug)]
#[command(name = "aim-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Requeue interval for Running services
    #[arg(long, env = "AIM_REQUEUE_INTERVAL_SECS", default_value_t = 60)]
    requeue_interval_secs: u64,

    /// Requeue interval while a service converges
    #[arg(long, env = "AIM_PROGRESS_REQUEUE_SECS", default_value_t = 10)]
    progress_requeue_secs: u64,

    /// Failed-cache recreations before falling back or failing
    #[arg(long, env = "AIM_CACHE_RETRY_BUDGET", default_value_t = 1)]
    cache_retry_budget: u32,

    /// Field manager for server-side apply
    #[arg(long, env = "AIM_FIELD_MANAGER", default_value = aim_common::FIELD_MANAGER)]
    field_manager: String,

    /// Human-readable logs instead of JSON
    #[arg(long, env = "AIM_LOG_TEXT")]
    log_text: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the AIMService controller (default mode)
    Controller,
}

impl Cli {
    fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            requeue_interval: Duration::from_secs(self.requeue_interval_secs),
            progress_requeue_interval: Duration::from_secs(self.progress_requeue_secs),
            cache_retry_budget: self.cache_retry_budget,
            field_manager: self.field_manager.clone(),
            ..ReconcilePolicy::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_manifests()?);
        return Ok(());
    }

    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install aws-lc-rs crypto provider: {e:?}");
    }

    init_telemetry(TelemetryConfig {
        json: !cli.log_text,
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.policy()).await,
    }
}

/// Every CRD this operator reads or writes, as one multi-document YAML stream
fn crd_manifests() -> anyhow::Result<String> {
    let crds = [
        AIMService::crd(),
        AIMModel::crd(),
        AIMClusterModel::crd(),
        AIMServiceTemplate::crd(),
        AIMClusterServiceTemplate::crd(),
        AIMTemplateCache::crd(),
        AIMModelCache::crd(),
        AIMRuntimeConfig::crd(),
        AIMClusterRuntimeConfig::crd(),
    ];
    let docs = crds
        .iter()
        .map(|crd| {
            serde_yaml::to_string(crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(docs.join("---\n"))
}

async fn run_controller(policy: ReconcilePolicy) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    tracing::info!(
        field_manager = %policy.field_manager,
        requeue_secs = policy.requeue_interval.as_secs(),
        "starting AIMService controller"
    );

    let ctx = Arc::new(AimServiceContext::from_client(client.clone(), policy));
    let services: Api<AIMService> = Api::all(client.clone());
    let runtime_ar = InferenceService::api_resource();
    let runtimes: Api<DynamicObject> = Api::all_with(client.clone(), &runtime_ar);
    let volumes: Api<PersistentVolumeClaim> = Api::all(client);
    let watch = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    Controller::new(services, watch())
        .owns_with(runtimes, runtime_ar, watch())
        .owns(volumes, watch())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("AIMService"))
        .await;

    tracing::info!("controller stopped");
    Ok(())
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
