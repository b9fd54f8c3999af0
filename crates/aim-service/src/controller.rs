//! AIMService controller implementation
//!
//! One reconcile pass runs four stages: fetch every dependency, observe
//! (pure per-domain decisions), plan (pure object bodies), and project
//! (pure status). Only the client seam below touches the API server, so the
//! whole pass can be driven from a mock in tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use aim_common::crd::{
    AIMClusterModel, AIMClusterRuntimeConfig, AIMClusterServiceTemplate, AIMModel, AIMModelCache,
    AIMRuntimeConfig, AIMService, AIMServiceStatus, AIMServiceTemplate, AIMTemplateCache,
    ServicePhase,
};
use aim_common::events::{actions, reasons, EventPublisher};
use aim_common::kube_utils::HasApiResource;
use aim_common::network::gateway_api::HttpRoute;
use aim_common::runtime::inference::InferenceService;
use aim_common::{Error, KubeEventPublisher, KSERVE_ISVC_POD_LABEL};
#[cfg(test)]
use aim_common::NoopEventPublisher;
use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim, Pod};

use crate::config::ReconcilePolicy;
use crate::fetch::fetch;
use crate::health::status_changed;
use crate::pipeline::{observe, phase_of, project};
use crate::plan::{plan, ApplyMode, PlanResult, PlannedObject};

// =============================================================================
// Traits for dependency injection and testability
// =============================================================================

/// Kubernetes operations the AIMService controller needs
///
/// Reads return `Ok(None)` or an empty list when the object or its CRD is
/// absent; every other API failure is an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AimServiceKubeClient: Send + Sync {
    /// Namespaced runtime config by name
    async fn get_runtime_config(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<AIMRuntimeConfig>, Error>;

    /// Cluster runtime config by name
    async fn get_cluster_runtime_config(
        &self,
        name: &str,
    ) -> Result<Option<AIMClusterRuntimeConfig>, Error>;

    /// Model records in a namespace
    async fn list_models(&self, namespace: &str) -> Result<Vec<AIMModel>, Error>;

    /// Cluster model records
    async fn list_cluster_models(&self) -> Result<Vec<AIMClusterModel>, Error>;

    /// Templates in a namespace
    async fn list_templates(&self, namespace: &str) -> Result<Vec<AIMServiceTemplate>, Error>;

    /// Cluster templates
    async fn list_cluster_templates(&self) -> Result<Vec<AIMClusterServiceTemplate>, Error>;

    /// Template caches in a namespace
    async fn list_template_caches(&self, namespace: &str) -> Result<Vec<AIMTemplateCache>, Error>;

    /// Model caches in a namespace
    async fn list_model_caches(&self, namespace: &str) -> Result<Vec<AIMModelCache>, Error>;

    /// Persistent volume claim by name
    async fn get_pvc(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error>;

    /// KServe InferenceService by name
    async fn get_inference_service(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<InferenceService>, Error>;

    /// Pods belonging to an InferenceService
    async fn list_runtime_pods(&self, isvc_name: &str, namespace: &str) -> Result<Vec<Pod>, Error>;

    /// Labels of every node
    async fn list_node_labels(&self) -> Result<Vec<BTreeMap<String, String>>, Error>;

    /// HTTPRoute by name
    async fn get_route(&self, name: &str, namespace: &str) -> Result<Option<HttpRoute>, Error>;

    /// Apply a plan: shared objects, then owned objects, then deletions
    async fn apply_plan(
        &self,
        service_name: &str,
        namespace: &str,
        plan: &PlanResult,
    ) -> Result<(), Error>;

    /// Patch the status of an AIMService
    async fn patch_service_status(
        &self,
        name: &str,
        namespace: &str,
        status: &AIMServiceStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct AimServiceKubeClientImpl {
    client: Client,
    field_manager: String,
}

impl AimServiceKubeClientImpl {
    /// Wrap a client, writing as `field_manager`
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Read a third-party resource through `DynamicObject` and convert it
    async fn get_dynamic<T>(&self, name: &str, namespace: &str) -> Result<Option<T>, Error>
    where
        T: HasApiResource + DeserializeOwned + Send,
    {
        let ar = T::api_resource();
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let Some(obj) = api.get_opt(name).await? else {
            return Ok(None);
        };
        let value = serde_json::to_value(&obj)
            .map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))
    }
}

#[async_trait]
impl AimServiceKubeClient for AimServiceKubeClientImpl {
    async fn get_runtime_config(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<AIMRuntimeConfig>, Error> {
        let api: Api<AIMRuntimeConfig> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_cluster_runtime_config(
        &self,
        name: &str,
    ) -> Result<Option<AIMClusterRuntimeConfig>, Error> {
        let api: Api<AIMClusterRuntimeConfig> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_models(&self, namespace: &str) -> Result<Vec<AIMModel>, Error> {
        let api: Api<AIMModel> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_cluster_models(&self) -> Result<Vec<AIMClusterModel>, Error> {
        let api: Api<AIMClusterModel> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_templates(&self, namespace: &str) -> Result<Vec<AIMServiceTemplate>, Error> {
        let api: Api<AIMServiceTemplate> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_cluster_templates(&self) -> Result<Vec<AIMClusterServiceTemplate>, Error> {
        let api: Api<AIMClusterServiceTemplate> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_template_caches(&self, namespace: &str) -> Result<Vec<AIMTemplateCache>, Error> {
        let api: Api<AIMTemplateCache> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_model_caches(&self, namespace: &str) -> Result<Vec<AIMModelCache>, Error> {
        let api: Api<AIMModelCache> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_pvc(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_inference_service(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<InferenceService>, Error> {
        self.get_dynamic(name, namespace).await
    }

    async fn list_runtime_pods(&self, isvc_name: &str, namespace: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{KSERVE_ISVC_POD_LABEL}={isvc_name}"));
        Ok(api.list(&params).await?.items)
    }

    async fn list_node_labels(&self) -> Result<Vec<BTreeMap<String, String>>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?.items;
        Ok(nodes
            .into_iter()
            .map(|n| n.metadata.labels.unwrap_or_default())
            .collect())
    }

    async fn get_route(&self, name: &str, namespace: &str) -> Result<Option<HttpRoute>, Error> {
        self.get_dynamic(name, namespace).await
    }

    async fn apply_plan(
        &self,
        service_name: &str,
        namespace: &str,
        plan: &PlanResult,
    ) -> Result<(), Error> {
        let params = PatchParams::apply(&self.field_manager).force();

        // Shared objects first so owned objects never reference missing ones
        let mut shared = ApplyBatch::new(self.client.clone(), namespace, &params);
        for object in &plan.unowned {
            shared.push(object);
        }
        let shared_count = shared.run("shared").await?;

        let mut owned = ApplyBatch::new(self.client.clone(), namespace, &params);
        for object in &plan.owned {
            owned.push(object);
        }
        let owned_count = owned.run("owned").await?;

        for target in &plan.delete {
            let api: Api<DynamicObject> =
                Api::namespaced_with(self.client.clone(), namespace, &target.api_resource);
            match api.delete(&target.name, &DeleteParams::default()).await {
                Ok(_) => info!(name = %target.name, kind = %target.kind, "deleted for retry"),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    debug!(name = %target.name, kind = %target.kind, "already gone")
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            service = %service_name,
            shared = shared_count,
            owned = owned_count,
            deleted = plan.delete.len(),
            "applied plan"
        );
        Ok(())
    }

    async fn patch_service_status(
        &self,
        name: &str,
        namespace: &str,
        status: &AIMServiceStatus,
    ) -> Result<(), Error> {
        let api: Api<AIMService> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });

        api.patch_status(
            name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }
}

// =============================================================================
// ApplyBatch: parallel patches for one layer
// =============================================================================

type ApplyFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + Send>>;

/// Collects patches for one layer and runs them in parallel.
///
/// Everything goes through `DynamicObject` with the planned `ApiResource`.
/// Server-side applies carry their own apiVersion and kind; merge patches
/// only touch the fields they name.
struct ApplyBatch<'a> {
    client: Client,
    futures: Vec<ApplyFuture>,
    namespace: &'a str,
    params: &'a PatchParams,
}

impl<'a> ApplyBatch<'a> {
    fn new(client: Client, namespace: &'a str, params: &'a PatchParams) -> Self {
        Self {
            client,
            futures: Vec::new(),
            namespace,
            params,
        }
    }

    fn push(&mut self, object: &PlannedObject) {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), self.namespace, &object.api_resource);
        let params = self.params.clone();
        let name = object.name.clone();
        let kind = object.kind.clone();
        let body = object.body.clone();
        let mode = object.mode;
        self.futures.push(Box::pin(async move {
            debug!(name = %name, kind = %kind, ?mode, "applying resource");
            match mode {
                ApplyMode::ServerSide => api.patch(&name, &params, &Patch::Apply(&body)).await?,
                ApplyMode::Merge => {
                    api.patch(&name, &PatchParams::default(), &Patch::Merge(&body))
                        .await?
                }
            };
            Ok(())
        }));
    }

    /// Execute all queued patches in parallel, returning the count applied.
    async fn run(self, layer: &str) -> Result<usize, Error> {
        use futures::future::join_all;

        let count = self.futures.len();
        if count == 0 {
            return Ok(0);
        }

        debug!(count, layer, "applying resources in parallel");
        let results = join_all(self.futures).await;

        let mut errors: Vec<_> = results.into_iter().filter_map(|r| r.err()).collect();
        if !errors.is_empty() {
            for (i, err) in errors.iter().enumerate() {
                error!(error = %err, index = i, layer, "resource application failed");
            }
            return Err(errors.swap_remove(0));
        }

        Ok(count)
    }
}

// =============================================================================
// Controller context
// =============================================================================

/// Shared state for every reconcile call
pub struct AimServiceContext {
    /// Kubernetes client for API operations
    pub kube: Arc<dyn AimServiceKubeClient>,
    /// Event publisher for emitting Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Operator defaults
    pub policy: ReconcilePolicy,
}

impl AimServiceContext {
    /// Create a context from explicit dependencies
    pub fn new(
        kube: Arc<dyn AimServiceKubeClient>,
        events: Arc<dyn EventPublisher>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            kube,
            events,
            policy,
        }
    }

    /// Create a context backed by a real client
    pub fn from_client(client: Client, policy: ReconcilePolicy) -> Self {
        let events = Arc::new(KubeEventPublisher::new(client.clone(), "aim-service-controller"));
        Self {
            kube: Arc::new(AimServiceKubeClientImpl::new(
                client,
                policy.field_manager.clone(),
            )),
            events,
            policy,
        }
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn AimServiceKubeClient>) -> Self {
        Self {
            kube,
            events: Arc::new(NoopEventPublisher),
            policy: ReconcilePolicy::default(),
        }
    }
}

// =============================================================================
// AIMService reconciliation
// =============================================================================

/// Reconcile an AIMService
///
/// Fetches, observes, plans, applies, then writes status only when it
/// changed. Owned objects are garbage collected through owner references,
/// so deletion needs no extra work here.
#[instrument(skip(service, ctx), fields(service = %service.name_any()))]
pub async fn reconcile(service: Arc<AIMService>, ctx: Arc<AimServiceContext>) -> Result<Action, Error> {
    let name = service.name_any();
    let Some(namespace) = service.namespace() else {
        error!("AIMService is missing namespace");
        return Ok(Action::await_change());
    };
    if service.metadata.deletion_timestamp.is_some() {
        debug!("service is being deleted");
        return Ok(Action::await_change());
    }
    info!("reconciling service");

    let fetched = fetch(&service, ctx.kube.as_ref()).await?;
    let obs = observe(&service, &fetched, &ctx.policy);
    let planned = plan(&service, &obs, &ctx.policy)?;

    if !planned.is_empty() {
        debug!(
            shared = planned.unowned.len(),
            owned = planned.owned.len(),
            delete = planned.delete.len(),
            "applying plan"
        );
        if let Err(e) = ctx.kube.apply_plan(&name, &namespace, &planned).await {
            publish(
                &service,
                &ctx,
                EventType::Warning,
                reasons::APPLY_FAILED,
                actions::APPLY,
                e.to_string(),
            )
            .await;
            return Err(e);
        }
        if !planned.delete.is_empty() {
            let names: Vec<&str> = planned.delete.iter().map(|d| d.name.as_str()).collect();
            publish(
                &service,
                &ctx,
                EventType::Normal,
                reasons::CACHE_RETRY,
                actions::DELETE,
                format!("deleted failed model caches for retry: {}", names.join(", ")),
            )
            .await;
        }
    }

    let projected = project(&service, &obs);
    let prior = service.status.as_ref();
    let phase = projected.status.status;
    if status_changed(prior, &projected.status) {
        ctx.kube
            .patch_service_status(&name, &namespace, &projected.status)
            .await?;
        let before = phase_of(prior);
        if before != phase.to_string() {
            info!(from = %before, to = %phase, blocked_by = ?projected.blocked_by, "phase changed");
            let (type_, reason) = match phase {
                ServicePhase::Running => (EventType::Normal, reasons::SERVICE_RUNNING),
                ServicePhase::Failed | ServicePhase::Degraded => {
                    (EventType::Warning, reasons::SERVICE_UNHEALTHY)
                }
                _ => (EventType::Normal, reasons::PHASE_CHANGED),
            };
            let note = format!("{before} -> {phase}");
            publish(&service, &ctx, type_, reason, actions::RECONCILE, note).await;
        }
    } else {
        debug!(%phase, "status unchanged");
    }

    Ok(requeue_after(phase, &ctx.policy))
}

/// Requeue cadence for a phase
pub fn requeue_after(phase: ServicePhase, policy: &ReconcilePolicy) -> Action {
    match phase {
        ServicePhase::Running | ServicePhase::Failed => Action::requeue(policy.requeue_interval),
        _ => Action::requeue(policy.progress_requeue_interval),
    }
}

async fn publish(
    service: &AIMService,
    ctx: &AimServiceContext,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&service.object_ref(&()), type_, reason, action, Some(note))
        .await;
}

/// Error policy for the service controller
///
/// Retryable errors requeue after 30 seconds; anything else waits for a
/// spec change.
pub fn error_policy(service: Arc<AIMService>, error: &Error, _ctx: Arc<AimServiceContext>) -> Action {
    error!(
        ?error,
        service = %service.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        warn!(service = %service.name_any(), "not retrying until the service changes");
        Action::await_change()
    }
}

// =============================================================================
// Tests
// =============================================================================
