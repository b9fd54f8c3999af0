//! Observe and project stages of a reconcile pass
//!
//! [`observe`] runs every domain over a [`FetchResult`] in dependency order;
//! each domain only sees what earlier domains resolved. [`project`] folds the
//! per-domain projections into the next status.

use aim_common::crd::{AIMService, AIMServiceStatus};

use crate::caching::{observe_caching, project_caching, project_storage, CachingObservation};
use crate::config::{observe_config, project_config, ConfigObservation, ReconcilePolicy};
use crate::fetch::FetchResult;
use crate::health::{reduce, ProjectedStatus};
use crate::model::{observe_model, project_model, ModelObservation};
use crate::routing::{observe_routing, project_routing, RoutingObservation};
use crate::runtime::{observe_runtime, project_runtime, RuntimeObservation};
use crate::template::{observe_template, project_template, TemplateObservation};

/// Decisions of every domain for one pass
#[derive(Clone, Debug)]
pub struct Observation {
    /// Runtime config and spec validation
    pub config: ConfigObservation,
    /// Model resolution
    pub model: ModelObservation,
    /// Template resolution
    pub template: TemplateObservation,
    /// Shared cache or temporary volume
    pub caching: CachingObservation,
    /// Inference runtime
    pub runtime: RuntimeObservation,
    /// HTTP route
    pub routing: RoutingObservation,
}

/// Run every domain over the fetched state
pub fn observe(service: &AIMService, fetched: &FetchResult, policy: &ReconcilePolicy) -> Observation {
    let config = observe_config(service, &fetched.config, policy);
    let model = observe_model(service, &fetched.models.records());
    let template = observe_template(
        service,
        model.ready(),
        &fetched.templates.records(),
        &fetched.cluster_gpus,
    );
    let caching = observe_caching(
        service,
        template.ready(),
        model.resolved.as_ref(),
        &fetched.caches,
        &config.effective,
        config.intent,
        policy,
    );
    let runtime = observe_runtime(
        service,
        model.resolved.as_ref(),
        template.resolved(),
        &caching,
        fetched.inference_service.as_ref(),
        &fetched.pods,
    );
    let routing = observe_routing(
        service,
        &config.effective,
        fetched.route.as_ref(),
        policy,
    );

    Observation {
        config,
        model,
        template,
        caching,
        runtime,
        routing,
    }
}

/// Fold every domain's projection onto the service's current status
pub fn project(service: &AIMService, obs: &Observation) -> ProjectedStatus {
    let prior = service.status.clone().unwrap_or_default();
    let projections = vec![
        project_config(&obs.config),
        project_model(&obs.model),
        project_template(&obs.template),
        project_caching(&obs.caching, prior.cache.as_ref()),
        project_storage(&obs.caching),
        project_runtime(&obs.runtime),
        project_routing(&obs.routing),
    ];
    reduce(
        &prior,
        projections,
        obs.runtime.exists(),
        service.metadata.generation,
    )
}

/// Phase recorded on `status`, for logs and events
pub fn phase_of(status: Option<&AIMServiceStatus>) -> String {
    status
        .map(|s| s.status.to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::temp_volume_name;
    use crate::health::{conditions, reasons, Component, HealthState};
    use crate::plan::{plan, ApplyMode};
    use crate::runtime::{runtime_name, CONTAINER_NAME};
    use aim_common::kube_utils::ObjectMeta as KubeObjectMeta;
    use aim_common::runtime::inference::{InferenceService, InferenceServiceSpec, PredictorSpec};
    use std::collections::BTreeMap;
    use aim_common::crd::{
        AIMModel, AIMModelSpec, AIMServiceSpec, AIMServiceTemplate, AIMServiceTemplateSpec,
        AimStatus, GatewayRef, GpuSelector, ModelSource, ModelStatus, ResourceRequirements,
        RoutingConfig, ServiceCachingConfig, ServiceModel, ServicePhase, TemplateCachingConfig,
        TemplateStatus,
    };
    use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaim, PersistentVolumeClaimStatus};
    use kube::api::ObjectMeta;

    fn sources() -> Vec<ModelSource> {
        vec![ModelSource {
            name: "llama".into(),
            source_uri: "hf://meta-llama/Llama-3.1-8B".into(),
            size: Some("16Gi".into()),
        }]
    }

    fn service(mode: &str) -> AIMService {
        let mut svc = AIMService::new(
            "chat",
            AIMServiceSpec {
                model: ServiceModel {
                    ref_: Some("llama".into()),
                    ..Default::default()
                },
                template_name: Some("llama-mi300x".into()),
                caching: Some(ServiceCachingConfig {
                    mode: Some(mode.into()),
                }),
                ..Default::default()
            },
        );
        svc.metadata.namespace = Some("default".into());
        svc.metadata.uid = Some("svc-uid".into());
        svc.metadata.generation = Some(1);
        svc
    }

    fn model() -> AIMModel {
        let mut model = AIMModel::new(
            "llama",
            AIMModelSpec {
                image: "ghcr.io/amd/llama:1.0".into(),
                model_sources: sources(),
                ..Default::default()
            },
        );
        model.metadata.namespace = Some("default".into());
        model.metadata.uid = Some("model-uid".into());
        model.status = Some(ModelStatus {
            status: AimStatus::Ready,
        });
        model
    }

    fn template() -> AIMServiceTemplate {
        let mut template = AIMServiceTemplate::new(
            "llama-mi300x",
            AIMServiceTemplateSpec {
                model_name: "llama".into(),
                gpu_selector: Some(GpuSelector {
                    model: Some("MI300X".into()),
                    count: Some(1),
                    resource_name: None,
                }),
                ..Default::default()
            },
        );
        template.metadata.namespace = Some("default".into());
        template.metadata.uid = Some("template-uid".into());
        template.status = Some(TemplateStatus {
            status: AimStatus::Ready,
            model_sources: sources(),
            profile: None,
        });
        template
    }

    fn fetched() -> FetchResult {
        let mut fetched = FetchResult::default();
        fetched.models.namespace = vec![model()];
        fetched.templates.namespace = vec![template()];
        fetched
    }

    fn bound_pvc(svc: &AIMService) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(temp_volume_name(svc)),
                namespace: Some("default".into()),
                ..Default::default()
            },
            status: Some(PersistentVolumeClaimStatus {
                phase: Some("Bound".into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    // =========================================================================
    // Stories
    // =========================================================================

    /// Story: require-shared with no cache yet creates exactly one shared
    /// cache, holds the runtime back and reports caching as progressing
    #[test]
    fn story_require_shared_waits_for_shared_cache() {
        let svc = service("require-shared");
        let policy = ReconcilePolicy::default();
        let obs = observe(&svc, &fetched(), &policy);
        let planned = plan(&svc, &obs, &policy).unwrap();

        let caches: Vec<_> = planned
            .unowned
            .iter()
            .filter(|o| o.kind == "AIMTemplateCache")
            .collect();
        assert_eq!(caches.len(), 1);
        assert!(caches[0].body["metadata"].get("ownerReferences").is_none());
        assert!(planned.find("InferenceService").is_none());
        assert!(planned.owned.is_empty());

        let projected = project(&svc, &obs);
        assert_eq!(projected.blocked_by, Some(Component::Caching));
        let caching = projected
            .health
            .iter()
            .find(|h| h.component == Component::Caching)
            .unwrap();
        assert_eq!(caching.state, HealthState::Progressing);
        assert_eq!(caching.reason, reasons::CACHE_CREATING);
        assert!(projected
            .status
            .condition(conditions::RUNTIME_READY)
            .is_none());
        assert_eq!(projected.status.status, ServicePhase::Pending);
        assert_eq!(
            projected.status.resolved_template.as_ref().map(|r| r.name.as_str()),
            Some("llama-mi300x")
        );
    }

    /// Story: prefer-shared with a caching-enabled template plans the shared
    /// cache instead of a temporary volume
    #[test]
    fn story_prefer_shared_follows_template_caching() {
        let svc = service("prefer-shared");
        let policy = ReconcilePolicy::default();
        let mut fetched = fetched();
        fetched.templates.namespace[0].spec.caching = Some(TemplateCachingConfig {
            enabled: true,
            env: Vec::new(),
        });

        let obs = observe(&svc, &fetched, &policy);
        let planned = plan(&svc, &obs, &policy).unwrap();
        let caches = planned
            .unowned
            .iter()
            .filter(|o| o.kind == "AIMTemplateCache")
            .count();
        assert_eq!(caches, 1);
        assert!(planned.find("PersistentVolumeClaim").is_none());
        assert!(planned.find("InferenceService").is_none());
    }

    /// Story: a dedicated service first gets an owned temporary volume and
    /// waits for it before the runtime is created
    #[test]
    fn story_dedicated_creates_volume_before_runtime() {
        let svc = service("require-dedicated");
        let policy = ReconcilePolicy::default();
        let obs = observe(&svc, &fetched(), &policy);
        let planned = plan(&svc, &obs, &policy).unwrap();

        let pvc = planned.find("PersistentVolumeClaim").unwrap();
        assert_eq!(pvc.name, temp_volume_name(&svc));
        assert_eq!(pvc.body["metadata"]["ownerReferences"][0]["uid"], "svc-uid");
        assert!(planned.find("InferenceService").is_none());

        let projected = project(&svc, &obs);
        assert_eq!(projected.blocked_by, None);
        let runtime = projected
            .status
            .condition(conditions::RUNTIME_READY)
            .unwrap();
        assert_eq!(runtime.reason, reasons::WAITING_FOR_DEPENDENCIES);
        let storage = projected
            .status
            .condition(conditions::STORAGE_READY)
            .unwrap();
        assert_eq!(storage.reason, reasons::CREATING_PVC);
    }

    /// Story: once the volume is bound the runtime is applied server-side
    /// with an owner reference to the service
    #[test]
    fn story_bound_volume_releases_runtime() {
        let svc = service("require-dedicated");
        let policy = ReconcilePolicy::default();
        let mut fetched = fetched();
        fetched.caches.pvc = Some(bound_pvc(&svc));

        let obs = observe(&svc, &fetched, &policy);
        assert!(obs.runtime.ready_for_runtime);
        let planned = plan(&svc, &obs, &policy).unwrap();

        assert!(planned.find("PersistentVolumeClaim").is_none());
        let runtime = planned.find("InferenceService").unwrap();
        assert_eq!(runtime.mode, ApplyMode::ServerSide);
        assert_eq!(runtime.body["kind"], "InferenceService");
        assert_eq!(runtime.body["metadata"]["ownerReferences"][0]["name"], "chat");
        assert!(planned.find("HTTPRoute").is_none());

        let projected = project(&svc, &obs);
        let runtime = projected
            .status
            .condition(conditions::RUNTIME_READY)
            .unwrap();
        assert_eq!(runtime.reason, reasons::CREATING_RUNTIME);
        assert_eq!(projected.status.status, ServicePhase::Pending);
    }

    /// Story: storage regresses after the runtime exists; the runtime only
    /// receives a merge patch of its mutable fields and the route stays
    #[test]
    fn story_gate_closes_after_runtime_exists() {
        let mut svc = service("require-shared");
        svc.spec.resources = Some(ResourceRequirements {
            requests: BTreeMap::from([("cpu".to_string(), "8".to_string())]),
            limits: BTreeMap::new(),
        });
        svc.spec.routing = Some(RoutingConfig {
            enabled: Some(true),
            gateway_ref: Some(GatewayRef {
                name: "inference-gateway".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        let policy = ReconcilePolicy::default();
        let mut fetched = fetched();
        let isvc = InferenceService::new(
            KubeObjectMeta::new(runtime_name(&svc), "default"),
            InferenceServiceSpec {
                predictor: PredictorSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.into(),
                        image: Some("ghcr.io/amd/llama:1.0".into()),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            },
        );
        fetched.inference_service = Some(isvc);

        let obs = observe(&svc, &fetched, &policy);
        assert!(!obs.runtime.ready_for_runtime);
        let planned = plan(&svc, &obs, &policy).unwrap();

        let runtimes: Vec<_> = planned
            .owned
            .iter()
            .filter(|o| o.kind == "InferenceService")
            .collect();
        assert_eq!(runtimes.len(), 1);
        assert_eq!(runtimes[0].mode, ApplyMode::Merge);
        let predictor = &runtimes[0].body["spec"]["predictor"];
        assert_eq!(predictor["maxReplicas"], 1);
        assert_eq!(predictor["containers"][0]["resources"]["requests"]["cpu"], "8");
        assert!(runtimes[0].body.get("kind").is_none());
        assert!(planned.find("HTTPRoute").is_some());
        assert!(planned.delete.is_empty());
    }

    /// Story: a missing runtime config stops everything before any write
    #[test]
    fn story_missing_runtime_config_plans_nothing() {
        let mut svc = service("prefer-shared");
        svc.spec.runtime_config_name = Some("gpu-team".into());
        let policy = ReconcilePolicy::default();
        let obs = observe(&svc, &fetched(), &policy);

        assert!(plan(&svc, &obs, &policy).unwrap().is_empty());
        let projected = project(&svc, &obs);
        assert_eq!(projected.blocked_by, Some(Component::Config));
        assert_eq!(projected.status.status, ServicePhase::Degraded);
        let config = projected
            .status
            .condition(conditions::CONFIG_RESOLVED)
            .unwrap();
        assert_eq!(config.reason, reasons::CONFIG_NOT_FOUND);
    }

    #[test]
    fn phase_of_missing_status_is_unknown() {
        assert_eq!(phase_of(None), "Unknown");
        let status = AIMServiceStatus {
            status: ServicePhase::Running,
            ..Default::default()
        };
        assert_eq!(phase_of(Some(&status)), "Running");
    }
}
