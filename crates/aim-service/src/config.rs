//! Reconcile policy and runtime config layering
//!
//! [`ReconcilePolicy`] holds the operator-level defaults every domain reads.
//! [`merge_config`] layers cluster → namespace → service-inline runtime
//! config into the effective configuration of one pass.

use std::time::Duration;

use aim_common::crd::{
    AIMClusterRuntimeConfig, AIMRuntimeConfig, AIMRuntimeConfigSpec, AIMService, EnvVar,
    GatewayRef, ResolvedReference, ResourceScope, RoutingConfig, StorageConfig,
    DEFAULT_RUNTIME_CONFIG_NAME,
};
use aim_common::gpu::DEFAULT_GPU_RESOURCE;
use aim_common::quantity::DEFAULT_HEADROOM_PERCENT;
use kube::ResourceExt;

use crate::caching::CachingIntent;
use crate::health::{
    reasons, Component, ComponentHealth, DomainError, Projection, StatusUpdate,
};

/// Operator defaults threaded through every domain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Extra volume capacity on top of the model size, in percent
    pub pvc_headroom_percent: u32,
    /// Size of the `/dev/shm` scratch volume
    pub shm_size: String,
    /// CPU requested per GPU
    pub cpu_per_gpu: String,
    /// Memory requested per GPU
    pub memory_request_per_gpu: String,
    /// Memory limit per GPU
    pub memory_limit_per_gpu: String,
    /// Extended resource name for GPUs
    pub gpu_resource_name: String,
    /// Serving container port
    pub container_port: i32,
    /// Directory model caches are mounted under
    pub cache_mount_root: String,
    /// Longest HTTP path a route may carry
    pub max_route_path_length: usize,
    /// Requeue interval once a service is Running
    pub requeue_interval: Duration,
    /// Requeue interval while a service is converging
    pub progress_requeue_interval: Duration,
    /// Failed-cache recreations before giving up
    pub cache_retry_budget: u32,
    /// Field manager for server-side apply
    pub field_manager: String,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            pvc_headroom_percent: DEFAULT_HEADROOM_PERCENT,
            shm_size: "8Gi".to_string(),
            cpu_per_gpu: "4".to_string(),
            memory_request_per_gpu: "32Gi".to_string(),
            memory_limit_per_gpu: "48Gi".to_string(),
            gpu_resource_name: DEFAULT_GPU_RESOURCE.to_string(),
            container_port: 8000,
            cache_mount_root: "/workspace/model-cache".to_string(),
            max_route_path_length: 200,
            requeue_interval: Duration::from_secs(60),
            progress_requeue_interval: Duration::from_secs(10),
            cache_retry_budget: 1,
            field_manager: aim_common::FIELD_MANAGER.to_string(),
        }
    }
}

// =============================================================================
// Layered merge
// =============================================================================

/// Overlay `top` on `self`; fields unset in `top` keep the lower value
trait Overlay {
    fn overlay(&mut self, top: &Self);
}

fn non_empty(value: &Option<String>) -> Option<&String> {
    value.as_ref().filter(|s| !s.trim().is_empty())
}

fn overlay_string(base: &mut Option<String>, top: &Option<String>) {
    if let Some(v) = non_empty(top) {
        *base = Some(v.clone());
    }
}

impl Overlay for StorageConfig {
    fn overlay(&mut self, top: &Self) {
        overlay_string(
            &mut self.default_storage_class_name,
            &top.default_storage_class_name,
        );
        if top.pvc_headroom_percent.is_some() {
            self.pvc_headroom_percent = top.pvc_headroom_percent;
        }
    }
}

impl Overlay for RoutingConfig {
    fn overlay(&mut self, top: &Self) {
        if top.enabled.is_some() {
            self.enabled = top.enabled;
        }
        if let Some(gw) = top.gateway_ref.as_ref().filter(|g| !g.name.is_empty()) {
            self.gateway_ref = Some(gw.clone());
        }
        overlay_string(&mut self.path_template, &top.path_template);
        overlay_string(&mut self.request_timeout, &top.request_timeout);
        for (k, v) in &top.annotations {
            self.annotations.insert(k.clone(), v.clone());
        }
    }
}

impl Overlay for Vec<EnvVar> {
    fn overlay(&mut self, top: &Self) {
        for var in top {
            match self.iter_mut().find(|v| v.name == var.name) {
                Some(existing) => existing.value = var.value.clone(),
                None => self.push(var.clone()),
            }
        }
    }
}

fn overlay_option<T: Overlay + Clone>(base: &mut Option<T>, top: &Option<T>) {
    match (base.as_mut(), top) {
        (_, None) => {}
        (None, Some(t)) => *base = Some(t.clone()),
        (Some(b), Some(t)) => b.overlay(t),
    }
}

impl Overlay for AIMRuntimeConfigSpec {
    fn overlay(&mut self, top: &Self) {
        overlay_option(&mut self.storage, &top.storage);
        overlay_option(&mut self.routing, &top.routing);
        self.env.overlay(&top.env);
    }
}

/// Layer runtime configs: cluster is the base, namespace overrides it, the
/// service's inline settings override both. Absent layers are empty.
pub fn merge_config(
    cluster: Option<&AIMRuntimeConfigSpec>,
    namespace: Option<&AIMRuntimeConfigSpec>,
    service: Option<&AIMRuntimeConfigSpec>,
) -> AIMRuntimeConfigSpec {
    let mut merged = AIMRuntimeConfigSpec::default();
    for layer in [cluster, namespace, service].into_iter().flatten() {
        merged.overlay(layer);
    }
    merged
}

/// Inline config layer carried by a service spec
pub fn service_layer(service: &AIMService) -> AIMRuntimeConfigSpec {
    AIMRuntimeConfigSpec {
        storage: service.spec.storage.clone(),
        routing: service.spec.routing.clone(),
        env: service.spec.env.clone(),
    }
}

/// Effective configuration of one pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EffectiveConfig {
    /// Merged runtime config
    pub spec: AIMRuntimeConfigSpec,
    /// Headroom after applying policy defaults
    pub headroom_percent: u32,
}

impl EffectiveConfig {
    /// Storage class for volumes and caches
    pub fn storage_class(&self) -> Option<&str> {
        self.spec
            .storage
            .as_ref()
            .and_then(|s| s.default_storage_class_name.as_deref())
    }

    /// Merged routing settings
    pub fn routing(&self) -> RoutingConfig {
        self.spec.routing.clone().unwrap_or_default()
    }

    /// Whether an HTTP route is wanted
    pub fn routing_enabled(&self) -> bool {
        self.spec
            .routing
            .as_ref()
            .and_then(|r| r.enabled)
            .unwrap_or(false)
    }

    /// Gateway the route attaches to
    pub fn gateway_ref(&self) -> Option<&GatewayRef> {
        self.spec.routing.as_ref().and_then(|r| r.gateway_ref.as_ref())
    }
}

// =============================================================================
// Observation
// =============================================================================

/// Runtime configs fetched for a service
#[derive(Clone, Debug, Default)]
pub struct ConfigFetch {
    /// Namespaced config with the requested name
    pub namespace: Option<AIMRuntimeConfig>,
    /// Cluster config with the requested name
    pub cluster: Option<AIMClusterRuntimeConfig>,
}

/// Config domain decisions
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigObservation {
    /// Effective configuration
    pub effective: EffectiveConfig,
    /// Config the name resolved to, if any
    pub resolved: Option<ResolvedReference>,
    /// Caching intent parsed from the spec
    pub intent: CachingIntent,
    /// First problem found
    pub error: Option<DomainError>,
}

/// Resolve and merge the runtime config and validate spec-level settings
pub fn observe_config(
    service: &AIMService,
    fetched: &ConfigFetch,
    policy: &ReconcilePolicy,
) -> ConfigObservation {
    let name = service.spec.runtime_config_name();
    let cluster_spec = fetched
        .cluster
        .as_ref()
        .map(|c| AIMRuntimeConfigSpec::from(c.spec.clone()));
    let namespace_spec = fetched.namespace.as_ref().map(|c| c.spec.clone());
    let inline = service_layer(service);
    let spec = merge_config(cluster_spec.as_ref(), namespace_spec.as_ref(), Some(&inline));
    let headroom_percent = spec
        .storage
        .as_ref()
        .and_then(|s| s.pvc_headroom_percent)
        .unwrap_or(policy.pvc_headroom_percent);
    let effective = EffectiveConfig {
        spec,
        headroom_percent,
    };

    let resolved = match (&fetched.namespace, &fetched.cluster) {
        (Some(ns), _) => Some(ResolvedReference {
            name: ns.name_any(),
            namespace: ns.namespace(),
            scope: ResourceScope::Namespace,
            uid: ns.uid(),
        }),
        (None, Some(cluster)) => Some(ResolvedReference {
            name: cluster.name_any(),
            namespace: None,
            scope: ResourceScope::Cluster,
            uid: cluster.uid(),
        }),
        (None, None) => None,
    };

    let (intent, intent_error) = match CachingIntent::from_service(service) {
        Ok(intent) => (intent, None),
        Err(err) => (CachingIntent::default(), Some(err)),
    };

    let missing = resolved.is_none() && name != DEFAULT_RUNTIME_CONFIG_NAME;
    let error = if missing {
        Some(DomainError::upstream(
            reasons::CONFIG_NOT_FOUND,
            format!("runtime config {name:?} not found in namespace or cluster scope"),
        ))
    } else {
        intent_error
    };

    ConfigObservation {
        effective,
        resolved,
        intent,
        error,
    }
}

/// Config domain projection; any error blocks
pub fn project_config(obs: &ConfigObservation) -> Projection {
    if let Some(err) = &obs.error {
        return Projection::of(ComponentHealth::from_error(Component::Config, err), true);
    }
    let message = match &obs.resolved {
        Some(r) => format!("using runtime config {} ({})", r.name, r.scope),
        None => "no runtime config found; using defaults".to_string(),
    };
    Projection::of(
        ComponentHealth::ready(Component::Config, reasons::CONFIG_RESOLVED, message),
        false,
    )
    .with_update(StatusUpdate {
        resolved_runtime_config: obs.resolved.clone(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::DependencyKind;
    use aim_common::crd::{AIMClusterRuntimeConfigSpec, AIMServiceSpec, ServiceCachingConfig};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn layer(class: Option<&str>, headroom: Option<u32>, path: Option<&str>) -> AIMRuntimeConfigSpec {
        AIMRuntimeConfigSpec {
            storage: Some(StorageConfig {
                default_storage_class_name: class.map(str::to_string),
                pvc_headroom_percent: headroom,
            }),
            routing: path.map(|p| RoutingConfig {
                path_template: Some(p.to_string()),
                ..Default::default()
            }),
            env: vec![EnvVar::new("A", "1")],
        }
    }

    fn service(spec: AIMServiceSpec) -> AIMService {
        let mut svc = AIMService::new("chat", spec);
        svc.metadata = ObjectMeta {
            name: Some("chat".into()),
            namespace: Some("default".into()),
            uid: Some("uid-1".into()),
            ..Default::default()
        };
        svc
    }

    #[test]
    fn merge_with_only_service_layer_is_identity() {
        let x = layer(Some("fast"), Some(20), Some("/{.metadata.name}"));
        assert_eq!(merge_config(None, None, Some(&x)), x);
    }

    #[test]
    fn merge_with_only_cluster_layer_is_identity() {
        let x = layer(Some("fast"), Some(20), Some("/{.metadata.name}"));
        assert_eq!(merge_config(Some(&x), None, None), x);
    }

    #[test]
    fn unset_fields_never_override() {
        let cluster = layer(Some("fast"), Some(20), Some("/a"));
        let namespace = layer(None, Some(5), None);
        let merged = merge_config(Some(&cluster), Some(&namespace), None);
        let storage = merged.storage.unwrap();
        assert_eq!(storage.default_storage_class_name.as_deref(), Some("fast"));
        assert_eq!(storage.pvc_headroom_percent, Some(5));
        assert_eq!(merged.routing.unwrap().path_template.as_deref(), Some("/a"));
    }

    #[test]
    fn empty_strings_do_not_override() {
        let cluster = layer(Some("fast"), None, None);
        let namespace = layer(Some(""), None, None);
        let merged = merge_config(Some(&cluster), Some(&namespace), None);
        assert_eq!(
            merged.storage.unwrap().default_storage_class_name.as_deref(),
            Some("fast")
        );
    }

    #[test]
    fn env_and_annotations_merge_by_key() {
        let mut base = AIMRuntimeConfigSpec {
            env: vec![EnvVar::new("A", "1"), EnvVar::new("B", "2")],
            routing: Some(RoutingConfig {
                annotations: [("x".to_string(), "1".to_string())].into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let top = AIMRuntimeConfigSpec {
            env: vec![EnvVar::new("B", "3"), EnvVar::new("C", "4")],
            routing: Some(RoutingConfig {
                enabled: Some(true),
                annotations: [("y".to_string(), "2".to_string())].into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        base.overlay(&top);
        assert_eq!(
            base.env,
            vec![EnvVar::new("A", "1"), EnvVar::new("B", "3"), EnvVar::new("C", "4")]
        );
        let routing = base.routing.unwrap();
        assert_eq!(routing.annotations.len(), 2);
        assert_eq!(routing.enabled, Some(true));
    }

    #[test]
    fn missing_default_config_is_not_an_error() {
        let obs = observe_config(
            &service(AIMServiceSpec::default()),
            &ConfigFetch::default(),
            &ReconcilePolicy::default(),
        );
        assert!(obs.error.is_none());
        assert!(obs.resolved.is_none());
        assert_eq!(obs.effective.headroom_percent, DEFAULT_HEADROOM_PERCENT);
        assert!(!project_config(&obs).blocking);
    }

    #[test]
    fn missing_named_config_is_upstream_error() {
        let obs = observe_config(
            &service(AIMServiceSpec {
                runtime_config_name: Some("gold".into()),
                ..Default::default()
            }),
            &ConfigFetch::default(),
            &ReconcilePolicy::default(),
        );
        let err = obs.error.clone().unwrap();
        assert_eq!(err.kind, DependencyKind::Upstream);
        assert_eq!(err.reason, reasons::CONFIG_NOT_FOUND);
        assert!(project_config(&obs).blocking);
    }

    #[test]
    fn namespace_config_wins_over_cluster() {
        let mut cluster = AIMClusterRuntimeConfig::new(
            "default",
            AIMClusterRuntimeConfigSpec {
                storage: Some(StorageConfig {
                    default_storage_class_name: Some("slow".into()),
                    pvc_headroom_percent: Some(30),
                }),
                ..Default::default()
            },
        );
        cluster.metadata.uid = Some("c1".into());
        let mut ns = AIMRuntimeConfig::new(
            "default",
            AIMRuntimeConfigSpec {
                storage: Some(StorageConfig {
                    default_storage_class_name: Some("fast".into()),
                    pvc_headroom_percent: None,
                }),
                ..Default::default()
            },
        );
        ns.metadata.namespace = Some("default".into());
        let obs = observe_config(
            &service(AIMServiceSpec::default()),
            &ConfigFetch {
                namespace: Some(ns),
                cluster: Some(cluster),
            },
            &ReconcilePolicy::default(),
        );
        assert_eq!(obs.effective.storage_class(), Some("fast"));
        assert_eq!(obs.effective.headroom_percent, 30);
        assert_eq!(obs.resolved.unwrap().scope, ResourceScope::Namespace);
    }

    #[test]
    fn invalid_caching_mode_is_validation_error() {
        let obs = observe_config(
            &service(AIMServiceSpec {
                caching: Some(ServiceCachingConfig {
                    mode: Some("sometimes".into()),
                }),
                ..Default::default()
            }),
            &ConfigFetch::default(),
            &ReconcilePolicy::default(),
        );
        assert_eq!(obs.error.unwrap().kind, DependencyKind::Validation);
    }
}
