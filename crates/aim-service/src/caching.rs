//! Weight storage: shared caches and temporary volumes
//!
//! A service either mounts the shared template cache or downloads into a
//! per-service temporary volume. Which one follows from the caching intent
//! and from whether a cache already exists.

use std::collections::BTreeMap;

use aim_common::crd::{
    AIMModelCache, AIMService, AIMTemplateCache, AIMTemplateCacheSpec, AimStatus, ModelSource,
    ResolvedReference, ResourceScope, ServiceCacheStatus,
};
use aim_common::naming::{derived_name, sanitize_label_value};
use aim_common::quantity::{format_gi, parse_bytes, required_storage_gi, SizedSource};
use aim_common::{
    LABEL_CACHE_TYPE, LABEL_MANAGED_BY, LABEL_MANAGED_BY_AIM, LABEL_NAME, LABEL_SERVICE,
    LABEL_TEMPLATE,
};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde_json::json;

use crate::config::{EffectiveConfig, ReconcilePolicy};
use crate::health::{
    reasons, Component, ComponentHealth, DomainError, Projection, StatusUpdate,
};
use crate::model::ModelRecord;
use crate::runtime::merge_env;
use crate::template::TemplateRecord;

/// How a service wants its weights stored
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CachingIntent {
    /// A shared cache must exist and be Ready; never a per-service volume
    RequireShared,
    /// Use a shared cache if one exists, else a temporary volume
    #[default]
    PreferShared,
    /// Always a per-service volume
    RequireDedicated,
}

impl CachingIntent {
    /// Parse a caching mode, accepting the legacy Always/Auto/Never and
    /// Shared/Dedicated spellings
    pub fn parse(mode: &str) -> Option<Self> {
        let key: String = mode
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect();
        match key.as_str() {
            "requireshared" | "always" | "shared" => Some(Self::RequireShared),
            "prefershared" | "auto" => Some(Self::PreferShared),
            "requirededicated" | "never" | "dedicated" => Some(Self::RequireDedicated),
            _ => None,
        }
    }

    /// Intent for a service: `caching.mode` first, then the deprecated
    /// `cacheModel` switch, then prefer-shared
    pub fn from_service(service: &AIMService) -> Result<Self, DomainError> {
        let mode = service
            .spec
            .caching
            .as_ref()
            .and_then(|c| c.mode.as_deref())
            .filter(|m| !m.trim().is_empty());
        if let Some(mode) = mode {
            return Self::parse(mode).ok_or_else(|| {
                DomainError::validation(
                    reasons::INVALID_SPEC,
                    format!(
                        "unknown caching mode {mode:?}; expected require-shared, prefer-shared or require-dedicated"
                    ),
                )
            });
        }
        Ok(match service.spec.cache_model {
            Some(true) => Self::RequireShared,
            Some(false) => Self::RequireDedicated,
            None => Self::PreferShared,
        })
    }
}

impl std::fmt::Display for CachingIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequireShared => write!(f, "require-shared"),
            Self::PreferShared => write!(f, "prefer-shared"),
            Self::RequireDedicated => write!(f, "require-dedicated"),
        }
    }
}

/// Where weights live this pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeightStorage {
    /// Shared template cache
    SharedCache,
    /// Per-service temporary volume
    TemporaryVolume,
}

/// One model cache volume mounted into the runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheMount {
    /// Logical source name; becomes the mount directory
    pub source_name: String,
    /// PVC holding the weights
    pub claim_name: String,
}

/// Temporary volume state
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeObservation {
    /// PVC name
    pub name: String,
    /// PVC exists
    pub exists: bool,
    /// PVC is bound
    pub bound: bool,
    /// Required size in GiB
    pub size_gi: Result<u64, DomainError>,
}

impl VolumeObservation {
    /// True when the PVC must be created this pass
    pub fn should_create(&self) -> bool {
        !self.exists && self.size_gi.is_ok()
    }
}

/// Cache and storage state fetched for a service
#[derive(Clone, Debug, Default)]
pub struct CacheFetch {
    /// Template caches in the service namespace
    pub template_caches: Vec<AIMTemplateCache>,
    /// Model caches in the service namespace
    pub model_caches: Vec<AIMModelCache>,
    /// The service's temporary volume
    pub pvc: Option<PersistentVolumeClaim>,
}

/// Cache and storage decisions
#[derive(Clone, Debug, PartialEq)]
pub struct CachingObservation {
    /// Effective intent
    pub intent: CachingIntent,
    /// Chosen storage; `None` until a Ready template is resolved
    pub storage: Option<WeightStorage>,
    /// Existing template cache and its status
    pub cache: Option<(ResolvedReference, AimStatus)>,
    /// Template cache must be created
    pub should_create_cache: bool,
    /// Failed model caches to delete so they are recreated
    pub retry_deletes: Vec<String>,
    /// Recreation attempts already spent
    pub retry_attempts: u32,
    /// Retry budget spent and the cache is still Failed
    pub retry_exhausted: bool,
    /// Model cache volumes to mount
    pub mounts: Vec<CacheMount>,
    /// Temporary volume, when that path is chosen
    pub volume: Option<VolumeObservation>,
}

impl CachingObservation {
    fn waiting(intent: CachingIntent) -> Self {
        Self {
            intent,
            storage: None,
            cache: None,
            should_create_cache: false,
            retry_deletes: Vec::new(),
            retry_attempts: 0,
            retry_exhausted: false,
            mounts: Vec::new(),
            volume: None,
        }
    }

    /// Storage precondition for planning the runtime
    pub fn storage_ready(&self) -> bool {
        match self.storage {
            Some(WeightStorage::SharedCache) => {
                matches!(self.cache, Some((_, AimStatus::Ready)))
            }
            Some(WeightStorage::TemporaryVolume) => {
                self.volume.as_ref().is_some_and(|v| v.exists)
            }
            None => false,
        }
    }

    /// Temporary volume in use, if any
    pub fn volume_in_use(&self) -> Option<&VolumeObservation> {
        match self.storage {
            Some(WeightStorage::TemporaryVolume) => self.volume.as_ref().filter(|v| v.exists),
            _ => None,
        }
    }
}

/// Name of a service's temporary volume
pub fn temp_volume_name(service: &AIMService) -> String {
    derived_name(
        &["aimsvc-temp", &service.name_any()],
        &[json!(service.uid().unwrap_or_default())],
    )
}

/// Weight sources of a template; discovered status first, then spec, then
/// the model record
pub fn template_sources<'a>(
    template: &'a TemplateRecord,
    model: Option<&'a ModelRecord>,
) -> &'a [ModelSource] {
    if !template.status.model_sources.is_empty() {
        &template.status.model_sources
    } else if !template.spec.model_sources.is_empty() {
        &template.spec.model_sources
    } else {
        model.map(|m| m.spec.model_sources.as_slice()).unwrap_or(&[])
    }
}

/// Storage needed for `sources`, in GiB
pub fn storage_size_gi(sources: &[ModelSource], headroom_percent: u32) -> Result<u64, DomainError> {
    let size_error = |message: String| DomainError::validation(reasons::STORAGE_SIZE_UNKNOWN, message);
    let mut sized = Vec::with_capacity(sources.len());
    for source in sources {
        let bytes = match source.size.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(size) => parse_bytes(size).map_err(|e| size_error(e.to_string()))?,
            None => 0,
        };
        sized.push(SizedSource {
            name: &source.name,
            bytes,
        });
    }
    required_storage_gi(&sized, headroom_percent).map_err(|e| size_error(e.to_string()))
}

/// Decide between shared cache and temporary volume
pub fn observe_caching(
    service: &AIMService,
    template: Option<&TemplateRecord>,
    model: Option<&ModelRecord>,
    fetched: &CacheFetch,
    config: &EffectiveConfig,
    intent: CachingIntent,
    policy: &ReconcilePolicy,
) -> CachingObservation {
    let Some(template) = template.filter(|t| t.status.status.is_ready()) else {
        return CachingObservation::waiting(intent);
    };
    let namespace = service.namespace().unwrap_or_default();
    let sources = template_sources(template, model);

    let existing = fetched
        .template_caches
        .iter()
        .find(|c| c.name_any() == template.name && c.spec.template_name == template.name);
    let cache = existing.map(|c| {
        (
            ResolvedReference {
                name: c.name_any(),
                namespace: Some(namespace.clone()),
                scope: ResourceScope::Namespace,
                uid: c.uid(),
            },
            c.status.as_ref().map(|s| s.status).unwrap_or_default(),
        )
    });
    let cache_failed = matches!(cache, Some((_, AimStatus::Failed)));

    let source_uris: Vec<&str> = sources.iter().map(|s| s.source_uri.as_str()).collect();
    let failed_model_caches: Vec<String> = fetched
        .model_caches
        .iter()
        .filter(|mc| source_uris.contains(&mc.spec.source_uri.as_str()))
        .filter(|mc| matches!(mc.status.as_ref().map(|s| s.status), Some(AimStatus::Failed)))
        .map(|mc| mc.name_any())
        .collect();

    let retry_attempts = service
        .status
        .as_ref()
        .map(|s| s.retry_attempts())
        .unwrap_or(0);
    // Status patches from the retry pass requeue before the cache controller
    // has reset the template cache, so one pass may still see it Failed with
    // the budget spent and report CacheFailed until the cache recovers.
    let retry_exhausted = cache_failed && retry_attempts >= policy.cache_retry_budget;
    let template_caching = template.spec.caching.as_ref().is_some_and(|c| c.enabled);

    let storage = match intent {
        CachingIntent::RequireDedicated => WeightStorage::TemporaryVolume,
        CachingIntent::RequireShared => WeightStorage::SharedCache,
        CachingIntent::PreferShared
            if (cache.is_some() || template_caching) && !retry_exhausted =>
        {
            WeightStorage::SharedCache
        }
        CachingIntent::PreferShared => WeightStorage::TemporaryVolume,
    };

    let mut obs = CachingObservation {
        intent,
        storage: Some(storage),
        cache,
        should_create_cache: false,
        retry_deletes: Vec::new(),
        retry_attempts,
        retry_exhausted,
        mounts: Vec::new(),
        volume: None,
    };

    match storage {
        WeightStorage::SharedCache => {
            obs.should_create_cache = obs.cache.is_none();
            if cache_failed && !retry_exhausted {
                obs.retry_deletes = failed_model_caches;
            }
            if matches!(obs.cache, Some((_, AimStatus::Ready))) {
                obs.mounts = sources
                    .iter()
                    .filter_map(|source| {
                        fetched
                            .model_caches
                            .iter()
                            .filter(|mc| mc.spec.source_uri == source.source_uri)
                            .filter_map(|mc| mc.status.as_ref())
                            .find(|s| s.status.is_ready())
                            .and_then(|s| s.persistent_volume_claim.clone())
                            .map(|claim_name| CacheMount {
                                source_name: source.name.clone(),
                                claim_name,
                            })
                    })
                    .collect();
            }
        }
        WeightStorage::TemporaryVolume => {
            let pvc = fetched.pvc.as_ref();
            obs.volume = Some(VolumeObservation {
                name: temp_volume_name(service),
                exists: pvc.is_some(),
                bound: pvc
                    .and_then(|p| p.status.as_ref())
                    .and_then(|s| s.phase.as_deref())
                    == Some("Bound"),
                size_gi: storage_size_gi(sources, config.headroom_percent),
            });
        }
    }
    obs
}

// =============================================================================
// Builders
// =============================================================================

/// Shared template cache; created without an owner so other services can use it
///
/// Download env is the template's caching env with the service env on top.
pub fn build_template_cache(
    service: &AIMService,
    template: &TemplateRecord,
    config: &EffectiveConfig,
) -> AIMTemplateCache {
    let template_env = template
        .spec
        .caching
        .as_ref()
        .map(|c| c.env.clone())
        .unwrap_or_default();
    let mut cache = AIMTemplateCache::new(
        &template.name,
        AIMTemplateCacheSpec {
            template_name: template.name.clone(),
            template_scope: template.scope,
            storage_class_name: config.storage_class().map(str::to_string),
            env: merge_env([template_env, service.spec.env.clone()]),
        },
    );
    cache.metadata.namespace = service.namespace();
    let labels = cache.labels_mut();
    labels.insert(LABEL_CACHE_TYPE.to_string(), "shared".to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_AIM.to_string());
    if let Ok(value) = sanitize_label_value(&template.name) {
        labels.insert(LABEL_TEMPLATE.to_string(), value);
    }
    cache
}

/// Per-service temporary volume
pub fn build_temp_pvc(
    service: &AIMService,
    volume: &VolumeObservation,
    size_gi: u64,
    config: &EffectiveConfig,
) -> PersistentVolumeClaim {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_NAME.to_string(), "aim-service".to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_AIM.to_string());
    if let Ok(value) = sanitize_label_value(&service.name_any()) {
        labels.insert(LABEL_SERVICE.to_string(), value);
    }
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(volume.name.clone()),
            namespace: service.namespace(),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteMany".to_string()]),
            storage_class_name: config.storage_class().map(str::to_string),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(format_gi(size_gi)),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Projection
// =============================================================================

fn cache_update(obs: &CachingObservation, prior: Option<&ServiceCacheStatus>, attempts: u32) -> StatusUpdate {
    let template_cache_ref = match &obs.cache {
        Some((reference, AimStatus::Ready)) => Some(reference.clone()),
        _ => prior.and_then(|p| p.template_cache_ref.clone()),
    };
    StatusUpdate {
        cache: Some(ServiceCacheStatus {
            template_cache_ref,
            retry_attempts: attempts,
        }),
        ..Default::default()
    }
}

/// Caching domain projection
pub fn project_caching(obs: &CachingObservation, prior: Option<&ServiceCacheStatus>) -> Projection {
    let component = Component::Caching;
    let Some(storage) = obs.storage else {
        return Projection::of(
            ComponentHealth::pending(component, reasons::CACHE_NOT_READY, "waiting for template"),
            true,
        );
    };

    if storage == WeightStorage::TemporaryVolume {
        if obs.retry_exhausted {
            let err = DomainError::downstream(
                reasons::CACHE_FAILED,
                "shared cache failed; falling back to a temporary volume",
            );
            return Projection::of(ComponentHealth::from_error(component, &err), false);
        }
        return Projection::not_applicable(component);
    }

    let Some((reference, status)) = &obs.cache else {
        return Projection::of(
            ComponentHealth::progressing(
                component,
                reasons::CACHE_CREATING,
                format!("creating shared cache ({})", obs.intent),
            ),
            true,
        );
    };

    match status {
        AimStatus::Ready => Projection::of(
            ComponentHealth::ready(
                component,
                reasons::CACHE_READY,
                format!("shared cache {} is ready", reference.name),
            ),
            false,
        )
        .with_update(cache_update(obs, prior, obs.retry_attempts)),
        AimStatus::Failed if obs.retry_exhausted => {
            let err = DomainError::upstream(
                reasons::CACHE_FAILED,
                format!(
                    "shared cache {} failed after {} recreation attempts",
                    reference.name, obs.retry_attempts
                ),
            );
            Projection::of(ComponentHealth::from_error(component, &err), true)
                .with_update(cache_update(obs, prior, obs.retry_attempts))
        }
        AimStatus::Failed if !obs.retry_deletes.is_empty() => Projection::of(
            ComponentHealth::progressing(
                component,
                reasons::CACHE_RETRYING,
                format!(
                    "recreating {} failed model caches of {}",
                    obs.retry_deletes.len(),
                    reference.name
                ),
            ),
            false,
        )
        .with_update(cache_update(obs, prior, obs.retry_attempts + 1)),
        _ => Projection::of(
            ComponentHealth::progressing(
                component,
                reasons::CACHE_NOT_READY,
                format!("waiting for shared cache {} ({status})", reference.name),
            ),
            true,
        ),
    }
}

/// Storage domain projection; only the temporary volume path reports
pub fn project_storage(obs: &CachingObservation) -> Projection {
    let component = Component::Storage;
    let Some(volume) = obs
        .volume
        .as_ref()
        .filter(|_| obs.storage == Some(WeightStorage::TemporaryVolume))
    else {
        return Projection::not_applicable(component);
    };
    if let Err(err) = &volume.size_gi {
        return Projection::of(ComponentHealth::from_error(component, err), true);
    }
    if !volume.exists {
        return Projection::of(
            ComponentHealth::progressing(
                component,
                reasons::CREATING_PVC,
                format!("creating temporary volume {}", volume.name),
            ),
            false,
        );
    }
    if !volume.bound {
        return Projection::of(
            ComponentHealth::progressing(
                component,
                reasons::PVC_NOT_BOUND,
                format!("temporary volume {} is not bound yet", volume.name),
            ),
            false,
        );
    }
    Projection::of(
        ComponentHealth::ready(
            component,
            reasons::STORAGE_READY,
            format!("temporary volume {} is bound", volume.name),
        ),
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{DependencyKind, HealthState};
    use aim_common::crd::{
        AIMModelCacheSpec, AIMServiceSpec, AIMServiceStatus, AIMServiceTemplateSpec, EnvVar,
        ModelCacheStatus, ServiceCachingConfig, TemplateCacheStatus, TemplateCachingConfig,
        TemplateStatus,
    };
    use k8s_openapi::api::core::v1::PersistentVolumeClaimStatus;
    use rstest::rstest;

    fn service(mode: Option<&str>, retry_attempts: u32) -> AIMService {
        let mut svc = AIMService::new(
            "chat",
            AIMServiceSpec {
                caching: mode.map(|m| ServiceCachingConfig {
                    mode: Some(m.to_string()),
                }),
                ..Default::default()
            },
        );
        svc.metadata.namespace = Some("default".into());
        svc.metadata.uid = Some("uid-1".into());
        svc.status = Some(AIMServiceStatus {
            cache: Some(ServiceCacheStatus {
                template_cache_ref: None,
                retry_attempts,
            }),
            ..Default::default()
        });
        svc
    }

    fn source(name: &str, size: Option<&str>) -> ModelSource {
        ModelSource {
            name: name.into(),
            source_uri: format!("hf://org/{name}"),
            size: size.map(str::to_string),
        }
    }

    fn template() -> TemplateRecord {
        TemplateRecord {
            name: "llama-mi300x".into(),
            namespace: Some("default".into()),
            scope: ResourceScope::Namespace,
            uid: Some("t-uid".into()),
            spec: AIMServiceTemplateSpec {
                model_name: "llama".into(),
                ..Default::default()
            },
            status: TemplateStatus {
                status: AimStatus::Ready,
                model_sources: vec![source("llama", Some("16Gi"))],
                profile: None,
            },
            labels: BTreeMap::new(),
        }
    }

    fn template_cache(status: AimStatus) -> AIMTemplateCache {
        let mut cache = AIMTemplateCache::new(
            "llama-mi300x",
            AIMTemplateCacheSpec {
                template_name: "llama-mi300x".into(),
                ..Default::default()
            },
        );
        cache.metadata.namespace = Some("default".into());
        cache.status = Some(TemplateCacheStatus { status });
        cache
    }

    fn model_cache(name: &str, uri: &str, status: AimStatus) -> AIMModelCache {
        let mut mc = AIMModelCache::new(
            name,
            AIMModelCacheSpec {
                source_uri: uri.into(),
                size: "20Gi".into(),
                storage_class_name: None,
            },
        );
        mc.status = Some(ModelCacheStatus {
            status,
            persistent_volume_claim: Some(format!("{name}-pvc")),
        });
        mc
    }

    fn observe(svc: &AIMService, fetched: &CacheFetch) -> CachingObservation {
        let intent = CachingIntent::from_service(svc).unwrap();
        observe_caching(
            svc,
            Some(&template()),
            None,
            fetched,
            &EffectiveConfig {
                headroom_percent: 10,
                ..Default::default()
            },
            intent,
            &ReconcilePolicy::default(),
        )
    }

    #[rstest]
    #[case("require-shared", CachingIntent::RequireShared)]
    #[case("Always", CachingIntent::RequireShared)]
    #[case("Shared", CachingIntent::RequireShared)]
    #[case("prefer-shared", CachingIntent::PreferShared)]
    #[case("Auto", CachingIntent::PreferShared)]
    #[case("require-dedicated", CachingIntent::RequireDedicated)]
    #[case("Never", CachingIntent::RequireDedicated)]
    #[case("Dedicated", CachingIntent::RequireDedicated)]
    fn caching_modes_and_aliases(#[case] mode: &str, #[case] expected: CachingIntent) {
        assert_eq!(CachingIntent::parse(mode), Some(expected));
    }

    #[test]
    fn legacy_cache_model_switch_maps_to_intent() {
        let mut svc = service(None, 0);
        assert_eq!(CachingIntent::from_service(&svc), Ok(CachingIntent::PreferShared));
        svc.spec.cache_model = Some(true);
        assert_eq!(CachingIntent::from_service(&svc), Ok(CachingIntent::RequireShared));
        svc.spec.cache_model = Some(false);
        assert_eq!(CachingIntent::from_service(&svc), Ok(CachingIntent::RequireDedicated));
    }

    /// Story: require-shared with no cache plans one shared cache and waits
    #[test]
    fn story_require_shared_creates_cache_and_blocks() {
        let obs = observe(&service(Some("require-shared"), 0), &CacheFetch::default());
        assert_eq!(obs.storage, Some(WeightStorage::SharedCache));
        assert!(obs.should_create_cache);
        assert!(obs.volume.is_none());
        assert!(!obs.storage_ready());

        let projection = project_caching(&obs, None);
        assert!(projection.blocking);
        let health = projection.health.unwrap().1.unwrap();
        assert_eq!(health.state, HealthState::Progressing);
        assert_eq!(health.reason, reasons::CACHE_CREATING);

        let cache = build_template_cache(
            &service(Some("require-shared"), 0),
            &template(),
            &EffectiveConfig::default(),
        );
        assert_eq!(cache.name_any(), "llama-mi300x");
        assert!(cache.metadata.owner_references.is_none());
        assert_eq!(cache.labels().get(LABEL_CACHE_TYPE).map(String::as_str), Some("shared"));
    }

    #[test]
    fn prefer_shared_without_cache_uses_temporary_volume() {
        let obs = observe(&service(Some("prefer-shared"), 0), &CacheFetch::default());
        assert_eq!(obs.storage, Some(WeightStorage::TemporaryVolume));
        assert!(!obs.should_create_cache);
        let volume = obs.volume.as_ref().unwrap();
        assert!(volume.should_create());
        assert_eq!(volume.size_gi, Ok(18));
        assert!(volume.name.starts_with("aimsvc-temp-chat-"));
        assert_eq!(project_caching(&obs, None), Projection::not_applicable(Component::Caching));
    }

    #[test]
    fn prefer_shared_creates_cache_for_caching_template() {
        let mut template = template();
        template.spec.caching = Some(TemplateCachingConfig {
            enabled: true,
            env: vec![EnvVar::new("HF_HUB_OFFLINE", "0"), EnvVar::new("SHARED", "template")],
        });
        let svc = service(Some("prefer-shared"), 0);
        let obs = observe_caching(
            &svc,
            Some(&template),
            None,
            &CacheFetch::default(),
            &EffectiveConfig::default(),
            CachingIntent::PreferShared,
            &ReconcilePolicy::default(),
        );
        assert_eq!(obs.storage, Some(WeightStorage::SharedCache));
        assert!(obs.should_create_cache);
        assert!(obs.volume.is_none());
        assert!(project_caching(&obs, None).blocking);
    }

    #[test]
    fn template_cache_env_layers_service_over_template() {
        let mut template = template();
        template.spec.caching = Some(TemplateCachingConfig {
            enabled: true,
            env: vec![EnvVar::new("HF_HUB_OFFLINE", "0"), EnvVar::new("SHARED", "template")],
        });
        let mut svc = service(None, 0);
        svc.spec.env = vec![EnvVar::new("SHARED", "service"), EnvVar::new("HF_TOKEN_PATH", "/t")];

        let cache = build_template_cache(&svc, &template, &EffectiveConfig::default());
        assert_eq!(cache.namespace().as_deref(), Some("default"));
        assert_eq!(
            cache.spec.env,
            vec![
                EnvVar::new("HF_HUB_OFFLINE", "0"),
                EnvVar::new("HF_TOKEN_PATH", "/t"),
                EnvVar::new("SHARED", "service"),
            ]
        );
    }

    #[test]
    fn prefer_shared_uses_existing_cache_even_when_not_ready() {
        let fetched = CacheFetch {
            template_caches: vec![template_cache(AimStatus::Progressing)],
            ..Default::default()
        };
        let obs = observe(&service(None, 0), &fetched);
        assert_eq!(obs.storage, Some(WeightStorage::SharedCache));
        assert!(!obs.should_create_cache);
        assert!(!obs.storage_ready());
    }

    #[test]
    fn ready_cache_mounts_ready_model_caches() {
        let fetched = CacheFetch {
            template_caches: vec![template_cache(AimStatus::Ready)],
            model_caches: vec![model_cache("mc-llama", "hf://org/llama", AimStatus::Ready)],
            pvc: None,
        };
        let obs = observe(&service(Some("require-shared"), 0), &fetched);
        assert!(obs.storage_ready());
        assert_eq!(
            obs.mounts,
            vec![CacheMount {
                source_name: "llama".into(),
                claim_name: "mc-llama-pvc".into()
            }]
        );
        let projection = project_caching(&obs, None);
        assert!(!projection.blocking);
        assert_eq!(
            projection.update.cache.unwrap().template_cache_ref.unwrap().name,
            "llama-mi300x"
        );
    }

    #[test]
    fn failed_cache_within_budget_deletes_failed_model_caches() {
        let fetched = CacheFetch {
            template_caches: vec![template_cache(AimStatus::Failed)],
            model_caches: vec![
                model_cache("mc-llama", "hf://org/llama", AimStatus::Failed),
                model_cache("mc-other", "hf://org/other", AimStatus::Failed),
            ],
            pvc: None,
        };
        let obs = observe(&service(Some("require-shared"), 0), &fetched);
        assert_eq!(obs.retry_deletes, vec!["mc-llama".to_string()]);
        let projection = project_caching(&obs, None);
        assert!(!projection.blocking);
        assert_eq!(projection.update.cache.unwrap().retry_attempts, 1);
        assert_eq!(projection.health.unwrap().1.unwrap().reason, reasons::CACHE_RETRYING);
    }

    #[test]
    fn exhausted_retry_fails_require_shared() {
        let fetched = CacheFetch {
            template_caches: vec![template_cache(AimStatus::Failed)],
            model_caches: vec![model_cache("mc-llama", "hf://org/llama", AimStatus::Failed)],
            pvc: None,
        };
        let obs = observe(&service(Some("require-shared"), 1), &fetched);
        assert!(obs.retry_exhausted);
        assert!(obs.retry_deletes.is_empty());
        let projection = project_caching(&obs, None);
        assert!(projection.blocking);
        let health = projection.health.unwrap().1.unwrap();
        assert_eq!(health.reason, reasons::CACHE_FAILED);
        assert_eq!(health.dependency, DependencyKind::Upstream);
    }

    #[test]
    fn exhausted_retry_falls_back_for_prefer_shared() {
        let fetched = CacheFetch {
            template_caches: vec![template_cache(AimStatus::Failed)],
            ..Default::default()
        };
        let obs = observe(&service(Some("prefer-shared"), 1), &fetched);
        assert_eq!(obs.storage, Some(WeightStorage::TemporaryVolume));
        assert!(!project_caching(&obs, None).blocking);
    }

    #[test]
    fn require_dedicated_never_uses_cache() {
        let fetched = CacheFetch {
            template_caches: vec![template_cache(AimStatus::Ready)],
            ..Default::default()
        };
        let obs = observe(&service(Some("require-dedicated"), 0), &fetched);
        assert_eq!(obs.storage, Some(WeightStorage::TemporaryVolume));
    }

    #[test]
    fn unsized_source_is_storage_validation_error() {
        let err = storage_size_gi(&[source("a", None)], 10).unwrap_err();
        assert_eq!(err.kind, DependencyKind::Validation);
        assert!(err.message.contains("no size specified"));
        assert!(storage_size_gi(&[], 10).is_err());
    }

    #[test]
    fn storage_projection_follows_pvc_phase() {
        let bound = PersistentVolumeClaim {
            status: Some(PersistentVolumeClaimStatus {
                phase: Some("Bound".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let fetched = CacheFetch {
            pvc: Some(bound),
            ..Default::default()
        };
        let obs = observe(&service(Some("require-dedicated"), 0), &fetched);
        assert!(obs.storage_ready());
        let health = project_storage(&obs).health.unwrap().1.unwrap();
        assert_eq!(health.reason, reasons::STORAGE_READY);

        let obs = observe(&service(Some("require-dedicated"), 0), &CacheFetch::default());
        let projection = project_storage(&obs);
        assert!(!projection.blocking);
        assert_eq!(projection.health.unwrap().1.unwrap().reason, reasons::CREATING_PVC);
    }

    #[test]
    fn temp_pvc_requests_computed_size() {
        let svc = service(None, 0);
        let volume = VolumeObservation {
            name: temp_volume_name(&svc),
            exists: false,
            bound: false,
            size_gi: Ok(18),
        };
        let pvc = build_temp_pvc(&svc, &volume, 18, &EffectiveConfig::default());
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteMany".to_string()]));
        let requests = spec.resources.unwrap().requests.unwrap();
        assert_eq!(requests["storage"], Quantity("18Gi".into()));
    }
}
