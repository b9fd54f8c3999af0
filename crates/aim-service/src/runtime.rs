//! Inference runtime planning
//!
//! The runtime is a KServe InferenceService with a single serving
//! container. It is planned only once the model and template are Ready and
//! weight storage is in place; an existing runtime keeps receiving replica
//! and resource updates even when that gate closes again.

use std::collections::{BTreeMap, BTreeSet};

use aim_common::crd::{AIMService, EnvVar, ResourceRequirements};
use aim_common::gpu::{device_ids_for_model, normalize_model, LABEL_GPU_DEVICE_ID, LABEL_GPU_PRODUCT};
use aim_common::kube_utils::{HasApiResource, ObjectMeta};
use aim_common::naming::{
    derived_name_with, sanitize_dns_label, sanitize_label_value, NameOptions, MAX_NAME_LENGTH,
};
use aim_common::quantity::scale;
use aim_common::runtime::inference::{InferenceService, InferenceServiceSpec, PredictorSpec};
use aim_common::{
    Error, Result, LABEL_COMPONENT, LABEL_METRIC, LABEL_MODEL, LABEL_PRECISION, LABEL_SERVICE,
    LABEL_TEMPLATE,
};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EmptyDirVolumeSource, EnvVar as KubeEnvVar,
    LocalObjectReference, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PersistentVolumeClaimVolumeSource, Pod, ResourceRequirements as KubeResourceRequirements,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use serde_json::{json, Value};

use crate::caching::{CacheMount, CachingObservation};
use crate::config::{EffectiveConfig, ReconcilePolicy};
use crate::health::{reasons, Component, ComponentHealth, DomainError, Projection};
use crate::model::ModelRecord;
use crate::template::TemplateRecord;

/// Name of the serving container
pub const CONTAINER_NAME: &str = "kserve-container";

/// Name of the temporary weight volume inside the pod
pub const MODEL_STORAGE_VOLUME: &str = "model-storage";

const SHM_VOLUME: &str = "dshm";

/// Runtime object name for a service
pub fn runtime_name(service: &AIMService) -> String {
    let seed = format!(
        "{}-{}",
        service.namespace().unwrap_or_default(),
        service.uid().unwrap_or_default()
    );
    derived_name_with(
        &[&service.name_any()],
        &[json!(seed)],
        NameOptions::with_hash_length(4),
    )
}

/// Image pull failure seen on a runtime pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullFailure {
    /// Classified condition reason
    pub reason: &'static str,
    /// Kubelet message
    pub message: String,
}

/// Runtime domain decisions
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeObservation {
    /// Runtime object name
    pub name: String,
    /// Existing runtime object
    pub existing: Option<InferenceService>,
    /// Model, template and storage are all in place
    pub ready_for_runtime: bool,
    /// What the gate is waiting on when closed
    pub waiting_on: Vec<&'static str>,
    /// Image pull problem on one of the pods
    pub pull_failure: Option<PullFailure>,
}

impl RuntimeObservation {
    /// True when the runtime object already exists
    pub fn exists(&self) -> bool {
        self.existing.is_some()
    }
}

/// Classify a kubelet waiting reason into an image pull failure
pub fn classify_pull_failure(reason: &str, message: &str) -> Option<&'static str> {
    if !matches!(reason, "ErrImagePull" | "ImagePullBackOff" | "InvalidImageName") {
        return None;
    }
    let lower = message.to_lowercase();
    let auth_markers = ["unauthorized", "authentication required", "denied", "401", "403"];
    let missing_markers = ["not found", "manifest unknown", "404"];
    if auth_markers.iter().any(|m| lower.contains(m)) {
        Some(reasons::IMAGE_PULL_AUTH_FAILURE)
    } else if reason == "InvalidImageName" || missing_markers.iter().any(|m| lower.contains(m)) {
        Some(reasons::IMAGE_NOT_FOUND)
    } else {
        Some(reasons::IMAGE_PULL_FAILED)
    }
}

/// First image pull failure across `pods`
pub fn pull_failure(pods: &[Pod]) -> Option<PullFailure> {
    pods.iter()
        .filter_map(|pod| pod.status.as_ref())
        .flat_map(|status| {
            status
                .init_container_statuses
                .iter()
                .flatten()
                .chain(status.container_statuses.iter().flatten())
        })
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref())
        .find_map(|waiting| {
            let reason = waiting.reason.as_deref().unwrap_or_default();
            let message = waiting.message.clone().unwrap_or_default();
            classify_pull_failure(reason, &message).map(|reason| PullFailure { reason, message })
        })
}

/// Decide whether the runtime can be planned
pub fn observe_runtime(
    service: &AIMService,
    model: Option<&ModelRecord>,
    template: Option<&TemplateRecord>,
    caching: &CachingObservation,
    existing: Option<&InferenceService>,
    pods: &[Pod],
) -> RuntimeObservation {
    let mut waiting_on = Vec::new();
    if model.filter(|m| m.status.is_ready()).is_none() {
        waiting_on.push("model");
    }
    if template.filter(|t| t.status.status.is_ready()).is_none() {
        waiting_on.push("template");
    }
    if !caching.storage_ready() {
        waiting_on.push("storage");
    }
    RuntimeObservation {
        name: runtime_name(service),
        existing: existing.cloned(),
        ready_for_runtime: waiting_on.is_empty(),
        waiting_on,
        pull_failure: pull_failure(pods),
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Merge env layers; later layers win by name and the result is sorted
pub fn merge_env<I>(layers: I) -> Vec<EnvVar>
where
    I: IntoIterator<Item = Vec<EnvVar>>,
{
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for layer in layers {
        for var in layer {
            merged.insert(var.name, var.value);
        }
    }
    merged
        .into_iter()
        .map(|(name, value)| EnvVar { name, value })
        .collect()
}

fn system_env(model: &ModelRecord, template: &TemplateRecord) -> Vec<EnvVar> {
    let mut env = vec![EnvVar::new("VLLM_ENABLE_METRICS", "true")];
    let first_source = template
        .status
        .model_sources
        .first()
        .or_else(|| template.spec.model_sources.first())
        .or_else(|| model.spec.model_sources.first());
    if let Some(source) = first_source {
        env.push(EnvVar::new("AIM_MODEL_ID", &source.source_uri));
    }
    env
}

fn runtime_env(
    service: &AIMService,
    model: &ModelRecord,
    template: &TemplateRecord,
    config: &EffectiveConfig,
) -> Vec<EnvVar> {
    let profile_env: Vec<EnvVar> = template
        .status
        .profile
        .as_ref()
        .map(|p| {
            p.env_vars
                .iter()
                .map(|(k, v)| EnvVar::new(k, v))
                .collect()
        })
        .unwrap_or_default();
    merge_env([
        system_env(model, template),
        config.spec.env.clone(),
        model.spec.env.clone(),
        template.spec.env.clone(),
        profile_env,
        service.spec.env.clone(),
    ])
}

fn gpu_resource_name(template: &TemplateRecord, policy: &ReconcilePolicy) -> String {
    template
        .spec
        .gpu_selector
        .as_ref()
        .and_then(|g| g.resource_name.clone())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| policy.gpu_resource_name.clone())
}

fn gpu_count(template: &TemplateRecord) -> u32 {
    template
        .profile_metadata()
        .and_then(|m| m.gpu_count)
        .filter(|n| *n > 0)
        .unwrap_or_else(|| template.spec.gpu_count())
}

fn gpu_model(template: &TemplateRecord) -> Option<String> {
    template
        .spec
        .gpu_model()
        .map(str::to_string)
        .or_else(|| template.profile_metadata().and_then(|m| m.gpu.clone()))
        .filter(|m| !m.trim().is_empty())
}

/// Requests and limits for `gpus` GPUs from per-GPU ratios
pub fn default_resources(gpus: u32, gpu_resource: &str, policy: &ReconcilePolicy) -> Result<ResourceRequirements> {
    let n = u64::from(gpus);
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), scale(&policy.cpu_per_gpu, n)?);
    requests.insert("memory".to_string(), scale(&policy.memory_request_per_gpu, n)?);
    requests.insert(gpu_resource.to_string(), gpus.to_string());
    let mut limits = BTreeMap::new();
    limits.insert("memory".to_string(), scale(&policy.memory_limit_per_gpu, n)?);
    limits.insert(gpu_resource.to_string(), gpus.to_string());
    Ok(ResourceRequirements { requests, limits })
}

fn runtime_resources(
    service: &AIMService,
    template: &TemplateRecord,
    policy: &ReconcilePolicy,
) -> Result<ResourceRequirements> {
    let explicit = service
        .spec
        .resources
        .as_ref()
        .filter(|r| !r.is_empty())
        .or_else(|| template.spec.resources.as_ref().filter(|r| !r.is_empty()));
    let gpu_resource = gpu_resource_name(template, policy);
    let gpus = gpu_count(template);
    match explicit {
        Some(resources) => {
            let mut resources = resources.clone();
            for side in [&mut resources.requests, &mut resources.limits] {
                side.entry(gpu_resource.clone())
                    .or_insert_with(|| gpus.to_string());
            }
            Ok(resources)
        }
        None => default_resources(gpus, &gpu_resource, policy),
    }
}

fn to_kube_resources(resources: &ResourceRequirements) -> KubeResourceRequirements {
    let convert = |side: &BTreeMap<String, String>| {
        (!side.is_empty()).then(|| {
            side.iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect()
        })
    };
    KubeResourceRequirements {
        requests: convert(&resources.requests),
        limits: convert(&resources.limits),
        ..Default::default()
    }
}

/// Required node affinity pinning pods to `model` GPUs
pub fn gpu_affinity(model: &str) -> Affinity {
    let ids = device_ids_for_model(model);
    let requirement = if ids.is_empty() {
        NodeSelectorRequirement {
            key: LABEL_GPU_PRODUCT.to_string(),
            operator: "In".to_string(),
            values: Some(vec![normalize_model(model)]),
        }
    } else {
        NodeSelectorRequirement {
            key: LABEL_GPU_DEVICE_ID.to_string(),
            operator: "In".to_string(),
            values: Some(ids.into_iter().map(str::to_string).collect()),
        }
    };
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![requirement]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Volume name for a cache source, suffixed `-2`, `-3`... on collision
fn unique_volume_name(source_name: &str, taken: &BTreeSet<String>) -> String {
    let mut base = sanitize_dns_label(source_name);
    if base.is_empty() {
        base = "cache".to_string();
    }
    let mut name = base.clone();
    let mut n = 2;
    while taken.contains(&name) {
        let suffix = format!("-{n}");
        let mut stem = base.clone();
        stem.truncate(MAX_NAME_LENGTH - suffix.len());
        name = format!("{}{suffix}", stem.trim_end_matches('-'));
        n += 1;
    }
    name
}

/// Pod volumes and container mounts: shm, then the temporary volume, then caches
pub fn runtime_volumes(
    temp_volume: Option<&str>,
    mounts: &[CacheMount],
    policy: &ReconcilePolicy,
) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = vec![Volume {
        name: SHM_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some("Memory".to_string()),
            size_limit: Some(Quantity(policy.shm_size.clone())),
        }),
        ..Default::default()
    }];
    let mut volume_mounts = vec![VolumeMount {
        name: SHM_VOLUME.to_string(),
        mount_path: "/dev/shm".to_string(),
        ..Default::default()
    }];

    let claim = |name: &str, claim_name: &str| Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            read_only: None,
        }),
        ..Default::default()
    };

    if let Some(pvc) = temp_volume {
        volumes.push(claim(MODEL_STORAGE_VOLUME, pvc));
        volume_mounts.push(VolumeMount {
            name: MODEL_STORAGE_VOLUME.to_string(),
            mount_path: policy.cache_mount_root.clone(),
            ..Default::default()
        });
    }

    let mut taken: BTreeSet<String> = volumes.iter().map(|v| v.name.clone()).collect();
    for mount in mounts {
        let name = unique_volume_name(&mount.source_name, &taken);
        taken.insert(name.clone());
        volumes.push(claim(&name, &mount.claim_name));
        volume_mounts.push(VolumeMount {
            name,
            mount_path: format!(
                "{}/{}",
                policy.cache_mount_root.trim_end_matches('/'),
                mount.source_name
            ),
            ..Default::default()
        });
    }
    (volumes, volume_mounts)
}

fn pull_secrets(
    service: &AIMService,
    model: &ModelRecord,
    template: &TemplateRecord,
) -> Vec<LocalObjectReference> {
    let mut names: Vec<String> = Vec::new();
    for secret in model
        .spec
        .image_pull_secrets
        .iter()
        .chain(&template.spec.image_pull_secrets)
        .chain(&service.spec.image_pull_secrets)
    {
        if !secret.name.is_empty() && !names.contains(&secret.name) {
            names.push(secret.name.clone());
        }
    }
    names
        .into_iter()
        .map(|name| LocalObjectReference { name })
        .collect()
}

fn runtime_labels(
    service: &AIMService,
    model: &ModelRecord,
    template: &TemplateRecord,
) -> BTreeMap<String, String> {
    let metadata = template.profile_metadata();
    let metric = template
        .spec
        .metric
        .clone()
        .or_else(|| metadata.and_then(|m| m.metric.clone()));
    let precision = template
        .spec
        .precision
        .clone()
        .or_else(|| metadata.and_then(|m| m.precision.clone()));

    let mut labels = service.labels().clone();
    let system = [
        (LABEL_COMPONENT, Some("inference".to_string())),
        (LABEL_TEMPLATE, Some(template.name.clone())),
        (LABEL_MODEL, Some(model.name.clone())),
        (LABEL_SERVICE, Some(service.name_any())),
        (LABEL_METRIC, metric),
        (LABEL_PRECISION, precision),
    ];
    for (key, value) in system {
        if let Some(value) = value.and_then(|v| sanitize_label_value(&v).ok()) {
            labels.insert(key.to_string(), value);
        }
    }
    labels
}

/// Full runtime object for a service
pub fn build_inference_service(
    service: &AIMService,
    name: &str,
    model: &ModelRecord,
    template: &TemplateRecord,
    caching: &CachingObservation,
    config: &EffectiveConfig,
    policy: &ReconcilePolicy,
) -> Result<InferenceService> {
    let mut metadata = ObjectMeta::new(name, service.namespace().unwrap_or_default());
    for (key, value) in runtime_labels(service, model, template) {
        metadata.labels.insert(key, value);
    }

    let env = runtime_env(service, model, template, config)
        .into_iter()
        .map(|var| KubeEnvVar {
            name: var.name,
            value: Some(var.value),
            value_from: None,
        })
        .collect();
    let resources = runtime_resources(service, template, policy)?;
    let temp_volume = caching.volume_in_use().map(|v| v.name.as_str());
    let (volumes, volume_mounts) = runtime_volumes(temp_volume, &caching.mounts, policy);

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(model.spec.image.clone()),
        env: Some(env),
        resources: Some(to_kube_resources(&resources)),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: policy.container_port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    };

    let replicas = service.spec.replicas.unwrap_or(1);
    let spec = InferenceServiceSpec {
        predictor: PredictorSpec {
            min_replicas: Some(replicas),
            max_replicas: Some(replicas),
            containers: vec![container],
            volumes,
            affinity: gpu_model(template).map(|m| gpu_affinity(&m)),
            image_pull_secrets: pull_secrets(service, model, template),
            service_account_name: service
                .spec
                .service_account_name
                .clone()
                .or_else(|| model.spec.service_account_name.clone()),
        },
    };
    Ok(InferenceService::new(metadata, spec))
}

/// Merge patch for the mutable fields of an existing runtime
///
/// Replica bounds are always sent. With a Ready template the serving
/// container's resources are recomputed too; the existing container list is
/// sent whole because merge patches replace lists.
pub fn mutable_fields_patch(
    service: &AIMService,
    existing: &InferenceService,
    template: Option<&TemplateRecord>,
    policy: &ReconcilePolicy,
) -> Result<Value> {
    let replicas = service.spec.replicas.unwrap_or(1);
    let mut predictor = json!({
        "minReplicas": replicas,
        "maxReplicas": replicas,
    });
    let containers = &existing.spec.predictor.containers;
    if let Some(template) = template {
        if containers.iter().any(|c| c.name == CONTAINER_NAME) {
            let resources = to_kube_resources(&runtime_resources(service, template, policy)?);
            let containers: Vec<Container> = containers
                .iter()
                .cloned()
                .map(|mut c| {
                    if c.name == CONTAINER_NAME {
                        c.resources = Some(resources.clone());
                    }
                    c
                })
                .collect();
            predictor["containers"] = serde_json::to_value(containers)
                .map_err(|e| Error::serialization_for_kind(InferenceService::KIND, e.to_string()))?;
        }
    }
    Ok(json!({ "spec": { "predictor": predictor } }))
}

// =============================================================================
// Projection
// =============================================================================

/// Runtime domain projection; never blocks
pub fn project_runtime(obs: &RuntimeObservation) -> Projection {
    let component = Component::Runtime;
    let health = match (&obs.existing, &obs.pull_failure) {
        (Some(isvc), _) if isvc.is_ready() => ComponentHealth::ready(
            component,
            reasons::RUNTIME_READY,
            format!("runtime {} is ready", obs.name),
        ),
        (Some(_), Some(failure)) => ComponentHealth::from_error(
            component,
            &DomainError::downstream(failure.reason, failure.message.clone()),
        ),
        (Some(isvc), None) => match isvc.last_failure() {
            Some(failure) => ComponentHealth::from_error(
                component,
                &DomainError::downstream(
                    reasons::RUNTIME_FAILED,
                    format!("{}: {}", failure.reason, failure.message),
                ),
            ),
            None => ComponentHealth::progressing(
                component,
                reasons::CREATING_RUNTIME,
                format!("runtime {} is starting", obs.name),
            ),
        },
        (None, _) if obs.ready_for_runtime => ComponentHealth::progressing(
            component,
            reasons::CREATING_RUNTIME,
            format!("creating runtime {}", obs.name),
        ),
        (None, _) => ComponentHealth::pending(
            component,
            reasons::WAITING_FOR_DEPENDENCIES,
            format!("waiting for {}", obs.waiting_on.join(", ")),
        ),
    };
    Projection::of(health, false)
}
