//! AIMService Custom Resource Definition
//!
//! An AIMService asks for a running inference endpoint. It names a model
//! (by record, by image, or inline), optionally a template, and how weights
//! should be cached and the endpoint exposed. Everything else is resolved by
//! the reconciler and reported back in status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::runtime_config::{RoutingConfig, StorageConfig};
use super::types::{
    Condition, EnvVar, GpuSelector, LocalObjectReference, ModelSource, ResolvedReference,
    ResourceRequirements, ServicePhase, TemplateOverrides,
};

/// Runtime config used when the service names none
pub const DEFAULT_RUNTIME_CONFIG_NAME: &str = "default";

/// Inline description of a model not published as an image record
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomModelSpec {
    /// Generic serving image that downloads the weights
    pub base_image: String,
    /// Weight sources
    pub model_sources: Vec<ModelSource>,
    /// GPU requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_selector: Option<GpuSelector>,
}

/// Which model backs the service; exactly one field must be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceModel {
    /// Name of an AIMModel or AIMClusterModel
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_: Option<String>,
    /// Container image to look up, or create a model record for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Inline model description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomModelSpec>,
}

/// Caching settings on a service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCachingConfig {
    /// One of require-shared, prefer-shared, require-dedicated.
    /// Legacy values Always, Auto, Never, Shared and Dedicated are accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// AIMService specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMService",
    plural = "aimservices",
    shortname = "aimsvc",
    namespaced,
    derive = "PartialEq",
    status = "AIMServiceStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".status.resolvedModel.name"}"#,
    printcolumn = r#"{"name":"Template","type":"string","jsonPath":".status.resolvedTemplate.name"}"#,
    printcolumn = r#"{"name":"Path","type":"string","jsonPath":".status.routing.path"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AIMServiceSpec {
    /// Model selection
    pub model: ServiceModel,

    /// Explicit template; auto-selected when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,

    /// Overrides applied on top of the template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<TemplateOverrides>,

    /// Caching intent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<ServiceCachingConfig>,

    /// Deprecated boolean caching switch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_model: Option<bool>,

    /// Replica count (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Runtime config name (default "default")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_config_name: Option<String>,

    /// Storage overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    /// Routing overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingConfig>,

    /// Explicit resources; win over template and defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Extra environment; wins over every other source
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Registry pull secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Service account for the runtime pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

impl AIMServiceSpec {
    /// Effective runtime config name
    pub fn runtime_config_name(&self) -> &str {
        self.runtime_config_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_RUNTIME_CONFIG_NAME)
    }

    /// Overrides, if any field is actually set
    pub fn effective_overrides(&self) -> Option<&TemplateOverrides> {
        self.overrides.as_ref().filter(|o| !o.is_empty())
    }
}

/// Cache bookkeeping in service status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCacheStatus {
    /// Template cache in use, once Ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_cache_ref: Option<ResolvedReference>,
    /// Recreation attempts spent on failed caches
    #[serde(default)]
    pub retry_attempts: u32,
}

/// Routing outcome in service status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRoutingStatus {
    /// Resolved HTTP path prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// AIMService status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AIMServiceStatus {
    /// Overall phase
    #[serde(default)]
    pub status: ServicePhase,

    /// Per-domain conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Runtime config in effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_runtime_config: Option<ResolvedReference>,

    /// Model in use, once Ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_model: Option<ResolvedReference>,

    /// Template in use, once Ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_template: Option<ResolvedReference>,

    /// Cache bookkeeping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<ServiceCacheStatus>,

    /// Routing outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<ServiceRoutingStatus>,

    /// Generation last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl AIMServiceStatus {
    /// Condition of the given type, if present
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Recreation attempts spent so far
    pub fn retry_attempts(&self) -> u32 {
        self.cache.as_ref().map(|c| c.retry_attempts).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_parses_from_yaml_shape() {
        let spec: AIMServiceSpec = serde_json::from_value(serde_json::json!({
            "model": {"image": "ghcr.io/amd/llama:v1"},
            "caching": {"mode": "Always"},
            "routing": {"enabled": true, "pathTemplate": "/{.metadata.namespace}"},
            "env": [{"name": "A", "value": "1"}]
        }))
        .unwrap();
        assert_eq!(spec.model.image.as_deref(), Some("ghcr.io/amd/llama:v1"));
        assert_eq!(spec.runtime_config_name(), DEFAULT_RUNTIME_CONFIG_NAME);
        assert!(spec.effective_overrides().is_none());
        assert_eq!(
            spec.routing.and_then(|r| r.path_template).as_deref(),
            Some("/{.metadata.namespace}")
        );
    }

    #[test]
    fn model_ref_uses_ref_key() {
        let model: ServiceModel =
            serde_json::from_value(serde_json::json!({"ref": "llama"})).unwrap();
        assert_eq!(model.ref_.as_deref(), Some("llama"));
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["ref"], "llama");
    }
}
