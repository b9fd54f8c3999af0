//! AIMServiceTemplate and AIMClusterServiceTemplate
//!
//! A template is a tested serving profile for one model: GPU type and count,
//! precision, optimization metric, resources and environment. The template
//! controller discovers the weight sources and their sizes and writes them
//! to status, which is what cache sizing reads.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    AimStatus, EnvVar, GpuSelector, LocalObjectReference, ModelSource, ResourceRequirements,
};

/// Template-level caching settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateCachingConfig {
    /// Pre-populate a shared cache for this template
    #[serde(default)]
    pub enabled: bool,
    /// Environment for the cache download jobs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Descriptive metadata of a discovered profile
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMetadata {
    /// GPU model the profile was tuned on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
    /// GPUs per replica
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_count: Option<u32>,
    /// Optimization metric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    /// Numeric precision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,
    /// Profile maturity: optimized, preview or unoptimized
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Runtime profile discovered for a template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateProfile {
    /// Environment the profile requires
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_vars: BTreeMap<String, String>,
    /// Profile metadata
    #[serde(default)]
    pub metadata: ProfileMetadata,
}

/// Template status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateStatus {
    /// Lifecycle status
    #[serde(default)]
    pub status: AimStatus,
    /// Weight sources with discovered sizes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_sources: Vec<ModelSource>,
    /// Discovered runtime profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<TemplateProfile>,
}

/// Namespaced serving template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMServiceTemplate",
    plural = "aimservicetemplates",
    shortname = "aimst",
    namespaced,
    derive = "PartialEq",
    status = "TemplateStatus",
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.modelName"}"#,
    printcolumn = r#"{"name":"Metric","type":"string","jsonPath":".spec.metric"}"#,
    printcolumn = r#"{"name":"Precision","type":"string","jsonPath":".spec.precision"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AIMServiceTemplateSpec {
    /// Model record this template serves
    pub model_name: String,
    /// Optimization metric (latency, throughput)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    /// Numeric precision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,
    /// GPU requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_selector: Option<GpuSelector>,
    /// Explicit resources; replace the per-GPU defaults when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Weight sources known up front
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_sources: Vec<ModelSource>,
    /// Shared cache settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<TemplateCachingConfig>,
    /// Registry pull secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

/// Cluster-wide serving template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMClusterServiceTemplate",
    plural = "aimclusterservicetemplates",
    shortname = "aimcst",
    derive = "PartialEq",
    status = "TemplateStatus",
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.modelName"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AIMClusterServiceTemplateSpec {
    /// Model record this template serves
    pub model_name: String,
    /// Optimization metric (latency, throughput)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    /// Numeric precision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,
    /// GPU requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_selector: Option<GpuSelector>,
    /// Explicit resources; replace the per-GPU defaults when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Weight sources known up front
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_sources: Vec<ModelSource>,
    /// Shared cache settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<TemplateCachingConfig>,
    /// Registry pull secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

impl From<AIMClusterServiceTemplateSpec> for AIMServiceTemplateSpec {
    fn from(spec: AIMClusterServiceTemplateSpec) -> Self {
        Self {
            model_name: spec.model_name,
            metric: spec.metric,
            precision: spec.precision,
            gpu_selector: spec.gpu_selector,
            resources: spec.resources,
            env: spec.env,
            model_sources: spec.model_sources,
            caching: spec.caching,
            image_pull_secrets: spec.image_pull_secrets,
        }
    }
}

impl AIMServiceTemplateSpec {
    /// GPUs per replica, defaulting to one
    pub fn gpu_count(&self) -> u32 {
        self.gpu_selector
            .as_ref()
            .and_then(|g| g.count)
            .unwrap_or(1)
    }

    /// GPU model, if pinned
    pub fn gpu_model(&self) -> Option<&str> {
        self.gpu_selector.as_ref().and_then(|g| g.model.as_deref())
    }
}
