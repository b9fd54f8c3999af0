//! AIMTemplateCache and AIMModelCache
//!
//! A template cache pre-downloads every weight source of one template into
//! shared volumes so that services using the template start without a
//! download. It fans out into one model cache per source; each model cache
//! owns a PVC.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{AimStatus, EnvVar, ResourceScope};

/// Template cache status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateCacheStatus {
    /// Lifecycle status
    #[serde(default)]
    pub status: AimStatus,
}

/// Shared weight cache for one template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMTemplateCache",
    plural = "aimtemplatecaches",
    shortname = "aimtc",
    namespaced,
    derive = "PartialEq",
    status = "TemplateCacheStatus",
    printcolumn = r#"{"name":"Template","type":"string","jsonPath":".spec.templateName"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AIMTemplateCacheSpec {
    /// Template whose sources are cached
    pub template_name: String,
    /// Scope of that template
    #[serde(default)]
    pub template_scope: ResourceScope,
    /// Storage class for the cache volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    /// Environment for download jobs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Model cache status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelCacheStatus {
    /// Lifecycle status
    #[serde(default)]
    pub status: AimStatus,
    /// PVC holding the downloaded weights
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<String>,
}

/// Cached copy of one weight source
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMModelCache",
    plural = "aimmodelcaches",
    shortname = "aimmc",
    namespaced,
    derive = "PartialEq",
    status = "ModelCacheStatus",
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.sourceUri"}"#,
    printcolumn = r#"{"name":"Size","type":"string","jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AIMModelCacheSpec {
    /// Weight source being cached
    pub source_uri: String,
    /// Volume size
    pub size: String,
    /// Storage class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}
