//! AIMModel and AIMClusterModel
//!
//! A model record names the serving image and the weight sources behind it.
//! Records are shared: the operator creates them for image lookups and
//! custom models without an owner reference, so they outlive any service.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{AimStatus, EnvVar, LocalObjectReference, ModelSource};

/// Model status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    /// Lifecycle status
    #[serde(default)]
    pub status: AimStatus,
}

/// Namespaced model record
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMModel",
    plural = "aimmodels",
    shortname = "aimm",
    namespaced,
    derive = "PartialEq",
    status = "ModelStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AIMModelSpec {
    /// Serving container image
    pub image: String,
    /// Weight sources; empty when the image bakes them in
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_sources: Vec<ModelSource>,
    /// Runtime config applied to this model's templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_config_name: Option<String>,
    /// Registry pull secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    /// Extra environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Service account for discovery jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

/// Cluster-wide model record
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMClusterModel",
    plural = "aimclustermodels",
    shortname = "aimcm",
    derive = "PartialEq",
    status = "ModelStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AIMClusterModelSpec {
    /// Serving container image
    pub image: String,
    /// Weight sources; empty when the image bakes them in
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_sources: Vec<ModelSource>,
    /// Runtime config applied to this model's templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_config_name: Option<String>,
    /// Registry pull secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    /// Extra environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Service account for discovery jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

impl From<AIMClusterModelSpec> for AIMModelSpec {
    fn from(spec: AIMClusterModelSpec) -> Self {
        Self {
            image: spec.image,
            model_sources: spec.model_sources,
            runtime_config_name: spec.runtime_config_name,
            image_pull_secrets: spec.image_pull_secrets,
            env: spec.env,
            service_account_name: spec.service_account_name,
        }
    }
}
