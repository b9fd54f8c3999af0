//! AIMRuntimeConfig and AIMClusterRuntimeConfig
//!
//! Runtime configs carry the defaults a platform team wants applied to every
//! service: storage class, PVC headroom, routing and extra environment. The
//! cluster-scoped config is the base layer, the namespaced one overrides it,
//! and a service's inline settings override both.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{AimStatus, EnvVar};

/// Storage defaults
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Storage class for caches and temporary volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_storage_class_name: Option<String>,
    /// Extra capacity on top of the model size, in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_headroom_percent: Option<u32>,
}

/// Gateway the service route attaches to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRef {
    /// Gateway name
    pub name: String,
    /// Gateway namespace (default: the service namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// API group (default: gateway.networking.k8s.io)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Kind (default: Gateway)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// HTTP exposure settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    /// Create an HTTPRoute for the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Parent gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_ref: Option<GatewayRef>,
    /// Path template with `{.metadata...}` placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_template: Option<String>,
    /// Request timeout as a Gateway API duration (e.g. "60s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    /// Annotations copied onto the route
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Runtime config status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfigStatus {
    /// Lifecycle status
    #[serde(default)]
    pub status: AimStatus,
}

/// Namespace-wide runtime defaults
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMRuntimeConfig",
    plural = "aimruntimeconfigs",
    shortname = "aimrc",
    namespaced,
    derive = "PartialEq",
    status = "RuntimeConfigStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct AIMRuntimeConfigSpec {
    /// Storage defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,
    /// Routing defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingConfig>,
    /// Extra environment for every runtime
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Cluster-wide runtime defaults
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aim.eai.amd.com",
    version = "v1alpha1",
    kind = "AIMClusterRuntimeConfig",
    plural = "aimclusterruntimeconfigs",
    shortname = "aimcrc",
    derive = "PartialEq",
    status = "RuntimeConfigStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct AIMClusterRuntimeConfigSpec {
    /// Storage defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,
    /// Routing defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingConfig>,
    /// Extra environment for every runtime
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

impl From<AIMClusterRuntimeConfigSpec> for AIMRuntimeConfigSpec {
    fn from(spec: AIMClusterRuntimeConfigSpec) -> Self {
        Self {
            storage: spec.storage,
            routing: spec.routing,
            env: spec.env,
        }
    }
}
