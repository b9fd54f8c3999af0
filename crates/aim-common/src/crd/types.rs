//! Supporting types shared by the AIM CRDs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle status shared by models, templates, caches and runtime configs.
///
/// Unknown strings read back from the cluster parse as `Progressing` so a
/// newer controller writing a new state never wedges this one.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum AimStatus {
    /// Not started
    #[default]
    Pending,
    /// Usable
    Ready,
    /// Usable but impaired
    Degraded,
    /// Terminal failure
    Failed,
    /// Cannot run on this cluster (e.g. GPU not present)
    NotAvailable,
    /// Work in progress
    #[serde(other)]
    Progressing,
}

impl AimStatus {
    /// Parse a status string, treating anything unrecognized as `Progressing`
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Ready" => Self::Ready,
            "Degraded" => Self::Degraded,
            "Failed" => Self::Failed,
            "NotAvailable" => Self::NotAvailable,
            _ => Self::Progressing,
        }
    }

    /// Returns true if the object is usable
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Position in the auto-selection health ranking; lower is better.
    ///
    /// Ready > Progressing/Pending > NotAvailable > Failed. Degraded objects
    /// still serve, so they sit just behind Ready.
    pub fn selection_rank(&self) -> u8 {
        match self {
            Self::Ready => 0,
            Self::Degraded => 1,
            Self::Progressing | Self::Pending => 2,
            Self::NotAvailable => 3,
            Self::Failed => 4,
        }
    }
}

impl std::fmt::Display for AimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Progressing => write!(f, "Progressing"),
            Self::Ready => write!(f, "Ready"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Failed => write!(f, "Failed"),
            Self::NotAvailable => write!(f, "NotAvailable"),
        }
    }
}

/// Overall phase of an AIMService
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ServicePhase {
    /// Waiting on dependencies
    #[default]
    Pending,
    /// Runtime exists but is not serving yet
    Starting,
    /// Serving traffic
    Running,
    /// An upstream problem or runtime failure needs attention
    Degraded,
    /// The spec cannot be reconciled as written
    Failed,
}

impl std::fmt::Display for ServicePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Whether a referenced object is namespaced or cluster-wide
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ResourceScope {
    /// Lives in the service's namespace
    #[default]
    Namespace,
    /// Cluster-scoped
    Cluster,
}

impl std::fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Namespace => write!(f, "Namespace"),
            Self::Cluster => write!(f, "Cluster"),
        }
    }
}

/// Status pointer to a dependency, written only once it is Ready
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedReference {
    /// Object name
    pub name: String,
    /// Namespace, absent for cluster-scoped objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Object scope
    pub scope: ResourceScope,
    /// Object UID at resolution time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Environment variable with a literal value
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    /// Create an environment variable
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Compute resource requirements as quantity strings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ResourceRequirements {
    /// Requested resources (e.g. cpu: "4", memory: "32Gi")
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    /// Resource limits
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

impl ResourceRequirements {
    /// True when neither requests nor limits are set
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

/// Reference to a Secret in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LocalObjectReference {
    /// Secret name
    pub name: String,
}

/// One weight source of a model
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSource {
    /// Logical name, used as the mount directory
    pub name: String,
    /// Where the weights come from (e.g. `hf://meta-llama/Llama-3.1-8B`)
    pub source_uri: String,
    /// Size of the weights as a quantity; absent until discovered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// GPU requirements of a template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GpuSelector {
    /// GPU model (e.g. "MI300X")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// GPUs per replica
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Extended resource name (default `amd.com/gpu`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
}

impl GpuSelector {
    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.count.is_none() && self.resource_name.is_none()
    }
}

/// Service-level overrides applied on top of a template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateOverrides {
    /// Optimization metric (latency, throughput)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    /// Numeric precision (fp8, fp16, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,
    /// GPU requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_selector: Option<GpuSelector>,
}

impl TemplateOverrides {
    /// True when no override field is set
    pub fn is_empty(&self) -> bool {
        self.metric.is_none()
            && self.precision.is_none()
            && self.gpu_selector.as_ref().map_or(true, GpuSelector::is_empty)
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., ModelResolved, RuntimeReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Equal in everything but the transition time
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_strings_read_as_progressing() {
        let s: AimStatus = serde_json::from_str("\"Warming\"").unwrap();
        assert_eq!(s, AimStatus::Progressing);
        assert_eq!(AimStatus::parse("Warming"), AimStatus::Progressing);
        let ready: AimStatus = serde_json::from_str("\"Ready\"").unwrap();
        assert!(ready.is_ready());
    }

    #[test]
    fn selection_rank_orders_health() {
        assert!(AimStatus::Ready.selection_rank() < AimStatus::Pending.selection_rank());
        assert_eq!(
            AimStatus::Pending.selection_rank(),
            AimStatus::Progressing.selection_rank()
        );
        assert!(AimStatus::NotAvailable.selection_rank() < AimStatus::Failed.selection_rank());
    }

    #[test]
    fn overrides_emptiness_ignores_blank_gpu_selector() {
        let overrides = TemplateOverrides {
            gpu_selector: Some(GpuSelector::default()),
            ..Default::default()
        };
        assert!(overrides.is_empty());
        let overrides = TemplateOverrides {
            precision: Some("fp8".into()),
            ..Default::default()
        };
        assert!(!overrides.is_empty());
    }

    #[test]
    fn condition_same_state_ignores_timestamp() {
        let a = Condition::new("RuntimeReady", ConditionStatus::True, "RuntimeReady", "ok");
        let mut b = a.clone();
        b.last_transition_time = a.last_transition_time - chrono::Duration::seconds(30);
        assert!(a.same_state(&b));
        b.status = ConditionStatus::False;
        assert!(!a.same_state(&b));
    }
}
