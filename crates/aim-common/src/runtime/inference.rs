//! KServe InferenceService
//!
//! The predictor is a single custom container. KServe owns rollout and
//! readiness; we read back its Ready condition and failure info.

use k8s_openapi::api::core::v1::{Affinity, Container, LocalObjectReference, Volume};
use serde::{Deserialize, Serialize};

use crate::kube_utils::{impl_api_defaults, HasApiResource, ObjectMeta};

/// KServe InferenceService resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceService {
    /// API version (serving.kserve.io/v1beta1)
    #[serde(default = "InferenceService::default_api_version")]
    pub api_version: String,
    /// Resource kind (InferenceService)
    #[serde(default = "InferenceService::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Desired state
    pub spec: InferenceServiceSpec,
    /// Status written by KServe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InferenceServiceStatus>,
}

impl HasApiResource for InferenceService {
    const API_VERSION: &'static str = "serving.kserve.io/v1beta1";
    const KIND: &'static str = "InferenceService";
}

impl_api_defaults!(InferenceService);

impl InferenceService {
    /// Create a new InferenceService
    pub fn new(metadata: ObjectMeta, spec: InferenceServiceSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
            status: None,
        }
    }

    /// True once KServe reports the Ready condition
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| {
                s.conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or(false)
    }

    /// Last failure KServe recorded for the predictor, if any
    pub fn last_failure(&self) -> Option<&FailureInfo> {
        self.status
            .as_ref()?
            .model_status
            .as_ref()?
            .last_failure_info
            .as_ref()
    }
}

/// InferenceService spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceSpec {
    /// Predictor component
    pub predictor: PredictorSpec,
}

/// Predictor component of an InferenceService
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictorSpec {
    /// Minimum replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    /// Maximum replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
    /// Serving containers
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Pod volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    /// Pod affinity rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    /// Registry pull secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    /// Service account the pods run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

/// Status subset read back from KServe
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceStatus {
    /// Knative-style conditions
    #[serde(default)]
    pub conditions: Vec<IsvcCondition>,
    /// Public URL once routable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Predictor model status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_status: Option<ModelStatus>,
}

/// Condition entry on an InferenceService
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IsvcCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Predictor model status
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    /// Most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_info: Option<FailureInfo>,
}

/// Failure detail reported by KServe
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    /// Failure reason (e.g. ModelLoadFailed)
    #[serde(default)]
    pub reason: String,
    /// Failure message
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_and_failure_are_read_from_status() {
        let raw = serde_json::json!({
            "metadata": {"name": "llama-1a2b", "namespace": "default"},
            "spec": {"predictor": {"containers": []}},
            "status": {
                "conditions": [{"type": "Ready", "status": "False"}],
                "modelStatus": {"lastFailureInfo": {"reason": "ModelLoadFailed", "message": "oom"}}
            }
        });
        let isvc: InferenceService = serde_json::from_value(raw).unwrap();
        assert_eq!(isvc.api_version, "serving.kserve.io/v1beta1");
        assert!(!isvc.is_ready());
        assert_eq!(isvc.last_failure().map(|f| f.reason.as_str()), Some("ModelLoadFailed"));
    }

    #[test]
    fn ready_condition_marks_ready() {
        let mut isvc = InferenceService::new(
            ObjectMeta::new("x", "ns"),
            InferenceServiceSpec::default(),
        );
        assert!(!isvc.is_ready());
        isvc.status = Some(InferenceServiceStatus {
            conditions: vec![IsvcCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert!(isvc.is_ready());
        assert!(isvc.last_failure().is_none());
    }
}
