//! Kubernetes Event recording for the AIM controllers.
//!
//! Controllers emit Events on state transitions so that `kubectl describe
//! aimservice` shows why a service is waiting. Publishing is fire-and-forget:
//! a failed event is logged and never interrupts reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on the given resource.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as the given controller name.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event actions.
pub mod actions {
    /// Reconcile pass
    pub const RECONCILE: &str = "Reconcile";
    /// Objects applied to the cluster
    pub const APPLY: &str = "Apply";
    /// Objects deleted for retry
    pub const DELETE: &str = "Delete";
}

/// Event reasons emitted by the service controller.
pub mod reasons {
    /// Service phase changed
    pub const PHASE_CHANGED: &str = "PhaseChanged";
    /// Service reached Running
    pub const SERVICE_RUNNING: &str = "ServiceRunning";
    /// Service entered Failed or Degraded
    pub const SERVICE_UNHEALTHY: &str = "ServiceUnhealthy";
    /// Failed model caches were deleted for recreation
    pub const CACHE_RETRY: &str = "CacheRetry";
    /// Applying planned objects failed
    pub const APPLY_FAILED: &str = "ApplyFailed";
}
