//! Component health and status projection
//!
//! Every domain reduces its observation to a [`Projection`]: a component
//! health, the status fields it owns, and whether later domains should be
//! skipped this pass. [`reduce`] folds projections in a fixed order and stops
//! at the first blocker, leaving the conditions of later domains exactly as
//! the previous pass wrote them.

use aim_common::crd::{
    AIMServiceStatus, Condition, ConditionStatus, ResolvedReference, ServiceCacheStatus,
    ServicePhase, ServiceRoutingStatus,
};

/// Condition types, one per domain
pub mod conditions {
    /// Runtime config lookup and spec validation
    pub const CONFIG_RESOLVED: &str = "ConfigResolved";
    /// Model record resolved and Ready
    pub const MODEL_RESOLVED: &str = "ModelResolved";
    /// Template resolved and Ready
    pub const TEMPLATE_RESOLVED: &str = "TemplateResolved";
    /// Shared cache state
    pub const CACHE_READY: &str = "CacheReady";
    /// Temporary volume state
    pub const STORAGE_READY: &str = "StorageReady";
    /// Inference runtime state
    pub const RUNTIME_READY: &str = "RuntimeReady";
    /// HTTP route state
    pub const ROUTING_READY: &str = "RoutingReady";
}

/// Machine-readable condition reasons
pub mod reasons {
    /// Runtime config found
    pub const CONFIG_RESOLVED: &str = "ConfigResolved";
    /// Named runtime config does not exist
    pub const CONFIG_NOT_FOUND: &str = "ConfigNotFound";
    /// Spec field cannot be interpreted
    pub const INVALID_SPEC: &str = "InvalidSpec";

    /// Image reference could not be parsed
    pub const INVALID_IMAGE_REFERENCE: &str = "InvalidImageReference";
    /// Referenced model does not exist
    pub const MODEL_NOT_FOUND: &str = "ModelNotFound";
    /// A model record is being created
    pub const CREATING_MODEL: &str = "CreatingModel";
    /// Model exists but is not Ready
    pub const MODEL_NOT_READY: &str = "ModelNotReady";
    /// Model resolved and Ready
    pub const MODEL_RESOLVED: &str = "ModelResolved";
    /// More than one model matches the image
    pub const MULTIPLE_MODELS_FOUND: &str = "MultipleModelsFound";

    /// Referenced template does not exist
    pub const TEMPLATE_NOT_FOUND: &str = "TemplateNotFound";
    /// No template satisfies the constraints
    pub const TEMPLATE_SELECTION_FAILED: &str = "TemplateSelectionFailed";
    /// Template exists but is not Ready
    pub const TEMPLATE_NOT_READY: &str = "TemplateNotReady";
    /// Template resolved and Ready
    pub const RESOLVED: &str = "Resolved";
    /// Overrides cannot be satisfied
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Several templates tie for best
    pub const TEMPLATE_SELECTION_AMBIGUOUS: &str = "TemplateSelectionAmbiguous";
    /// Derived template is being created
    pub const CREATING_DERIVED_TEMPLATE: &str = "CreatingDerivedTemplate";

    /// Shared cache is being created
    pub const CACHE_CREATING: &str = "CacheCreating";
    /// Shared cache exists but is not Ready
    pub const CACHE_NOT_READY: &str = "CacheNotReady";
    /// Shared cache Ready
    pub const CACHE_READY: &str = "CacheReady";
    /// Failed model caches deleted for recreation
    pub const CACHE_RETRYING: &str = "CacheRetrying";
    /// Shared cache failed and the retry budget is spent
    pub const CACHE_FAILED: &str = "CacheFailed";
    /// Weights go to a temporary volume instead of a shared cache
    pub const CACHE_NOT_USED: &str = "CacheNotUsed";

    /// Temporary volume is being created
    pub const CREATING_PVC: &str = "CreatingPVC";
    /// Temporary volume waits for binding
    pub const PVC_NOT_BOUND: &str = "PVCNotBound";
    /// Temporary volume bound
    pub const STORAGE_READY: &str = "StorageReady";
    /// Storage size cannot be computed
    pub const STORAGE_SIZE_UNKNOWN: &str = "StorageSizeUnknown";
    /// A shared cache holds the weights
    pub const USING_SHARED_CACHE: &str = "UsingSharedCache";

    /// Runtime not yet created because dependencies are not Ready
    pub const WAITING_FOR_DEPENDENCIES: &str = "WaitingForDependencies";
    /// Runtime is being created or started
    pub const CREATING_RUNTIME: &str = "CreatingRuntime";
    /// Runtime is serving
    pub const RUNTIME_READY: &str = "RuntimeReady";
    /// Runtime reported a failure
    pub const RUNTIME_FAILED: &str = "RuntimeFailed";
    /// Registry rejected the pull credentials
    pub const IMAGE_PULL_AUTH_FAILURE: &str = "ImagePullAuthFailure";
    /// Image does not exist in the registry
    pub const IMAGE_NOT_FOUND: &str = "ImageNotFound";
    /// Image pull failed for another reason
    pub const IMAGE_PULL_FAILED: &str = "ImagePullFailed";

    /// Route is being configured
    pub const CONFIGURING_ROUTE: &str = "ConfiguringRoute";
    /// Route accepted
    pub const ROUTE_READY: &str = "RouteReady";
    /// Route rejected or misconfigured
    pub const ROUTE_FAILED: &str = "RouteFailed";
    /// Path template cannot be evaluated
    pub const PATH_TEMPLATE_INVALID: &str = "PathTemplateInvalid";
}

/// Domains in projection order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Component {
    /// Runtime config and spec validation
    Config,
    /// Model record
    Model,
    /// Serving template
    Template,
    /// Shared cache
    Caching,
    /// Temporary volume
    Storage,
    /// Inference runtime
    Runtime,
    /// HTTP route
    Routing,
}

impl Component {
    /// Condition type this component writes
    pub fn condition_type(&self) -> &'static str {
        match self {
            Self::Config => conditions::CONFIG_RESOLVED,
            Self::Model => conditions::MODEL_RESOLVED,
            Self::Template => conditions::TEMPLATE_RESOLVED,
            Self::Caching => conditions::CACHE_READY,
            Self::Storage => conditions::STORAGE_READY,
            Self::Runtime => conditions::RUNTIME_READY,
            Self::Routing => conditions::ROUTING_READY,
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Model => "model",
            Self::Template => "template",
            Self::Caching => "caching",
            Self::Storage => "storage",
            Self::Runtime => "runtime",
            Self::Routing => "routing",
        };
        f.write_str(s)
    }
}

/// Who has to act for a failure to clear
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyKind {
    /// User input or user-controlled objects
    Upstream,
    /// Objects this reconciler manages; expected to self-resolve
    Downstream,
    /// The spec as written can never reconcile
    Validation,
}

/// A classified domain failure carried in observations
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainError {
    /// Classification
    pub kind: DependencyKind,
    /// Condition reason
    pub reason: &'static str,
    /// Human-readable message
    pub message: String,
}

impl DomainError {
    /// User must fix a reference or an object they control
    pub fn upstream(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: DependencyKind::Upstream,
            reason,
            message: message.into(),
        }
    }

    /// Managed object is in a bad state
    pub fn downstream(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: DependencyKind::Downstream,
            reason,
            message: message.into(),
        }
    }

    /// Spec must change
    pub fn validation(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: DependencyKind::Validation,
            reason,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

/// Health of one component
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthState {
    /// Usable
    Ready,
    /// Converging
    Progressing,
    /// Not started
    Pending,
    /// Needs attention
    Failed,
    /// Cannot run here
    NotAvailable,
}

/// Health report for one component
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentHealth {
    /// Reporting component
    pub component: Component,
    /// Current state
    pub state: HealthState,
    /// Condition reason
    pub reason: &'static str,
    /// Human-readable message
    pub message: String,
    /// Who has to act if this is not Ready
    pub dependency: DependencyKind,
    /// Additional error detail
    pub errors: Vec<String>,
}

impl ComponentHealth {
    /// Ready health
    pub fn ready(component: Component, reason: &'static str, message: impl Into<String>) -> Self {
        Self::new(component, HealthState::Ready, reason, message, DependencyKind::Downstream)
    }

    /// Progressing health on a managed object
    pub fn progressing(
        component: Component,
        reason: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            component,
            HealthState::Progressing,
            reason,
            message,
            DependencyKind::Downstream,
        )
    }

    /// Pending health on a managed object
    pub fn pending(component: Component, reason: &'static str, message: impl Into<String>) -> Self {
        Self::new(component, HealthState::Pending, reason, message, DependencyKind::Downstream)
    }

    /// Health derived from a classified failure
    pub fn from_error(component: Component, err: &DomainError) -> Self {
        Self::new(component, HealthState::Failed, err.reason, &err.message, err.kind)
    }

    fn new(
        component: Component,
        state: HealthState,
        reason: &'static str,
        message: impl Into<String>,
        dependency: DependencyKind,
    ) -> Self {
        Self {
            component,
            state,
            reason,
            message: message.into(),
            dependency,
            errors: Vec::new(),
        }
    }

    /// Override the state (e.g. NotAvailable)
    pub fn with_state(mut self, state: HealthState) -> Self {
        self.state = state;
        self
    }

    /// Attach error detail
    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    /// Condition status this health maps to
    pub fn condition_status(&self) -> ConditionStatus {
        match self.state {
            HealthState::Ready => ConditionStatus::True,
            HealthState::Progressing | HealthState::Pending => ConditionStatus::Unknown,
            HealthState::Failed | HealthState::NotAvailable => ConditionStatus::False,
        }
    }
}

/// Status fields a domain may write
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusUpdate {
    /// New resolved runtime config
    pub resolved_runtime_config: Option<ResolvedReference>,
    /// New resolved model
    pub resolved_model: Option<ResolvedReference>,
    /// New resolved template
    pub resolved_template: Option<ResolvedReference>,
    /// New cache bookkeeping
    pub cache: Option<ServiceCacheStatus>,
    /// New routing outcome
    pub routing: Option<ServiceRoutingStatus>,
}

/// One domain's contribution to the next status
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    /// Health; `None` when the domain does not apply (its condition is removed)
    pub health: Option<(Component, Option<ComponentHealth>)>,
    /// Status fields to write
    pub update: StatusUpdate,
    /// Stop projecting later domains this pass
    pub blocking: bool,
}

impl Projection {
    /// Projection reporting `health`
    pub fn of(health: ComponentHealth, blocking: bool) -> Self {
        Self {
            health: Some((health.component, Some(health))),
            update: StatusUpdate::default(),
            blocking,
        }
    }

    /// Domain does not apply; its condition is cleared
    pub fn not_applicable(component: Component) -> Self {
        Self {
            health: Some((component, None)),
            update: StatusUpdate::default(),
            blocking: false,
        }
    }

    /// Attach status updates
    pub fn with_update(mut self, update: StatusUpdate) -> Self {
        self.update = update;
        self
    }
}

/// Conditions keyed by type, preserving transition times across passes
#[derive(Clone, Debug, Default)]
pub struct ConditionSet {
    conditions: Vec<Condition>,
}

impl ConditionSet {
    /// Start from the conditions of the previous pass
    pub fn from_prior(prior: &[Condition]) -> Self {
        Self {
            conditions: prior.to_vec(),
        }
    }

    /// Set a condition; the transition time moves only when the status flips
    pub fn set(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Mark a condition True
    pub fn mark_true(&mut self, type_: &str, reason: &str, message: &str) {
        self.set(Condition::new(type_, ConditionStatus::True, reason, message));
    }

    /// Mark a condition False
    pub fn mark_false(&mut self, type_: &str, reason: &str, message: &str) {
        self.set(Condition::new(type_, ConditionStatus::False, reason, message));
    }

    /// Remove a condition
    pub fn remove(&mut self, type_: &str) {
        self.conditions.retain(|c| c.type_ != type_);
    }

    /// Finished list
    pub fn into_vec(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Outcome of folding all projections
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedStatus {
    /// Status to write
    pub status: AIMServiceStatus,
    /// Health of every component that was projected, in order
    pub health: Vec<ComponentHealth>,
    /// Component that stopped projection, if any
    pub blocked_by: Option<Component>,
}

/// Fold projections in order on top of the prior status.
///
/// `projections` must already be in config → model → template → caching →
/// storage → runtime → routing order. `runtime_exists` decides between the
/// Starting and Pending phases.
pub fn reduce(
    prior: &AIMServiceStatus,
    projections: Vec<Projection>,
    runtime_exists: bool,
    observed_generation: Option<i64>,
) -> ProjectedStatus {
    let mut status = prior.clone();
    let mut conditions = ConditionSet::from_prior(&prior.conditions);
    let mut health = Vec::new();
    let mut blocked_by = None;

    for projection in projections {
        let update = projection.update;
        if update.resolved_runtime_config.is_some() {
            status.resolved_runtime_config = update.resolved_runtime_config;
        }
        if update.resolved_model.is_some() {
            status.resolved_model = update.resolved_model;
        }
        if update.resolved_template.is_some() {
            status.resolved_template = update.resolved_template;
        }
        if update.cache.is_some() {
            status.cache = update.cache;
        }
        if update.routing.is_some() {
            status.routing = update.routing;
        }

        if let Some((component, h)) = projection.health {
            match h {
                Some(h) => {
                    conditions.set(Condition::new(
                        component.condition_type(),
                        h.condition_status(),
                        h.reason,
                        &h.message,
                    ));
                    health.push(h);
                }
                None => conditions.remove(component.condition_type()),
            }
            if projection.blocking {
                blocked_by = Some(component);
                break;
            }
        } else if projection.blocking {
            break;
        }
    }

    status.conditions = conditions.into_vec();
    status.status = phase_for(&health, runtime_exists);
    status.observed_generation = observed_generation.or(prior.observed_generation);

    ProjectedStatus {
        status,
        health,
        blocked_by,
    }
}

/// Overall phase from projected health
pub fn phase_for(health: &[ComponentHealth], runtime_exists: bool) -> ServicePhase {
    let failed = |h: &&ComponentHealth| matches!(h.state, HealthState::Failed);
    if health
        .iter()
        .filter(failed)
        .any(|h| h.dependency == DependencyKind::Validation)
    {
        return ServicePhase::Failed;
    }
    if health.iter().filter(failed).any(|h| {
        h.dependency == DependencyKind::Upstream || h.component == Component::Runtime
    }) {
        return ServicePhase::Degraded;
    }
    let runtime_ready = health
        .iter()
        .any(|h| h.component == Component::Runtime && h.state == HealthState::Ready);
    if runtime_ready {
        ServicePhase::Running
    } else if runtime_exists {
        ServicePhase::Starting
    } else {
        ServicePhase::Pending
    }
}

/// True if `next` differs from `prior` in anything but condition timestamps
pub fn status_changed(prior: Option<&AIMServiceStatus>, next: &AIMServiceStatus) -> bool {
    let Some(prior) = prior else {
        return true;
    };
    let same_conditions = prior.conditions.len() == next.conditions.len()
        && prior
            .conditions
            .iter()
            .zip(&next.conditions)
            .all(|(a, b)| a.same_state(b));
    !(same_conditions
        && prior.status == next.status
        && prior.resolved_runtime_config == next.resolved_runtime_config
        && prior.resolved_model == next.resolved_model
        && prior.resolved_template == next.resolved_template
        && prior.cache == next.cache
        && prior.routing == next.routing
        && prior.observed_generation == next.observed_generation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(component: Component) -> Projection {
        Projection::of(ComponentHealth::ready(component, "Ok", "ok"), false)
    }

    #[test]
    fn reduce_stops_at_first_blocker_and_keeps_later_conditions() {
        let mut prior = AIMServiceStatus::default();
        let mut set = ConditionSet::default();
        set.mark_false(conditions::RUNTIME_READY, "Old", "from last pass");
        prior.conditions = set.into_vec();

        let projections = vec![
            ready(Component::Config),
            Projection::of(
                ComponentHealth::pending(Component::Model, reasons::CREATING_MODEL, "creating model x"),
                true,
            ),
            ready(Component::Template),
            ready(Component::Runtime),
        ];
        let out = reduce(&prior, projections, false, Some(3));

        assert_eq!(out.blocked_by, Some(Component::Model));
        assert_eq!(out.health.len(), 2);
        assert!(out.status.condition(conditions::TEMPLATE_RESOLVED).is_none());
        let runtime = out.status.condition(conditions::RUNTIME_READY).unwrap();
        assert_eq!(runtime.reason, "Old");
        assert_eq!(out.status.status, ServicePhase::Pending);
        assert_eq!(out.status.observed_generation, Some(3));
    }

    #[test]
    fn validation_failure_means_failed_phase() {
        let err = DomainError::validation(reasons::VALIDATION_FAILED, "bad overrides");
        let out = reduce(
            &AIMServiceStatus::default(),
            vec![Projection::of(ComponentHealth::from_error(Component::Template, &err), true)],
            false,
            None,
        );
        assert_eq!(out.status.status, ServicePhase::Failed);
    }

    #[test]
    fn upstream_failure_means_degraded_phase() {
        let err = DomainError::upstream(reasons::MODEL_NOT_FOUND, "no such model");
        let out = reduce(
            &AIMServiceStatus::default(),
            vec![Projection::of(ComponentHealth::from_error(Component::Model, &err), true)],
            true,
            None,
        );
        assert_eq!(out.status.status, ServicePhase::Degraded);
    }

    #[test]
    fn runtime_states_drive_running_and_starting() {
        let ready_runtime = vec![ready(Component::Runtime)];
        assert_eq!(
            reduce(&AIMServiceStatus::default(), ready_runtime, true, None).status.status,
            ServicePhase::Running
        );
        let starting = vec![Projection::of(
            ComponentHealth::progressing(Component::Runtime, reasons::CREATING_RUNTIME, "starting"),
            false,
        )];
        assert_eq!(
            reduce(&AIMServiceStatus::default(), starting, true, None).status.status,
            ServicePhase::Starting
        );
    }

    #[test]
    fn transition_time_moves_only_on_status_flip() {
        let mut set = ConditionSet::default();
        set.mark_false("X", "A", "first");
        let first = set.clone().into_vec()[0].last_transition_time;
        std::thread::sleep(std::time::Duration::from_millis(5));
        set.mark_false("X", "B", "second");
        let conds = set.clone().into_vec();
        assert_eq!(conds[0].last_transition_time, first);
        assert_eq!(conds[0].reason, "B");
        std::thread::sleep(std::time::Duration::from_millis(5));
        set.mark_true("X", "C", "third");
        assert!(set.into_vec()[0].last_transition_time > first);
    }

    #[test]
    fn not_applicable_clears_condition() {
        let mut prior = AIMServiceStatus::default();
        let mut set = ConditionSet::default();
        set.mark_true(conditions::ROUTING_READY, reasons::ROUTE_READY, "ok");
        prior.conditions = set.into_vec();
        let out = reduce(&prior, vec![Projection::not_applicable(Component::Routing)], false, None);
        assert!(out.status.condition(conditions::ROUTING_READY).is_none());
    }

    #[test]
    fn status_change_detection_ignores_timestamps() {
        let projections = || vec![ready(Component::Config)];
        let first = reduce(&AIMServiceStatus::default(), projections(), false, None).status;
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = reduce(&first, projections(), false, None).status;
        assert!(!status_changed(Some(&first), &second));
        assert!(status_changed(None, &second));
    }
}
