//! Template resolution
//!
//! Resolution order for one pass:
//!
//! 1. The template recorded in status, if it still exists, is Ready and
//!    still fits the spec (no search at all).
//! 2. The explicitly named template, namespace scope first.
//! 3. Auto-selection among the model's templates (see [`crate::selection`]).
//!
//! When the chosen base does not satisfy the service overrides, a derived
//! template is planned in the service namespace and picked up by name on
//! later passes.

use std::collections::{BTreeMap, BTreeSet};

use aim_common::crd::{
    AIMClusterServiceTemplate, AIMService, AIMServiceStatus, AIMServiceTemplate,
    AIMServiceTemplateSpec, AimStatus, GpuSelector, ProfileMetadata, ResolvedReference,
    ResourceScope, TemplateOverrides, TemplateStatus,
};
use aim_common::naming::{
    derived_name, hash_values, sanitize_dns_label, sanitize_label_value, MAX_NAME_LENGTH,
};
use aim_common::{
    LABEL_DERIVED_TEMPLATE, LABEL_MANAGED_BY, LABEL_MANAGED_BY_AIM, LABEL_MODEL, LABEL_ORIGIN,
    LABEL_TEMPLATE, ORIGIN_DERIVED,
};
use kube::ResourceExt;
use serde_json::json;
use tracing::debug;

use crate::health::{
    reasons, Component, ComponentHealth, DomainError, HealthState, Projection, StatusUpdate,
};
use crate::model::ModelRecord;
use crate::selection::{matches_overrides, select_template, SelectionOutcome};

/// Scope-independent view of a template
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateRecord {
    /// Template name
    pub name: String,
    /// Namespace for namespaced templates
    pub namespace: Option<String>,
    /// Template scope
    pub scope: ResourceScope,
    /// Template UID
    pub uid: Option<String>,
    /// Template spec
    pub spec: AIMServiceTemplateSpec,
    /// Template status
    pub status: TemplateStatus,
    /// Template labels
    pub labels: BTreeMap<String, String>,
}

impl From<&AIMServiceTemplate> for TemplateRecord {
    fn from(t: &AIMServiceTemplate) -> Self {
        Self {
            name: t.name_any(),
            namespace: t.namespace(),
            scope: ResourceScope::Namespace,
            uid: t.uid(),
            spec: t.spec.clone(),
            status: t.status.clone().unwrap_or_default(),
            labels: t.labels().clone(),
        }
    }
}

impl From<&AIMClusterServiceTemplate> for TemplateRecord {
    fn from(t: &AIMClusterServiceTemplate) -> Self {
        Self {
            name: t.name_any(),
            namespace: None,
            scope: ResourceScope::Cluster,
            uid: t.uid(),
            spec: t.spec.clone().into(),
            status: t.status.clone().unwrap_or_default(),
            labels: t.labels().clone(),
        }
    }
}

impl TemplateRecord {
    /// Status pointer to this template
    pub fn reference(&self) -> ResolvedReference {
        ResolvedReference {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            scope: self.scope,
            uid: self.uid.clone(),
        }
    }

    /// Discovered profile metadata, if any
    pub fn profile_metadata(&self) -> Option<&ProfileMetadata> {
        self.status.profile.as_ref().map(|p| &p.metadata)
    }

    /// True if `reference` points at this template
    pub fn is(&self, reference: &ResolvedReference) -> bool {
        self.name == reference.name
            && self.scope == reference.scope
            && (self.scope == ResourceScope::Cluster || self.namespace == reference.namespace)
            && match (&self.uid, &reference.uid) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

/// Templates visible to a service
#[derive(Clone, Debug, Default)]
pub struct TemplateFetch {
    /// Templates in the service namespace
    pub namespace: Vec<AIMServiceTemplate>,
    /// Cluster-scoped templates
    pub cluster: Vec<AIMClusterServiceTemplate>,
}

impl TemplateFetch {
    /// All templates, namespace scope first
    pub fn records(&self) -> Vec<TemplateRecord> {
        self.namespace
            .iter()
            .map(TemplateRecord::from)
            .chain(self.cluster.iter().map(TemplateRecord::from))
            .collect()
    }
}

/// Where template resolution landed this pass
#[derive(Clone, Debug, PartialEq)]
pub enum TemplateOutcome {
    /// Model not Ready yet; nothing to resolve against
    WaitingForModel,
    /// A template was chosen (it may still be converging)
    Resolved(TemplateRecord),
    /// A derived template must be created first
    Deriving(Box<AIMServiceTemplate>),
    /// Candidates exist but none is Ready
    NotReady(String),
    /// Resolution needs user action
    Failed(DomainError),
}

/// Template domain decisions
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateObservation {
    /// Outcome
    pub outcome: TemplateOutcome,
    /// Status reference was reused without searching
    pub reused: bool,
}

impl TemplateObservation {
    fn of(outcome: TemplateOutcome) -> Self {
        Self {
            outcome,
            reused: false,
        }
    }

    /// Chosen template, whatever its status
    pub fn resolved(&self) -> Option<&TemplateRecord> {
        match &self.outcome {
            TemplateOutcome::Resolved(t) => Some(t),
            _ => None,
        }
    }

    /// Chosen template, only once it is Ready
    pub fn ready(&self) -> Option<&TemplateRecord> {
        self.resolved().filter(|t| t.status.status.is_ready())
    }

    /// Derived template to create, if any
    pub fn to_create(&self) -> Option<&AIMServiceTemplate> {
        match &self.outcome {
            TemplateOutcome::Deriving(t) => Some(t),
            _ => None,
        }
    }
}

/// Name of the template derived from `base` with `overrides`.
///
/// `{base}-ovr-{gpu}-{N}gpu-{precision}-{metric}-{hash}`, with only the
/// fragments that are set. The base is trimmed so the name fits 63
/// characters. Without effective overrides the base name is returned.
pub fn derived_template_name(base: &str, overrides: Option<&TemplateOverrides>) -> String {
    let Some(overrides) = overrides.filter(|o| !o.is_empty()) else {
        return base.to_string();
    };

    let mut fragments = vec!["ovr".to_string()];
    if let Some(gpu) = &overrides.gpu_selector {
        if let Some(model) = &gpu.model {
            fragments.push(sanitize_dns_label(model));
        }
        if let Some(count) = gpu.count {
            fragments.push(format!("{count}gpu"));
        }
    }
    if let Some(precision) = &overrides.precision {
        fragments.push(sanitize_dns_label(precision));
    }
    if let Some(metric) = &overrides.metric {
        fragments.push(sanitize_dns_label(metric));
    }
    fragments.retain(|f| !f.is_empty());
    fragments.push(hash_values(&[json!(overrides)], 8));
    let suffix = fragments.join("-");

    let Some(budget) = MAX_NAME_LENGTH
        .checked_sub(suffix.len() + 1)
        .filter(|b| *b > 0)
    else {
        return derived_name(&[base, "ovr"], &[json!(overrides)]);
    };
    let mut base = sanitize_dns_label(base);
    base.truncate(budget);
    let base = base.trim_end_matches('-');
    if base.is_empty() {
        suffix
    } else {
        format!("{base}-{suffix}")
    }
}

/// Base spec with override fields applied
pub fn apply_overrides(
    base: &AIMServiceTemplateSpec,
    overrides: &TemplateOverrides,
) -> AIMServiceTemplateSpec {
    let mut spec = base.clone();
    if let Some(metric) = &overrides.metric {
        spec.metric = Some(metric.clone());
    }
    if let Some(precision) = &overrides.precision {
        spec.precision = Some(precision.clone());
    }
    if let Some(gpu) = &overrides.gpu_selector {
        let selector = spec.gpu_selector.get_or_insert_with(GpuSelector::default);
        if gpu.model.is_some() {
            selector.model = gpu.model.clone();
        }
        if gpu.count.is_some() {
            selector.count = gpu.count;
        }
        if gpu.resource_name.is_some() {
            selector.resource_name = gpu.resource_name.clone();
        }
    }
    spec
}

fn derived_template(
    base: &TemplateRecord,
    overrides: &TemplateOverrides,
    namespace: &str,
) -> AIMServiceTemplate {
    let name = derived_template_name(&base.name, Some(overrides));
    let mut template = AIMServiceTemplate::new(&name, apply_overrides(&base.spec, overrides));
    template.metadata.namespace = Some(namespace.to_string());
    let labels = template.labels_mut();
    labels.insert(LABEL_ORIGIN.to_string(), ORIGIN_DERIVED.to_string());
    labels.insert(LABEL_DERIVED_TEMPLATE.to_string(), "true".to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_AIM.to_string());
    if let Ok(model) = sanitize_label_value(&base.spec.model_name) {
        labels.insert(LABEL_MODEL.to_string(), model);
    }
    if let Ok(base_name) = sanitize_label_value(&base.name) {
        labels.insert(LABEL_TEMPLATE.to_string(), base_name);
    }
    template
}

/// Use `base` directly if it satisfies the overrides, else the existing
/// derived template, else plan one.
fn resolve_with_overrides(
    base: &TemplateRecord,
    overrides: Option<&TemplateOverrides>,
    templates: &[TemplateRecord],
    namespace: &str,
) -> TemplateOutcome {
    let Some(overrides) = overrides else {
        return TemplateOutcome::Resolved(base.clone());
    };
    if matches_overrides(&base.spec, overrides) {
        return TemplateOutcome::Resolved(base.clone());
    }
    let name = derived_template_name(&base.name, Some(overrides));
    match templates.iter().find(|t| {
        t.scope == ResourceScope::Namespace
            && t.name == name
            && t.namespace.as_deref() == Some(namespace)
    }) {
        Some(existing) => TemplateOutcome::Resolved(existing.clone()),
        None => TemplateOutcome::Deriving(Box::new(derived_template(base, overrides, namespace))),
    }
}

/// The status reference, if it is still Ready and still fits the spec
fn sticky<'a>(
    prior: Option<&ResolvedReference>,
    model: &ModelRecord,
    explicit: Option<&str>,
    overrides: Option<&TemplateOverrides>,
    templates: &'a [TemplateRecord],
) -> Option<&'a TemplateRecord> {
    let prior = prior?;
    let record = templates.iter().find(|t| t.is(prior))?;
    let fits = record.status.status.is_ready()
        && record.spec.model_name == model.name
        && overrides.map_or(true, |o| matches_overrides(&record.spec, o))
        && explicit.map_or(true, |name| {
            record.name == name || record.name == derived_template_name(name, overrides)
        });
    if !fits {
        debug!(template = %record.name, "recorded template no longer fits, re-resolving");
        return None;
    }
    Some(record)
}

/// Resolve the template for a service
pub fn observe_template(
    service: &AIMService,
    model: Option<&ModelRecord>,
    templates: &[TemplateRecord],
    cluster_gpus: &BTreeSet<String>,
) -> TemplateObservation {
    let Some(model) = model.filter(|m| m.status.is_ready()) else {
        return TemplateObservation::of(TemplateOutcome::WaitingForModel);
    };
    let namespace = service.namespace().unwrap_or_default();
    let overrides = service.spec.effective_overrides();
    let explicit = service
        .spec
        .template_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let prior = service
        .status
        .as_ref()
        .and_then(|s: &AIMServiceStatus| s.resolved_template.as_ref());

    if let Some(record) = sticky(prior, model, explicit, overrides, templates) {
        return TemplateObservation {
            outcome: TemplateOutcome::Resolved(record.clone()),
            reused: true,
        };
    }

    if let Some(name) = explicit {
        let in_scope = |scope: ResourceScope| {
            templates.iter().find(|t| {
                t.scope == scope
                    && t.name == name
                    && (scope == ResourceScope::Cluster || t.namespace.as_deref() == Some(namespace.as_str()))
            })
        };
        let Some(base) = in_scope(ResourceScope::Namespace).or_else(|| in_scope(ResourceScope::Cluster))
        else {
            return TemplateObservation::of(TemplateOutcome::Failed(DomainError::upstream(
                reasons::TEMPLATE_NOT_FOUND,
                format!("template {name:?} not found in namespace or cluster scope"),
            )));
        };
        return TemplateObservation::of(resolve_with_overrides(
            base, overrides, templates, &namespace,
        ));
    }

    let candidates: Vec<TemplateRecord> = templates
        .iter()
        .filter(|t| {
            t.spec.model_name == model.name
                && t.labels.get(LABEL_DERIVED_TEMPLATE).map(String::as_str) != Some("true")
        })
        .cloned()
        .collect();

    let outcome = match select_template(&candidates, overrides, cluster_gpus) {
        SelectionOutcome::Selected(t) => TemplateOutcome::Resolved(t.clone()),
        SelectionOutcome::NotReady { candidates } => TemplateOutcome::NotReady(format!(
            "{candidates} candidate templates for model {} are not ready yet",
            model.name
        )),
        SelectionOutcome::Failed(err) if err.reason == reasons::VALIDATION_FAILED => {
            // Nothing satisfies the overrides as-is; derive from the best base
            derive_from_best(service, model, &candidates, templates, cluster_gpus, &namespace)
                .unwrap_or(TemplateOutcome::Failed(err))
        }
        SelectionOutcome::Failed(err) => TemplateOutcome::Failed(err),
    };
    TemplateObservation::of(outcome)
}

fn derive_from_best(
    service: &AIMService,
    model: &ModelRecord,
    candidates: &[TemplateRecord],
    templates: &[TemplateRecord],
    cluster_gpus: &BTreeSet<String>,
    namespace: &str,
) -> Option<TemplateOutcome> {
    let overrides = service.spec.effective_overrides()?;
    if let Some(gpu) = overrides.gpu_selector.as_ref().and_then(|g| g.model.as_deref()) {
        let wanted = aim_common::gpu::normalize_model(gpu);
        if !cluster_gpus.is_empty() && !cluster_gpus.contains(&wanted) {
            return Some(TemplateOutcome::Failed(DomainError::validation(
                reasons::VALIDATION_FAILED,
                format!("overrides request GPU {wanted} which no node in the cluster provides"),
            )));
        }
    }
    match select_template(candidates, None, cluster_gpus) {
        SelectionOutcome::Selected(base) => {
            Some(resolve_with_overrides(base, Some(overrides), templates, namespace))
        }
        SelectionOutcome::NotReady { candidates } => Some(TemplateOutcome::NotReady(format!(
            "{candidates} candidate templates for model {} are not ready yet",
            model.name
        ))),
        SelectionOutcome::Failed(_) => None,
    }
}

/// Template domain projection
pub fn project_template(obs: &TemplateObservation) -> Projection {
    let component = Component::Template;
    match &obs.outcome {
        TemplateOutcome::WaitingForModel => Projection::of(
            ComponentHealth::pending(component, reasons::TEMPLATE_NOT_READY, "waiting for model"),
            true,
        ),
        TemplateOutcome::Failed(err) => {
            Projection::of(ComponentHealth::from_error(component, err), true)
        }
        TemplateOutcome::NotReady(message) => Projection::of(
            ComponentHealth::progressing(component, reasons::TEMPLATE_NOT_READY, message),
            true,
        ),
        TemplateOutcome::Deriving(t) => Projection::of(
            ComponentHealth::pending(
                component,
                reasons::CREATING_DERIVED_TEMPLATE,
                format!("creating derived template {}", t.name_any()),
            ),
            true,
        ),
        TemplateOutcome::Resolved(t) => match t.status.status {
            AimStatus::Ready => Projection::of(
                ComponentHealth::ready(
                    component,
                    reasons::RESOLVED,
                    format!("using template {} ({})", t.name, t.scope),
                ),
                false,
            )
            .with_update(StatusUpdate {
                resolved_template: Some(t.reference()),
                ..Default::default()
            }),
            AimStatus::Failed | AimStatus::Degraded => {
                let err = DomainError::upstream(
                    reasons::TEMPLATE_NOT_READY,
                    format!("template {} is {}", t.name, t.status.status),
                );
                Projection::of(ComponentHealth::from_error(component, &err), true)
            }
            AimStatus::NotAvailable => {
                let err = DomainError::upstream(
                    reasons::TEMPLATE_NOT_READY,
                    format!("template {} is not available on this cluster", t.name),
                );
                Projection::of(
                    ComponentHealth::from_error(component, &err)
                        .with_state(HealthState::NotAvailable),
                    true,
                )
            }
            AimStatus::Pending | AimStatus::Progressing => Projection::of(
                ComponentHealth::progressing(
                    component,
                    reasons::TEMPLATE_NOT_READY,
                    format!("waiting for template {} to become ready", t.name),
                ),
                true,
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::DependencyKind;
    use aim_common::crd::{AIMModelSpec, AIMServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn model() -> ModelRecord {
        ModelRecord {
            name: "llama".into(),
            namespace: Some("default".into()),
            scope: ResourceScope::Namespace,
            uid: Some("m-uid".into()),
            spec: AIMModelSpec {
                image: "img:v1".into(),
                ..Default::default()
            },
            status: AimStatus::Ready,
        }
    }

    fn template(name: &str, scope: ResourceScope, precision: &str, status: AimStatus) -> TemplateRecord {
        TemplateRecord {
            name: name.into(),
            namespace: (scope == ResourceScope::Namespace).then(|| "default".to_string()),
            scope,
            uid: Some(format!("{name}-uid")),
            spec: AIMServiceTemplateSpec {
                model_name: "llama".into(),
                metric: Some("latency".into()),
                precision: Some(precision.into()),
                gpu_selector: Some(GpuSelector {
                    model: Some("MI300X".into()),
                    count: Some(1),
                    resource_name: None,
                }),
                ..Default::default()
            },
            status: TemplateStatus {
                status,
                ..Default::default()
            },
            labels: BTreeMap::new(),
        }
    }

    fn service(spec: AIMServiceSpec, status: Option<AIMServiceStatus>) -> AIMService {
        let mut svc = AIMService::new("chat", spec);
        svc.metadata = ObjectMeta {
            name: Some("chat".into()),
            namespace: Some("default".into()),
            uid: Some("uid-1".into()),
            ..Default::default()
        };
        svc.status = status;
        svc
    }

    fn fp16() -> TemplateOverrides {
        TemplateOverrides {
            precision: Some("fp16".into()),
            ..Default::default()
        }
    }

    #[test]
    fn derived_name_is_stable_and_sensitive_to_overrides() {
        let a = derived_template_name("llama-mi300x", Some(&fp16()));
        let b = derived_template_name("llama-mi300x", Some(&fp16()));
        assert_eq!(a, b);
        assert!(a.starts_with("llama-mi300x-ovr-fp16-"), "{a}");

        let mut other = fp16();
        other.metric = Some("throughput".into());
        assert_ne!(a, derived_template_name("llama-mi300x", Some(&other)));
    }

    #[test]
    fn derived_name_orders_fragments_and_fits_limit() {
        let overrides = TemplateOverrides {
            metric: Some("latency".into()),
            precision: Some("fp8".into()),
            gpu_selector: Some(GpuSelector {
                model: Some("MI300X".into()),
                count: Some(2),
                resource_name: None,
            }),
        };
        let base = "a".repeat(80);
        let name = derived_template_name(&base, Some(&overrides));
        assert!(name.len() <= MAX_NAME_LENGTH);
        assert!(name.contains("-ovr-mi300x-2gpu-fp8-latency-"), "{name}");
        assert!(!name.contains("--"));
    }

    #[test]
    fn empty_overrides_keep_base_name() {
        assert_eq!(derived_template_name("base", None), "base");
        assert_eq!(
            derived_template_name("base", Some(&TemplateOverrides::default())),
            "base"
        );
    }

    #[test]
    fn explicit_template_prefers_namespace_scope() {
        let templates = vec![
            template("t", ResourceScope::Cluster, "fp8", AimStatus::Ready),
            template("t", ResourceScope::Namespace, "fp8", AimStatus::Ready),
        ];
        let svc = service(
            AIMServiceSpec {
                template_name: Some("t".into()),
                ..Default::default()
            },
            None,
        );
        let obs = observe_template(&svc, Some(&model()), &templates, &BTreeSet::new());
        assert_eq!(obs.resolved().unwrap().scope, ResourceScope::Namespace);
    }

    #[test]
    fn explicit_template_missing_is_upstream_error() {
        let svc = service(
            AIMServiceSpec {
                template_name: Some("nope".into()),
                ..Default::default()
            },
            None,
        );
        let obs = observe_template(&svc, Some(&model()), &[], &BTreeSet::new());
        match obs.outcome {
            TemplateOutcome::Failed(err) => {
                assert_eq!(err.kind, DependencyKind::Upstream);
                assert_eq!(err.reason, reasons::TEMPLATE_NOT_FOUND);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Story: an explicit template with unmet overrides plans a derived copy
    #[test]
    fn story_explicit_template_with_overrides_plans_derived_template() {
        let templates = vec![template("base", ResourceScope::Cluster, "fp8", AimStatus::Ready)];
        let svc = service(
            AIMServiceSpec {
                template_name: Some("base".into()),
                overrides: Some(fp16()),
                ..Default::default()
            },
            None,
        );
        let obs = observe_template(&svc, Some(&model()), &templates, &BTreeSet::new());
        let derived = obs.to_create().expect("derived template planned");
        assert_eq!(derived.spec.precision.as_deref(), Some("fp16"));
        assert_eq!(derived.spec.metric.as_deref(), Some("latency"));
        assert_eq!(derived.namespace().as_deref(), Some("default"));
        assert!(derived.metadata.owner_references.is_none());
        assert_eq!(
            derived.labels().get(LABEL_ORIGIN).map(String::as_str),
            Some(ORIGIN_DERIVED)
        );
        assert!(project_template(&obs).blocking);

        // Next pass finds the derived template by name
        let mut created = template(&derived.name_any(), ResourceScope::Namespace, "fp16", AimStatus::Ready);
        created
            .labels
            .insert(LABEL_DERIVED_TEMPLATE.to_string(), "true".to_string());
        let templates = vec![templates[0].clone(), created];
        let obs = observe_template(&svc, Some(&model()), &templates, &BTreeSet::new());
        assert_eq!(obs.ready().unwrap().name, derived.name_any());
    }

    /// Story: a Ready template recorded in status is reused without a search
    #[test]
    fn story_resolved_template_is_sticky() {
        let recorded = template("recorded", ResourceScope::Namespace, "fp16", AimStatus::Ready);
        let better = template("better", ResourceScope::Namespace, "fp4", AimStatus::Ready);
        let status = AIMServiceStatus {
            resolved_template: Some(recorded.reference()),
            ..Default::default()
        };
        let svc = service(AIMServiceSpec::default(), Some(status));
        let templates = vec![better.clone(), recorded.clone()];

        let obs = observe_template(&svc, Some(&model()), &templates, &BTreeSet::new());
        assert!(obs.reused);
        assert_eq!(obs.resolved().unwrap().name, "recorded");

        // Once it regresses, full resolution picks the best Ready candidate
        let mut regressed = recorded;
        regressed.status.status = AimStatus::Progressing;
        let obs = observe_template(&svc, Some(&model()), &[better, regressed], &BTreeSet::new());
        assert!(!obs.reused);
        assert_eq!(obs.resolved().unwrap().name, "better");
    }

    #[test]
    fn no_ready_candidates_reports_template_not_ready() {
        let templates = vec![template("t", ResourceScope::Namespace, "fp8", AimStatus::Pending)];
        let svc = service(AIMServiceSpec::default(), None);
        let obs = observe_template(&svc, Some(&model()), &templates, &BTreeSet::new());
        let projection = project_template(&obs);
        assert!(projection.blocking);
        let health = projection.health.unwrap().1.unwrap();
        assert_eq!(health.reason, reasons::TEMPLATE_NOT_READY);
        assert_eq!(health.state, HealthState::Progressing);
    }

    #[test]
    fn auto_select_derives_when_no_template_fits_overrides() {
        let templates = vec![template("base", ResourceScope::Namespace, "fp8", AimStatus::Ready)];
        let svc = service(
            AIMServiceSpec {
                overrides: Some(fp16()),
                ..Default::default()
            },
            None,
        );
        let obs = observe_template(&svc, Some(&model()), &templates, &BTreeSet::new());
        assert!(obs.to_create().is_some());
    }

    #[test]
    fn unsatisfiable_gpu_override_is_validation_failure() {
        let templates = vec![template("base", ResourceScope::Namespace, "fp8", AimStatus::Ready)];
        let svc = service(
            AIMServiceSpec {
                overrides: Some(TemplateOverrides {
                    gpu_selector: Some(GpuSelector {
                        model: Some("MI210".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            None,
        );
        let gpus: BTreeSet<String> = ["MI300X".to_string()].into();
        let obs = observe_template(&svc, Some(&model()), &templates, &gpus);
        match obs.outcome {
            TemplateOutcome::Failed(err) => assert_eq!(err.kind, DependencyKind::Validation),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn waits_while_model_not_ready() {
        let mut m = model();
        m.status = AimStatus::Progressing;
        let svc = service(AIMServiceSpec::default(), None);
        let obs = observe_template(&svc, Some(&m), &[], &BTreeSet::new());
        assert_eq!(obs.outcome, TemplateOutcome::WaitingForModel);
    }
}
