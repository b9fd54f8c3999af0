//! Template auto-selection
//!
//! Candidates are filtered by override compatibility and by the GPUs the
//! cluster actually has, then narrowed to the healthiest status, to
//! namespace scope where possible, and finally ranked by profile.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use aim_common::crd::{AIMServiceTemplateSpec, AimStatus, ResourceScope, TemplateOverrides};
use aim_common::gpu::normalize_model;

use crate::health::{reasons, DomainError};
use crate::template::TemplateRecord;

const PROFILE_TYPE_PREFERENCE: &[&str] = &["optimized", "preview", "unoptimized"];
const GPU_PREFERENCE: &[&str] = &["MI325X", "MI300X", "MI250X", "MI210", "A100", "H100"];
const METRIC_PREFERENCE: &[&str] = &["latency", "throughput"];
const PRECISION_PREFERENCE: &[&str] = &["fp4", "int4", "fp8", "int8", "fp16", "bf16", "fp32"];

/// Result of auto-selection
#[derive(Debug, PartialEq)]
pub enum SelectionOutcome<'a> {
    /// Single best Ready template
    Selected(&'a TemplateRecord),
    /// Candidates exist but none is Ready yet
    NotReady {
        /// Number of candidates still converging
        candidates: usize,
    },
    /// Selection cannot succeed without user action
    Failed(DomainError),
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// True if the template satisfies every override field that is set
pub fn matches_overrides(spec: &AIMServiceTemplateSpec, overrides: &TemplateOverrides) -> bool {
    let field_matches = |wanted: &Option<String>, have: &Option<String>| match wanted {
        None => true,
        Some(w) => have.as_deref().is_some_and(|h| eq_ignore_case(w, h)),
    };
    if !field_matches(&overrides.metric, &spec.metric)
        || !field_matches(&overrides.precision, &spec.precision)
    {
        return false;
    }
    let Some(gpu) = &overrides.gpu_selector else {
        return true;
    };
    if let Some(model) = &gpu.model {
        match spec.gpu_model() {
            Some(have) if normalize_model(have) == normalize_model(model) => {}
            _ => return false,
        }
    }
    if let Some(count) = gpu.count {
        if spec.gpu_count() != count {
            return false;
        }
    }
    if let Some(resource) = &gpu.resource_name {
        let have = spec.gpu_selector.as_ref().and_then(|g| g.resource_name.as_deref());
        if have != Some(resource.as_str()) {
            return false;
        }
    }
    true
}

fn preference(list: &[&str], value: Option<&str>) -> usize {
    value
        .and_then(|v| list.iter().position(|p| eq_ignore_case(p, v)))
        .unwrap_or(list.len())
}

/// Sort key: lower is better
fn rank_key(template: &TemplateRecord) -> (usize, usize, usize, usize) {
    let profile = template.profile_metadata();
    let profile_type = profile.and_then(|m| m.type_.as_deref());
    let gpu = template
        .spec
        .gpu_model()
        .or_else(|| profile.and_then(|m| m.gpu.as_deref()))
        .map(normalize_model);
    let metric = template
        .spec
        .metric
        .as_deref()
        .or_else(|| profile.and_then(|m| m.metric.as_deref()));
    let precision = template
        .spec
        .precision
        .as_deref()
        .or_else(|| profile.and_then(|m| m.precision.as_deref()));
    (
        preference(PROFILE_TYPE_PREFERENCE, profile_type),
        preference(GPU_PREFERENCE, gpu.as_deref()),
        preference(METRIC_PREFERENCE, metric),
        preference(PRECISION_PREFERENCE, precision),
    )
}

fn runs_on_cluster(template: &TemplateRecord, cluster_gpus: &BTreeSet<String>) -> bool {
    match template.spec.gpu_model() {
        None => true,
        Some(model) => cluster_gpus.contains(&normalize_model(model)),
    }
}

/// Pick the best template among `candidates`.
///
/// `overrides` filters by compatibility; pass `None` to rank every
/// candidate. An empty `cluster_gpus` skips the GPU availability filter.
pub fn select_template<'a>(
    candidates: &'a [TemplateRecord],
    overrides: Option<&TemplateOverrides>,
    cluster_gpus: &BTreeSet<String>,
) -> SelectionOutcome<'a> {
    if candidates.is_empty() {
        return SelectionOutcome::Failed(DomainError::upstream(
            reasons::TEMPLATE_NOT_FOUND,
            "no templates found for the model",
        ));
    }

    let compatible: Vec<&TemplateRecord> = candidates
        .iter()
        .filter(|t| overrides.map_or(true, |o| matches_overrides(&t.spec, o)))
        .collect();
    if compatible.is_empty() {
        return SelectionOutcome::Failed(DomainError::validation(
            reasons::VALIDATION_FAILED,
            format!(
                "none of the {} templates for the model satisfies the overrides",
                candidates.len()
            ),
        ));
    }

    let available: Vec<&TemplateRecord> = if cluster_gpus.is_empty() {
        compatible
    } else {
        compatible
            .into_iter()
            .filter(|t| runs_on_cluster(t, cluster_gpus))
            .collect()
    };
    if available.is_empty() {
        let gpus: Vec<&str> = cluster_gpus.iter().map(String::as_str).collect();
        return SelectionOutcome::Failed(DomainError::upstream(
            reasons::TEMPLATE_SELECTION_FAILED,
            format!("no template targets a GPU present in the cluster ({})", gpus.join(", ")),
        ));
    }

    let best_rank = available
        .iter()
        .map(|t| t.status.status.selection_rank())
        .min()
        .unwrap_or(u8::MAX);
    match best_rank {
        0 => {}
        r if r == AimStatus::Failed.selection_rank() => {
            return SelectionOutcome::Failed(DomainError::upstream(
                reasons::TEMPLATE_SELECTION_FAILED,
                format!("all {} candidate templates failed", available.len()),
            ));
        }
        r if r == AimStatus::NotAvailable.selection_rank() => {
            return SelectionOutcome::Failed(DomainError::upstream(
                reasons::TEMPLATE_SELECTION_FAILED,
                format!("all {} candidate templates are not available", available.len()),
            ));
        }
        _ => {
            return SelectionOutcome::NotReady {
                candidates: available.len(),
            }
        }
    }

    let ready: Vec<&TemplateRecord> = available
        .into_iter()
        .filter(|t| t.status.status.is_ready())
        .collect();
    let preferred: Vec<&TemplateRecord> =
        if ready.iter().any(|t| t.scope == ResourceScope::Namespace) {
            ready
                .into_iter()
                .filter(|t| t.scope == ResourceScope::Namespace)
                .collect()
        } else {
            ready
        };

    let mut ranked: Vec<(&TemplateRecord, _)> =
        preferred.into_iter().map(|t| (t, rank_key(t))).collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.name.cmp(&b.0.name)));

    match ranked.as_slice() {
        [] => SelectionOutcome::NotReady { candidates: 0 },
        [(only, _)] => SelectionOutcome::Selected(*only),
        [(first, k1), (second, k2), ..] => {
            if k1.cmp(k2) == Ordering::Equal {
                SelectionOutcome::Failed(DomainError::upstream(
                    reasons::TEMPLATE_SELECTION_AMBIGUOUS,
                    format!(
                        "templates {} and {} rank equally; set spec.templateName",
                        first.name, second.name
                    ),
                ))
            } else {
                SelectionOutcome::Selected(*first)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aim_common::crd::{GpuSelector, ProfileMetadata, TemplateProfile, TemplateStatus};
    use rstest::rstest;

    fn template(
        name: &str,
        scope: ResourceScope,
        gpu: &str,
        metric: &str,
        precision: &str,
        status: AimStatus,
    ) -> TemplateRecord {
        TemplateRecord {
            name: name.into(),
            namespace: (scope == ResourceScope::Namespace).then(|| "default".to_string()),
            scope,
            uid: Some(format!("{name}-uid")),
            spec: AIMServiceTemplateSpec {
                model_name: "llama".into(),
                metric: Some(metric.into()),
                precision: Some(precision.into()),
                gpu_selector: Some(GpuSelector {
                    model: Some(gpu.into()),
                    count: Some(1),
                    resource_name: None,
                }),
                ..Default::default()
            },
            status: TemplateStatus {
                status,
                model_sources: vec![],
                profile: Some(TemplateProfile {
                    metadata: ProfileMetadata {
                        type_: Some("optimized".into()),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
            },
            labels: Default::default(),
        }
    }

    fn ns(name: &str, gpu: &str, metric: &str, precision: &str) -> TemplateRecord {
        template(name, ResourceScope::Namespace, gpu, metric, precision, AimStatus::Ready)
    }

    fn selected_name(outcome: SelectionOutcome<'_>) -> String {
        match outcome {
            SelectionOutcome::Selected(t) => t.name.clone(),
            other => panic!("expected a selection, got {other:?}"),
        }
    }

    #[test]
    fn prefers_better_gpu_then_metric_then_precision() {
        let candidates = vec![
            ns("a", "MI250X", "latency", "fp8"),
            ns("b", "MI300X", "throughput", "fp16"),
            ns("c", "MI300X", "latency", "fp16"),
            ns("d", "MI300X", "latency", "fp8"),
        ];
        assert_eq!(selected_name(select_template(&candidates, None, &BTreeSet::new())), "d");
    }

    #[test]
    fn optimized_profile_beats_preview() {
        let mut preview = ns("preview", "MI325X", "latency", "fp4");
        preview.status.profile.as_mut().unwrap().metadata.type_ = Some("preview".into());
        let optimized = ns("optimized", "MI210", "throughput", "fp32");
        let candidates = vec![preview, optimized];
        assert_eq!(
            selected_name(select_template(&candidates, None, &BTreeSet::new())),
            "optimized"
        );
    }

    #[test]
    fn namespace_scope_preferred_over_better_cluster_template() {
        let candidates = vec![
            template("cluster", ResourceScope::Cluster, "MI325X", "latency", "fp8", AimStatus::Ready),
            ns("local", "MI210", "throughput", "fp16"),
        ];
        assert_eq!(
            selected_name(select_template(&candidates, None, &BTreeSet::new())),
            "local"
        );
    }

    #[test]
    fn exact_tie_is_ambiguous() {
        let candidates = vec![
            ns("a", "MI300X", "latency", "fp8"),
            ns("b", "MI300X", "latency", "fp8"),
        ];
        match select_template(&candidates, None, &BTreeSet::new()) {
            SelectionOutcome::Failed(err) => {
                assert_eq!(err.reason, reasons::TEMPLATE_SELECTION_AMBIGUOUS)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn no_ready_candidates_is_not_ready() {
        let candidates = vec![template(
            "a",
            ResourceScope::Namespace,
            "MI300X",
            "latency",
            "fp8",
            AimStatus::Progressing,
        )];
        assert_eq!(
            select_template(&candidates, None, &BTreeSet::new()),
            SelectionOutcome::NotReady { candidates: 1 }
        );
    }

    #[test]
    fn ready_beats_progressing_regardless_of_rank() {
        let candidates = vec![
            template("fast", ResourceScope::Namespace, "MI325X", "latency", "fp4", AimStatus::Pending),
            ns("slow", "MI210", "throughput", "fp32"),
        ];
        assert_eq!(
            selected_name(select_template(&candidates, None, &BTreeSet::new())),
            "slow"
        );
    }

    #[test]
    fn filters_by_cluster_gpus() {
        let candidates = vec![
            ns("a", "MI325X", "latency", "fp8"),
            ns("b", "MI210", "latency", "fp8"),
        ];
        let gpus: BTreeSet<String> = ["MI210".to_string()].into();
        assert_eq!(selected_name(select_template(&candidates, None, &gpus)), "b");

        let gpus: BTreeSet<String> = ["A100".to_string()].into();
        assert!(matches!(
            select_template(&candidates, None, &gpus),
            SelectionOutcome::Failed(_)
        ));
    }

    #[rstest]
    #[case(Some("latency"), None, None, true)]
    #[case(Some("Throughput"), None, None, false)]
    #[case(None, Some("FP8"), None, true)]
    #[case(None, None, Some("mi300x"), true)]
    #[case(None, None, Some("MI210"), false)]
    fn override_compatibility_compares_only_set_fields(
        #[case] metric: Option<&str>,
        #[case] precision: Option<&str>,
        #[case] gpu: Option<&str>,
        #[case] expected: bool,
    ) {
        let t = ns("a", "MI300X", "latency", "fp8");
        let overrides = TemplateOverrides {
            metric: metric.map(str::to_string),
            precision: precision.map(str::to_string),
            gpu_selector: gpu.map(|g| GpuSelector {
                model: Some(g.to_string()),
                ..Default::default()
            }),
        };
        assert_eq!(matches_overrides(&t.spec, &overrides), expected);
    }

    #[test]
    fn incompatible_overrides_fail_validation() {
        let candidates = vec![ns("a", "MI300X", "latency", "fp8")];
        let overrides = TemplateOverrides {
            precision: Some("fp16".into()),
            ..Default::default()
        };
        match select_template(&candidates, Some(&overrides), &BTreeSet::new()) {
            SelectionOutcome::Failed(err) => assert_eq!(err.reason, reasons::VALIDATION_FAILED),
            other => panic!("unexpected {other:?}"),
        }
    }
}
