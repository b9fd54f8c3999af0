//! Per-pass snapshot of everything a service depends on
//!
//! All reads for one reconcile pass happen here, concurrently, before any
//! decision is made. Diagnostics that only enrich health (pods, nodes, the
//! route) fail soft and are recorded in [`FetchResult::errors`].

use std::collections::{BTreeMap, BTreeSet};

use aim_common::crd::AIMService;
use aim_common::gpu::models_in_cluster;
use aim_common::network::gateway_api::HttpRoute;
use aim_common::runtime::inference::InferenceService;
use aim_common::Error;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::caching::{temp_volume_name, CacheFetch};
use crate::config::ConfigFetch;
use crate::controller::AimServiceKubeClient;
use crate::model::ModelFetch;
use crate::runtime::runtime_name;
use crate::template::TemplateFetch;

/// Read-only external state for one pass
#[derive(Clone, Debug, Default)]
pub struct FetchResult {
    /// Runtime configs
    pub config: ConfigFetch,
    /// Model records in both scopes
    pub models: ModelFetch,
    /// Templates in both scopes
    pub templates: TemplateFetch,
    /// Caches and the temporary volume
    pub caches: CacheFetch,
    /// Existing runtime object
    pub inference_service: Option<InferenceService>,
    /// Pods of the runtime
    pub pods: Vec<Pod>,
    /// Existing route
    pub route: Option<HttpRoute>,
    /// GPU models advertised by nodes
    pub cluster_gpus: BTreeSet<String>,
    /// Soft failures keyed by what was being read
    pub errors: BTreeMap<&'static str, String>,
}

fn soft<T: Default>(
    errors: &mut BTreeMap<&'static str, String>,
    what: &'static str,
    result: Result<T, Error>,
) -> T {
    result.unwrap_or_else(|e| {
        warn!(error = %e, what, "fetch failed; continuing without it");
        errors.insert(what, e.to_string());
        T::default()
    })
}

/// Read every dependency of `service`
pub async fn fetch(service: &AIMService, kube: &dyn AimServiceKubeClient) -> Result<FetchResult, Error> {
    let namespace = service.namespace().unwrap_or_default();
    let config_name = service.spec.runtime_config_name().to_string();
    let isvc_name = runtime_name(service);
    let pvc_name = temp_volume_name(service);
    let route_name = service.name_any();

    let (
        ns_config,
        cluster_config,
        models,
        cluster_models,
        templates,
        cluster_templates,
        template_caches,
        model_caches,
        pvc,
        isvc,
        pods,
        nodes,
        route,
    ) = tokio::join!(
        kube.get_runtime_config(&config_name, &namespace),
        kube.get_cluster_runtime_config(&config_name),
        kube.list_models(&namespace),
        kube.list_cluster_models(),
        kube.list_templates(&namespace),
        kube.list_cluster_templates(),
        kube.list_template_caches(&namespace),
        kube.list_model_caches(&namespace),
        kube.get_pvc(&pvc_name, &namespace),
        kube.get_inference_service(&isvc_name, &namespace),
        kube.list_runtime_pods(&isvc_name, &namespace),
        kube.list_node_labels(),
        kube.get_route(&route_name, &namespace),
    );

    let mut errors = BTreeMap::new();
    let pods = soft(&mut errors, "pods", pods);
    let nodes = soft(&mut errors, "nodes", nodes);
    let route = soft(&mut errors, "route", route);

    let result = FetchResult {
        config: ConfigFetch {
            namespace: ns_config?,
            cluster: cluster_config?,
        },
        models: ModelFetch {
            namespace: models?,
            cluster: cluster_models?,
        },
        templates: TemplateFetch {
            namespace: templates?,
            cluster: cluster_templates?,
        },
        caches: CacheFetch {
            template_caches: template_caches?,
            model_caches: model_caches?,
            pvc: pvc?,
        },
        inference_service: isvc?,
        pods,
        route,
        cluster_gpus: models_in_cluster(nodes.iter()),
        errors,
    };
    debug!(
        models = result.models.namespace.len() + result.models.cluster.len(),
        templates = result.templates.namespace.len() + result.templates.cluster.len(),
        runtime = result.inference_service.is_some(),
        gpus = ?result.cluster_gpus,
        "fetched service dependencies"
    );
    Ok(result)
}
