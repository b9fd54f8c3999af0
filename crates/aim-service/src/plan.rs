//! Objects to apply and delete this pass
//!
//! Planning is pure: it turns an [`Observation`] into JSON bodies with
//! their API resources. Owned objects carry a controller owner reference to
//! the service; shared objects (models, derived templates, template caches)
//! are created without one so they outlive it.

use aim_common::crd::{
    AIMModel, AIMModelCache, AIMService, AIMServiceTemplate, AIMTemplateCache,
};
use aim_common::kube_utils::HasApiResource;
use aim_common::network::gateway_api::HttpRoute;
use aim_common::runtime::inference::InferenceService;
use aim_common::{Error, Result};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::Value;

use crate::caching::{build_template_cache, build_temp_pvc, WeightStorage};
use crate::config::ReconcilePolicy;
use crate::pipeline::Observation;
use crate::routing::build_route;
use crate::runtime::{build_inference_service, mutable_fields_patch};

/// How a planned body is sent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    /// Server-side apply of the full object
    ServerSide,
    /// JSON merge patch of a few fields
    Merge,
}

/// One object to write
#[derive(Clone, Debug)]
pub struct PlannedObject {
    /// Kind, for logs
    pub kind: String,
    /// Object name
    pub name: String,
    /// Where to send it
    pub api_resource: ApiResource,
    /// Body
    pub body: Value,
    /// Patch flavour
    pub mode: ApplyMode,
}

/// One object to delete
#[derive(Clone, Debug)]
pub struct PlannedDelete {
    /// Kind, for logs
    pub kind: String,
    /// Object name
    pub name: String,
    /// Where it lives
    pub api_resource: ApiResource,
}

/// Everything one pass writes
#[derive(Clone, Debug, Default)]
pub struct PlanResult {
    /// Objects owned by the service
    pub owned: Vec<PlannedObject>,
    /// Shared objects, applied before owned ones
    pub unowned: Vec<PlannedObject>,
    /// Objects to delete
    pub delete: Vec<PlannedDelete>,
}

impl PlanResult {
    /// True when nothing is written
    pub fn is_empty(&self) -> bool {
        self.owned.is_empty() && self.unowned.is_empty() && self.delete.is_empty()
    }

    /// Planned object of `kind`, searching both lists
    pub fn find(&self, kind: &str) -> Option<&PlannedObject> {
        self.unowned
            .iter()
            .chain(&self.owned)
            .find(|o| o.kind == kind)
    }
}

fn planned(
    name: &str,
    resource: &impl Serialize,
    api_resource: ApiResource,
    mode: ApplyMode,
) -> Result<PlannedObject> {
    let kind = api_resource.kind.clone();
    let mut body = serde_json::to_value(resource)
        .map_err(|e| Error::serialization_for_kind(&kind, e.to_string()))?;
    if let Some(obj) = body.as_object_mut() {
        if mode == ApplyMode::ServerSide {
            obj.insert("apiVersion".into(), Value::String(api_resource.api_version.clone()));
            obj.insert("kind".into(), Value::String(api_resource.kind.clone()));
        }
        obj.remove("status");
    }
    Ok(PlannedObject {
        kind,
        name: name.to_string(),
        api_resource,
        body,
        mode,
    })
}

fn owned(service: &AIMService, mut object: PlannedObject) -> Result<PlannedObject> {
    if object.mode == ApplyMode::ServerSide {
        let owner = service
            .controller_owner_ref(&())
            .ok_or_else(|| Error::internal_with_context("plan", "service has no uid"))?;
        let owner = serde_json::to_value(vec![owner])
            .map_err(|e| Error::serialization(e.to_string()))?;
        if let Some(metadata) = object
            .body
            .get_mut("metadata")
            .and_then(Value::as_object_mut)
        {
            metadata.insert("ownerReferences".into(), owner);
        }
    }
    Ok(object)
}

/// Plan writes for one pass
pub fn plan(service: &AIMService, obs: &Observation, policy: &ReconcilePolicy) -> Result<PlanResult> {
    let mut result = PlanResult::default();
    if obs.config.error.is_some() {
        return Ok(result);
    }
    let config = &obs.config.effective;

    if let Some(model) = &obs.model.to_create {
        result.unowned.push(planned(
            &model.name_any(),
            model,
            ApiResource::erase::<AIMModel>(&()),
            ApplyMode::ServerSide,
        )?);
    }

    if let Some(template) = obs.template.to_create() {
        result.unowned.push(planned(
            &template.name_any(),
            template,
            ApiResource::erase::<AIMServiceTemplate>(&()),
            ApplyMode::ServerSide,
        )?);
    }

    let caching = &obs.caching;
    if let Some(template) = obs.template.ready() {
        if caching.should_create_cache {
            let cache = build_template_cache(service, template, config);
            result.unowned.push(planned(
                &cache.name_any(),
                &cache,
                ApiResource::erase::<AIMTemplateCache>(&()),
                ApplyMode::ServerSide,
            )?);
        }
    }

    for name in &caching.retry_deletes {
        let api_resource = ApiResource::erase::<AIMModelCache>(&());
        result.delete.push(PlannedDelete {
            kind: api_resource.kind.clone(),
            name: name.clone(),
            api_resource,
        });
    }

    if caching.storage == Some(WeightStorage::TemporaryVolume) {
        if let Some(volume) = caching.volume.as_ref().filter(|v| v.should_create()) {
            if let Ok(size_gi) = &volume.size_gi {
                let pvc = build_temp_pvc(service, volume, *size_gi, config);
                let object = planned(
                    &volume.name,
                    &pvc,
                    ApiResource::erase::<PersistentVolumeClaim>(&()),
                    ApplyMode::ServerSide,
                )?;
                result.owned.push(owned(service, object)?);
            }
        }
    }

    let runtime = &obs.runtime;
    let runtime_parts = obs.model.resolved.as_ref().zip(obs.template.ready());
    match runtime_parts {
        Some((model, template)) if runtime.ready_for_runtime => {
            let isvc = build_inference_service(
                service,
                &runtime.name,
                model,
                template,
                caching,
                config,
                policy,
            )?;
            let object = planned(
                &runtime.name,
                &isvc,
                InferenceService::api_resource(),
                ApplyMode::ServerSide,
            )?;
            result.owned.push(owned(service, object)?);
        }
        _ => {
            if let Some(existing) = &runtime.existing {
                result.owned.push(PlannedObject {
                    kind: InferenceService::KIND.to_string(),
                    name: runtime.name.clone(),
                    api_resource: InferenceService::api_resource(),
                    body: mutable_fields_patch(service, existing, obs.template.ready(), policy)?,
                    mode: ApplyMode::Merge,
                });
            }
        }
    }

    let runtime_planned = runtime.ready_for_runtime || runtime.exists();
    if let Some((path, gateway)) = obs.routing.plannable().filter(|_| runtime_planned) {
        let route = build_route(service, path, gateway, &runtime.name, config);
        let object = planned(
            &obs.routing.name,
            &route,
            HttpRoute::api_resource(),
            ApplyMode::ServerSide,
        )?;
        result.owned.push(owned(service, object)?);
    }

    Ok(result)
}
