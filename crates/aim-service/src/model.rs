//! Model resolution
//!
//! A service names its model one of three ways: by record name, by serving
//! image, or inline as a base image plus weight sources. Image and inline
//! lookups that find nothing plan a new shared model record.

use aim_common::crd::{
    AIMClusterModel, AIMModel, AIMModelSpec, AIMService, AimStatus, CustomModelSpec,
    ResolvedReference, ResourceScope, ServiceModel,
};
use aim_common::naming::{derived_name, derived_name_with, parse_image, NameOptions};
use aim_common::{
    LABEL_CUSTOM_MODEL, LABEL_MANAGED_BY, LABEL_MANAGED_BY_AIM, LABEL_ORIGIN,
    ORIGIN_AUTO_GENERATED,
};
use kube::ResourceExt;
use serde_json::json;

use crate::health::{
    reasons, Component, ComponentHealth, DomainError, HealthState, Projection, StatusUpdate,
};

/// How the service selects its model
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSelector {
    /// Record name, namespace scope first
    ByName(String),
    /// Serving image to match against records
    ByImage(String),
    /// Inline description
    Custom(CustomModelSpec),
}

impl ModelSelector {
    /// Exactly one of `ref`, `image` and `custom` must be set
    pub fn from_spec(model: &ServiceModel) -> Result<Self, DomainError> {
        let ref_ = model.ref_.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let image = model.image.as_deref().map(str::trim).filter(|s| !s.is_empty());
        match (ref_, image, &model.custom) {
            (Some(name), None, None) => Ok(Self::ByName(name.to_string())),
            (None, Some(image), None) => Ok(Self::ByImage(image.to_string())),
            (None, None, Some(custom)) => Ok(Self::Custom(custom.clone())),
            (None, None, None) => Err(DomainError::validation(
                reasons::INVALID_SPEC,
                "spec.model must set one of ref, image or custom",
            )),
            _ => Err(DomainError::validation(
                reasons::INVALID_SPEC,
                "spec.model fields ref, image and custom are mutually exclusive",
            )),
        }
    }
}

/// Scope-independent view of a model record
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRecord {
    /// Record name
    pub name: String,
    /// Namespace for namespaced records
    pub namespace: Option<String>,
    /// Record scope
    pub scope: ResourceScope,
    /// Record UID
    pub uid: Option<String>,
    /// Record spec
    pub spec: AIMModelSpec,
    /// Lifecycle status
    pub status: AimStatus,
}

impl From<&AIMModel> for ModelRecord {
    fn from(model: &AIMModel) -> Self {
        Self {
            name: model.name_any(),
            namespace: model.namespace(),
            scope: ResourceScope::Namespace,
            uid: model.uid(),
            spec: model.spec.clone(),
            status: model.status.as_ref().map(|s| s.status).unwrap_or_default(),
        }
    }
}

impl From<&AIMClusterModel> for ModelRecord {
    fn from(model: &AIMClusterModel) -> Self {
        Self {
            name: model.name_any(),
            namespace: None,
            scope: ResourceScope::Cluster,
            uid: model.uid(),
            spec: model.spec.clone().into(),
            status: model.status.as_ref().map(|s| s.status).unwrap_or_default(),
        }
    }
}

impl ModelRecord {
    /// Status pointer to this record
    pub fn reference(&self) -> ResolvedReference {
        ResolvedReference {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            scope: self.scope,
            uid: self.uid.clone(),
        }
    }
}

/// Model records visible to a service
#[derive(Clone, Debug, Default)]
pub struct ModelFetch {
    /// Records in the service namespace
    pub namespace: Vec<AIMModel>,
    /// Cluster-scoped records
    pub cluster: Vec<AIMClusterModel>,
}

impl ModelFetch {
    /// All records, namespace scope first
    pub fn records(&self) -> Vec<ModelRecord> {
        self.namespace
            .iter()
            .map(ModelRecord::from)
            .chain(self.cluster.iter().map(ModelRecord::from))
            .collect()
    }
}

/// Model domain decisions
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelObservation {
    /// Record in use
    pub resolved: Option<ModelRecord>,
    /// Record to create
    pub to_create: Option<AIMModel>,
    /// Resolution failure
    pub error: Option<DomainError>,
}

impl ModelObservation {
    /// True when a new model record must be created
    pub fn needs_model_creation(&self) -> bool {
        self.to_create.is_some()
    }

    /// Resolved record, only once it is Ready
    pub fn ready(&self) -> Option<&ModelRecord> {
        self.resolved.as_ref().filter(|m| m.status.is_ready())
    }
}

/// Name of the record auto-created for an image
pub fn auto_model_name(image: &str) -> Result<String, DomainError> {
    let parts = parse_image(image).map_err(|e| {
        DomainError::validation(reasons::INVALID_IMAGE_REFERENCE, e.to_string())
    })?;
    Ok(derived_name_with(
        &[&parts.name, &parts.tag],
        &[json!(image)],
        NameOptions::with_hash_length(4),
    ))
}

/// Name of the record created for an inline model
pub fn custom_model_name(custom: &CustomModelSpec) -> Result<String, DomainError> {
    let parts = parse_image(&custom.base_image).map_err(|e| {
        DomainError::validation(reasons::INVALID_IMAGE_REFERENCE, e.to_string())
    })?;
    Ok(derived_name(
        &[&parts.name, "custom"],
        &[
            json!(custom.base_image),
            json!(custom.model_sources),
            json!(custom.gpu_selector),
        ],
    ))
}

/// Resolve the service's model against the fetched records
pub fn observe_model(service: &AIMService, records: &[ModelRecord]) -> ModelObservation {
    let selector = match ModelSelector::from_spec(&service.spec.model) {
        Ok(s) => s,
        Err(error) => {
            return ModelObservation {
                error: Some(error),
                ..Default::default()
            }
        }
    };
    let namespace = service.namespace().unwrap_or_default();

    match selector {
        ModelSelector::ByName(name) => resolve_by_name(&name, records),
        ModelSelector::ByImage(image) => resolve_by_image(&image, &namespace, records),
        ModelSelector::Custom(custom) => resolve_custom(&custom, &namespace, records),
    }
}

fn found(record: &ModelRecord) -> ModelObservation {
    ModelObservation {
        resolved: Some(record.clone()),
        ..Default::default()
    }
}

fn failed(error: DomainError) -> ModelObservation {
    ModelObservation {
        error: Some(error),
        ..Default::default()
    }
}

fn resolve_by_name(name: &str, records: &[ModelRecord]) -> ModelObservation {
    let lookup = |scope| records.iter().find(|r| r.scope == scope && r.name == name);
    match lookup(ResourceScope::Namespace).or_else(|| lookup(ResourceScope::Cluster)) {
        Some(record) => found(record),
        None => failed(DomainError::upstream(
            reasons::MODEL_NOT_FOUND,
            format!("model {name:?} not found in namespace or cluster scope"),
        )),
    }
}

fn resolve_by_image(image: &str, namespace: &str, records: &[ModelRecord]) -> ModelObservation {
    for scope in [ResourceScope::Namespace, ResourceScope::Cluster] {
        let matches: Vec<&ModelRecord> = records
            .iter()
            .filter(|r| r.scope == scope && r.spec.image.trim() == image)
            .collect();
        match matches.as_slice() {
            [] => continue,
            [one] => return found(one),
            many => {
                let names: Vec<&str> = many.iter().map(|r| r.name.as_str()).collect();
                return failed(DomainError::upstream(
                    reasons::MULTIPLE_MODELS_FOUND,
                    format!(
                        "{} {scope} scope models use image {image}: {}",
                        many.len(),
                        names.join(", ")
                    ),
                ));
            }
        }
    }

    let name = match auto_model_name(image) {
        Ok(name) => name,
        Err(err) => return failed(err),
    };
    let mut model = AIMModel::new(
        &name,
        AIMModelSpec {
            image: image.to_string(),
            ..Default::default()
        },
    );
    model.metadata.namespace = Some(namespace.to_string());
    let labels = model.labels_mut();
    labels.insert(LABEL_ORIGIN.to_string(), ORIGIN_AUTO_GENERATED.to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_AIM.to_string());
    ModelObservation {
        to_create: Some(model),
        ..Default::default()
    }
}

fn resolve_custom(
    custom: &CustomModelSpec,
    namespace: &str,
    records: &[ModelRecord],
) -> ModelObservation {
    if custom.model_sources.is_empty() {
        return failed(DomainError::validation(
            reasons::INVALID_SPEC,
            "spec.model.custom.modelSources must not be empty",
        ));
    }
    let name = match custom_model_name(custom) {
        Ok(name) => name,
        Err(err) => return failed(err),
    };
    if let Some(existing) = records
        .iter()
        .find(|r| r.scope == ResourceScope::Namespace && r.name == name)
    {
        return found(existing);
    }

    let mut model = AIMModel::new(
        &name,
        AIMModelSpec {
            image: custom.base_image.clone(),
            model_sources: custom.model_sources.clone(),
            ..Default::default()
        },
    );
    model.metadata.namespace = Some(namespace.to_string());
    let labels = model.labels_mut();
    labels.insert(LABEL_CUSTOM_MODEL.to_string(), "true".to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_AIM.to_string());
    ModelObservation {
        to_create: Some(model),
        ..Default::default()
    }
}

/// Model domain projection; anything short of a Ready record blocks
pub fn project_model(obs: &ModelObservation) -> Projection {
    if let Some(err) = &obs.error {
        return Projection::of(ComponentHealth::from_error(Component::Model, err), true);
    }
    if let Some(model) = &obs.to_create {
        let message = format!("creating model {} for image {}", model.name_any(), model.spec.image);
        return Projection::of(
            ComponentHealth::pending(Component::Model, reasons::CREATING_MODEL, message),
            true,
        );
    }
    let Some(record) = &obs.resolved else {
        return Projection::of(
            ComponentHealth::pending(Component::Model, reasons::MODEL_NOT_FOUND, "no model resolved"),
            true,
        );
    };

    match record.status {
        AimStatus::Ready => Projection::of(
            ComponentHealth::ready(
                Component::Model,
                reasons::MODEL_RESOLVED,
                format!("model {} is ready", record.name),
            ),
            false,
        )
        .with_update(StatusUpdate {
            resolved_model: Some(record.reference()),
            ..Default::default()
        }),
        AimStatus::Failed | AimStatus::Degraded => {
            let err = DomainError::upstream(
                reasons::MODEL_NOT_READY,
                format!("model {} is {}", record.name, record.status),
            );
            Projection::of(ComponentHealth::from_error(Component::Model, &err), true)
        }
        AimStatus::NotAvailable => {
            let err = DomainError::upstream(
                reasons::MODEL_NOT_READY,
                format!("model {} is not available on this cluster", record.name),
            );
            Projection::of(
                ComponentHealth::from_error(Component::Model, &err)
                    .with_state(HealthState::NotAvailable),
                true,
            )
        }
        AimStatus::Pending | AimStatus::Progressing => Projection::of(
            ComponentHealth::progressing(
                Component::Model,
                reasons::MODEL_NOT_READY,
                format!("waiting for model {} to become ready", record.name),
            ),
            true,
        ),
    }
}
