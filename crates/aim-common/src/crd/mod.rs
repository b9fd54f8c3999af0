//! Custom Resource Definitions for AIM
//!
//! This module contains all CRD definitions in the `aim.eai.amd.com` group.

mod cache;
mod model;
mod runtime_config;
mod service;
mod template;
mod types;

pub use cache::{
    AIMModelCache, AIMModelCacheSpec, AIMTemplateCache, AIMTemplateCacheSpec, ModelCacheStatus,
    TemplateCacheStatus,
};
pub use model::{AIMClusterModel, AIMClusterModelSpec, AIMModel, AIMModelSpec, ModelStatus};
pub use runtime_config::{
    AIMClusterRuntimeConfig, AIMClusterRuntimeConfigSpec, AIMRuntimeConfig, AIMRuntimeConfigSpec,
    GatewayRef, RoutingConfig, RuntimeConfigStatus, StorageConfig,
};
pub use service::{
    AIMService, AIMServiceSpec, AIMServiceStatus, CustomModelSpec, ServiceCacheStatus,
    ServiceCachingConfig, ServiceModel, ServiceRoutingStatus, DEFAULT_RUNTIME_CONFIG_NAME,
};
pub use template::{
    AIMClusterServiceTemplate, AIMClusterServiceTemplateSpec, AIMServiceTemplate,
    AIMServiceTemplateSpec, ProfileMetadata, TemplateCachingConfig, TemplateProfile,
    TemplateStatus,
};
pub use types::{
    AimStatus, Condition, ConditionStatus, EnvVar, GpuSelector, LocalObjectReference,
    ModelSource, ResolvedReference, ResourceRequirements, ResourceScope, ServicePhase,
    TemplateOverrides,
};
