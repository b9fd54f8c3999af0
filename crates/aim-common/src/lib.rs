//! Common types for AIM: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod gpu;
pub mod kube_utils;
pub mod naming;
pub mod network;
pub mod quantity;
pub mod runtime;
pub mod telemetry;

pub use error::Error;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group shared by every AIM custom resource
pub const AIM_GROUP: &str = "aim.eai.amd.com";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "aim-controller";

/// Standard app name label
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard component label
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard managed-by label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value written into the managed-by label
pub const LABEL_MANAGED_BY_AIM: &str = "aim-controller";

/// Label carrying the template name on emitted objects
pub const LABEL_TEMPLATE: &str = "aim.eai.amd.com/template";

/// Label carrying the model name on emitted objects
pub const LABEL_MODEL: &str = "aim.eai.amd.com/model";

/// Label carrying the owning service name on emitted objects
pub const LABEL_SERVICE: &str = "aim.eai.amd.com/service";

/// Label carrying the optimization metric of the serving template
pub const LABEL_METRIC: &str = "aim.eai.amd.com/metric";

/// Label carrying the numeric precision of the serving template
pub const LABEL_PRECISION: &str = "aim.eai.amd.com/precision";

/// Label recording how an object came to exist (e.g. "derived", "auto-generated")
pub const LABEL_ORIGIN: &str = "aim.eai.amd.com/origin";

/// Label marking a template synthesized from service overrides
pub const LABEL_DERIVED_TEMPLATE: &str = "aim.eai.amd.com/derived-template";

/// Label marking a model created from an inline custom description
pub const LABEL_CUSTOM_MODEL: &str = "aim.eai.amd.com/custom-model";

/// Label marking a cache as shared or dedicated
pub const LABEL_CACHE_TYPE: &str = "aim.eai.amd.com/cache.type";

/// Origin label value for templates synthesized from overrides
pub const ORIGIN_DERIVED: &str = "derived";

/// Origin label value for models created by image lookup
pub const ORIGIN_AUTO_GENERATED: &str = "auto-generated";

/// Label KServe stamps onto predictor pods
pub const KSERVE_ISVC_POD_LABEL: &str = "serving.kserve.io/inferenceservice";
