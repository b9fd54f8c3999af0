//! HTTP routing
//!
//! When routing is enabled the service gets one Gateway API HTTPRoute whose
//! path prefix comes from a small template language:
//!
//! ```text
//! /{.metadata.namespace}/{.metadata.labels['team']}
//! ```
//!
//! Placeholders may only name a fixed set of fields; anything else is an
//! error rather than an empty string.

use aim_common::crd::{AIMService, GatewayRef, ServiceRoutingStatus};
use aim_common::kube_utils::ObjectMeta;
use aim_common::naming::sanitize_dns_label;
use aim_common::network::gateway_api::{
    BackendRef, HttpPathMatch, HttpRoute, HttpRouteFilter, HttpRouteMatch, HttpRouteRule,
    HttpRouteSpec, HttpRouteTimeouts, ParentRef, GATEWAY_API_GROUP,
};
use aim_common::{LABEL_COMPONENT, LABEL_SERVICE};
use kube::ResourceExt;
use thiserror::Error;

use crate::config::{EffectiveConfig, ReconcilePolicy};
use crate::health::{reasons, Component, ComponentHealth, DomainError, Projection, StatusUpdate};

/// Default path when no template is configured
pub const DEFAULT_PATH_TEMPLATE: &str = "/{.metadata.namespace}/{.metadata.uid}";

/// Port of the predictor service KServe creates
pub const PREDICTOR_PORT: u16 = 80;

/// Path template evaluation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathTemplateError {
    /// `{` without a closing `}`
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),
    /// `{}` or `{ }`
    #[error("empty placeholder at byte {0}")]
    EmptyExpression(usize),
    /// `}` outside a placeholder or `{` inside one
    #[error("unexpected '{brace}' at byte {at}")]
    UnexpectedBrace {
        /// Offending character
        brace: char,
        /// Byte offset
        at: usize,
    },
    /// Placeholder names a field outside the supported set
    #[error("unsupported expression {0:?}")]
    Unsupported(String),
    /// Label key absent on the service
    #[error("label {0:?} not found")]
    LabelNotFound(String),
    /// Annotation key absent on the service
    #[error("annotation {0:?} not found")]
    AnnotationNotFound(String),
    /// Field is supported but has no value yet
    #[error("field {0} is not set")]
    FieldNotSet(&'static str),
    /// Nothing left after rendering
    #[error("route template produced an empty path")]
    EmptyPath,
    /// Rendered path is over the limit
    #[error("route path {path:?} exceeds {max} characters")]
    TooLong {
        /// Rendered path
        path: String,
        /// Limit
        max: usize,
    },
}

/// A field a placeholder may read
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldPath {
    /// `.metadata.name`
    Name,
    /// `.metadata.namespace`
    Namespace,
    /// `.metadata.uid`
    Uid,
    /// `.metadata.labels['key']`
    Label(String),
    /// `.metadata.annotations['key']`
    Annotation(String),
    /// `.spec.templateName`
    TemplateName,
    /// `.status.resolvedModel.name`
    ResolvedModel,
    /// `.status.resolvedTemplate.name`
    ResolvedTemplate,
}

fn bracket_key<'a>(expr: &'a str, prefix: &str) -> Option<&'a str> {
    let inner = expr.strip_prefix(prefix)?.strip_suffix(']')?;
    ['\'', '"'].iter().find_map(|q| {
        inner
            .strip_prefix(*q)?
            .strip_suffix(*q)
            .filter(|k| !k.is_empty() && !k.contains(['\'', '"']))
    })
}

impl std::str::FromStr for FieldPath {
    type Err = PathTemplateError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        let field = match expr {
            ".metadata.name" => Self::Name,
            ".metadata.namespace" => Self::Namespace,
            ".metadata.uid" => Self::Uid,
            ".spec.templateName" => Self::TemplateName,
            ".status.resolvedModel.name" => Self::ResolvedModel,
            ".status.resolvedTemplate.name" => Self::ResolvedTemplate,
            _ => {
                if let Some(key) = bracket_key(expr, ".metadata.labels[") {
                    Self::Label(key.to_string())
                } else if let Some(key) = bracket_key(expr, ".metadata.annotations[") {
                    Self::Annotation(key.to_string())
                } else {
                    return Err(PathTemplateError::Unsupported(expr.to_string()));
                }
            }
        };
        Ok(field)
    }
}

impl FieldPath {
    /// Read the field from `service`
    pub fn evaluate(&self, service: &AIMService) -> Result<String, PathTemplateError> {
        let set = |value: Option<String>, field: &'static str| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or(PathTemplateError::FieldNotSet(field))
        };
        match self {
            Self::Name => Ok(service.name_any()),
            Self::Namespace => set(service.namespace(), ".metadata.namespace"),
            Self::Uid => set(service.uid(), ".metadata.uid"),
            Self::Label(key) => service
                .labels()
                .get(key)
                .cloned()
                .ok_or_else(|| PathTemplateError::LabelNotFound(key.clone())),
            Self::Annotation(key) => service
                .annotations()
                .get(key)
                .cloned()
                .ok_or_else(|| PathTemplateError::AnnotationNotFound(key.clone())),
            Self::TemplateName => set(service.spec.template_name.clone(), ".spec.templateName"),
            Self::ResolvedModel => set(
                service
                    .status
                    .as_ref()
                    .and_then(|s| s.resolved_model.as_ref())
                    .map(|r| r.name.clone()),
                ".status.resolvedModel.name",
            ),
            Self::ResolvedTemplate => set(
                service
                    .status
                    .as_ref()
                    .and_then(|s| s.resolved_template.as_ref())
                    .map(|r| r.name.clone()),
                ".status.resolvedTemplate.name",
            ),
        }
    }
}

/// Substitute every placeholder in `template`
pub fn render_template(template: &str, service: &AIMService) -> Result<String, PathTemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;
    while let Some(pos) = rest.find(['{', '}']) {
        if rest[pos..].starts_with('}') {
            return Err(PathTemplateError::UnexpectedBrace {
                brace: '}',
                at: offset + pos,
            });
        }
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let end = after
            .find('}')
            .ok_or(PathTemplateError::Unterminated(offset + pos))?;
        let expr = &after[..end];
        if let Some(inner) = expr.find('{') {
            return Err(PathTemplateError::UnexpectedBrace {
                brace: '{',
                at: offset + pos + 1 + inner,
            });
        }
        if expr.trim().is_empty() {
            return Err(PathTemplateError::EmptyExpression(offset + pos));
        }
        let field: FieldPath = expr.parse()?;
        let value = field.evaluate(service)?;
        let value = value.trim();
        match field {
            FieldPath::Annotation(_) => out.push_str(value),
            _ => out.push_str(&sanitize_dns_label(value)),
        }
        let consumed = pos + 1 + end + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Normalize a rendered path: leading slash, no empty or trailing
/// segments, each segment in the DNS label alphabet
pub fn normalize_path(raw: &str, max_length: usize) -> Result<String, PathTemplateError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PathTemplateError::EmptyPath);
    }
    let prefixed = if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    };
    let trimmed = prefixed.trim_end_matches('/');
    if trimmed.len() > max_length {
        return Err(PathTemplateError::TooLong {
            path: trimmed.to_string(),
            max: max_length,
        });
    }
    let segments: Vec<String> = trimmed
        .split('/')
        .map(|s| sanitize_dns_label(s.trim()))
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Route path for a service
pub fn route_path(
    service: &AIMService,
    template: Option<&str>,
    max_length: usize,
) -> Result<String, PathTemplateError> {
    let template = template
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_PATH_TEMPLATE);
    normalize_path(&render_template(template, service)?, max_length)
}

// =============================================================================
// Observation
// =============================================================================

/// Routing domain decisions
#[derive(Clone, Debug, PartialEq)]
pub struct RoutingObservation {
    /// Effective routing-enabled flag
    pub enabled: bool,
    /// Route name
    pub name: String,
    /// Rendered path or the reason it could not be rendered
    pub path: Result<String, DomainError>,
    /// Gateway to attach to
    pub gateway: Option<GatewayRef>,
    /// Existing route
    pub existing: Option<HttpRoute>,
}

impl RoutingObservation {
    /// Path and gateway, when a route can be planned
    pub fn plannable(&self) -> Option<(&str, &GatewayRef)> {
        if !self.enabled {
            return None;
        }
        Some((self.path.as_deref().ok()?, self.gateway.as_ref()?))
    }
}

/// Decide whether and where to route
pub fn observe_routing(
    service: &AIMService,
    config: &EffectiveConfig,
    existing: Option<&HttpRoute>,
    policy: &ReconcilePolicy,
) -> RoutingObservation {
    let routing = config.routing();
    let path = route_path(
        service,
        routing.path_template.as_deref(),
        policy.max_route_path_length,
    )
    .map_err(|e| {
        DomainError::upstream(
            reasons::PATH_TEMPLATE_INVALID,
            format!("cannot build route path: {e}"),
        )
    });
    RoutingObservation {
        enabled: config.routing_enabled(),
        name: service.name_any(),
        path,
        gateway: config.gateway_ref().cloned(),
        existing: existing.cloned(),
    }
}

/// HTTPRoute sending `path` to the runtime's predictor service
pub fn build_route(
    service: &AIMService,
    path: &str,
    gateway: &GatewayRef,
    runtime_name: &str,
    config: &EffectiveConfig,
) -> HttpRoute {
    let namespace = service.namespace().unwrap_or_default();
    let routing = config.routing();
    let mut metadata = ObjectMeta::new(service.name_any(), &namespace)
        .with_label(LABEL_COMPONENT, "routing")
        .with_label(LABEL_SERVICE, sanitize_dns_label(&service.name_any()));
    metadata.annotations = routing.annotations.clone();

    let parent = ParentRef {
        group: Some(gateway.group.clone().unwrap_or_else(|| GATEWAY_API_GROUP.to_string())),
        kind: Some(gateway.kind.clone().unwrap_or_else(|| "Gateway".to_string())),
        name: gateway.name.clone(),
        namespace: Some(gateway.namespace.clone().unwrap_or_else(|| namespace.clone())),
    };
    let rule = HttpRouteRule {
        matches: vec![HttpRouteMatch {
            path: Some(HttpPathMatch {
                type_: "PathPrefix".to_string(),
                value: path.to_string(),
            }),
        }],
        filters: vec![HttpRouteFilter::replace_prefix("/")],
        backend_refs: vec![BackendRef {
            kind: Some("Service".to_string()),
            name: format!("{runtime_name}-predictor"),
            namespace: Some(namespace.clone()),
            port: PREDICTOR_PORT,
        }],
        timeouts: routing
            .request_timeout
            .filter(|t| !t.trim().is_empty())
            .map(|t| HttpRouteTimeouts { request: Some(t) }),
    };
    HttpRoute::new(
        metadata,
        HttpRouteSpec {
            parent_refs: vec![parent],
            rules: vec![rule],
        },
    )
}

// =============================================================================
// Projection
// =============================================================================

/// Routing domain projection
pub fn project_routing(obs: &RoutingObservation) -> Projection {
    let component = Component::Routing;
    if !obs.enabled {
        return Projection::not_applicable(component);
    }
    let path = match &obs.path {
        Ok(path) => path,
        Err(err) => return Projection::of(ComponentHealth::from_error(component, err), true),
    };
    if obs.gateway.is_none() {
        let err = DomainError::upstream(
            reasons::ROUTE_FAILED,
            "routing is enabled but no gatewayRef is configured",
        );
        return Projection::of(ComponentHealth::from_error(component, &err), true);
    }
    let Some(route) = &obs.existing else {
        return Projection::of(
            ComponentHealth::progressing(
                component,
                reasons::CONFIGURING_ROUTE,
                format!("creating route {} for {path}", obs.name),
            ),
            false,
        );
    };
    if let Some(rejected) = route.rejected_parent() {
        let err = DomainError::downstream(
            reasons::ROUTE_FAILED,
            format!("gateway rejected route: {}: {}", rejected.reason, rejected.message),
        );
        return Projection::of(ComponentHealth::from_error(component, &err), false);
    }
    Projection::of(
        ComponentHealth::ready(component, reasons::ROUTE_READY, format!("serving at {path}")),
        false,
    )
    .with_update(StatusUpdate {
        routing: Some(ServiceRoutingStatus {
            path: Some(path.clone()),
        }),
        ..Default::default()
    })
}
