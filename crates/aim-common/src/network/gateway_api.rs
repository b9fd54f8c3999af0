//! Gateway API HTTPRoute types
//!
//! Only the subset the operator emits: one PathPrefix rule per service with a
//! prefix rewrite, a single backend, and an optional request timeout.

use serde::{Deserialize, Serialize};

use crate::kube_utils::{impl_api_defaults, HasApiResource, ObjectMeta};

/// Gateway API group
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Kubernetes Gateway API HTTPRoute resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// API version (gateway.networking.k8s.io/v1)
    #[serde(default = "HttpRoute::default_api_version")]
    pub api_version: String,
    /// Resource kind (HTTPRoute)
    #[serde(default = "HttpRoute::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// HTTPRoute specification
    pub spec: HttpRouteSpec,
    /// Status reported by the gateway controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HttpRouteStatus>,
}

impl HasApiResource for HttpRoute {
    const API_VERSION: &'static str = "gateway.networking.k8s.io/v1";
    const KIND: &'static str = "HTTPRoute";
}

impl_api_defaults!(HttpRoute);

impl HttpRoute {
    /// Create a new HTTPRoute
    pub fn new(metadata: ObjectMeta, spec: HttpRouteSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
            status: None,
        }
    }

    /// First parent condition the gateway reported as rejected, if any
    pub fn rejected_parent(&self) -> Option<&RouteCondition> {
        self.status
            .as_ref()?
            .parents
            .iter()
            .flat_map(|p| p.conditions.iter())
            .find(|c| {
                matches!(c.type_.as_str(), "Accepted" | "ResolvedRefs") && c.status == "False"
            })
    }
}

/// HTTPRoute spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Parent gateway references
    pub parent_refs: Vec<ParentRef>,
    /// Routing rules
    pub rules: Vec<HttpRouteRule>,
}

/// Parent reference for route resources
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParentRef {
    /// API group (gateway.networking.k8s.io)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Resource kind (Gateway)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Gateway name
    pub name: String,
    /// Gateway namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// HTTPRoute rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    /// Request matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpRouteMatch>,
    /// Filters applied before forwarding
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<HttpRouteFilter>,
    /// Backend references
    pub backend_refs: Vec<BackendRef>,
    /// Request timeouts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<HttpRouteTimeouts>,
}

/// HTTP route match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    /// Path match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<HttpPathMatch>,
}

/// HTTP path match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathMatch {
    /// Match type (PathPrefix, Exact)
    #[serde(rename = "type")]
    pub type_: String,
    /// Path value
    pub value: String,
}

/// Route filter; only URLRewrite is emitted
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteFilter {
    /// Filter type (URLRewrite)
    #[serde(rename = "type")]
    pub type_: String,
    /// URL rewrite settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_rewrite: Option<HttpUrlRewrite>,
}

impl HttpRouteFilter {
    /// Rewrite the matched prefix to `replacement`
    pub fn replace_prefix(replacement: impl Into<String>) -> Self {
        Self {
            type_: "URLRewrite".to_string(),
            url_rewrite: Some(HttpUrlRewrite {
                path: Some(HttpPathModifier {
                    type_: "ReplacePrefixMatch".to_string(),
                    replace_prefix_match: Some(replacement.into()),
                }),
            }),
        }
    }
}

/// URL rewrite filter body
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpUrlRewrite {
    /// Path modifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<HttpPathModifier>,
}

/// Path modifier for URL rewrites
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathModifier {
    /// Modifier type (ReplacePrefixMatch)
    #[serde(rename = "type")]
    pub type_: String,
    /// Replacement prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_prefix_match: Option<String>,
}

/// Backend reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    /// Resource kind (Service)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Service name
    pub name: String,
    /// Service namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Service port
    pub port: u16,
}

/// Rule timeouts
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteTimeouts {
    /// Total request timeout (Gateway API duration, e.g. "30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
}

/// Route status as written by the gateway controller
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteStatus {
    /// Per-parent status
    #[serde(default)]
    pub parents: Vec<RouteParentStatus>,
}

/// Status for one parent gateway
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteParentStatus {
    /// Conditions reported for this parent
    #[serde(default)]
    pub conditions: Vec<RouteCondition>,
}

/// Condition on a route parent; status kept as the raw string
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_serializes_with_gateway_api_shape() {
        let route = HttpRoute::new(
            ObjectMeta::new("llama", "default"),
            HttpRouteSpec {
                parent_refs: vec![ParentRef {
                    group: Some(GATEWAY_API_GROUP.to_string()),
                    kind: Some("Gateway".to_string()),
                    name: "public".to_string(),
                    namespace: Some("default".to_string()),
                }],
                rules: vec![HttpRouteRule {
                    matches: vec![HttpRouteMatch {
                        path: Some(HttpPathMatch {
                            type_: "PathPrefix".to_string(),
                            value: "/default/llama".to_string(),
                        }),
                    }],
                    filters: vec![HttpRouteFilter::replace_prefix("/")],
                    backend_refs: vec![BackendRef {
                        kind: Some("Service".to_string()),
                        name: "llama-predictor".to_string(),
                        namespace: None,
                        port: 80,
                    }],
                    timeouts: None,
                }],
            },
        );
        let json = serde_json::to_value(&route).unwrap();
        assert_eq!(json["apiVersion"], "gateway.networking.k8s.io/v1");
        assert_eq!(json["kind"], "HTTPRoute");
        assert_eq!(json["spec"]["rules"][0]["matches"][0]["path"]["type"], "PathPrefix");
        assert_eq!(
            json["spec"]["rules"][0]["filters"][0]["urlRewrite"]["path"]["replacePrefixMatch"],
            "/"
        );
        assert!(json.get("status").is_none());
    }

    #[test]
    fn rejected_parent_is_detected() {
        let raw = serde_json::json!({
            "metadata": {"name": "r", "namespace": "ns"},
            "spec": {"parentRefs": [], "rules": []},
            "status": {"parents": [{"conditions": [
                {"type": "Accepted", "status": "False", "reason": "NoMatchingParent", "message": "no gateway"}
            ]}]}
        });
        let route: HttpRoute = serde_json::from_value(raw).unwrap();
        assert_eq!(route.kind, "HTTPRoute");
        let cond = route.rejected_parent().unwrap();
        assert_eq!(cond.reason, "NoMatchingParent");
    }
}
