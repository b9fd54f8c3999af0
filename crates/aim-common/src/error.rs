//! Error types for the AIM operator
//!
//! Errors carry structured context (the service being reconciled, the
//! field or resource kind involved) so that log lines and status messages
//! point at the object that needs attention.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for AIM operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for a spec that cannot be reconciled as written
    #[error("validation error for {service}: {message}")]
    Validation {
        /// Name of the service with invalid configuration
        service: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.model.image")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "fetch", "apply", "status")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            service: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with service context and field path
    pub fn validation_for_field(
        service: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            service: service.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec or code change.
    /// Kubernetes errors retry unless the API server rejected the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 404 && ae.code != 409
            ),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// True if this is a Kubernetes NotFound response
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Get the service name if this error is associated with a specific service
    pub fn service(&self) -> Option<&str> {
        match self {
            Error::Validation { service, .. } => Some(service),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(
            kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "boom".to_string(),
                reason: "Test".to_string(),
                code,
            }
            .into(),
        ))
    }

    /// Story: a service with a malformed model image is rejected with its name attached
    #[test]
    fn story_validation_errors_carry_service_context() {
        let err = Error::validation_for_field("llama", "spec.model.image", "empty tag");
        assert!(err.to_string().contains("llama"));
        assert!(err.to_string().contains("empty tag"));
        assert_eq!(err.service(), Some("llama"));
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.model.image"))
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_internal_error_with_context() {
        let err = Error::internal_with_context("apply", "server went away");
        assert!(err.is_retryable());
        assert_eq!(err.context(), Some("apply"));
        assert!(err.to_string().contains("[apply]"));
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
    }

    #[test]
    fn test_serialization_is_permanent() {
        let err = Error::serialization_for_kind("InferenceService", "missing spec");
        assert!(!err.is_retryable());
        match &err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("InferenceService")),
            _ => panic!("Expected Serialization variant"),
        }
    }

    #[test]
    fn test_kube_error_retryability() {
        assert!(api_error(500).is_retryable());
        assert!(api_error(404).is_retryable());
        assert!(api_error(409).is_retryable());
        assert!(!api_error(422).is_retryable());
        assert!(!api_error(403).is_retryable());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_not_found());
        assert!(!Error::internal("x").is_not_found());
    }
}
