//! Error types for nst-init
//!
//! Validation, not-found and ownership failures are produced locally and never
//! reach the control plane. Everything the control plane rejects is carried
//! through with the status code, reason and message the API server supplied.

use thiserror::Error;

use crate::control_plane::ResourceKind;

/// Main error type for app lifecycle operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Caller input rejected before any control-plane call
    #[error("validation error: {message}")]
    Validation {
        /// Request field that failed validation (e.g. "owner", "port")
        field: &'static str,
        /// Description of what's invalid
        message: String,
        /// Internal name that was derived before validation failed, if any
        internal_name: Option<String>,
    },

    /// No resource of the app exists
    #[error("app not found: {0}")]
    NotFound(String),

    /// Caller does not own the app it tried to modify
    #[error("app {name} is not owned by {caller}")]
    Forbidden {
        /// Internal name of the app
        name: String,
        /// Slugified identity of the caller
        caller: String,
    },

    /// The control plane rejected a call with an API status
    #[error("control plane rejected {kind} {name}: {message} ({code} {reason})")]
    ControlPlane {
        /// Resource kind being operated on
        kind: ResourceKind,
        /// Object name being operated on
        name: String,
        /// HTTP status code returned by the API server
        code: u16,
        /// Machine-readable reason (e.g. "Conflict", "Forbidden")
        reason: String,
        /// Human-readable message from the API server
        message: String,
    },

    /// Transport or client-side Kubernetes error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid process configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a validation error for the given request field
    pub fn validation(field: &'static str, msg: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: msg.into(),
            internal_name: None,
        }
    }

    /// Create a validation error that reports the derived internal name
    pub fn invalid_name(internal_name: impl Into<String>) -> Self {
        Self::Validation {
            field: "appName",
            message: "invalid name (letters/numbers/dash)".to_string(),
            internal_name: Some(internal_name.into()),
        }
    }

    /// Create a not-found error for an app
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create an ownership error
    pub fn forbidden(name: impl Into<String>, caller: impl Into<String>) -> Self {
        Self::Forbidden {
            name: name.into(),
            caller: caller.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap a kube-rs error with the resource it was raised for
    ///
    /// API statuses keep their code, reason and message; transport failures
    /// stay as [`Error::Kube`].
    pub fn from_kube(kind: ResourceKind, name: impl Into<String>, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => Self::ControlPlane {
                kind,
                name: name.into(),
                code: resp.code,
                reason: resp.reason,
                message: resp.message,
            },
            other => Self::Kube { source: other },
        }
    }

    /// HTTP status code a transport layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation { .. } => 400,
            Error::NotFound(_) => 404,
            Error::Forbidden { .. } => 403,
            Error::ControlPlane { code, .. } if (400..=599).contains(code) => *code,
            Error::Kube {
                source: kube::Error::Api(resp),
            } if (400..=599).contains(&resp.code) => resp.code,
            _ => 500,
        }
    }

    /// Whether the error was raised locally, before reaching the control plane
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. } | Error::NotFound(_) | Error::Forbidden { .. }
        )
    }
}
