//! nst-init - deploy container apps onto a shared Kubernetes namespace
//!
//! Each app is a Deployment, a Service and an Ingress, all named after one
//! internal name derived from the owner and the app name. There is no
//! database: the cluster is the only record of which apps exist and who owns
//! them.
//!
//! # Modules
//!
//! - [`naming`] - Internal name derivation and validation
//! - [`workload`] - Desired-state builders for the resource triple
//! - [`control_plane`] - Narrow interface over the cluster API (kube-rs and in-memory)
//! - [`reconciler`] - Upsert, list and remove against the control plane
//! - [`lifecycle`] - Validated deploy/list/remove with ownership checks
//! - [`api`] - HTTP routes over the lifecycle API
//! - [`config`] - Namespace, zone and URL scheme
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod api;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod reconciler;
pub mod telemetry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default port for the HTTP server
pub const DEFAULT_HTTP_PORT: u16 = 8080;
