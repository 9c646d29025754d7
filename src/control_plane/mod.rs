//! Narrow capability interface over the orchestration control plane
//!
//! The reconciler only needs five verbs per resource kind: fetch, create,
//! replace, delete and list. [`ControlPlane`] exposes exactly those over a
//! [`ResourceKind`] tag, with "not found" surfaced as an explicit variant
//! ([`Fetched::Absent`], [`Deleted::Absent`]) instead of an error.
//!
//! - [`KubeControlPlane`] talks to a real API server through kube-rs
//! - [`InMemoryControlPlane`] keeps state in process for tests and dry runs

mod kubernetes;
mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::SecondsFormat;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

#[cfg(test)]
use mockall::automock;

use crate::Error;

pub use kubernetes::KubeControlPlane;
pub use memory::{InMemoryControlPlane, Operation};

/// Suffix appended to an app's internal name to name its Ingress
pub const ROUTE_SUFFIX: &str = "-ing";

/// The three resource kinds that make up one app
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// apps/v1 Deployment running the container
    Workload,
    /// v1 Service in front of the workload
    Endpoint,
    /// networking.k8s.io/v1 Ingress publishing the hostnames
    Route,
}

impl ResourceKind {
    /// Order resources are upserted in during a deploy
    pub const APPLY_ORDER: [ResourceKind; 3] = [
        ResourceKind::Workload,
        ResourceKind::Endpoint,
        ResourceKind::Route,
    ];

    /// Order resources are deleted in during a remove
    pub const REMOVE_ORDER: [ResourceKind; 3] = [
        ResourceKind::Route,
        ResourceKind::Endpoint,
        ResourceKind::Workload,
    ];

    /// Kubernetes kind name
    pub fn k8s_kind(self) -> &'static str {
        match self {
            ResourceKind::Workload => "Deployment",
            ResourceKind::Endpoint => "Service",
            ResourceKind::Route => "Ingress",
        }
    }

    /// Object name this kind uses for an app
    pub fn object_name(self, internal_name: &str) -> String {
        match self {
            ResourceKind::Route => format!("{internal_name}{ROUTE_SUFFIX}"),
            _ => internal_name.to_string(),
        }
    }

    /// Recover the app's internal name from an object name of this kind
    pub fn internal_name(self, object_name: &str) -> &str {
        match self {
            ResourceKind::Route => object_name
                .strip_suffix(ROUTE_SUFFIX)
                .unwrap_or(object_name),
            _ => object_name,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.k8s_kind())
    }
}

/// A typed control-plane object of one of the managed kinds
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    /// Deployment
    Workload(Deployment),
    /// Service
    Endpoint(Service),
    /// Ingress
    Route(Ingress),
}

impl Resource {
    /// Kind tag of this object
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Workload(_) => ResourceKind::Workload,
            Resource::Endpoint(_) => ResourceKind::Endpoint,
            Resource::Route(_) => ResourceKind::Route,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Resource::Workload(d) => &d.metadata,
            Resource::Endpoint(s) => &s.metadata,
            Resource::Route(i) => &i.metadata,
        }
    }

    /// Mutable object metadata
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Resource::Workload(d) => &mut d.metadata,
            Resource::Endpoint(s) => &mut s.metadata,
            Resource::Route(i) => &mut i.metadata,
        }
    }

    /// Object name (empty if unset)
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Value of a metadata label
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    /// Creation timestamp as RFC 3339 (`2024-05-01T12:00:00Z`), if the control plane set one
    pub fn created_at(&self) -> Option<String> {
        self.metadata()
            .creation_timestamp
            .as_ref()
            .map(|t| t.0.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

/// Outcome of a fetch
#[derive(Clone, Debug, PartialEq)]
pub enum Fetched {
    /// The object exists
    Found(Resource),
    /// The control plane has no such object
    Absent,
}

impl Fetched {
    /// Convert into an `Option`
    pub fn into_option(self) -> Option<Resource> {
        match self {
            Fetched::Found(resource) => Some(resource),
            Fetched::Absent => None,
        }
    }
}

/// Outcome of a delete
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deleted {
    /// The object existed and was deleted
    Deleted,
    /// There was nothing to delete
    Absent,
}

/// Control-plane operations the reconciler relies on
///
/// All operations are scoped to a single namespace chosen when the
/// implementation is constructed. Any failure other than not-found is
/// returned as an error and is fatal for the calling operation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch an object by kind and name
    async fn fetch(&self, kind: ResourceKind, name: &str) -> Result<Fetched, Error>;

    /// Create a new object; fails if it already exists
    async fn create(&self, resource: Resource) -> Result<(), Error>;

    /// Fully replace an existing object
    async fn replace(&self, resource: Resource) -> Result<(), Error>;

    /// Delete an object by kind and name
    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<Deleted, Error>;

    /// List objects of a kind matching an equality label selector (`k=v,k2=v2`)
    async fn list(&self, kind: ResourceKind, label_selector: &str)
        -> Result<Vec<Resource>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::BTreeMap;

    #[test]
    fn route_names_carry_suffix() {
        assert_eq!(ResourceKind::Route.object_name("alice-web"), "alice-web-ing");
        assert_eq!(ResourceKind::Workload.object_name("alice-web"), "alice-web");
        assert_eq!(ResourceKind::Endpoint.object_name("alice-web"), "alice-web");
    }

    #[test]
    fn internal_name_strips_route_suffix_only() {
        assert_eq!(ResourceKind::Route.internal_name("alice-web-ing"), "alice-web");
        assert_eq!(ResourceKind::Route.internal_name("legacy"), "legacy");
        assert_eq!(ResourceKind::Workload.internal_name("alice-web-ing"), "alice-web-ing");
    }

    #[test]
    fn orders_are_mirrored() {
        let mut reversed = ResourceKind::APPLY_ORDER;
        reversed.reverse();
        assert_eq!(reversed, ResourceKind::REMOVE_ORDER);
    }

    #[test]
    fn resource_accessors_read_metadata() {
        let created = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let resource = Resource::Route(Ingress {
            metadata: ObjectMeta {
                name: Some("alice-web-ing".to_string()),
                labels: Some(BTreeMap::from([("nst.owner".to_string(), "alice".to_string())])),
                creation_timestamp: Some(Time(created)),
                ..Default::default()
            },
            ..Default::default()
        });

        assert_eq!(resource.kind(), ResourceKind::Route);
        assert_eq!(resource.name(), "alice-web-ing");
        assert_eq!(resource.label("nst.owner"), Some("alice"));
        assert_eq!(resource.label("missing"), None);
        assert_eq!(resource.created_at().as_deref(), Some("2024-05-01T12:00:00Z"));
    }

    #[test]
    fn unnamed_resource_has_empty_name_and_no_timestamp() {
        let resource = Resource::Endpoint(Service::default());
        assert_eq!(resource.name(), "");
        assert_eq!(resource.created_at(), None);
        assert_eq!(Fetched::Found(resource.clone()).into_option(), Some(resource));
        assert_eq!(Fetched::Absent.into_option(), None);
    }
}
