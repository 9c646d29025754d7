//! Reconciler: converges the control plane toward an app's desired state
//!
//! Upsert is fetch-then-replace-or-create. "Not found" is a branch, never an
//! error; every other control-plane failure aborts the current operation with
//! no retry and no rollback. Running the same operation again is always safe.
//!
//! Ownership checks live in the lifecycle layer. The reconciler only reports
//! what the control plane records.

use std::cmp::Ordering;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::control_plane::{ControlPlane, Deleted, Fetched, Resource, ResourceKind};
use crate::workload::{
    converge, endpoint_target_port, managed_selector, route_hosts, DesiredState, LABEL_OWNER,
};
use crate::Error;

/// What an upsert did
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpsertOutcome {
    /// Object did not exist and was created
    Created,
    /// Object existed and was replaced
    Replaced,
}

/// Which resources a remove actually deleted
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemovalReport {
    /// Kinds deleted, in deletion order
    pub deleted: Vec<ResourceKind>,
}

impl RemovalReport {
    /// True if nothing existed to delete
    pub fn was_absent(&self) -> bool {
        self.deleted.is_empty()
    }
}

/// Recorded owner of an app
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Owner label found on the first present resource
    Owned(String),
    /// A resource exists but carries no owner label
    Unowned,
    /// None of the app's resources exist
    Missing,
}

/// One app as seen through its Route
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSummary {
    /// Internal name
    pub internal_name: String,
    /// Recorded owner
    pub owner: Option<String>,
    /// Hostnames the Route publishes
    pub hosts: Vec<String>,
    /// Public URLs, one per host
    pub urls: Vec<String>,
    /// Container port from the Service, if it could be read
    pub port: Option<u16>,
    /// Route creation time (RFC 3339)
    pub created_at: Option<String>,
}

/// Drives the control plane for the resource triple of each app
#[derive(Clone)]
pub struct Reconciler {
    control_plane: Arc<dyn ControlPlane>,
    config: Arc<Config>,
}

impl Reconciler {
    /// Create a reconciler over a control plane
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: Arc<Config>) -> Self {
        Self {
            control_plane,
            config,
        }
    }

    /// Create the object if absent, otherwise replace it wholesale
    pub async fn upsert(&self, desired: Resource) -> Result<UpsertOutcome, Error> {
        let kind = desired.kind();
        let name = desired.name().to_string();

        match self.control_plane.fetch(kind, &name).await? {
            Fetched::Found(existing) => {
                let previous = existing.label(LABEL_OWNER).map(str::to_string);
                let next = desired.label(LABEL_OWNER);
                if previous.is_some() && previous.as_deref() != next {
                    warn!(
                        %kind,
                        name = %name,
                        previous = ?previous,
                        next = ?next,
                        "replacing object recorded under another owner"
                    );
                }

                self.control_plane
                    .replace(converge(existing, desired))
                    .await?;
                info!(%kind, name = %name, "replaced");
                Ok(UpsertOutcome::Replaced)
            }
            Fetched::Absent => {
                self.control_plane.create(desired).await?;
                info!(%kind, name = %name, "created");
                Ok(UpsertOutcome::Created)
            }
        }
    }

    /// Upsert Workload, Endpoint and Route in that order
    ///
    /// Stops at the first failure; anything already upserted stays in place.
    #[instrument(skip(self, desired), fields(name = ?desired.workload.metadata.name))]
    pub async fn deploy(
        &self,
        desired: DesiredState,
    ) -> Result<Vec<(ResourceKind, UpsertOutcome)>, Error> {
        let mut outcomes = Vec::with_capacity(ResourceKind::APPLY_ORDER.len());
        for resource in desired.into_resources() {
            let kind = resource.kind();
            let outcome = self.upsert(resource).await?;
            outcomes.push((kind, outcome));
        }
        Ok(outcomes)
    }

    /// Every managed app, newest first; apps without a timestamp last
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<AppSummary>, Error> {
        let routes = self
            .control_plane
            .list(ResourceKind::Route, &managed_selector())
            .await?;

        let mut apps: Vec<AppSummary> = routes
            .iter()
            .filter_map(|resource| match resource {
                Resource::Route(ingress) => Some((resource, ingress)),
                _ => None,
            })
            .map(|(resource, ingress)| {
                let hosts = route_hosts(ingress);
                AppSummary {
                    internal_name: ResourceKind::Route.internal_name(resource.name()).to_string(),
                    owner: resource.label(LABEL_OWNER).map(str::to_string),
                    urls: hosts.iter().map(|h| self.config.url_for(h)).collect(),
                    hosts,
                    port: None,
                    created_at: resource.created_at(),
                }
            })
            .collect();

        let ports = join_all(
            apps.iter()
                .map(|app| self.endpoint_port(&app.internal_name)),
        )
        .await;
        for (app, port) in apps.iter_mut().zip(ports) {
            app.port = port;
        }

        apps.sort_by(|a, b| newest_first(a.created_at.as_deref(), b.created_at.as_deref()));
        debug!(count = apps.len(), "listed apps");
        Ok(apps)
    }

    async fn endpoint_port(&self, internal_name: &str) -> Option<u16> {
        let name = ResourceKind::Endpoint.object_name(internal_name);
        match self.control_plane.fetch(ResourceKind::Endpoint, &name).await {
            Ok(Fetched::Found(Resource::Endpoint(service))) => endpoint_target_port(&service),
            Ok(_) => None,
            Err(e) => {
                warn!(name = %name, error = %e, "failed to read service port");
                None
            }
        }
    }

    /// Delete Route, Endpoint and Workload; absent objects are skipped
    ///
    /// The first non-404 failure aborts, leaving later kinds in place.
    #[instrument(skip(self))]
    pub async fn remove(&self, internal_name: &str) -> Result<RemovalReport, Error> {
        let mut report = RemovalReport::default();
        for kind in ResourceKind::REMOVE_ORDER {
            let name = kind.object_name(internal_name);
            match self.control_plane.delete(kind, &name).await? {
                Deleted::Deleted => {
                    info!(%kind, name = %name, "deleted");
                    report.deleted.push(kind);
                }
                Deleted::Absent => debug!(%kind, name = %name, "already absent"),
            }
        }
        Ok(report)
    }

    /// Owner recorded on the app's resources
    ///
    /// Looks at the Route first, then the Workload, then the Endpoint; the
    /// first one present decides.
    pub async fn owner_of(&self, internal_name: &str) -> Result<Ownership, Error> {
        for kind in [
            ResourceKind::Route,
            ResourceKind::Workload,
            ResourceKind::Endpoint,
        ] {
            let name = kind.object_name(internal_name);
            if let Some(resource) = self.control_plane.fetch(kind, &name).await?.into_option() {
                return Ok(match resource.label(LABEL_OWNER) {
                    Some(owner) if !owner.is_empty() => Ownership::Owned(owner.to_string()),
                    _ => Ownership::Unowned,
                });
            }
        }
        Ok(Ownership::Missing)
    }
}

/// Descending by timestamp string, `None` after every `Some`
fn newest_first(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
