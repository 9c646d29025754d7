//! Lifecycle API: deploy, list and remove apps
//!
//! Caller input is validated here before anything reaches the control plane.
//! Ownership is enforced here too, so the reconciler stays unaware of who is
//! asking.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::control_plane::ControlPlane;
use crate::naming::{derive_name, slugify, validate_name};
use crate::reconciler::{AppSummary, Ownership, Reconciler, RemovalReport};
use crate::workload::{AppDefinition, DesiredState};
use crate::Error;

/// Container port used when a deploy request does not name one
pub const DEFAULT_CONTAINER_PORT: i64 = 8080;

/// A request to deploy or redeploy an app
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    /// Caller identity (raw, slugified here)
    #[serde(default)]
    pub owner: String,
    /// App name chosen by the caller
    #[serde(default)]
    pub app_name: String,
    /// Container image reference
    #[serde(default)]
    pub image: String,
    /// Container port; defaults to [`DEFAULT_CONTAINER_PORT`]
    #[serde(default)]
    pub port: Option<i64>,
}

/// Where a deployed app can be reached
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployed {
    /// Internal name keying the app's resources
    pub internal_name: String,
    /// Public hostname
    pub host: String,
    /// Public URL
    pub url: String,
}

/// Static facts about where apps are deployed
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Health {
    /// Target namespace
    pub ns: String,
    /// DNS zone
    pub zone: String,
}

/// Entry point for app lifecycle operations
#[derive(Clone)]
pub struct Lifecycle {
    reconciler: Reconciler,
    config: Arc<Config>,
}

impl Lifecycle {
    /// Create a lifecycle API over a control plane
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: Config) -> Self {
        let config = Arc::new(config);
        Self {
            reconciler: Reconciler::new(control_plane, config.clone()),
            config,
        }
    }

    /// Namespace and zone apps are deployed under
    pub fn health(&self) -> Health {
        Health {
            ns: self.config.namespace.clone(),
            zone: self.config.zone.clone(),
        }
    }

    /// Validate a request and converge the app's resources toward it
    #[instrument(skip(self, request), fields(owner = %request.owner, app = %request.app_name))]
    pub async fn deploy(&self, request: &DeployRequest) -> Result<Deployed, Error> {
        let app = plan(&self.config, request)?;
        let host = app.hosts.first().cloned().unwrap_or_default();
        let internal_name = app.name.clone();

        let outcomes = self.reconciler.deploy(DesiredState::compile(&app)).await?;
        info!(name = %internal_name, ?outcomes, "deployed");

        Ok(Deployed {
            url: self.config.url_for(&host),
            internal_name,
            host,
        })
    }

    /// Every managed app, newest first
    pub async fn list(&self) -> Result<Vec<AppSummary>, Error> {
        self.reconciler.list().await
    }

    /// Remove an app on behalf of its owner
    ///
    /// Fails with not-found if none of the app's resources exist and with
    /// forbidden if they are recorded under someone else.
    #[instrument(skip(self))]
    pub async fn remove(&self, internal_name: &str, caller: &str) -> Result<RemovalReport, Error> {
        let internal_name = internal_name.trim();
        if !validate_name(internal_name) {
            return Err(Error::validation("name", "invalid app id"));
        }

        let caller = slugify(caller);
        if caller.is_empty() {
            return Err(Error::validation("owner", "owner required"));
        }

        match self.reconciler.owner_of(internal_name).await? {
            Ownership::Owned(owner) if owner == caller => {}
            Ownership::Owned(_) | Ownership::Unowned => {
                return Err(Error::forbidden(internal_name, caller));
            }
            Ownership::Missing => return Err(Error::not_found(internal_name)),
        }

        let report = self.reconciler.remove(internal_name).await?;
        if report.was_absent() {
            warn!(name = %internal_name, "resources disappeared before deletion");
        } else {
            info!(name = %internal_name, deleted = ?report.deleted, "removed");
        }
        Ok(report)
    }
}

/// Turn a deploy request into an app definition, or say what is wrong with it
pub fn plan(config: &Config, request: &DeployRequest) -> Result<AppDefinition, Error> {
    let owner = slugify(&request.owner);
    if owner.is_empty() {
        return Err(Error::validation("owner", "owner required"));
    }

    let app_slug = slugify(&request.app_name);
    if app_slug.is_empty() {
        return Err(Error::validation("appName", "app name required"));
    }

    let name = derive_name(&request.owner, &request.app_name);
    if !validate_name(&name) {
        return Err(Error::invalid_name(name));
    }

    let image = request.image.trim();
    if image.is_empty() {
        return Err(Error::validation("image", "image required"));
    }

    let container_port = u16::try_from(request.port.unwrap_or(DEFAULT_CONTAINER_PORT))
        .ok()
        .filter(|port| *port > 0)
        .ok_or_else(|| Error::validation("port", "port must be between 1 and 65535"))?;

    Ok(AppDefinition {
        name,
        namespace: config.namespace.clone(),
        owner,
        image: image.to_string(),
        container_port,
        hosts: vec![config.host_for(&app_slug)],
        ingress_class: config.ingress_class.clone(),
    })
}
