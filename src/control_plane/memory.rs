//! In-process control plane
//!
//! Mimics the parts of API server behaviour the reconciler depends on:
//! create conflicts, replace on missing objects, resource-version checks,
//! immutable Service cluster IPs and equality label selectors. Failures can
//! be injected per (operation, kind) to exercise partial-failure paths.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ControlPlane, Deleted, Fetched, Resource, ResourceKind};
use crate::Error;

/// Control-plane verb, used to target injected failures and in the journal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Get by name
    Fetch,
    /// Create
    Create,
    /// Full replace
    Replace,
    /// Delete by name
    Delete,
    /// List by selector
    List,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(ResourceKind, String), Resource>,
    next_version: u64,
    failures: HashMap<(Operation, ResourceKind), u16>,
    journal: Vec<(Operation, ResourceKind, String)>,
}

impl State {
    fn record(&mut self, op: Operation, kind: ResourceKind, name: &str) -> Result<(), Error> {
        self.journal.push((op, kind, name.to_string()));
        match self.failures.remove(&(op, kind)) {
            Some(code) => Err(api_error(kind, name, code, "injected failure")),
            None => Ok(()),
        }
    }

    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }
}

/// Control plane that keeps objects in memory
pub struct InMemoryControlPlane {
    namespace: String,
    epoch: DateTime<Utc>,
    state: Mutex<State>,
}

impl InMemoryControlPlane {
    /// Create an empty control plane for `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            epoch: Utc::now().trunc_subsecs(0),
            state: Mutex::new(State::default()),
        }
    }

    /// Store an object exactly as given, bypassing create semantics
    ///
    /// Useful for seeding state written by someone else, including objects
    /// without a creation timestamp.
    pub async fn insert(&self, resource: Resource) {
        let key = (resource.kind(), resource.name().to_string());
        self.state.lock().await.objects.insert(key, resource);
    }

    /// Current stored object, without touching the journal
    pub async fn get(&self, kind: ResourceKind, name: &str) -> Option<Resource> {
        let state = self.state.lock().await;
        state.objects.get(&(kind, name.to_string())).cloned()
    }

    /// Whether an object exists
    pub async fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.get(kind, name).await.is_some()
    }

    /// Number of stored objects across all kinds
    pub async fn len(&self) -> usize {
        self.state.lock().await.objects.len()
    }

    /// Whether no objects are stored
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Make the next `op` on `kind` fail with the given HTTP status
    pub async fn fail_next(&self, op: Operation, kind: ResourceKind, code: u16) {
        self.state.lock().await.failures.insert((op, kind), code);
    }

    /// Every call made so far, in order
    pub async fn journal(&self) -> Vec<(Operation, ResourceKind, String)> {
        self.state.lock().await.journal.clone()
    }

    fn check_namespace(&self, resource: &mut Resource) -> Result<(), Error> {
        let kind = resource.kind();
        let name = resource.name().to_string();
        let meta = resource.metadata_mut();
        match meta.namespace.as_deref() {
            None => {
                meta.namespace = Some(self.namespace.clone());
                Ok(())
            }
            Some(ns) if ns == self.namespace => Ok(()),
            Some(ns) => Err(api_error(
                kind,
                &name,
                400,
                &format!("namespace {ns} does not match {}", self.namespace),
            )),
        }
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn fetch(&self, kind: ResourceKind, name: &str) -> Result<Fetched, Error> {
        let mut state = self.state.lock().await;
        state.record(Operation::Fetch, kind, name)?;
        Ok(match state.objects.get(&(kind, name.to_string())) {
            Some(resource) => Fetched::Found(resource.clone()),
            None => Fetched::Absent,
        })
    }

    async fn create(&self, mut resource: Resource) -> Result<(), Error> {
        let kind = resource.kind();
        let name = resource.name().to_string();
        let mut state = self.state.lock().await;
        state.record(Operation::Create, kind, &name)?;
        self.check_namespace(&mut resource)?;

        let key = (kind, name.clone());
        if state.objects.contains_key(&key) {
            return Err(api_error(kind, &name, 409, "already exists"));
        }

        let version = state.bump_version();
        let meta = resource.metadata_mut();
        meta.resource_version = Some(version.to_string());
        meta.uid = Some(format!("uid-{version}"));
        meta.creation_timestamp = Some(Time(self.epoch + Duration::seconds(version as i64)));

        if let Resource::Endpoint(svc) = &mut resource {
            let spec = svc.spec.get_or_insert_with(Default::default);
            if spec.cluster_ip.is_none() {
                spec.cluster_ip = Some(format!("10.96.{}.{}", version / 250, version % 250 + 1));
            }
        }

        debug!(%kind, name = %name, version, "created");
        state.objects.insert(key, resource);
        Ok(())
    }

    async fn replace(&self, mut resource: Resource) -> Result<(), Error> {
        let kind = resource.kind();
        let name = resource.name().to_string();
        let mut state = self.state.lock().await;
        state.record(Operation::Replace, kind, &name)?;
        self.check_namespace(&mut resource)?;

        let key = (kind, name.clone());
        let Some(stored) = state.objects.get(&key) else {
            return Err(api_error(kind, &name, 404, "not found"));
        };

        let stored_meta = stored.metadata().clone();
        if let Some(incoming) = resource.metadata().resource_version.as_deref() {
            if stored_meta.resource_version.as_deref() != Some(incoming) {
                return Err(api_error(
                    kind,
                    &name,
                    409,
                    "the object has been modified; please apply your changes to the latest version",
                ));
            }
        }

        if let (Resource::Endpoint(old), Resource::Endpoint(new)) = (stored, &mut resource) {
            let old_ip = old.spec.as_ref().and_then(|s| s.cluster_ip.clone());
            let spec = new.spec.get_or_insert_with(Default::default);
            match (spec.cluster_ip.clone(), old_ip) {
                (None, old_ip) => spec.cluster_ip = old_ip,
                (Some(new_ip), Some(old_ip)) if new_ip != old_ip => {
                    return Err(api_error(kind, &name, 422, "spec.clusterIP: field is immutable"));
                }
                _ => {}
            }
        }

        let version = state.bump_version();
        let meta = resource.metadata_mut();
        meta.resource_version = Some(version.to_string());
        meta.uid = stored_meta.uid;
        meta.creation_timestamp = stored_meta.creation_timestamp;

        debug!(%kind, name = %name, version, "replaced");
        state.objects.insert(key, resource);
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<Deleted, Error> {
        let mut state = self.state.lock().await;
        state.record(Operation::Delete, kind, name)?;
        Ok(match state.objects.remove(&(kind, name.to_string())) {
            Some(_) => Deleted::Deleted,
            None => Deleted::Absent,
        })
    }

    async fn list(
        &self,
        kind: ResourceKind,
        label_selector: &str,
    ) -> Result<Vec<Resource>, Error> {
        let mut state = self.state.lock().await;
        state.record(Operation::List, kind, label_selector)?;

        let wanted = parse_selector(label_selector)
            .ok_or_else(|| api_error(kind, label_selector, 400, "unable to parse selector"))?;

        Ok(state
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, resource)| resource)
            .filter(|resource| {
                wanted
                    .iter()
                    .all(|(key, value)| resource.label(key) == Some(value.as_str()))
            })
            .cloned()
            .collect())
    }
}

/// Parse an equality-only selector (`a=b,c=d`); `None` on malformed input
fn parse_selector(selector: &str) -> Option<Vec<(String, String)>> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            let (key, value) = term.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim_start_matches('=').trim().to_string()))
        })
        .collect()
}

fn api_error(kind: ResourceKind, name: &str, code: u16, message: &str) -> Error {
    let reason = match code {
        400 => "BadRequest",
        403 => "Forbidden",
        404 => "NotFound",
        409 => "Conflict",
        422 => "Invalid",
        429 => "TooManyRequests",
        500..=599 => "InternalError",
        _ => "Unknown",
    };
    Error::ControlPlane {
        kind,
        name: name.to_string(),
        code,
        reason: reason.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Service, ServiceSpec};
    use k8s_openapi::api::networking::v1::Ingress;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn route(name: &str, labels: &[(&str, &str)]) -> Resource {
        Resource::Route(Ingress {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn endpoint(name: &str, cluster_ip: Option<&str>) -> Resource {
        Resource::Endpoint(Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: cluster_ip.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn create_assigns_server_fields() {
        let cp = InMemoryControlPlane::new("apps");
        cp.create(route("web-ing", &[])).await.unwrap();

        let stored = cp.get(ResourceKind::Route, "web-ing").await.unwrap();
        assert_eq!(stored.metadata().namespace.as_deref(), Some("apps"));
        assert!(stored.metadata().resource_version.is_some());
        assert!(stored.created_at().is_some());
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let cp = InMemoryControlPlane::new("apps");
        cp.create(route("web-ing", &[])).await.unwrap();
        let err = cp.create(route("web-ing", &[])).await.unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn replace_missing_is_not_found() {
        let cp = InMemoryControlPlane::new("apps");
        let err = cp.replace(route("web-ing", &[])).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn replace_keeps_creation_timestamp() {
        let cp = InMemoryControlPlane::new("apps");
        cp.create(route("web-ing", &[])).await.unwrap();
        let created = cp.get(ResourceKind::Route, "web-ing").await.unwrap();

        cp.replace(route("web-ing", &[("a", "b")])).await.unwrap();
        let replaced = cp.get(ResourceKind::Route, "web-ing").await.unwrap();

        assert_eq!(replaced.created_at(), created.created_at());
        assert_ne!(
            replaced.metadata().resource_version,
            created.metadata().resource_version
        );
        assert_eq!(replaced.label("a"), Some("b"));
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let cp = InMemoryControlPlane::new("apps");
        cp.create(route("web-ing", &[])).await.unwrap();
        let mut stale = cp.get(ResourceKind::Route, "web-ing").await.unwrap();
        cp.replace(route("web-ing", &[])).await.unwrap();

        stale.metadata_mut().labels = None;
        let err = cp.replace(stale).await.unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn cluster_ip_is_immutable() {
        let cp = InMemoryControlPlane::new("apps");
        cp.create(endpoint("web", None)).await.unwrap();
        let assigned = match cp.get(ResourceKind::Endpoint, "web").await.unwrap() {
            Resource::Endpoint(svc) => svc.spec.unwrap().cluster_ip.unwrap(),
            _ => unreachable!(),
        };

        cp.replace(endpoint("web", None)).await.unwrap();
        cp.replace(endpoint("web", Some(assigned.as_str()))).await.unwrap();
        let err = cp.replace(endpoint("web", Some("10.0.0.1"))).await.unwrap_err();
        assert_eq!(err.status_code(), 422);
    }

    #[tokio::test]
    async fn foreign_namespace_is_rejected() {
        let cp = InMemoryControlPlane::new("apps");
        let mut resource = route("web-ing", &[]);
        resource.metadata_mut().namespace = Some("other".to_string());
        assert_eq!(cp.create(resource).await.unwrap_err().status_code(), 400);
    }

    #[tokio::test]
    async fn delete_reports_absence() {
        let cp = InMemoryControlPlane::new("apps");
        cp.create(route("web-ing", &[])).await.unwrap();
        assert_eq!(
            cp.delete(ResourceKind::Route, "web-ing").await.unwrap(),
            Deleted::Deleted
        );
        assert_eq!(
            cp.delete(ResourceKind::Route, "web-ing").await.unwrap(),
            Deleted::Absent
        );
        assert!(cp.is_empty().await);
    }

    #[tokio::test]
    async fn list_filters_by_kind_and_labels() {
        let cp = InMemoryControlPlane::new("apps");
        cp.create(route("a-ing", &[("managed", "yes"), ("owner", "alice")]))
            .await
            .unwrap();
        cp.create(route("b-ing", &[("managed", "yes"), ("owner", "bob")]))
            .await
            .unwrap();
        cp.create(route("c-ing", &[])).await.unwrap();
        cp.create(endpoint("a", None)).await.unwrap();

        let managed = cp.list(ResourceKind::Route, "managed=yes").await.unwrap();
        assert_eq!(managed.len(), 2);

        let alice = cp
            .list(ResourceKind::Route, "managed=yes, owner=alice")
            .await
            .unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].name(), "a-ing");

        assert_eq!(cp.list(ResourceKind::Route, "").await.unwrap().len(), 3);
        assert!(cp.list(ResourceKind::Route, "nonsense").await.is_err());
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let cp = InMemoryControlPlane::new("apps");
        cp.fail_next(Operation::Fetch, ResourceKind::Route, 503).await;

        let err = cp.fetch(ResourceKind::Route, "web-ing").await.unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert_eq!(
            cp.fetch(ResourceKind::Route, "web-ing").await.unwrap(),
            Fetched::Absent
        );
        assert_eq!(cp.journal().await.len(), 2);
    }

    #[test]
    fn selector_parsing() {
        assert_eq!(parse_selector("").unwrap(), vec![]);
        assert_eq!(
            parse_selector("a=b,c==d").unwrap(),
            vec![
                ("a".to_string(), "b".to_string()),
                ("c".to_string(), "d".to_string())
            ]
        );
        assert!(parse_selector("a").is_none());
        assert!(parse_selector("=b").is_none());
    }
}
