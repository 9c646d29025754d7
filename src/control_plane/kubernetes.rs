//! kube-rs backed control plane
//!
//! Every call goes straight to the API server; nothing is cached. A 404 on
//! get or delete is turned into the `Absent` variant here and nowhere else.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ControlPlane, Deleted, Fetched, Resource, ResourceKind};
use crate::Error;

/// Control plane backed by a Kubernetes API server, scoped to one namespace
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
    namespace: String,
}

impl KubeControlPlane {
    /// Create a control plane for `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

async fn get_opt<K>(api: &Api<K>, kind: ResourceKind, name: &str) -> Result<Option<K>, Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(Error::from_kube(kind, name, e)),
    }
}

async fn create_one<K>(api: &Api<K>, kind: ResourceKind, name: &str, obj: &K) -> Result<(), Error>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    api.create(&PostParams::default(), obj)
        .await
        .map(|_| ())
        .map_err(|e| Error::from_kube(kind, name, e))
}

async fn replace_one<K>(api: &Api<K>, kind: ResourceKind, name: &str, obj: &K) -> Result<(), Error>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    api.replace(name, &PostParams::default(), obj)
        .await
        .map(|_| ())
        .map_err(|e| Error::from_kube(kind, name, e))
}

async fn delete_opt<K>(api: &Api<K>, kind: ResourceKind, name: &str) -> Result<Deleted, Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(Deleted::Deleted),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(Deleted::Absent),
        Err(e) => Err(Error::from_kube(kind, name, e)),
    }
}

async fn list_matching<K>(
    api: &Api<K>,
    kind: ResourceKind,
    label_selector: &str,
) -> Result<Vec<K>, Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    let params = ListParams::default().labels(label_selector);
    let list = api
        .list(&params)
        .await
        .map_err(|e| Error::from_kube(kind, label_selector, e))?;
    Ok(list.items)
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn fetch(&self, kind: ResourceKind, name: &str) -> Result<Fetched, Error> {
        let found = match kind {
            ResourceKind::Workload => get_opt(&self.api::<Deployment>(), kind, name)
                .await?
                .map(Resource::Workload),
            ResourceKind::Endpoint => get_opt(&self.api::<Service>(), kind, name)
                .await?
                .map(Resource::Endpoint),
            ResourceKind::Route => get_opt(&self.api::<Ingress>(), kind, name)
                .await?
                .map(Resource::Route),
        };
        debug!(%kind, name = %name, found = found.is_some(), "fetched");
        Ok(found.map_or(Fetched::Absent, Fetched::Found))
    }

    async fn create(&self, resource: Resource) -> Result<(), Error> {
        let kind = resource.kind();
        let name = resource.name().to_string();
        match &resource {
            Resource::Workload(d) => create_one(&self.api(), kind, &name, d).await,
            Resource::Endpoint(s) => create_one(&self.api(), kind, &name, s).await,
            Resource::Route(i) => create_one(&self.api(), kind, &name, i).await,
        }
    }

    async fn replace(&self, resource: Resource) -> Result<(), Error> {
        let kind = resource.kind();
        let name = resource.name().to_string();
        match &resource {
            Resource::Workload(d) => replace_one(&self.api(), kind, &name, d).await,
            Resource::Endpoint(s) => replace_one(&self.api(), kind, &name, s).await,
            Resource::Route(i) => replace_one(&self.api(), kind, &name, i).await,
        }
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<Deleted, Error> {
        match kind {
            ResourceKind::Workload => delete_opt(&self.api::<Deployment>(), kind, name).await,
            ResourceKind::Endpoint => delete_opt(&self.api::<Service>(), kind, name).await,
            ResourceKind::Route => delete_opt(&self.api::<Ingress>(), kind, name).await,
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        label_selector: &str,
    ) -> Result<Vec<Resource>, Error> {
        let items = match kind {
            ResourceKind::Workload => list_matching(&self.api::<Deployment>(), kind, label_selector)
                .await?
                .into_iter()
                .map(Resource::Workload)
                .collect(),
            ResourceKind::Endpoint => list_matching(&self.api::<Service>(), kind, label_selector)
                .await?
                .into_iter()
                .map(Resource::Endpoint)
                .collect(),
            ResourceKind::Route => list_matching(&self.api::<Ingress>(), kind, label_selector)
                .await?
                .into_iter()
                .map(Resource::Route)
                .collect(),
        };
        Ok(items)
    }
}
