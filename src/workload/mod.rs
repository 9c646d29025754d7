//! Desired-state builders for an app's resource triple
//!
//! Pure functions from an [`AppDefinition`] to the Kubernetes objects that
//! realize it:
//! - Deployment: one replica running the app's image
//! - Service: port 80 forwarding to the container port
//! - Ingress: one rule per hostname routing `/` to the Service
//!
//! Nothing here talks to the control plane. [`converge`] merges a desired
//! object onto the copy the control plane currently holds, so a replace keeps
//! server-assigned fields.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::control_plane::{Resource, ResourceKind};

/// Label marking objects as managed by this system
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on every managed object
pub const LABEL_MANAGED_BY_VALUE: &str = "nst-init";

/// Label recording the owning identity
pub const LABEL_OWNER: &str = "nst.owner";

/// Pod label the Service selects on
pub const LABEL_APP: &str = "app";

/// Environment variable telling the process which port to listen on
pub const PORT_ENV_VAR: &str = "PORT";

/// Port the Service publishes
pub const ENDPOINT_PORT: i32 = 80;

/// Name of the Service port
pub const ENDPOINT_PORT_NAME: &str = "http";

/// Label selector matching every managed object
pub fn managed_selector() -> String {
    format!("{LABEL_MANAGED_BY}={LABEL_MANAGED_BY_VALUE}")
}

/// Everything needed to build an app's resources
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppDefinition {
    /// Internal name (already validated)
    pub name: String,
    /// Target namespace
    pub namespace: String,
    /// Slugified owner
    pub owner: String,
    /// Container image reference
    pub image: String,
    /// Port the container listens on
    pub container_port: u16,
    /// Public hostnames
    pub hosts: Vec<String>,
    /// Ingress class, `None` for the cluster default
    pub ingress_class: Option<String>,
}

/// The three objects built for one app
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    /// Deployment
    pub workload: Deployment,
    /// Service
    pub endpoint: Service,
    /// Ingress
    pub route: Ingress,
}

impl DesiredState {
    /// Build all three objects for an app
    pub fn compile(app: &AppDefinition) -> Self {
        Self {
            workload: build_workload(app),
            endpoint: build_endpoint(app),
            route: build_route(app),
        }
    }

    /// Objects in the order they are applied
    pub fn into_resources(self) -> [Resource; 3] {
        [
            Resource::Workload(self.workload),
            Resource::Endpoint(self.endpoint),
            Resource::Route(self.route),
        ]
    }
}

fn managed_metadata(name: String, app: &AppDefinition) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(app.namespace.clone()),
        labels: Some(BTreeMap::from([
            (
                LABEL_MANAGED_BY.to_string(),
                LABEL_MANAGED_BY_VALUE.to_string(),
            ),
            (LABEL_OWNER.to_string(), app.owner.clone()),
        ])),
        ..Default::default()
    }
}

fn app_selector(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_APP.to_string(), name.to_string())])
}

/// Build the Deployment: one replica, one container named after the app
pub fn build_workload(app: &AppDefinition) -> Deployment {
    let port = i32::from(app.container_port);

    let mut pod_labels = app_selector(&app.name);
    pod_labels.insert(LABEL_OWNER.to_string(), app.owner.clone());

    Deployment {
        metadata: managed_metadata(ResourceKind::Workload.object_name(&app.name), app),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(app_selector(&app.name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: app.name.clone(),
                        image: Some(app.image.clone()),
                        ports: Some(vec![ContainerPort {
                            container_port: port,
                            ..Default::default()
                        }]),
                        env: Some(vec![EnvVar {
                            name: PORT_ENV_VAR.to_string(),
                            value: Some(port.to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the Service: port 80 → container port, selecting `app=<name>`
pub fn build_endpoint(app: &AppDefinition) -> Service {
    Service {
        metadata: managed_metadata(ResourceKind::Endpoint.object_name(&app.name), app),
        spec: Some(ServiceSpec {
            selector: Some(app_selector(&app.name)),
            ports: Some(endpoint_ports(app.container_port)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn endpoint_ports(container_port: u16) -> Vec<ServicePort> {
    vec![ServicePort {
        name: Some(ENDPOINT_PORT_NAME.to_string()),
        port: ENDPOINT_PORT,
        target_port: Some(IntOrString::Int(i32::from(container_port))),
        ..Default::default()
    }]
}

/// Build the Ingress: one rule per non-blank host, `/` prefix → Service port 80
pub fn build_route(app: &AppDefinition) -> Ingress {
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: ResourceKind::Endpoint.object_name(&app.name),
            port: Some(ServiceBackendPort {
                number: Some(ENDPOINT_PORT),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };

    let rules = app
        .hosts
        .iter()
        .map(|host| host.trim())
        .filter(|host| !host.is_empty())
        .map(|host| IngressRule {
            host: Some(host.to_string()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some("/".to_string()),
                    path_type: "Prefix".to_string(),
                    backend: backend.clone(),
                }],
            }),
        })
        .collect();

    Ingress {
        metadata: managed_metadata(ResourceKind::Route.object_name(&app.name), app),
        spec: Some(IngressSpec {
            ingress_class_name: app.ingress_class.clone(),
            rules: Some(rules),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Apply the desired Service selector and ports onto the stored Service
///
/// Everything else on the stored object (cluster IP, resource version,
/// server-side defaults) is kept. Desired labels are merged in.
pub fn refresh_endpoint(mut existing: Service, desired: &Service) -> Service {
    let labels = existing.metadata.labels.get_or_insert_with(BTreeMap::new);
    if let Some(desired_labels) = &desired.metadata.labels {
        labels.extend(desired_labels.clone());
    }

    let spec = existing.spec.get_or_insert_with(ServiceSpec::default);
    let desired_spec = desired.spec.clone().unwrap_or_default();
    spec.selector = desired_spec.selector;
    spec.ports = desired_spec.ports;
    existing
}

/// Body to send when replacing `existing` with `desired`
///
/// Services are refreshed in place; other kinds are replaced wholesale but
/// carry the stored resource version so a concurrent writer causes a conflict.
pub fn converge(existing: Resource, desired: Resource) -> Resource {
    match (existing, desired) {
        (Resource::Endpoint(existing), Resource::Endpoint(desired)) => {
            Resource::Endpoint(refresh_endpoint(existing, &desired))
        }
        (existing, mut desired) => {
            desired.metadata_mut().resource_version = existing.metadata().resource_version.clone();
            desired
        }
    }
}

/// Port the Service forwards to, if it is a numeric target port
pub fn endpoint_target_port(service: &Service) -> Option<u16> {
    let port = service.spec.as_ref()?.ports.as_ref()?.first()?;
    match port.target_port.as_ref()? {
        IntOrString::Int(n) => u16::try_from(*n).ok().filter(|p| *p > 0),
        IntOrString::String(s) => s.parse::<u16>().ok().filter(|p| *p > 0),
    }
}

/// Hostnames an Ingress routes
pub fn route_hosts(ingress: &Ingress) -> Vec<String> {
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .filter_map(|rule| rule.host.clone())
        .filter(|host| !host.is_empty())
        .collect()
}
