//! Canonical Deployment and Service definitions rendered from validated
//! configuration. Rendering is pure; drift detection never consults it and
//! works on live observed objects instead.

use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1 as apps;
use k8s_openapi::api::core::v1 as core;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

pub const DEFAULT_REPLICAS: i32 = 1;
pub const DEFAULT_CONTAINER_PORT: i32 = 80;
pub const SERVICE_PORT_NAME: &str = "default-port";

#[derive(Clone, Debug, Default)]
pub struct DeploymentConfig {
    pub name: String,
    pub image: String,
    pub replicas: Option<i32>,
    pub container_port: Option<i32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServiceType {
    #[default]
    NodePort,
    LoadBalancer,
    ClusterIp,
    ExternalService,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
            ServiceType::ClusterIp => "ClusterIp",
            ServiceType::ExternalService => "ExternalService",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ServiceConfig {
    pub name: String,
    pub type_: Option<ServiceType>,
    pub container_port: Option<i32>,
}

fn required(value: &str, field: &'static str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::MissingField(field));
    }
    Ok(value.to_string())
}

fn resolve_replicas(replicas: Option<i32>) -> Result<i32> {
    let replicas = replicas.unwrap_or(DEFAULT_REPLICAS);
    if replicas < 0 {
        return Err(Error::Validation(format!(
            "replicas must not be negative, got {replicas}"
        )));
    }
    Ok(replicas)
}

fn resolve_port(port: Option<i32>) -> Result<i32> {
    let port = port.unwrap_or(DEFAULT_CONTAINER_PORT);
    if !(1..=65535).contains(&port) {
        return Err(Error::Validation(format!(
            "containerPort must be between 1 and 65535, got {port}"
        )));
    }
    Ok(port)
}

fn app_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), name.to_string());
    labels
}

/// Renders the Deployment create payload: one container named and labeled
/// after `name`, one port entry, selector and labels `app=name`.
pub fn deployment(config: DeploymentConfig) -> Result<apps::Deployment> {
    let name = required(&config.name, "name")?;
    let image = required(&config.image, "image")?;
    let replicas = resolve_replicas(config.replicas)?;
    let container_port = resolve_port(config.container_port)?;

    let labels = app_labels(&name);

    Ok(apps::Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(apps::DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                match_expressions: None,
            },
            template: core::PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(core::PodSpec {
                    containers: vec![core::Container {
                        name,
                        image: Some(image),
                        ports: Some(vec![core::ContainerPort {
                            container_port,
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
    })
}

/// Renders the Service create payload: the given type (default NodePort)
/// with one port entry where port and targetPort both equal the container
/// port, selecting `app=name`.
pub fn service(config: ServiceConfig) -> Result<core::Service> {
    let name = required(&config.name, "name")?;
    let type_ = config.type_.unwrap_or_default();
    let container_port = resolve_port(config.container_port)?;

    Ok(core::Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(app_labels(&name)),
            ..Default::default()
        },
        spec: Some(core::ServiceSpec {
            type_: Some(type_.as_str().to_string()),
            ports: Some(vec![core::ServicePort {
                port: container_port,
                target_port: Some(IntOrString::Int(container_port)),
                name: Some(SERVICE_PORT_NAME.to_string()),
                ..Default::default()
            }]),
            selector: Some(app_labels(&name)),
            ..Default::default()
        }),
        ..Default::default()
    })
}
