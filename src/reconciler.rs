use crate::client::ResourceClient;
use crate::crd::{ContainerRuntime, ContainerRuntimeSpec};
use crate::error::Result;
use crate::event::CorrelationId;
use crate::manifest::{self, DeploymentConfig, ServiceConfig};
use crate::queue::ReconcileTask;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::info;

const COMPONENT: &str = "container-runtime-service";

/// Converges one ContainerRuntime's desired state into a matching Deployment
/// and Service. Convergence never patches: a mismatched sub-resource is
/// deleted, and the DELETE notification that deletion produces drives the
/// pass that recreates it.
pub struct Reconciler {
    runtimes: Arc<dyn ResourceClient<ContainerRuntime>>,
    deployments: Arc<dyn ResourceClient<Deployment>>,
    services: Arc<dyn ResourceClient<Service>>,
}

impl Reconciler {
    pub fn new(
        runtimes: Arc<dyn ResourceClient<ContainerRuntime>>,
        deployments: Arc<dyn ResourceClient<Deployment>>,
        services: Arc<dyn ResourceClient<Service>>,
    ) -> Self {
        Self {
            runtimes,
            deployments,
            services,
        }
    }

    /// Re-fetches the authoritative ContainerRuntime for the task and
    /// converges its sub-resources. A snapshot carried by the task is never
    /// trusted; only the (name, namespace) reference is used.
    pub async fn sync(&self, task: &ReconcileTask) -> Result<()> {
        let cid = task.correlation_id;
        info!(
            component = COMPONENT,
            correlation_id = %cid,
            "Syncing container runtime - {}",
            task.name
        );

        match self.runtimes.get(&task.namespace, &task.name).await? {
            None => {
                self.cascade_delete(&task.namespace, &task.name, cid).await?;
            }
            Some(runtime) => {
                let deployment = self.sync_deployment(&runtime, cid).await;
                let service = self.sync_service(&runtime, cid).await;
                deployment.and(service)?;
            }
        }

        info!(
            component = COMPONENT,
            correlation_id = %cid,
            "Synced container runtime - {}",
            task.name
        );
        Ok(())
    }

    /// The owning ContainerRuntime is gone: remove both sub-resources of the
    /// same name. The deletes are independent; both are attempted even if
    /// the first fails.
    async fn cascade_delete(
        &self,
        namespace: &str,
        name: &str,
        cid: CorrelationId,
    ) -> Result<()> {
        let deployment = self.delete_deployment(namespace, name, cid).await;
        let service = self.delete_service(namespace, name, cid).await;
        deployment.and(service)
    }

    async fn sync_deployment(&self, runtime: &ContainerRuntime, cid: CorrelationId) -> Result<()> {
        let name = runtime.name_any();
        let namespace = runtime.namespace().unwrap_or_default();

        match self.deployments.get(&namespace, &name).await? {
            None => self.create_deployment(runtime, cid).await,
            Some(existing) => {
                if is_deployment_synced(&runtime.spec, &existing) {
                    info!(
                        component = COMPONENT,
                        correlation_id = %cid,
                        "Deployment is unchanged - {name}"
                    );
                    Ok(())
                } else {
                    self.delete_deployment(&namespace, &name, cid).await
                }
            }
        }
    }

    async fn sync_service(&self, runtime: &ContainerRuntime, cid: CorrelationId) -> Result<()> {
        let name = runtime.name_any();
        let namespace = runtime.namespace().unwrap_or_default();

        match self.services.get(&namespace, &name).await? {
            None => self.create_service(runtime, cid).await,
            Some(existing) => {
                if is_service_synced(&name, &runtime.spec, &existing) {
                    info!(
                        component = COMPONENT,
                        correlation_id = %cid,
                        "Service is unchanged - {name}"
                    );
                    Ok(())
                } else {
                    self.delete_service(&namespace, &name, cid).await
                }
            }
        }
    }

    async fn create_deployment(&self, runtime: &ContainerRuntime, cid: CorrelationId) -> Result<()> {
        let name = runtime.name_any();
        let namespace = runtime.namespace().unwrap_or_default();

        let rendered = manifest::deployment(DeploymentConfig {
            name: name.clone(),
            image: runtime.spec.image.clone(),
            replicas: Some(runtime.spec.replicas),
            container_port: Some(runtime.spec.container_port),
        })?;

        info!(
            component = COMPONENT,
            correlation_id = %cid,
            "Creating deployment - {name}"
        );
        match self.deployments.create(&namespace, &rendered).await {
            Ok(()) => {}
            // 409: the object already exists
            Err(err) if err.is_conflict() => {
                info!(component = COMPONENT, correlation_id = %cid, "{err}");
            }
            Err(err) => return Err(err),
        }
        info!(
            component = COMPONENT,
            correlation_id = %cid,
            "Created deployment - {name}"
        );
        Ok(())
    }

    async fn create_service(&self, runtime: &ContainerRuntime, cid: CorrelationId) -> Result<()> {
        let name = runtime.name_any();
        let namespace = runtime.namespace().unwrap_or_default();

        let rendered = manifest::service(ServiceConfig {
            name: name.clone(),
            type_: None,
            container_port: Some(runtime.spec.container_port),
        })?;

        info!(
            component = COMPONENT,
            correlation_id = %cid,
            "Creating service - {name}"
        );
        match self.services.create(&namespace, &rendered).await {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                info!(component = COMPONENT, correlation_id = %cid, "{err}");
            }
            Err(err) => return Err(err),
        }
        info!(
            component = COMPONENT,
            correlation_id = %cid,
            "Created service - {name}"
        );
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str, cid: CorrelationId) -> Result<()> {
        info!(
            component = COMPONENT,
            correlation_id = %cid,
            "Deleting deployment - {name}"
        );
        match self.deployments.delete(namespace, name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                info!(
                    component = COMPONENT,
                    correlation_id = %cid,
                    "Nothing to do for deployment/{name}"
                );
            }
            Err(err) => return Err(err),
        }
        info!(
            component = COMPONENT,
            correlation_id = %cid,
            "Deleted deployment - {name}"
        );
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str, cid: CorrelationId) -> Result<()> {
        info!(
            component = COMPONENT,
            correlation_id = %cid,
            "Deleting service - {name}"
        );
        match self.services.delete(namespace, name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                info!(
                    component = COMPONENT,
                    correlation_id = %cid,
                    "Nothing to do for service/{name}"
                );
            }
            Err(err) => return Err(err),
        }
        info!(
            component = COMPONENT,
            correlation_id = %cid,
            "Deleted service - {name}"
        );
        Ok(())
    }
}

/// A live Deployment matches when the replica count is equal, it runs
/// exactly one container, that container's image is equal, and its port list
/// carries the desired containerPort.
pub fn is_deployment_synced(spec: &ContainerRuntimeSpec, deployment: &Deployment) -> bool {
    let deployment_spec = match deployment.spec.as_ref() {
        Some(s) => s,
        None => return false,
    };
    if deployment_spec.replicas != Some(spec.replicas) {
        return false;
    }

    let pod_spec = match deployment_spec.template.spec.as_ref() {
        Some(s) => s,
        None => return false,
    };
    if pod_spec.containers.len() != 1 {
        return false;
    }

    let container = &pod_spec.containers[0];
    if container.image.as_deref() != Some(spec.image.as_str()) {
        return false;
    }

    container
        .ports
        .as_ref()
        .map_or(false, |ports| {
            ports.iter().any(|p| p.container_port == spec.container_port)
        })
}

/// A live Service matches when its type is NodePort, some port entry maps
/// the desired containerPort onto itself, and the selector is exactly
/// `app = name`.
pub fn is_service_synced(name: &str, spec: &ContainerRuntimeSpec, service: &Service) -> bool {
    let service_spec = match service.spec.as_ref() {
        Some(s) => s,
        None => return false,
    };
    if service_spec.type_.as_deref() != Some("NodePort") {
        return false;
    }

    let port_matches = service_spec.ports.as_ref().map_or(false, |ports| {
        ports.iter().any(|p| {
            p.port == spec.container_port
                && p.target_port == Some(IntOrString::Int(spec.container_port))
        })
    });
    if !port_matches {
        return false;
    }

    match service_spec.selector.as_ref() {
        Some(selector) => {
            selector.len() == 1 && selector.get("app").map(String::as_str) == Some(name)
        }
        None => false,
    }
}
