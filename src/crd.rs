use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired shape of one containerized workload: an image, a replica count,
/// and the port its container listens on. The operator owns exactly one
/// Deployment and one Service per ContainerRuntime, matched by name.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kubeblocks.io",
    version = "v1",
    kind = "ContainerRuntime",
    plural = "containerruntimes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRuntimeSpec {
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default = "default_container_port")]
    pub container_port: i32,
}

fn default_replicas() -> i32 {
    1
}

fn default_container_port() -> i32 {
    80
}
