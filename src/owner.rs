use crate::client::ResourceClient;
use crate::crd::ContainerRuntime;
use crate::error::Result;
use std::sync::Arc;

/// Maps an observed Deployment or Service back to its owning
/// ContainerRuntime. Ownership is name/namespace equality only; there is no
/// owner-reference field on the sub-resources.
pub struct OwnerResolver {
    runtimes: Arc<dyn ResourceClient<ContainerRuntime>>,
}

impl OwnerResolver {
    pub fn new(runtimes: Arc<dyn ResourceClient<ContainerRuntime>>) -> Self {
        Self { runtimes }
    }

    pub async fn resolve(&self, namespace: &str, name: &str) -> Result<Option<ContainerRuntime>> {
        self.runtimes.get(namespace, name).await
    }
}
