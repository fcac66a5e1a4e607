use crate::client::{KubeCollection, ResourceClient};
use crate::config::OperatorConfig;
use crate::crd::ContainerRuntime;
use crate::event::{Envelope, EventHandler, EventKind};
use crate::owner::OwnerResolver;
use crate::queue::{ReconcileQueue, ReconcileTask};
use crate::reconciler::Reconciler;
use crate::watch::WatchAdapter;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Client, Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Enqueues every observed ContainerRuntime event for reconciliation.
struct EnqueueRuntime {
    queue: Arc<ReconcileQueue>,
}

#[async_trait]
impl EventHandler<ContainerRuntime> for EnqueueRuntime {
    async fn handle(
        &self,
        kind: EventKind,
        event: Envelope<ContainerRuntime>,
    ) -> crate::error::Result<()> {
        self.queue.enqueue(ReconcileTask::for_runtime(
            &event.object,
            kind,
            event.correlation_id,
        ));
        Ok(())
    }
}

/// Resolves the owning ContainerRuntime of an observed Deployment/Service
/// and enqueues it under the event's correlation id. Events whose object has
/// no owner are dropped.
struct EnqueueOwner {
    resolver: Arc<OwnerResolver>,
    queue: Arc<ReconcileQueue>,
}

#[async_trait]
impl<T> EventHandler<T> for EnqueueOwner
where
    T: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    async fn handle(&self, kind: EventKind, event: Envelope<T>) -> crate::error::Result<()> {
        let namespace = event.object.namespace().unwrap_or_default();
        let name = event.object.name_any();

        match self.resolver.resolve(&namespace, &name).await? {
            Some(owner) => {
                self.queue.enqueue(ReconcileTask::for_runtime(
                    &owner,
                    kind,
                    event.correlation_id,
                ));
            }
            None => {
                let label = T::kind(&()).to_ascii_lowercase();
                info!(
                    component = "owner-resolver",
                    correlation_id = %event.correlation_id,
                    "Nothing to do for {label}/{name}"
                );
            }
        }
        Ok(())
    }
}

/// The assembled pipeline: three watch subscriptions feeding one serialized
/// reconcile queue.
pub struct Operator {
    runtimes: WatchAdapter<ContainerRuntime>,
    deployments: WatchAdapter<Deployment>,
    services: WatchAdapter<Service>,
    queue: Arc<ReconcileQueue>,
}

impl Operator {
    pub fn new(client: Client, config: &OperatorConfig) -> Self {
        let runtimes: Arc<dyn ResourceClient<ContainerRuntime>> = Arc::new(
            KubeCollection::new(client.clone(), config.namespace.clone()),
        );
        let deployments: Arc<dyn ResourceClient<Deployment>> = Arc::new(KubeCollection::new(
            client.clone(),
            config.namespace.clone(),
        ));
        let services: Arc<dyn ResourceClient<Service>> =
            Arc::new(KubeCollection::new(client, config.namespace.clone()));

        Self::with_clients(runtimes, deployments, services, config.reconnect_delay)
    }

    /// Wires the pipeline from injected collection clients. Tests use this
    /// to substitute in-memory collections.
    pub fn with_clients(
        runtimes: Arc<dyn ResourceClient<ContainerRuntime>>,
        deployments: Arc<dyn ResourceClient<Deployment>>,
        services: Arc<dyn ResourceClient<Service>>,
        reconnect_delay: Duration,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&runtimes),
            Arc::clone(&deployments),
            Arc::clone(&services),
        ));
        let queue = Arc::new(ReconcileQueue::new(move |task: ReconcileTask| {
            let reconciler = Arc::clone(&reconciler);
            async move { reconciler.sync(&task).await }
        }));
        let resolver = Arc::new(OwnerResolver::new(Arc::clone(&runtimes)));

        let runtime_adapter = WatchAdapter::new(
            runtimes,
            Arc::new(EnqueueRuntime {
                queue: Arc::clone(&queue),
            }),
        )
        .reconnect_delay(reconnect_delay);

        // owned collections react to Update and Delete only
        let deployment_adapter = WatchAdapter::new(
            deployments,
            Arc::new(EnqueueOwner {
                resolver: Arc::clone(&resolver),
                queue: Arc::clone(&queue),
            }),
        )
        .kinds(&[EventKind::Update, EventKind::Delete])
        .reconnect_delay(reconnect_delay);

        let service_adapter = WatchAdapter::new(
            services,
            Arc::new(EnqueueOwner {
                resolver,
                queue: Arc::clone(&queue),
            }),
        )
        .kinds(&[EventKind::Update, EventKind::Delete])
        .reconnect_delay(reconnect_delay);

        Self {
            runtimes: runtime_adapter,
            deployments: deployment_adapter,
            services: service_adapter,
            queue,
        }
    }

    pub async fn start(&self) -> crate::error::Result<()> {
        self.runtimes.start().await?;
        self.deployments.start().await?;
        self.services.start().await?;
        Ok(())
    }

    /// Stops the subscriptions and the queue. A reconcile pass already
    /// executing finishes naturally; queued work is discarded.
    pub fn shutdown(&self) {
        self.runtimes.stop();
        self.deployments.stop();
        self.services.stop();
        self.queue.shutdown();
    }
}
