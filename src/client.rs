use crate::error::{Error, Result};
use crate::event::ResourceEvent;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use kube::api::{Api, DeleteParams, ListParams, PostParams, WatchParams};
use kube::core::{NamespaceResourceScope, WatchEvent};
use kube::{Client, Resource};
use std::marker::PhantomData;

/// Capability set the operator assumes of one resource collection.
///
/// `watch` opens a list-then-watch subscription: the current listing is
/// replayed as Add events, then live events follow from the listing's
/// resource version. There is no resume cursor across calls, so a fresh
/// `watch` after an outage may replay Adds for unchanged objects.
#[async_trait]
pub trait ResourceClient<T>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<T>>;
    async fn create(&self, namespace: &str, object: &T) -> Result<()>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
    async fn watch(&self) -> Result<BoxStream<'static, ResourceEvent<T>>>;
}

/// `ResourceClient` backed by the cluster API for one collection, watching
/// either a single namespace or the whole cluster.
pub struct KubeCollection<T> {
    client: Client,
    namespace: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> KubeCollection<T> {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self {
            client,
            namespace,
            _marker: PhantomData,
        }
    }
}

impl<T> KubeCollection<T>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    fn scoped_api(&self) -> Api<T> {
        match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait]
impl<T> ResourceClient<T> for KubeCollection<T>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<T>> {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);

        match api.get(name).await {
            Ok(object) => Ok(Some(object)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn create(&self, namespace: &str, object: &T) -> Result<()> {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);

        api.create(&PostParams::default(), object)
            .await
            .map_err(Error::Kube)?;

        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);

        api.delete(name, &DeleteParams::default())
            .await
            .map_err(Error::Kube)?;

        Ok(())
    }

    async fn watch(&self) -> Result<BoxStream<'static, ResourceEvent<T>>> {
        let api = self.scoped_api();

        let listing = api.list(&ListParams::default()).await.map_err(Error::Kube)?;
        let version = listing.metadata.resource_version.clone().unwrap_or_default();

        let live = api
            .watch(&WatchParams::default(), &version)
            .await
            .map_err(Error::Kube)?;

        let backlog = stream::iter(listing.items.into_iter().map(ResourceEvent::Add));
        let live = live.filter_map(|item| async move {
            match item {
                Ok(WatchEvent::Added(object)) => Some(ResourceEvent::Add(object)),
                Ok(WatchEvent::Modified(object)) => Some(ResourceEvent::Update(object)),
                Ok(WatchEvent::Deleted(object)) => Some(ResourceEvent::Delete(object)),
                Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(response)) => Some(ResourceEvent::Error(Error::Api {
                    code: response.code,
                    message: response.message,
                })),
                Err(e) => Some(ResourceEvent::Error(Error::Kube(e))),
            }
        });

        Ok(backlog.chain(live).boxed())
    }
}
