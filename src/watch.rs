use crate::client::ResourceClient;
use crate::error::{Error, Result};
use crate::event::{CorrelationId, Envelope, EventHandler, EventKind, ResourceEvent};
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::{Resource, ResourceExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Owns one live watch subscription against a resource collection and
/// delivers normalized events to its handler.
///
/// States: Stopped → Running on `start`, Running → Stopped on `stop`, and
/// Running → Running on a stream error followed by the fixed-delay restart.
/// Everything else is a no-op. There is no resume cursor: a restart relists,
/// so the handler must tolerate replayed Add notifications.
pub struct WatchAdapter<T> {
    component: String,
    client: Arc<dyn ResourceClient<T>>,
    handler: Arc<dyn EventHandler<T>>,
    kinds: Vec<EventKind>,
    reconnect_delay: Duration,
    running: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<T> WatchAdapter<T>
where
    T: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    pub fn new(client: Arc<dyn ResourceClient<T>>, handler: Arc<dyn EventHandler<T>>) -> Self {
        Self {
            component: format!("{}-controller", T::kind(&()).to_ascii_lowercase()),
            client,
            handler,
            kinds: EventKind::ALL.to_vec(),
            reconnect_delay: RECONNECT_DELAY,
            running: Arc::new(AtomicBool::new(false)),
            driver: Mutex::new(None),
        }
    }

    /// Restricts which event kinds reach the handler; the rest are dropped
    /// at the subscription.
    pub fn kinds(mut self, kinds: &[EventKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Opens the subscription and begins dispatching. No-op when already
    /// running. On failure to open, logs, reverts to stopped, and returns
    /// the error for the bootstrap layer to act on.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(component = %self.component, "Controller is starting");

        let stream = match self.client.watch().await {
            Ok(stream) => stream,
            Err(err) => {
                error!(component = %self.component, error = %err, "Failed to open watch");
                self.stop();
                return Err(err);
            }
        };

        let driver = tokio::spawn(drive(
            self.component.clone(),
            Arc::clone(&self.client),
            Arc::clone(&self.handler),
            self.kinds.clone(),
            self.reconnect_delay,
            Arc::clone(&self.running),
            stream,
        ));

        if let Ok(mut slot) = self.driver.lock() {
            *slot = Some(driver);
        }

        info!(component = %self.component, "Controller listening");
        Ok(())
    }

    /// Detaches the handler and drops the subscription. No-op when not
    /// running; safe to call repeatedly and on shutdown. A reconcile already
    /// queued from this adapter is not cancelled.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!(component = %self.component, "Controller is stopping");
        if let Ok(mut slot) = self.driver.lock() {
            if let Some(driver) = slot.take() {
                driver.abort();
            }
        }
        info!(component = %self.component, "Controller is stopped");
    }
}

async fn drive<T>(
    component: String,
    client: Arc<dyn ResourceClient<T>>,
    handler: Arc<dyn EventHandler<T>>,
    kinds: Vec<EventKind>,
    reconnect_delay: Duration,
    running: Arc<AtomicBool>,
    mut stream: BoxStream<'static, ResourceEvent<T>>,
) where
    T: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    loop {
        consume(&component, &handler, &kinds, &mut stream).await;
        drop(stream);

        // fixed-delay restart; a stop() during the delay wins, and a failed
        // reopen waits out the same delay before the next attempt
        stream = loop {
            tokio::time::sleep(reconnect_delay).await;
            if !running.load(Ordering::SeqCst) {
                return;
            }

            info!(component = %component, "Controller is starting");
            match client.watch().await {
                Ok(next) => {
                    info!(component = %component, "Controller listening");
                    break next;
                }
                Err(err) => {
                    error!(component = %component, error = %err, "Failed to reopen watch");
                }
            }
        };
    }
}

/// Dispatches events until the stream errors or ends.
async fn consume<T>(
    component: &str,
    handler: &Arc<dyn EventHandler<T>>,
    kinds: &[EventKind],
    stream: &mut BoxStream<'static, ResourceEvent<T>>,
) where
    T: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    while let Some(event) = stream.next().await {
        match event {
            ResourceEvent::Add(object) => {
                dispatch(component, handler, kinds, EventKind::Add, object).await;
            }
            ResourceEvent::Update(object) => {
                dispatch(component, handler, kinds, EventKind::Update, object).await;
            }
            ResourceEvent::Delete(object) => {
                dispatch(component, handler, kinds, EventKind::Delete, object).await;
            }
            ResourceEvent::Error(err) => {
                let correlation_id = CorrelationId::new();
                info!(
                    component = %component,
                    correlation_id = %correlation_id,
                    "Processing ERROR event started"
                );
                report(component, &err, correlation_id);
                info!(
                    component = %component,
                    correlation_id = %correlation_id,
                    "Restarting controller"
                );
                info!(
                    component = %component,
                    correlation_id = %correlation_id,
                    "Processing ERROR event ended"
                );
                return;
            }
        }
    }
}

async fn dispatch<T>(
    component: &str,
    handler: &Arc<dyn EventHandler<T>>,
    kinds: &[EventKind],
    kind: EventKind,
    object: T,
) where
    T: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    if !kinds.contains(&kind) {
        return;
    }

    let correlation_id = CorrelationId::new();
    let name = object.name_any();
    let label = T::kind(&()).to_ascii_lowercase();

    info!(
        component = %component,
        correlation_id = %correlation_id,
        "Processing {kind} event started for {label}/{name}"
    );

    if let Err(err) = handler
        .handle(
            kind,
            Envelope {
                object,
                correlation_id,
            },
        )
        .await
    {
        report(component, &err, correlation_id);
    }

    info!(
        component = %component,
        correlation_id = %correlation_id,
        "Processing {kind} event ended for {label}/{name}"
    );
}

fn report(component: &str, err: &Error, correlation_id: CorrelationId) {
    match err.status_code() {
        Some(code) => error!(
            component = %component,
            correlation_id = %correlation_id,
            status = code,
            "{err}"
        ),
        None => error!(
            component = %component,
            correlation_id = %correlation_id,
            error = %err,
            "Event handler failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ContainerRuntime, ContainerRuntimeSpec};
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    fn runtime(name: &str) -> ContainerRuntime {
        let mut runtime = ContainerRuntime::new(
            name,
            ContainerRuntimeSpec {
                image: "nginx:1.25".to_string(),
                replicas: 1,
                container_port: 80,
            },
        );
        runtime.metadata.namespace = Some("default".to_string());
        runtime
    }

    /// Watch source that hands out prepared streams and counts how many
    /// subscriptions were opened.
    struct ScriptedSource {
        streams: Mutex<VecDeque<Vec<ResourceEvent<ContainerRuntime>>>>,
        watches: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(streams: Vec<Vec<ResourceEvent<ContainerRuntime>>>) -> Self {
            Self {
                streams: Mutex::new(streams.into_iter().collect()),
                watches: AtomicUsize::new(0),
            }
        }

        fn watch_count(&self) -> usize {
            self.watches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceClient<ContainerRuntime> for ScriptedSource {
        async fn get(&self, _namespace: &str, _name: &str) -> Result<Option<ContainerRuntime>> {
            Ok(None)
        }

        async fn create(&self, _namespace: &str, _object: &ContainerRuntime) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _namespace: &str, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn watch(&self) -> Result<BoxStream<'static, ResourceEvent<ContainerRuntime>>> {
            self.watches.fetch_add(1, Ordering::SeqCst);
            let events = self
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            // leave the stream open after the scripted events
            Ok(stream::iter(events).chain(stream::pending()).boxed())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(EventKind, String, CorrelationId)>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<(EventKind, String, CorrelationId)> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler<ContainerRuntime> for Recorder {
        async fn handle(&self, kind: EventKind, event: Envelope<ContainerRuntime>) -> Result<()> {
            self.events.lock().unwrap().push((
                kind,
                event.object.name_any(),
                event.correlation_id,
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_events_with_fresh_correlation_ids() {
        let source = Arc::new(ScriptedSource::new(vec![vec![
            ResourceEvent::Add(runtime("a")),
            ResourceEvent::Update(runtime("a")),
        ]]));
        let recorder = Arc::new(Recorder::default());
        let adapter = WatchAdapter::new(
            Arc::clone(&source) as Arc<dyn ResourceClient<ContainerRuntime>>,
            Arc::clone(&recorder) as Arc<dyn EventHandler<ContainerRuntime>>,
        );

        adapter.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = recorder.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, EventKind::Add);
        assert_eq!(seen[1].0, EventKind::Update);
        assert_ne!(seen[0].2, seen[1].2, "each event mints its own id");

        adapter.stop();
    }

    #[tokio::test]
    async fn filtered_kinds_never_reach_the_handler() {
        let source = Arc::new(ScriptedSource::new(vec![vec![
            ResourceEvent::Add(runtime("a")),
            ResourceEvent::Update(runtime("a")),
            ResourceEvent::Delete(runtime("a")),
        ]]));
        let recorder = Arc::new(Recorder::default());
        let adapter = WatchAdapter::new(
            Arc::clone(&source) as Arc<dyn ResourceClient<ContainerRuntime>>,
            Arc::clone(&recorder) as Arc<dyn EventHandler<ContainerRuntime>>,
        )
        .kinds(&[EventKind::Update, EventKind::Delete]);

        adapter.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let kinds: Vec<EventKind> = recorder.seen().into_iter().map(|(k, _, _)| k).collect();
        assert_eq!(kinds, vec![EventKind::Update, EventKind::Delete]);

        adapter.stop();
    }

    #[tokio::test]
    async fn stream_error_restarts_the_watch_after_the_delay() {
        let source = Arc::new(ScriptedSource::new(vec![
            vec![ResourceEvent::Error(Error::Other("stream broke".to_string()))],
            vec![],
        ]));
        let recorder = Arc::new(Recorder::default());
        let adapter = WatchAdapter::new(
            Arc::clone(&source) as Arc<dyn ResourceClient<ContainerRuntime>>,
            Arc::clone(&recorder) as Arc<dyn EventHandler<ContainerRuntime>>,
        )
        .reconnect_delay(Duration::from_millis(20));

        adapter.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(source.watch_count(), 2);
        assert!(adapter.is_running());

        adapter.stop();
    }

    #[tokio::test]
    async fn stop_before_the_delay_elapses_cancels_the_restart() {
        let source = Arc::new(ScriptedSource::new(vec![
            vec![ResourceEvent::Error(Error::Other("stream broke".to_string()))],
            vec![],
        ]));
        let recorder = Arc::new(Recorder::default());
        let adapter = WatchAdapter::new(
            Arc::clone(&source) as Arc<dyn ResourceClient<ContainerRuntime>>,
            Arc::clone(&recorder) as Arc<dyn EventHandler<ContainerRuntime>>,
        )
        .reconnect_delay(Duration::from_millis(200));

        adapter.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        adapter.stop();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(source.watch_count(), 1);
        assert!(!adapter.is_running());
    }

    #[tokio::test]
    async fn start_is_a_no_op_while_running() {
        let source = Arc::new(ScriptedSource::new(vec![vec![], vec![]]));
        let recorder = Arc::new(Recorder::default());
        let adapter = WatchAdapter::new(
            Arc::clone(&source) as Arc<dyn ResourceClient<ContainerRuntime>>,
            Arc::clone(&recorder) as Arc<dyn EventHandler<ContainerRuntime>>,
        );

        adapter.start().await.unwrap();
        adapter.start().await.unwrap();

        assert_eq!(source.watch_count(), 1);

        adapter.stop();
        adapter.stop();
        assert!(!adapter.is_running());
    }
}
