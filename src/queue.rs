use crate::crd::ContainerRuntime;
use crate::error::Result;
use crate::event::{CorrelationId, EventKind};
use kube::ResourceExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const COMPONENT: &str = "reconcile-queue";

/// One unit of reconciliation work. Carries only the owner reference; the
/// reconciler re-fetches the authoritative object before acting.
#[derive(Clone, Debug)]
pub struct ReconcileTask {
    pub name: String,
    pub namespace: String,
    pub trigger: EventKind,
    pub correlation_id: CorrelationId,
}

impl ReconcileTask {
    pub fn for_runtime(
        runtime: &ContainerRuntime,
        trigger: EventKind,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            name: runtime.name_any(),
            namespace: runtime.namespace().unwrap_or_default(),
            trigger,
            correlation_id,
        }
    }
}

/// FIFO task runner with exactly one worker. Concurrency 1 is a global lock
/// over all cluster-mutating work, not a per-object lock: tasks for
/// unrelated objects never run concurrently either.
pub struct ReconcileQueue {
    tx: mpsc::UnboundedSender<ReconcileTask>,
    accepting: Arc<AtomicBool>,
}

impl ReconcileQueue {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(ReconcileTask) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReconcileTask>();
        let accepting = Arc::new(AtomicBool::new(true));

        let worker_accepting = Arc::clone(&accepting);
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                if !worker_accepting.load(Ordering::SeqCst) {
                    debug!(
                        component = COMPONENT,
                        correlation_id = %task.correlation_id,
                        "Discarding queued task for {} after shutdown",
                        task.name
                    );
                    continue;
                }

                let correlation_id = task.correlation_id;
                let name = task.name.clone();
                if let Err(err) = handler(task).await {
                    error!(
                        component = COMPONENT,
                        correlation_id = %correlation_id,
                        error = %err,
                        "Reconcile task failed for {name}"
                    );
                }
            }
        });

        Self { tx, accepting }
    }

    /// Appends a task to the tail of the queue. Tasks without an owner name
    /// are dropped silently, as is anything enqueued after `shutdown`.
    pub fn enqueue(&self, task: ReconcileTask) {
        if task.name.is_empty() {
            return;
        }
        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }

        info!(
            component = COMPONENT,
            correlation_id = %task.correlation_id,
            "Queued container runtime for sync - {}",
            task.name
        );
        let _ = self.tx.send(task);
    }

    /// Stops accepting work and discards whatever is still queued. A task
    /// already executing finishes naturally.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }
}
