use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

/// Identifier minted once per externally observed event and threaded through
/// every log line of the work that event spawns. Traceability only; never
/// used for deduplication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Add, EventKind::Update, EventKind::Delete];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Add => write!(f, "ADD"),
            EventKind::Update => write!(f, "UPDATE"),
            EventKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// Normalized item of a watch stream.
#[derive(Debug)]
pub enum ResourceEvent<T> {
    Add(T),
    Update(T),
    Delete(T),
    Error(Error),
}

/// An observed object paired with the correlation id minted for its event.
/// The id travels beside the object rather than inside it.
#[derive(Clone, Debug)]
pub struct Envelope<T> {
    pub object: T,
    pub correlation_id: CorrelationId,
}

#[async_trait]
pub trait EventHandler<T>: Send + Sync {
    async fn handle(&self, kind: EventKind, event: Envelope<T>) -> Result<()>;
}
