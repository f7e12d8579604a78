//! Outbound change events
//!
//! Repositories never wait on the message bus. Events go through an
//! [`OutboundQueue`] whose drain task hands them to a [`MessagePublisher`];
//! publish failures are logged and dropped.

use crate::document::Document;
use crate::error::{RepositoryError, Result};
use crate::repository::{ChangeKind, ChangeObserver, ChangeSet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Saved,
    Removed,
}

impl From<ChangeKind> for ChangeType {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Added | ChangeKind::Saved => ChangeType::Saved,
            ChangeKind::Removed => ChangeType::Removed,
        }
    }
}

/// Event published after a document changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChanged {
    pub change_type: ChangeType,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub entity_type: String,
}

impl EntityChanged {
    pub fn for_document<T: Document>(document: &T, change_type: ChangeType) -> Self {
        Self {
            change_type,
            entity_id: document.id().to_string(),
            organization_id: document.organization_id().map(str::to_string),
            project_id: document.project_id().map(str::to_string),
            entity_type: T::DESCRIPTOR.type_name.to_string(),
        }
    }
}

/// Message bus port
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish `message`, delivering it after `delay` when one is given
    async fn publish(&self, message: &EntityChanged, delay: Option<Duration>) -> Result<()>;
}

struct Outbound {
    message: EntityChanged,
    delay: Option<Duration>,
}

/// Fire-and-forget handle to the publication task
#[derive(Clone)]
pub struct OutboundQueue {
    sender: mpsc::UnboundedSender<Outbound>,
}

impl OutboundQueue {
    /// Start the drain task. It ends once every queue handle is dropped.
    pub fn spawn(publisher: Arc<dyn MessagePublisher>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Outbound>();

        let handle = tokio::spawn(async move {
            while let Some(outbound) = receiver.recv().await {
                if let Err(e) = publisher.publish(&outbound.message, outbound.delay).await {
                    warn!(
                        "Failed to publish {:?} for {} {}: {}",
                        outbound.message.change_type,
                        outbound.message.entity_type,
                        outbound.message.entity_id,
                        e
                    );
                }
            }
            debug!("Outbound queue drained and closed");
        });

        (Self { sender }, handle)
    }

    /// Queue `message`; never blocks and never fails the caller
    pub fn submit(&self, message: EntityChanged, delay: Option<Duration>) {
        if self.sender.send(Outbound { message, delay }).is_err() {
            warn!("Outbound queue is closed, dropping change event");
        }
    }
}

/// Observer turning repository changes into [`EntityChanged`] events
pub struct ChangePublisher {
    queue: OutboundQueue,
}

impl ChangePublisher {
    pub fn new(queue: OutboundQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl<T: Document> ChangeObserver<T> for ChangePublisher {
    async fn on_changed(&self, change: &ChangeSet<T>) {
        if !change.send_notifications {
            return;
        }
        let change_type = ChangeType::from(change.kind);
        for document in &change.documents {
            self.queue
                .submit(EntityChanged::for_document(document, change_type), None);
        }
    }
}

/// Publisher recording every delivered message in memory
#[derive(Default)]
pub struct InMemoryMessageBus {
    delivered: Arc<Mutex<Vec<EntityChanged>>>,
    notify: Arc<Notify>,
    failure: Mutex<Option<String>>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail, or restore with `None`
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = message.map(str::to_string);
    }

    /// Messages delivered so far
    pub fn delivered(&self) -> Vec<EntityChanged> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until at least `count` messages were delivered or `timeout`
    /// elapsed, returning what was delivered
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<EntityChanged> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            let delivered = self.delivered();
            if delivered.len() >= count {
                return delivered;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.delivered();
            }
        }
    }

    fn record(delivered: &Mutex<Vec<EntityChanged>>, notify: &Notify, message: EntityChanged) {
        delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        notify.notify_waiters();
    }
}

#[async_trait]
impl MessagePublisher for InMemoryMessageBus {
    async fn publish(&self, message: &EntityChanged, delay: Option<Duration>) -> Result<()> {
        if let Some(failure) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(RepositoryError::Other(failure));
        }

        match delay {
            Some(delay) if !delay.is_zero() => {
                let delivered = self.delivered.clone();
                let notify = self.notify.clone();
                let message = message.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    Self::record(&delivered, &notify, message);
                });
            }
            _ => Self::record(&self.delivered, &self.notify, message.clone()),
        }
        Ok(())
    }
}
