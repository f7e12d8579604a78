//! Change notification hooks
//!
//! Validators run before a mutation is persisted and may veto it. Observers
//! run after persistence and cache invalidation and cannot fail the
//! operation.

use crate::document::Document;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Saved,
    Removed,
}

/// Documents affected by one mutation
#[derive(Debug, Clone)]
pub struct ChangeSet<T> {
    pub kind: ChangeKind,
    pub documents: Vec<T>,
    /// Stored versions of saved documents, loaded before the save
    pub originals: Vec<T>,
    pub send_notifications: bool,
}

impl<T: Document> ChangeSet<T> {
    pub fn new(kind: ChangeKind, documents: Vec<T>) -> Self {
        Self {
            kind,
            documents,
            originals: Vec::new(),
            send_notifications: true,
        }
    }

    pub fn with_originals(mut self, originals: Vec<T>) -> Self {
        self.originals = originals;
        self
    }

    pub fn with_notifications(mut self, send: bool) -> Self {
        self.send_notifications = send;
        self
    }

    /// Stored version of `document`, if it was loaded
    pub fn original_of(&self, document: &T) -> Option<&T> {
        self.originals.iter().find(|original| original.id() == document.id())
    }
}

/// Pre-persistence check; an error aborts the mutation
#[async_trait]
pub trait ChangeValidator<T: Document>: Send + Sync {
    async fn validate(&self, change: &ChangeSet<T>) -> Result<()>;
}

/// Post-persistence notification
#[async_trait]
pub trait ChangeObserver<T: Document>: Send + Sync {
    async fn on_changed(&self, change: &ChangeSet<T>);
}

/// Extra cache keys a document is reachable under, besides its id
pub trait SecondaryCacheKeys<T: Document>: Send + Sync {
    /// Raw (unscoped) keys for `document`
    fn keys(&self, document: &T) -> Vec<String>;
}
