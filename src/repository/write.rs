//! Mutations and their notification pipeline
//!
//! Every add, save and remove runs validators, persists, invalidates the
//! affected cache keys and then tells observers. A validator error stops
//! the mutation before anything reaches the backend.

use crate::backend::{SearchBackend, SearchQuery};
use crate::cache::{type_prefix, CacheClient};
use crate::config::RepositoryConfig;
use crate::document::{Document, ScopeKind};
use crate::error::{RepositoryError, Result};
use crate::id::ObjectId;
use crate::repository::hooks::{
    ChangeKind, ChangeObserver, ChangeSet, ChangeValidator, SecondaryCacheKeys,
};
use crate::repository::options::{FindOptions, GetOptions, SaveOptions};
use crate::repository::read::ReadRepository;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, info};

/// Read and write operations for one document type
pub struct Repository<T: Document> {
    read: ReadRepository<T>,
    validators: Vec<Arc<dyn ChangeValidator<T>>>,
    observers: Vec<Arc<dyn ChangeObserver<T>>>,
    secondary_keys: Vec<Arc<dyn SecondaryCacheKeys<T>>>,
}

impl<T: Document> Repository<T> {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        cache: Arc<dyn CacheClient>,
        config: Arc<RepositoryConfig>,
    ) -> Self {
        Self {
            read: ReadRepository::new(backend, cache, config),
            validators: Vec::new(),
            observers: Vec::new(),
            secondary_keys: Vec::new(),
        }
    }

    /// Run `validator` before every mutation
    pub fn with_validator(mut self, validator: Arc<dyn ChangeValidator<T>>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Notify `observer` after every mutation
    pub fn with_observer(mut self, observer: Arc<dyn ChangeObserver<T>>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Keep the keys produced by `keys` in step with the primary entry
    pub fn with_secondary_keys(mut self, keys: Arc<dyn SecondaryCacheKeys<T>>) -> Self {
        self.secondary_keys.push(keys);
        self
    }

    pub fn reader(&self) -> &ReadRepository<T> {
        &self.read
    }

    pub async fn add(&self, document: T, options: SaveOptions) -> Result<T> {
        let mut added = self.add_many(vec![document], options).await?;
        added
            .pop()
            .ok_or_else(|| RepositoryError::Other("add returned no document".to_string()))
    }

    /// Persist new documents, assigning ids to those without one
    pub async fn add_many(&self, mut documents: Vec<T>, options: SaveOptions) -> Result<Vec<T>> {
        if documents.is_empty() {
            return Ok(documents);
        }

        for document in documents.iter_mut() {
            if document.id().is_empty() {
                let created = document.created_utc().unwrap_or_else(Utc::now);
                document.set_id(ObjectId::with_time(created).to_string());
            }
        }

        let targets = self.index_targets(&documents)?;
        let change = ChangeSet::new(ChangeKind::Added, documents)
            .with_notifications(options.send_notifications);

        self.validate(&change).await?;
        self.read.backend().index_documents(&targets).await?;
        self.invalidate(&change).await?;
        if options.add_to_cache {
            self.cache_documents(&change.documents).await?;
        }
        self.notify(&change).await;

        debug!("Added {} {} documents", change.documents.len(), T::DESCRIPTOR.type_name);
        Ok(change.documents)
    }

    pub async fn save(&self, document: T, options: SaveOptions) -> Result<T> {
        let mut saved = self.save_many(vec![document], options).await?;
        saved
            .pop()
            .ok_or_else(|| RepositoryError::Other("save returned no document".to_string()))
    }

    /// Persist changes to existing documents
    pub async fn save_many(&self, documents: Vec<T>, options: SaveOptions) -> Result<Vec<T>> {
        if documents.is_empty() {
            return Ok(documents);
        }
        if documents.iter().any(|document| document.id().is_empty()) {
            return Err(RepositoryError::misuse(format!(
                "cannot save a {} without an id",
                T::DESCRIPTOR.type_name
            )));
        }

        let targets = self.index_targets(&documents)?;
        let ids: Vec<String> = documents.iter().map(|d| d.id().to_string()).collect();
        let originals = self
            .read
            .get_by_ids(&ids, GetOptions::uncached())
            .await?
            .documents;

        let change = ChangeSet::new(ChangeKind::Saved, documents)
            .with_originals(originals)
            .with_notifications(options.send_notifications);

        self.validate(&change).await?;
        self.read.backend().index_documents(&targets).await?;
        self.invalidate(&change).await?;
        if options.add_to_cache {
            self.cache_documents(&change.documents).await?;
        }
        self.notify(&change).await;

        debug!("Saved {} {} documents", change.documents.len(), T::DESCRIPTOR.type_name);
        Ok(change.documents)
    }

    pub async fn remove(&self, document: T, options: SaveOptions) -> Result<()> {
        self.remove_many(vec![document], options).await
    }

    /// Load and remove the document with `id`; `false` when it does not exist
    pub async fn remove_by_id(&self, id: &str, options: SaveOptions) -> Result<bool> {
        match self.read.get_by_id(id, GetOptions::uncached()).await? {
            Some(document) => {
                self.remove(document, options).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn remove_many(&self, documents: Vec<T>, options: SaveOptions) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut targets = Vec::with_capacity(documents.len());
        for document in &documents {
            targets.push((self.index_of(document)?, document.id().to_string()));
        }

        let change = ChangeSet::new(ChangeKind::Removed, documents)
            .with_notifications(options.send_notifications);

        self.validate(&change).await?;
        self.read.backend().delete_documents(&targets).await?;
        self.invalidate(&change).await?;
        self.notify(&change).await;

        debug!("Removed {} {} documents", change.documents.len(), T::DESCRIPTOR.type_name);
        Ok(())
    }

    /// Delete every document of this type without per-document hooks or
    /// notifications, then drop every cache entry of the type
    pub async fn remove_all(&self) -> Result<u64> {
        self.remove_all_matching(&FindOptions::new().include_soft_deleted(true))
            .await
    }

    /// Delete every match without per-document hooks or notifications
    pub async fn remove_all_matching(&self, options: &FindOptions) -> Result<u64> {
        let (indices, query): (Vec<String>, SearchQuery) = self.read.resolve_query(options);
        if indices.is_empty() {
            return Ok(0);
        }

        let deleted = self.read.backend().delete_by_query(&indices, &query).await?;
        if self.read.config().enable_cache {
            self.read
                .cache()
                .remove_by_prefix(&type_prefix(T::DESCRIPTOR.type_name))
                .await?;
        }

        info!("Removed {} {} documents in bulk", deleted, T::DESCRIPTOR.type_name);
        Ok(deleted)
    }

    /// Raw cache keys `document` is reachable under
    pub fn cache_keys_of(&self, document: &T) -> Vec<String> {
        let mut keys = vec![document.id().to_string()];
        for provider in &self.secondary_keys {
            keys.extend(provider.keys(document));
        }
        keys
    }

    fn index_of(&self, document: &T) -> Result<String> {
        self.read.shard().resolve(document.id()).ok_or_else(|| {
            RepositoryError::misuse(format!(
                "cannot resolve the index of {} {}",
                T::DESCRIPTOR.type_name,
                document.id()
            ))
        })
    }

    /// Check ids and scope, and pair each document with its index
    fn index_targets(&self, documents: &[T]) -> Result<Vec<(String, Value)>> {
        let mut targets = Vec::with_capacity(documents.len());
        for document in documents {
            check_scope(document)?;
            targets.push((self.index_of(document)?, serde_json::to_value(document)?));
        }
        Ok(targets)
    }

    async fn validate(&self, change: &ChangeSet<T>) -> Result<()> {
        for validator in &self.validators {
            validator.validate(change).await?;
        }
        Ok(())
    }

    async fn notify(&self, change: &ChangeSet<T>) {
        for observer in &self.observers {
            observer.on_changed(change).await;
        }
    }

    /// Drop the keys of the documents and of their originals, so a
    /// changed secondary key cannot leave a stale entry behind
    async fn invalidate(&self, change: &ChangeSet<T>) -> Result<()> {
        let mut seen = HashSet::new();
        let keys: Vec<String> = change
            .documents
            .iter()
            .chain(change.originals.iter())
            .flat_map(|document| self.cache_keys_of(document))
            .filter(|key| seen.insert(key.clone()))
            .collect();

        self.read.invalidate(&keys).await?;
        Ok(())
    }

    async fn cache_documents(&self, documents: &[T]) -> Result<()> {
        if !self.read.config().enable_cache {
            return Ok(());
        }
        for document in documents {
            // Query-style keys never resolve to soft-deleted documents
            let keys = if document.is_deleted() {
                vec![document.id().to_string()]
            } else {
                self.cache_keys_of(document)
            };
            for key in keys {
                self.read.cache_set(&key, document, None).await?;
            }
        }
        Ok(())
    }
}

impl<T: Document> Deref for Repository<T> {
    type Target = ReadRepository<T>;

    fn deref(&self) -> &Self::Target {
        &self.read
    }
}

fn check_scope<T: Document>(document: &T) -> Result<()> {
    let present = |value: Option<&str>| value.map_or(false, |v| !v.is_empty());
    let type_name = T::DESCRIPTOR.type_name;

    match T::DESCRIPTOR.scope {
        ScopeKind::Global => Ok(()),
        ScopeKind::Organization if present(document.organization_id()) => Ok(()),
        ScopeKind::Project
            if present(document.organization_id()) && present(document.project_id()) =>
        {
            Ok(())
        }
        ScopeKind::Organization => Err(RepositoryError::misuse(format!(
            "{} {} requires an organization id",
            type_name,
            document.id()
        ))),
        ScopeKind::Project => Err(RepositoryError::misuse(format!(
            "{} {} requires organization and project ids",
            type_name,
            document.id()
        ))),
    }
}
