//! Stack repository
//!
//! Stacks are reachable by id and by `(project, signature hash)`, the key
//! event ingestion uses to find the stack a new occurrence belongs to.
//! Occurrence counters are only ever changed through one atomic
//! conditional update per call, never by read-modify-write.

use crate::backend::{Filter, SearchBackend, SortField, UpdateOutcome, UpdateScript};
use crate::cache::CacheClient;
use crate::config::RepositoryConfig;
use crate::document::Document;
use crate::error::{RepositoryError, Result};
use crate::messaging::{ChangePublisher, ChangeType, EntityChanged, OutboundQueue};
use crate::repository::{
    ChangeKind, ChangeSet, ChangeValidator, FindOptions, FindResults, GetOptions, Repository,
    SaveOptions, SecondaryCacheKeys,
};
use crate::schema::event::EventRepository;
use crate::schema::types::{stack_fields, Stack};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Raw cache key of the stack with `signature_hash` in `project_id`
pub fn signature_cache_key(project_id: &str, signature_hash: &str, stacking_version: u32) -> String {
    format!("{}-{}-{}", project_id, signature_hash, stacking_version)
}

/// Keeps the signature entry in step with the primary entry
pub struct SignatureCacheKey {
    stacking_version: u32,
}

impl SignatureCacheKey {
    pub fn new(stacking_version: u32) -> Self {
        Self { stacking_version }
    }
}

impl SecondaryCacheKeys<Stack> for SignatureCacheKey {
    fn keys(&self, stack: &Stack) -> Vec<String> {
        if stack.project_id.is_empty() || stack.signature_hash.is_empty() {
            return Vec::new();
        }
        vec![signature_cache_key(
            &stack.project_id,
            &stack.signature_hash,
            self.stacking_version,
        )]
    }
}

/// Refuses to remove stacks that still have events
pub struct StackReferenceGuard {
    events: Arc<EventRepository>,
}

impl StackReferenceGuard {
    pub fn new(events: Arc<EventRepository>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl ChangeValidator<Stack> for StackReferenceGuard {
    async fn validate(&self, change: &ChangeSet<Stack>) -> Result<()> {
        if change.kind != ChangeKind::Removed {
            return Ok(());
        }

        for stack in &change.documents {
            let events = self.events.count_by_stack_id(stack.id()).await?;
            if events > 0 {
                return Err(RepositoryError::IntegrityViolation(format!(
                    "stack {} still has {} events",
                    stack.id(),
                    events
                )));
            }
        }
        Ok(())
    }
}

/// Occurrences to fold into a stack's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceIncrement {
    pub stack_id: String,
    /// Scope copied onto the change event
    pub organization_id: Option<String>,
    pub project_id: Option<String>,
    pub min_occurrence: DateTime<Utc>,
    pub max_occurrence: DateTime<Utc>,
    pub count: i64,
    pub send_notifications: bool,
}

impl OccurrenceIncrement {
    pub fn new(
        stack_id: impl Into<String>,
        min_occurrence: DateTime<Utc>,
        max_occurrence: DateTime<Utc>,
        count: i64,
    ) -> Self {
        Self {
            stack_id: stack_id.into(),
            organization_id: None,
            project_id: None,
            min_occurrence,
            max_occurrence,
            count,
            send_notifications: true,
        }
    }

    pub fn scoped(mut self, organization_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self.project_id = Some(project_id.into());
        self
    }

    pub fn send_notifications(mut self, send: bool) -> Self {
        self.send_notifications = send;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.stack_id.is_empty() {
            return Err(RepositoryError::misuse("stack id must not be empty"));
        }
        if self.min_occurrence > self.max_occurrence {
            return Err(RepositoryError::misuse(format!(
                "min occurrence {} is after max occurrence {}",
                self.min_occurrence, self.max_occurrence
            )));
        }
        if self.count <= 0 {
            return Err(RepositoryError::misuse(format!(
                "occurrence count must be positive, got {}",
                self.count
            )));
        }
        Ok(())
    }
}

/// Repository of [`Stack`] documents
pub struct StackRepository {
    repository: Repository<Stack>,
    queue: OutboundQueue,
}

impl StackRepository {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        cache: Arc<dyn CacheClient>,
        config: Arc<RepositoryConfig>,
        events: Arc<EventRepository>,
        queue: OutboundQueue,
    ) -> Self {
        let stacking_version = config.stacking_version;
        let repository = Repository::new(backend, cache, config)
            .with_secondary_keys(Arc::new(SignatureCacheKey::new(stacking_version)))
            .with_validator(Arc::new(StackReferenceGuard::new(events)))
            .with_observer(Arc::new(ChangePublisher::new(queue.clone())));

        Self { repository, queue }
    }

    fn signature_key(&self, project_id: &str, signature_hash: &str) -> String {
        signature_cache_key(project_id, signature_hash, self.config().stacking_version)
    }

    /// Cached lookup of the stack a signature belongs to
    pub async fn get_by_signature(
        &self,
        project_id: &str,
        signature_hash: &str,
    ) -> Result<Option<Stack>> {
        if project_id.is_empty() || signature_hash.is_empty() {
            return Ok(None);
        }

        let options = FindOptions::new()
            .query(Filter::And(vec![
                Filter::term(stack_fields::PROJECT_ID, project_id),
                Filter::term(stack_fields::SIGNATURE_HASH, signature_hash),
            ]))
            .cache_key(self.signature_key(project_id, signature_hash));
        self.repository.find_one(&options).await
    }

    /// Stacks of `project_id`, most recently seen first unless `options`
    /// sorts otherwise
    pub async fn get_by_project(
        &self,
        project_id: &str,
        options: FindOptions,
    ) -> Result<FindResults<Stack>> {
        if project_id.is_empty() {
            return Ok(FindResults::empty());
        }

        let mut options = options.and_system_filter(Filter::term(stack_fields::PROJECT_ID, project_id));
        if options.sort.is_empty() {
            options = options.sort(SortField::desc(stack_fields::LAST_OCCURRENCE));
        }
        self.repository.find(&options).await
    }

    /// Fold occurrences into the stack's counters in one atomic update.
    ///
    /// Returns `false` when the stack does not exist or every attempt lost
    /// to a concurrent writer; both are logged and not errors.
    pub async fn increment_counters(&self, increment: OccurrenceIncrement) -> Result<bool> {
        increment.validate()?;

        let script = UpdateScript::new()
            .set_if_earlier(
                stack_fields::FIRST_OCCURRENCE,
                serde_json::to_value(increment.min_occurrence)?,
                Some(stack_fields::TOTAL_OCCURRENCES),
            )
            .set_if_later(
                stack_fields::LAST_OCCURRENCE,
                serde_json::to_value(increment.max_occurrence)?,
            )
            .increment(stack_fields::TOTAL_OCCURRENCES, increment.count);

        if !self.apply_counter_script(&increment.stack_id, &script).await? {
            return Ok(false);
        }

        debug!(
            "Incremented stack {} by {} occurrences",
            increment.stack_id, increment.count
        );

        if increment.send_notifications {
            self.queue.submit(
                EntityChanged {
                    change_type: ChangeType::Saved,
                    entity_id: increment.stack_id,
                    organization_id: increment.organization_id,
                    project_id: increment.project_id,
                    entity_type: Stack::DESCRIPTOR.type_name.to_string(),
                },
                Some(self.config().increment_notification_delay),
            );
        }
        Ok(true)
    }

    /// Zero the occurrence total; the next increment also resets the
    /// first occurrence
    pub async fn reset_counters(&self, stack_id: &str) -> Result<bool> {
        if stack_id.is_empty() {
            return Err(RepositoryError::misuse("stack id must not be empty"));
        }

        let script = UpdateScript::new()
            .set(stack_fields::TOTAL_OCCURRENCES, 0)
            .set(stack_fields::UPDATED_UTC, serde_json::to_value(Utc::now())?);

        if !self.apply_counter_script(stack_id, &script).await? {
            return Ok(false);
        }

        info!("Reset occurrence counters of stack {}", stack_id);
        self.queue.submit(
            EntityChanged {
                change_type: ChangeType::Saved,
                entity_id: stack_id.to_string(),
                organization_id: None,
                project_id: None,
                entity_type: Stack::DESCRIPTOR.type_name.to_string(),
            },
            None,
        );
        Ok(true)
    }

    /// Clear the fixed date and flag the stack as regressed.
    ///
    /// This is a plain read-modify-write; a concurrent save of the same
    /// stack can overwrite it. Returns `None` when the stack is missing.
    pub async fn mark_as_regressed(&self, stack_id: &str) -> Result<Option<Stack>> {
        if stack_id.is_empty() {
            return Err(RepositoryError::misuse("stack id must not be empty"));
        }

        let Some(mut stack) = self
            .repository
            .get_by_id(stack_id, GetOptions::uncached())
            .await?
        else {
            return Ok(None);
        };

        stack.date_fixed = None;
        stack.is_regressed = true;
        stack.updated_utc = Utc::now();

        let saved = self
            .repository
            .save(stack, SaveOptions::default().add_to_cache(true))
            .await?;
        info!("Marked stack {} as regressed", stack_id);
        Ok(Some(saved))
    }

    /// Run a counter script and drop every cache entry of the stack on success
    async fn apply_counter_script(&self, stack_id: &str, script: &UpdateScript) -> Result<bool> {
        let reader = self.repository.reader();
        let index = reader.shard().resolve(stack_id).ok_or_else(|| {
            RepositoryError::misuse(format!("cannot resolve the index of stack {}", stack_id))
        })?;

        let outcome = reader
            .backend()
            .conditional_update(&index, stack_id, script, reader.config().counter_update_retries)
            .await?;

        match outcome {
            UpdateOutcome::Updated => {
                let keys = match reader.backend().point_get(&index, stack_id).await? {
                    Some(source) => {
                        let stack: Stack = serde_json::from_value(source)?;
                        self.repository.cache_keys_of(&stack)
                    }
                    None => vec![stack_id.to_string()],
                };
                reader.invalidate(&keys).await?;
                Ok(true)
            }
            UpdateOutcome::NotFound => {
                warn!("Unable to update counters of stack {}: not found", stack_id);
                Ok(false)
            }
            UpdateOutcome::ConflictExhausted { attempts } => {
                warn!(
                    "Unable to update counters of stack {}: {}",
                    stack_id,
                    RepositoryError::ConflictExhausted {
                        id: stack_id.to_string(),
                        attempts,
                    }
                );
                Ok(false)
            }
        }
    }
}

impl Deref for StackRepository {
    type Target = Repository<Stack>;

    fn deref(&self) -> &Self::Target {
        &self.repository
    }
}
