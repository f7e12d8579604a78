//! Event repository

use crate::backend::{Filter, SearchBackend, SortField};
use crate::cache::CacheClient;
use crate::config::RepositoryConfig;
use crate::error::Result;
use crate::repository::{ChangeObserver, FindOptions, FindResults, Repository};
use crate::schema::types::{event_fields, PersistentEvent};
use std::ops::Deref;
use std::sync::Arc;

/// Repository of [`PersistentEvent`] documents
pub struct EventRepository {
    repository: Repository<PersistentEvent>,
}

impl EventRepository {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        cache: Arc<dyn CacheClient>,
        config: Arc<RepositoryConfig>,
    ) -> Self {
        Self {
            repository: Repository::new(backend, cache, config),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ChangeObserver<PersistentEvent>>) -> Self {
        self.repository = self.repository.with_observer(observer);
        self
    }

    /// Number of events recorded for `stack_id`
    pub async fn count_by_stack_id(&self, stack_id: &str) -> Result<u64> {
        if stack_id.is_empty() {
            return Ok(0);
        }
        self.repository
            .count(&FindOptions::new().query(Filter::term(event_fields::STACK_ID, stack_id)))
            .await
    }

    /// Events of `stack_id`, newest first unless `options` sorts otherwise
    pub async fn get_by_stack_id(
        &self,
        stack_id: &str,
        options: FindOptions,
    ) -> Result<FindResults<PersistentEvent>> {
        if stack_id.is_empty() {
            return Ok(FindResults::empty());
        }

        let mut options = options.and_system_filter(Filter::term(event_fields::STACK_ID, stack_id));
        if options.sort.is_empty() {
            options = options.sort(SortField::desc(event_fields::DATE));
        }
        self.repository.find(&options).await
    }
}

impl Deref for EventRepository {
    type Target = Repository<PersistentEvent>;

    fn deref(&self) -> &Self::Target {
        &self.repository
    }
}
