//! Cache-augmented reads
//!
//! Id lookups go cache first, then to the shard the id resolves to, then
//! to an id search across every partition. Find-class calls are cached
//! only when the caller supplies a cache key.

use crate::backend::{Filter, SearchBackend, SearchQuery, SearchRequest, TermBucket};
use crate::cache::{count_key, scoped_key, CacheClient};
use crate::config::RepositoryConfig;
use crate::document::{Document, EntityDescriptor, DELETED_FIELD};
use crate::error::Result;
use crate::repository::options::{FindOptions, FindResults, GetOptions};
use crate::shard::ShardResolver;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cached form of a find result
#[derive(Deserialize)]
struct CachedPage<T> {
    documents: Vec<T>,
    total: u64,
}

#[derive(Serialize)]
struct CachedPageRef<'a, T> {
    documents: &'a [T],
    total: u64,
}

/// Read operations for one document type
pub struct ReadRepository<T: Document> {
    backend: Arc<dyn SearchBackend>,
    cache: Arc<dyn CacheClient>,
    config: Arc<RepositoryConfig>,
    shard: ShardResolver,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Document> ReadRepository<T> {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        cache: Arc<dyn CacheClient>,
        config: Arc<RepositoryConfig>,
    ) -> Self {
        let shard = ShardResolver::new(T::DESCRIPTOR.index, &config);
        debug!(
            "Created repository for {} over {}",
            T::DESCRIPTOR.type_name,
            shard.base_name()
        );
        Self {
            backend,
            cache,
            config,
            shard,
            _marker: PhantomData,
        }
    }

    pub fn descriptor(&self) -> EntityDescriptor {
        T::DESCRIPTOR
    }

    pub fn shard(&self) -> &ShardResolver {
        &self.shard
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub(crate) fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    pub(crate) fn cache(&self) -> &Arc<dyn CacheClient> {
        &self.cache
    }

    /// Full cache key of `raw` for this type
    pub fn scoped_key(&self, raw: &str) -> String {
        scoped_key(T::DESCRIPTOR.type_name, raw)
    }

    fn caching(&self, requested: bool) -> bool {
        requested && self.config.enable_cache
    }

    fn find_cache_key<'a>(&self, options: &'a FindOptions) -> Option<&'a str> {
        options
            .effective_cache_key()
            .filter(|_| self.config.enable_cache)
    }

    pub(crate) async fn cache_get<V: DeserializeOwned>(&self, raw: &str) -> Result<Option<V>> {
        let key = self.scoped_key(raw);
        match self.cache.get(&key).await? {
            Some(json) => {
                debug!("Repository cache hit: {}", key);
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => {
                debug!("Repository cache miss: {}", key);
                Ok(None)
            }
        }
    }

    pub(crate) async fn cache_set<V: Serialize + Sync + ?Sized>(
        &self,
        raw: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.cache
            .set(&self.scoped_key(raw), json, self.config.expires_at(ttl))
            .await
    }

    /// Remove the entries of the given raw keys
    pub(crate) async fn invalidate(&self, raw_keys: &[String]) -> Result<usize> {
        if !self.config.enable_cache || raw_keys.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = raw_keys.iter().map(|raw| self.scoped_key(raw)).collect();
        let removed = self.cache.remove_all(&keys).await?;
        debug!("Invalidated {} of {} cache keys", removed, keys.len());
        Ok(removed)
    }

    /// Fetch one document by id
    pub async fn get_by_id(&self, id: &str, options: GetOptions) -> Result<Option<T>> {
        if id.is_empty() {
            return Ok(None);
        }

        let use_cache = self.caching(options.use_cache);
        if use_cache {
            if let Some(document) = self.cache_get::<T>(id).await? {
                return Ok(Some(document));
            }
        }

        let mut found = match self.shard.resolve(id) {
            Some(index) => self.backend.point_get(&index, id).await?,
            None => None,
        };

        // The id can name an index the document does not live in
        if found.is_none() {
            found = self.search_ids(&[id.to_string()]).await?.into_iter().next();
        }

        let Some(value) = found else {
            return Ok(None);
        };
        let document: T = serde_json::from_value(value)?;

        if use_cache {
            self.cache_set(id, &document, options.ttl).await?;
        }
        Ok(Some(document))
    }

    /// Fetch many documents by id, in the order first requested.
    ///
    /// Cache hits cost nothing, resolvable ids share one multi-get and
    /// everything else shares one id search.
    pub async fn get_by_ids(&self, ids: &[String], options: GetOptions) -> Result<FindResults<T>> {
        let mut seen = HashSet::new();
        let unique: Vec<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .collect();
        if unique.is_empty() {
            return Ok(FindResults::empty());
        }

        let use_cache = self.caching(options.use_cache);
        let mut found: HashMap<String, T> = HashMap::new();
        if use_cache {
            for id in &unique {
                if let Some(document) = self.cache_get::<T>(id).await? {
                    found.insert(id.to_string(), document);
                }
            }
        }

        let mut resolvable: Vec<(String, String)> = Vec::new();
        let mut unresolvable: Vec<String> = Vec::new();
        for id in unique.iter().filter(|id| !found.contains_key(**id)) {
            match self.shard.resolve(id) {
                Some(index) => resolvable.push((index, id.to_string())),
                None => unresolvable.push(id.to_string()),
            }
        }

        let mut fetched: Vec<T> = Vec::new();
        if !resolvable.is_empty() {
            for value in self.backend.multi_get(&resolvable).await? {
                fetched.push(serde_json::from_value(value)?);
            }

            let hits: HashSet<&str> = fetched.iter().map(Document::id).collect();
            let missed: Vec<String> = resolvable
                .iter()
                .filter(|(_, id)| !hits.contains(id.as_str()))
                .map(|(_, id)| id.clone())
                .collect();
            unresolvable.extend(missed);
        }

        if !unresolvable.is_empty() {
            for value in self.search_ids(&unresolvable).await? {
                fetched.push(serde_json::from_value(value)?);
            }
        }

        for document in fetched {
            if use_cache {
                self.cache_set(document.id(), &document, options.ttl).await?;
            }
            found.insert(document.id().to_string(), document);
        }

        let documents: Vec<T> = unique.iter().filter_map(|id| found.remove(*id)).collect();
        Ok(FindResults {
            total: documents.len() as u64,
            documents,
            has_more: false,
        })
    }

    async fn search_ids(&self, ids: &[String]) -> Result<Vec<Value>> {
        let request = SearchRequest {
            indices: self.shard.default_indices(),
            query: Filter::ids(ids.iter().cloned()).into(),
            limit: Some(ids.len()),
            ..Default::default()
        };
        let response = self.backend.search(&request).await?;
        response.status.into_result()?;
        Ok(response.documents)
    }

    pub async fn find(&self, options: &FindOptions) -> Result<FindResults<T>> {
        let cache_key = self.find_cache_key(options);
        if let Some(key) = cache_key {
            if let Some(page) = self.cache_get::<CachedPage<T>>(key).await? {
                return Ok(FindResults {
                    has_more: options.has_more(page.total),
                    total: page.total,
                    documents: page.documents,
                });
            }
        }

        let request = self.build_request(options, options.limit);
        if request.indices.is_empty() {
            return Ok(FindResults::empty());
        }

        let response = self.backend.search(&request).await?;
        response.status.into_result()?;
        let total = response.total;
        let documents = response
            .documents
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<T>, _>>()?;

        if let Some(key) = cache_key {
            let page = CachedPageRef {
                documents: &documents,
                total,
            };
            self.cache_set(key, &page, options.cache_ttl).await?;
        }

        Ok(FindResults {
            has_more: options.has_more(total),
            total,
            documents,
        })
    }

    pub async fn find_one(&self, options: &FindOptions) -> Result<Option<T>> {
        let cache_key = self.find_cache_key(options);
        if let Some(key) = cache_key {
            if let Some(document) = self.cache_get::<T>(key).await? {
                return Ok(Some(document));
            }
        }

        let request = self.build_request(options, Some(1));
        if request.indices.is_empty() {
            return Ok(None);
        }

        let response = self.backend.search(&request).await?;
        response.status.into_result()?;
        let Some(value) = response.documents.into_iter().next() else {
            return Ok(None);
        };
        let document: T = serde_json::from_value(value)?;

        if let Some(key) = cache_key {
            self.cache_set(key, &document, options.cache_ttl).await?;
        }
        Ok(Some(document))
    }

    /// Whether a document with `id` exists; never cached
    pub async fn exists(&self, id: &str) -> Result<bool> {
        if id.is_empty() {
            return Ok(false);
        }
        self.exists_matching(&FindOptions::new().query(Filter::ids([id])))
            .await
    }

    /// Whether anything matches `options`; never cached
    pub async fn exists_matching(&self, options: &FindOptions) -> Result<bool> {
        let mut request = self.build_request(options, Some(1));
        if request.indices.is_empty() {
            return Ok(false);
        }
        request.fields = Some(Vec::new());
        request.sort.clear();

        let response = self.backend.search(&request).await?;
        response.status.into_result()?;
        Ok(response.total > 0)
    }

    /// Count matches, cached under `count-{key}` when a cache key is set
    pub async fn count(&self, options: &FindOptions) -> Result<u64> {
        let cache_key = self.find_cache_key(options).map(count_key);
        if let Some(key) = &cache_key {
            if let Some(count) = self.cache_get::<u64>(key).await? {
                return Ok(count);
            }
        }

        let (indices, query) = self.resolve_query(options);
        if indices.is_empty() {
            return Ok(0);
        }

        let response = self.backend.count(&indices, &query).await?;
        response.status.into_result()?;

        if let Some(key) = &cache_key {
            self.cache_set(key, &response.count, options.cache_ttl).await?;
        }
        Ok(response.count)
    }

    /// Count every non-deleted document; never cached
    pub async fn count_all(&self) -> Result<u64> {
        self.count(&FindOptions::new()).await
    }

    /// Top term buckets of `field` over the matches; never cached
    pub async fn simple_aggregation(
        &self,
        options: &FindOptions,
        field: &str,
    ) -> Result<Vec<TermBucket>> {
        let (indices, query) = self.resolve_query(options);
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .backend
            .aggregate(&indices, &query, field, self.config.aggregation_bucket_limit)
            .await?;
        response.status.into_result()?;
        Ok(response.buckets)
    }

    /// Indices and filters an options value resolves to
    pub(crate) fn resolve_query(&self, options: &FindOptions) -> (Vec<String>, SearchQuery) {
        let mut query = SearchQuery::new();
        for filter in [&options.query, &options.system_filter, &options.user_filter]
            .into_iter()
            .flatten()
        {
            query.push(filter.clone());
        }

        if T::DESCRIPTOR.supports_soft_delete && !options.include_soft_deleted {
            query.push(Filter::negate(Filter::term(DELETED_FIELD, true)));
        }

        if let Some((field, start, end)) = &options.date_range {
            let (start, end) = if start <= end { (*start, *end) } else { (*end, *start) };
            query.push(Filter::date_range(field.clone(), Some(start), Some(end)));
        }

        let indices = match (&options.indices, &options.date_range) {
            (Some(indices), _) => indices.clone(),
            (None, Some((_, start, end))) => self.shard.indices_for_range(*start, *end),
            (None, None) => self.shard.default_indices(),
        };

        (indices, query)
    }

    fn build_request(&self, options: &FindOptions, limit: Option<usize>) -> SearchRequest {
        let (indices, query) = self.resolve_query(options);
        SearchRequest {
            indices,
            query,
            fields: options.fields.clone(),
            sort: options.sort.clone(),
            skip: options.skip,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::cache::InMemoryCache;
    use crate::document::{IndexLayout, ScopeKind};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
        #[serde(default)]
        is_deleted: bool,
    }

    impl Document for Note {
        const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
            type_name: "Note",
            index: IndexLayout::Single { name: "notes" },
            supports_soft_delete: true,
            scope: ScopeKind::Global,
        };

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }

        fn is_deleted(&self) -> bool {
            self.is_deleted
        }
    }

    async fn setup() -> (Arc<InMemoryBackend>, Arc<InMemoryCache>, ReadRepository<Note>) {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = Arc::new(InMemoryCache::default());
        backend
            .insert("notes-v1", json!({"id": "n1", "body": "first"}))
            .await
            .unwrap();
        backend
            .insert("notes-v1", json!({"id": "n2", "body": "gone", "is_deleted": true}))
            .await
            .unwrap();
        let repo = ReadRepository::new(
            backend.clone(),
            cache.clone(),
            Arc::new(RepositoryConfig::default()),
        );
        (backend, cache, repo)
    }

    #[tokio::test]
    async fn test_point_miss_falls_back_to_id_search() {
        let (backend, _, repo) = setup().await;

        assert!(repo.get_by_id("missing", GetOptions::cached()).await.unwrap().is_none());
        let calls = backend.calls();
        assert_eq!(calls.point_get, 1);
        assert_eq!(calls.search, 1);
    }

    #[tokio::test]
    async fn test_multi_get_misses_move_to_id_search() {
        let (backend, _, repo) = setup().await;

        let ids = vec!["n1".to_string(), "missing".to_string()];
        let results = repo.get_by_ids(&ids, GetOptions::uncached()).await.unwrap();

        assert_eq!(results.total, 1);
        assert_eq!(results.documents[0].id, "n1");
        let calls = backend.calls();
        assert_eq!(calls.multi_get, 1);
        assert_eq!(calls.search, 1);
    }

    #[tokio::test]
    async fn test_soft_deleted_hidden_from_find() {
        let (_, _, repo) = setup().await;

        let results = repo.find(&FindOptions::new()).await.unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.documents[0].id, "n1");

        let all = repo
            .find(&FindOptions::new().include_soft_deleted(true))
            .await
            .unwrap();
        assert_eq!(all.total, 2);

        // Direct lookups still see soft-deleted documents
        assert!(repo.get_by_id("n2", GetOptions::uncached()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cache_disabled_globally() {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = Arc::new(InMemoryCache::default());
        backend
            .insert("notes-v1", json!({"id": "n1", "body": "first"}))
            .await
            .unwrap();
        let config = RepositoryConfig::builder().enable_cache(false).build();
        let repo: ReadRepository<Note> =
            ReadRepository::new(backend.clone(), cache.clone(), Arc::new(config));

        repo.get_by_id("n1", GetOptions::cached()).await.unwrap();
        repo.get_by_id("n1", GetOptions::cached()).await.unwrap();

        assert_eq!(backend.calls().point_get, 2);
        assert!(cache.is_empty().await);
    }
}
