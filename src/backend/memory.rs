//! In-process search backend
//!
//! Holds documents as JSON per physical index and evaluates the
//! [`SearchQuery`] model directly. Every call is counted, and failures and
//! update conflicts can be injected, which makes it the backend of choice
//! for tests and demos.

use super::{
    query::{Filter, ScriptOp, SearchQuery, SortOrder, UpdateScript},
    AggregationResponse, BackendStatus, CountResponse, SearchBackend, SearchRequest,
    SearchResponse, TermBucket, UpdateOutcome,
};
use crate::document::ID_FIELD;
use crate::error::{RepositoryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use tracing::debug;

/// Snapshot of how many times each backend operation was invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCalls {
    pub search: usize,
    pub point_get: usize,
    pub multi_get: usize,
    pub update: usize,
    pub count: usize,
    pub aggregate: usize,
    pub index: usize,
    pub delete: usize,
}

impl BackendCalls {
    /// Calls that read documents or counts
    pub fn reads(&self) -> usize {
        self.search + self.point_get + self.multi_get + self.count + self.aggregate
    }
}

#[derive(Default)]
struct CallCounters {
    search: AtomicUsize,
    point_get: AtomicUsize,
    multi_get: AtomicUsize,
    update: AtomicUsize,
    count: AtomicUsize,
    aggregate: AtomicUsize,
    index: AtomicUsize,
    delete: AtomicUsize,
}

impl CallCounters {
    fn snapshot(&self) -> BackendCalls {
        BackendCalls {
            search: self.search.load(AtomicOrdering::SeqCst),
            point_get: self.point_get.load(AtomicOrdering::SeqCst),
            multi_get: self.multi_get.load(AtomicOrdering::SeqCst),
            update: self.update.load(AtomicOrdering::SeqCst),
            count: self.count.load(AtomicOrdering::SeqCst),
            aggregate: self.aggregate.load(AtomicOrdering::SeqCst),
            index: self.index.load(AtomicOrdering::SeqCst),
            delete: self.delete.load(AtomicOrdering::SeqCst),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.search,
            &self.point_get,
            &self.multi_get,
            &self.update,
            &self.count,
            &self.aggregate,
            &self.index,
            &self.delete,
        ] {
            counter.store(0, AtomicOrdering::SeqCst);
        }
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, AtomicOrdering::SeqCst);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Search backend keeping every index in memory
#[derive(Default)]
pub struct InMemoryBackend {
    /// index name -> id -> document
    indices: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    calls: CallCounters,
    /// Status returned by find-class calls instead of results
    query_failure: Mutex<Option<BackendStatus>>,
    /// Transport failure raised by every call
    unavailable: Mutex<Option<String>>,
    /// Pending conflicts per document id
    conflicts: Mutex<HashMap<String, u32>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> BackendCalls {
        self.calls.snapshot()
    }

    pub fn reset_calls(&self) {
        self.calls.reset();
    }

    /// Make search, count and aggregate answer with `status`, or restore
    /// normal behavior with `None`
    pub fn fail_queries(&self, status: Option<BackendStatus>) {
        *lock(&self.query_failure) = status;
    }

    /// Make every call fail at the transport level, or restore with `None`
    pub fn set_unavailable(&self, message: Option<&str>) {
        *lock(&self.unavailable) = message.map(str::to_string);
    }

    /// Make the next `count` update attempts on `id` lose to a concurrent writer
    pub fn inject_conflicts(&self, id: &str, count: u32) {
        lock(&self.conflicts).insert(id.to_string(), count);
    }

    /// Store a document directly, bypassing any repository
    pub async fn insert(&self, index: &str, document: Value) -> Result<()> {
        let id = document_id(&document)?;
        let mut indices = self.indices.write().await;
        indices
            .entry(index.to_string())
            .or_default()
            .insert(id, document);
        Ok(())
    }

    /// Read a stored document without counting a call
    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        let indices = self.indices.read().await;
        indices.get(index).and_then(|docs| docs.get(id)).cloned()
    }

    /// Physical index names currently holding documents
    pub async fn index_names(&self) -> Vec<String> {
        let indices = self.indices.read().await;
        let mut names: Vec<String> = indices
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn document_count(&self) -> usize {
        let indices = self.indices.read().await;
        indices.values().map(BTreeMap::len).sum()
    }

    fn check_available(&self) -> Result<()> {
        match lock(&self.unavailable).as_ref() {
            Some(message) => Err(RepositoryError::Backend(message.clone())),
            None => Ok(()),
        }
    }

    fn query_failure(&self) -> Option<BackendStatus> {
        lock(&self.query_failure).clone()
    }

    fn take_conflict(&self, id: &str) -> bool {
        let mut conflicts = lock(&self.conflicts);
        match conflicts.get_mut(id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Every document in an index matched by one of `patterns` that
    /// satisfies `query`, ordered by index name then id
    fn collect_matches(
        indices: &HashMap<String, BTreeMap<String, Value>>,
        patterns: &[String],
        query: &SearchQuery,
    ) -> Vec<Value> {
        let names: BTreeSet<&String> = indices
            .keys()
            .filter(|name| patterns.iter().any(|pattern| index_matches(pattern, name)))
            .collect();

        names
            .into_iter()
            .filter_map(|name| indices.get(name))
            .flat_map(|docs| docs.values())
            .filter(|doc| query.filters.iter().all(|filter| matches(doc, filter)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        bump(&self.calls.search);
        self.check_available()?;
        if let Some(status) = self.query_failure() {
            return Ok(SearchResponse {
                status,
                documents: Vec::new(),
                total: 0,
            });
        }

        let indices = self.indices.read().await;
        let mut documents = Self::collect_matches(&indices, &request.indices, &request.query);
        drop(indices);

        if request.sort.is_empty() {
            documents.sort_by(|a, b| compare_field(a, b, ID_FIELD));
        } else {
            documents.sort_by(|a, b| {
                request
                    .sort
                    .iter()
                    .map(|sort| {
                        let ordering = compare_field(a, b, &sort.field);
                        match sort.order {
                            SortOrder::Ascending => ordering,
                            SortOrder::Descending => ordering.reverse(),
                        }
                    })
                    .find(|ordering| *ordering != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let total = documents.len() as u64;
        let page = documents
            .into_iter()
            .skip(request.skip)
            .take(request.limit.unwrap_or(usize::MAX));

        let documents = match &request.fields {
            Some(fields) => page.map(|doc| project(&doc, fields)).collect(),
            None => page.collect(),
        };

        debug!("In-memory search over {:?} matched {}", request.indices, total);
        Ok(SearchResponse {
            status: BackendStatus::ok(),
            documents,
            total,
        })
    }

    async fn point_get(&self, index: &str, id: &str) -> Result<Option<Value>> {
        bump(&self.calls.point_get);
        self.check_available()?;
        let indices = self.indices.read().await;
        Ok(indices.get(index).and_then(|docs| docs.get(id)).cloned())
    }

    async fn multi_get(&self, targets: &[(String, String)]) -> Result<Vec<Value>> {
        bump(&self.calls.multi_get);
        self.check_available()?;
        let indices = self.indices.read().await;
        Ok(targets
            .iter()
            .filter_map(|(index, id)| indices.get(index).and_then(|docs| docs.get(id)))
            .cloned()
            .collect())
    }

    async fn conditional_update(
        &self,
        index: &str,
        id: &str,
        script: &UpdateScript,
        max_retries: u32,
    ) -> Result<UpdateOutcome> {
        bump(&self.calls.update);
        self.check_available()?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            if self.take_conflict(id) {
                debug!("Version conflict updating {} (attempt {})", id, attempts);
                if attempts > max_retries {
                    return Ok(UpdateOutcome::ConflictExhausted { attempts });
                }
                continue;
            }

            let mut indices = self.indices.write().await;
            let Some(document) = indices.get_mut(index).and_then(|docs| docs.get_mut(id)) else {
                return Ok(UpdateOutcome::NotFound);
            };
            apply_script(document, script);
            return Ok(UpdateOutcome::Updated);
        }
    }

    async fn count(&self, indices: &[String], query: &SearchQuery) -> Result<CountResponse> {
        bump(&self.calls.count);
        self.check_available()?;
        if let Some(status) = self.query_failure() {
            return Ok(CountResponse { status, count: 0 });
        }

        let stored = self.indices.read().await;
        let count = Self::collect_matches(&stored, indices, query).len() as u64;
        Ok(CountResponse {
            status: BackendStatus::ok(),
            count,
        })
    }

    async fn aggregate(
        &self,
        indices: &[String],
        query: &SearchQuery,
        field: &str,
        bucket_limit: usize,
    ) -> Result<AggregationResponse> {
        bump(&self.calls.aggregate);
        self.check_available()?;
        if let Some(status) = self.query_failure() {
            return Ok(AggregationResponse {
                status,
                buckets: Vec::new(),
            });
        }

        let stored = self.indices.read().await;
        let mut counts: HashMap<String, u64> = HashMap::new();
        for doc in Self::collect_matches(&stored, indices, query) {
            match lookup(&doc, field) {
                Some(Value::Array(items)) => {
                    for item in items {
                        *counts.entry(value_key(item)).or_default() += 1;
                    }
                }
                Some(Value::Null) | None => {}
                Some(value) => *counts.entry(value_key(value)).or_default() += 1,
            }
        }

        let mut buckets: Vec<TermBucket> = counts
            .into_iter()
            .map(|(key, count)| TermBucket { key, count })
            .collect();
        buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        buckets.truncate(bucket_limit);

        Ok(AggregationResponse {
            status: BackendStatus::ok(),
            buckets,
        })
    }

    async fn index_documents(&self, documents: &[(String, Value)]) -> Result<()> {
        bump(&self.calls.index);
        self.check_available()?;

        let mut indices = self.indices.write().await;
        for (index, document) in documents {
            let id = document_id(document)?;
            indices
                .entry(index.clone())
                .or_default()
                .insert(id, document.clone());
        }
        Ok(())
    }

    async fn delete_documents(&self, targets: &[(String, String)]) -> Result<()> {
        bump(&self.calls.delete);
        self.check_available()?;

        let mut indices = self.indices.write().await;
        for (index, id) in targets {
            if let Some(docs) = indices.get_mut(index) {
                docs.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_by_query(&self, indices: &[String], query: &SearchQuery) -> Result<u64> {
        bump(&self.calls.delete);
        self.check_available()?;

        let mut stored = self.indices.write().await;
        let mut deleted = 0u64;
        for (name, docs) in stored.iter_mut() {
            if !indices.iter().any(|pattern| index_matches(pattern, name)) {
                continue;
            }
            let before = docs.len();
            docs.retain(|_, doc| !query.filters.iter().all(|filter| matches(doc, filter)));
            deleted += (before - docs.len()) as u64;
        }
        Ok(deleted)
    }
}

fn document_id(document: &Value) -> Result<String> {
    document
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RepositoryError::Backend("document has no id".to_string()))
}

/// Exact name match, or prefix match when the pattern ends with `*`
fn index_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

/// Resolve a dotted field path
fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, segment| value.get(segment))
}

fn matches(doc: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Term { field, value } => field_equals(doc, field, value),
        Filter::Terms { field, values } => values.iter().any(|value| field_equals(doc, field, value)),
        Filter::Ids(ids) => doc
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .map(|id| ids.iter().any(|candidate| candidate == id))
            .unwrap_or(false),
        Filter::DateRange { field, gte, lte } => {
            let Some(date) = lookup(doc, field).and_then(Value::as_str).and_then(parse_date) else {
                return false;
            };
            gte.map_or(true, |gte| date >= gte) && lte.map_or(true, |lte| date <= lte)
        }
        Filter::Missing { field } => matches!(lookup(doc, field), None | Some(Value::Null)),
        Filter::Not(inner) => !matches(doc, inner),
        Filter::And(filters) => filters.iter().all(|inner| matches(doc, inner)),
        Filter::QueryString(query) => query_string_matches(doc, query),
    }
}

fn field_equals(doc: &Value, field: &str, expected: &Value) -> bool {
    match lookup(doc, field) {
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, expected)),
        Some(value) => values_equal(value, expected),
        None => expected.is_null(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => match (parse_date(x), parse_date(y)) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Whitespace separated `field:value` terms (all must hold) or bare words
/// matched case-insensitively against any string field
fn query_string_matches(doc: &Value, query: &str) -> bool {
    query
        .split_whitespace()
        .filter(|token| *token != "AND")
        .all(|token| match token.split_once(':') {
            Some((field, "*")) => !matches!(lookup(doc, field), None | Some(Value::Null)),
            Some((field, expected)) => match lookup(doc, field) {
                Some(Value::Array(items)) => items.iter().any(|item| value_key(item) == expected),
                Some(value) => value_key(value) == expected,
                None => false,
            },
            None => {
                let needle = token.to_lowercase();
                doc.as_object()
                    .map(|fields| {
                        fields.values().any(|value| {
                            value
                                .as_str()
                                .map(|s| s.to_lowercase().contains(&needle))
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false)
            }
        })
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => match (parse_date(x), parse_date(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => value_key(a).cmp(&value_key(b)),
    }
}

fn compare_field(a: &Value, b: &Value, field: &str) -> Ordering {
    let null = Value::Null;
    compare_values(
        lookup(a, field).unwrap_or(&null),
        lookup(b, field).unwrap_or(&null),
    )
}

fn project(doc: &Value, fields: &[String]) -> Value {
    let mut projected = Map::new();
    for field in std::iter::once(ID_FIELD).chain(fields.iter().map(String::as_str)) {
        if let Some(value) = doc.get(field) {
            projected.insert(field.to_string(), value.clone());
        }
    }
    Value::Object(projected)
}

fn apply_script(doc: &mut Value, script: &UpdateScript) {
    let Some(fields) = doc.as_object_mut() else {
        return;
    };

    for op in &script.ops {
        match op {
            ScriptOp::SetIfEarlier {
                field,
                value,
                or_when_zero,
            } => {
                let zero = or_when_zero
                    .as_ref()
                    .map(|counter| {
                        fields
                            .get(counter)
                            .and_then(Value::as_f64)
                            .map_or(true, |n| n == 0.0)
                    })
                    .unwrap_or(false);
                let replace = zero
                    || match fields.get(field) {
                        None | Some(Value::Null) => true,
                        Some(current) => compare_values(current, value) == Ordering::Greater,
                    };
                if replace {
                    fields.insert(field.clone(), value.clone());
                }
            }
            ScriptOp::SetIfLater { field, value } => {
                let replace = match fields.get(field) {
                    None | Some(Value::Null) => true,
                    Some(current) => compare_values(current, value) == Ordering::Less,
                };
                if replace {
                    fields.insert(field.clone(), value.clone());
                }
            }
            ScriptOp::Increment { field, by } => {
                let current = fields.get(field).and_then(Value::as_i64).unwrap_or(0);
                fields.insert(field.clone(), Value::from(current + by));
            }
            ScriptOp::Set { field, value } => {
                fields.insert(field.clone(), value.clone());
            }
        }
    }
}
