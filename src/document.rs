//! Document trait and per-type capability descriptors
//!
//! Every persisted type declares an [`EntityDescriptor`] once. Repositories
//! read it at construction and never inspect the concrete type again.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// JSON field holding the document id
pub const ID_FIELD: &str = "id";

/// JSON field holding the soft-delete flag
pub const DELETED_FIELD: &str = "is_deleted";

/// How a type's documents are spread over physical indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLayout {
    /// One versioned index holds every document
    Single { name: &'static str },

    /// One index per calendar month of the id's creation time
    TimePartitioned { name: &'static str },
}

impl IndexLayout {
    /// Logical index name before prefix and version are applied
    pub fn name(&self) -> &'static str {
        match self {
            IndexLayout::Single { name } | IndexLayout::TimePartitioned { name } => name,
        }
    }

    pub fn is_time_partitioned(&self) -> bool {
        matches!(self, IndexLayout::TimePartitioned { .. })
    }
}

/// Tenant scope a document belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Not owned by any tenant
    Global,
    /// Requires an organization id
    Organization,
    /// Requires both organization and project ids
    Project,
}

/// Capabilities of a document type, resolved once per repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Name used for scoped cache keys and change events
    pub type_name: &'static str,
    /// Physical index layout
    pub index: IndexLayout,
    /// Whether documents carry `is_deleted` and are hidden from queries when set
    pub supports_soft_delete: bool,
    /// Tenant scope
    pub scope: ScopeKind,
}

/// A document persisted in the search backend
pub trait Document: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Capability descriptor for this type
    const DESCRIPTOR: EntityDescriptor;

    /// Unique id; empty before the document is first added
    fn id(&self) -> &str;

    /// Assign the id on first add
    fn set_id(&mut self, id: String);

    /// Soft-delete flag; always false for types without soft delete
    fn is_deleted(&self) -> bool {
        false
    }

    fn organization_id(&self) -> Option<&str> {
        None
    }

    fn project_id(&self) -> Option<&str> {
        None
    }

    /// Creation time used when generating an id, so time-partitioned
    /// documents are stamped with their own date rather than "now"
    fn created_utc(&self) -> Option<DateTime<Utc>> {
        None
    }
}
