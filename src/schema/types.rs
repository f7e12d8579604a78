//! Persisted document types

use crate::document::{Document, EntityDescriptor, IndexLayout, ScopeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Stack field names used in queries and update scripts
pub mod stack_fields {
    pub const SIGNATURE_HASH: &str = "signature_hash";
    pub const PROJECT_ID: &str = "project_id";
    pub const FIRST_OCCURRENCE: &str = "first_occurrence";
    pub const LAST_OCCURRENCE: &str = "last_occurrence";
    pub const TOTAL_OCCURRENCES: &str = "total_occurrences";
    pub const IS_REGRESSED: &str = "is_regressed";
    pub const DATE_FIXED: &str = "date_fixed";
    pub const UPDATED_UTC: &str = "updated_utc";
}

/// Event field names used in queries
pub mod event_fields {
    pub const STACK_ID: &str = "stack_id";
    pub const DATE: &str = "date";
    pub const EVENT_TYPE: &str = "event_type";
}

/// A group of deduplicated events sharing one signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    #[serde(default)]
    pub id: String,
    pub organization_id: String,
    pub project_id: String,
    /// Hash of the normalized event signature used for deduplication
    pub signature_hash: String,
    pub title: String,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub total_occurrences: u64,
    #[serde(default)]
    pub is_regressed: bool,
    #[serde(default)]
    pub date_fixed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Stack {
    /// Create a stack with no occurrences yet
    pub fn new(
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        signature_hash: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            signature_hash: signature_hash.into(),
            title: title.into(),
            first_occurrence: now,
            last_occurrence: now,
            total_occurrences: 0,
            is_regressed: false,
            date_fixed: None,
            is_deleted: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.date_fixed.is_some()
    }
}

impl Document for Stack {
    const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
        type_name: "Stack",
        index: IndexLayout::Single { name: "stacks" },
        supports_soft_delete: true,
        scope: ScopeKind::Project,
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

    fn organization_id(&self) -> Option<&str> {
        Some(&self.organization_id)
    }

    fn project_id(&self) -> Option<&str> {
        Some(&self.project_id)
    }

    fn created_utc(&self) -> Option<DateTime<Utc>> {
        Some(self.created_utc)
    }
}

/// One stored occurrence, partitioned by month of its date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentEvent {
    #[serde(default)]
    pub id: String,
    pub organization_id: String,
    pub project_id: String,
    pub stack_id: String,
    pub event_type: String,
    #[serde(default)]
    pub message: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub data: JsonValue,
}

impl PersistentEvent {
    pub fn new(
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        stack_id: impl Into<String>,
        event_type: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            stack_id: stack_id.into(),
            event_type: event_type.into(),
            message: None,
            date,
            data: JsonValue::Null,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Document for PersistentEvent {
    const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
        type_name: "PersistentEvent",
        index: IndexLayout::TimePartitioned { name: "events" },
        supports_soft_delete: false,
        scope: ScopeKind::Project,
    };

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn organization_id(&self) -> Option<&str> {
        Some(&self.organization_id)
    }

    fn project_id(&self) -> Option<&str> {
        Some(&self.project_id)
    }

    /// Ids embed the event date so events land in their own month
    fn created_utc(&self) -> Option<DateTime<Utc>> {
        Some(self.date)
    }
}
