//! Index shard resolution
//!
//! Maps document ids to the physical index that holds them. For
//! time-partitioned layouts the month is taken from the creation time
//! embedded in the id; ids that do not parse, or whose time predates the
//! configured epoch floor, are unresolvable and callers fall back to a
//! search across all partitions.

use crate::config::RepositoryConfig;
use crate::document::IndexLayout;
use crate::id::ObjectId;
use chrono::{DateTime, Datelike, Utc};

/// Resolves physical index names for one document type
#[derive(Debug, Clone)]
pub struct ShardResolver {
    layout: IndexLayout,
    /// `{prefix}{name}-v{version}`
    base: String,
    epoch_floor: DateTime<Utc>,
}

impl ShardResolver {
    pub fn new(layout: IndexLayout, config: &RepositoryConfig) -> Self {
        let base = format!("{}{}-v{}", config.index_prefix, layout.name(), config.index_version);
        Self {
            layout,
            base,
            epoch_floor: config.epoch_floor,
        }
    }

    /// Versioned base name; the single index name for non-partitioned layouts
    pub fn base_name(&self) -> &str {
        &self.base
    }

    pub fn is_time_partitioned(&self) -> bool {
        self.layout.is_time_partitioned()
    }

    /// Physical index for `id`, or `None` when it cannot be determined
    pub fn resolve(&self, id: &str) -> Option<String> {
        match self.layout {
            IndexLayout::Single { .. } => Some(self.base.clone()),
            IndexLayout::TimePartitioned { .. } => {
                let created = ObjectId::parse(id)?.creation_time();
                if created < self.epoch_floor {
                    return None;
                }
                Some(self.partition_for(created))
            }
        }
    }

    /// Physical index a document created at `date` belongs to
    pub fn index_for_date(&self, date: DateTime<Utc>) -> String {
        match self.layout {
            IndexLayout::Single { .. } => self.base.clone(),
            IndexLayout::TimePartitioned { .. } => self.partition_for(date),
        }
    }

    /// Every monthly partition touched by `[start, end]`, oldest first
    pub fn indices_for_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<String> {
        if !self.is_time_partitioned() {
            return vec![self.base.clone()];
        }

        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let start = start.max(self.epoch_floor);
        if start > end {
            return Vec::new();
        }

        let mut indices = Vec::new();
        let (mut year, mut month) = (start.year(), start.month());
        while (year, month) <= (end.year(), end.month()) {
            indices.push(format!("{}-{:04}{:02}", self.base, year, month));
            if month == 12 {
                year += 1;
                month = 1;
            } else {
                month += 1;
            }
        }
        indices
    }

    /// Indices searched when the caller names none
    pub fn default_indices(&self) -> Vec<String> {
        match self.layout {
            IndexLayout::Single { .. } => vec![self.base.clone()],
            IndexLayout::TimePartitioned { .. } => vec![format!("{}-*", self.base)],
        }
    }

    fn partition_for(&self, date: DateTime<Utc>) -> String {
        format!("{}-{}", self.base, date.format("%Y%m"))
    }
}
