//! Connection mapping
//!
//! Tracks which live client connections listen on which key (a user,
//! an organization, a project) so change events can be routed to them.

use crate::messaging::EntityChanged;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

/// Concurrent map of key to the set of connection ids listening on it
#[derive(Debug, Default)]
pub struct ConnectionMapping {
    connections: RwLock<HashMap<String, HashSet<String>>>,
}

impl ConnectionMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection_id` under `key`; `false` when already present
    pub async fn add(&self, key: &str, connection_id: &str) -> bool {
        if key.is_empty() || connection_id.is_empty() {
            return false;
        }
        let mut connections = self.connections.write().await;
        let added = connections
            .entry(key.to_string())
            .or_default()
            .insert(connection_id.to_string());
        if added {
            debug!("Mapped connection {} to {}", connection_id, key);
        }
        added
    }

    /// Unregister `connection_id` from `key`, dropping the key once empty
    pub async fn remove(&self, key: &str, connection_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        let Some(ids) = connections.get_mut(key) else {
            return false;
        };
        let removed = ids.remove(connection_id);
        if ids.is_empty() {
            connections.remove(key);
        }
        removed
    }

    /// Connection ids listening on `key`
    pub async fn get(&self, key: &str) -> HashSet<String> {
        let connections = self.connections.read().await;
        connections.get(key).cloned().unwrap_or_default()
    }

    /// Drop `connection_id` from every key, returning how many keys held it
    pub async fn remove_connection(&self, connection_id: &str) -> usize {
        let mut connections = self.connections.write().await;
        let mut removed = 0;
        connections.retain(|_, ids| {
            if ids.remove(connection_id) {
                removed += 1;
            }
            !ids.is_empty()
        });
        debug!("Removed connection {} from {} keys", connection_id, removed);
        removed
    }

    /// Number of keys with at least one connection
    pub async fn key_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Connections interested in `message`: those on its organization and
    /// those on its project
    pub async fn recipients(&self, message: &EntityChanged) -> HashSet<String> {
        let connections = self.connections.read().await;
        [&message.organization_id, &message.project_id]
            .into_iter()
            .flatten()
            .filter_map(|key| connections.get(key))
            .flat_map(|ids| ids.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::ChangeType;

    #[tokio::test]
    async fn test_add_get_remove() {
        let mapping = ConnectionMapping::new();

        assert!(mapping.add("org1", "c1").await);
        assert!(!mapping.add("org1", "c1").await);
        assert!(mapping.add("org1", "c2").await);
        assert!(!mapping.add("", "c3").await);

        assert_eq!(mapping.get("org1").await.len(), 2);
        assert!(mapping.get("org2").await.is_empty());

        assert!(mapping.remove("org1", "c1").await);
        assert!(!mapping.remove("org1", "c1").await);
        assert!(mapping.remove("org1", "c2").await);
        assert_eq!(mapping.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_connection_from_every_key() {
        let mapping = ConnectionMapping::new();
        mapping.add("org1", "c1").await;
        mapping.add("proj1", "c1").await;
        mapping.add("proj1", "c2").await;

        assert_eq!(mapping.remove_connection("c1").await, 2);
        assert_eq!(mapping.key_count().await, 1);
        assert_eq!(mapping.get("proj1").await, HashSet::from(["c2".to_string()]));
        assert_eq!(mapping.remove_connection("missing").await, 0);
    }

    #[tokio::test]
    async fn test_recipients_of_change() {
        let mapping = ConnectionMapping::new();
        mapping.add("org1", "c1").await;
        mapping.add("proj1", "c2").await;
        mapping.add("proj2", "c3").await;

        let message = EntityChanged {
            change_type: ChangeType::Saved,
            entity_id: "s1".to_string(),
            organization_id: Some("org1".to_string()),
            project_id: Some("proj1".to_string()),
            entity_type: "Stack".to_string(),
        };

        let recipients = mapping.recipients(&message).await;
        assert_eq!(
            recipients,
            HashSet::from(["c1".to_string(), "c2".to_string()])
        );
    }
}
