//! Query Manager
//!
//! Tracks in-flight queries per connection so the façade can cancel a
//! specific query id or "whatever ran last" on a connection.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::engine::types::{ConnectionId, QueryId};

pub struct QueryManager {
    active: RwLock<HashMap<QueryId, ConnectionId>>,
    by_connection: RwLock<HashMap<ConnectionId, HashSet<QueryId>>>,
    last_by_connection: RwLock<HashMap<ConnectionId, QueryId>>,
}

impl QueryManager {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            by_connection: RwLock::new(HashMap::new()),
            last_by_connection: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a fresh query id for a connection and returns it.
    pub async fn register(&self, connection: &ConnectionId) -> QueryId {
        let query_id = QueryId::new();

        {
            let mut active = self.active.write().await;
            active.insert(query_id, connection.clone());
        }
        {
            let mut by_connection = self.by_connection.write().await;
            by_connection
                .entry(connection.clone())
                .or_default()
                .insert(query_id);
        }
        {
            let mut last = self.last_by_connection.write().await;
            last.insert(connection.clone(), query_id);
        }

        query_id
    }

    /// Removes a finished query from the books.
    pub async fn finish(&self, query_id: QueryId) {
        let connection = {
            let mut active = self.active.write().await;
            active.remove(&query_id)
        };

        if let Some(connection) = connection {
            let mut by_connection = self.by_connection.write().await;
            if let Some(set) = by_connection.get_mut(&connection) {
                set.remove(&query_id);
                if set.is_empty() {
                    by_connection.remove(&connection);
                }
            }

            let mut last = self.last_by_connection.write().await;
            if last.get(&connection) == Some(&query_id) {
                last.remove(&connection);
            }
        }
    }

    /// Drops all bookkeeping for a connection (used on disconnect).
    pub async fn clear_connection(&self, connection: &ConnectionId) {
        let ids = {
            let mut by_connection = self.by_connection.write().await;
            by_connection.remove(connection).unwrap_or_default()
        };

        {
            let mut active = self.active.write().await;
            for id in &ids {
                active.remove(id);
            }
        }
        {
            let mut last = self.last_by_connection.write().await;
            last.remove(connection);
        }
    }

    pub async fn contains(&self, query_id: QueryId) -> bool {
        self.active.read().await.contains_key(&query_id)
    }

    pub async fn connection_for(&self, query_id: QueryId) -> Option<ConnectionId> {
        self.active.read().await.get(&query_id).cloned()
    }

    pub async fn last_for_connection(&self, connection: &ConnectionId) -> Option<QueryId> {
        self.last_by_connection.read().await.get(connection).copied()
    }
}

impl Default for QueryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registers_and_finishes_queries() {
        let manager = QueryManager::new();
        let conn = ConnectionId::from("conn-1");
        let query_id = manager.register(&conn).await;

        assert!(manager.contains(query_id).await);
        assert_eq!(manager.connection_for(query_id).await, Some(conn.clone()));
        assert_eq!(manager.last_for_connection(&conn).await, Some(query_id));

        manager.finish(query_id).await;
        assert!(!manager.contains(query_id).await);
        assert_eq!(manager.last_for_connection(&conn).await, None);
    }

    #[tokio::test]
    async fn last_tracks_the_most_recent_registration() {
        let manager = QueryManager::new();
        let conn = ConnectionId::from("conn-1");
        let first = manager.register(&conn).await;
        let second = manager.register(&conn).await;

        assert_eq!(manager.last_for_connection(&conn).await, Some(second));

        // Finishing an older query must not clobber the newer "last".
        manager.finish(first).await;
        assert_eq!(manager.last_for_connection(&conn).await, Some(second));
    }

    #[tokio::test]
    async fn clear_connection_drops_everything_for_that_connection_only() {
        let manager = QueryManager::new();
        let a = ConnectionId::from("a");
        let b = ConnectionId::from("b");
        let qa = manager.register(&a).await;
        let qb = manager.register(&b).await;

        manager.clear_connection(&a).await;

        assert!(!manager.contains(qa).await);
        assert_eq!(manager.last_for_connection(&a).await, None);
        assert!(manager.contains(qb).await);
    }
}
