use crate::core::Result;
use crate::services::ClusterLock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A `ClusterLock` over a lock table shared by every peer created from it.
#[derive(Clone)]
pub struct MemoryClusterLock {
    server_id: String,
    table: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryClusterLock {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Another runner competing for the same locks.
    pub fn with_peer(&self, server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            table: self.table.clone(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Current holder of `resource`.
    pub fn owner(&self, resource: &str) -> Option<String> {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned()
    }

    pub fn is_locked(&self, resource: &str) -> bool {
        self.owner(resource).is_some()
    }
}

#[async_trait]
impl ClusterLock for MemoryClusterLock {
    async fn lock(&self, resource: &str) -> Result<bool> {
        let mut table = self.table.lock()?;
        if table.contains_key(resource) {
            return Ok(false);
        }
        table.insert(resource.to_string(), self.server_id.clone());
        Ok(true)
    }

    async fn unlock(&self, resource: &str) -> Result<()> {
        let mut table = self.table.lock()?;
        if table.get(resource) == Some(&self.server_id) {
            table.remove(resource);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peers_exclude_each_other() {
        let first = MemoryClusterLock::new("server-1");
        let second = first.with_peer("server-2");

        assert!(first.lock("ROUTE").await.unwrap());
        assert!(!second.lock("ROUTE").await.unwrap());
        assert!(!first.lock("ROUTE").await.unwrap());

        second.unlock("ROUTE").await.unwrap();
        assert_eq!(first.owner("ROUTE").as_deref(), Some("server-1"));

        first.unlock("ROUTE").await.unwrap();
        assert!(!second.is_locked("ROUTE"));
        assert!(second.lock("ROUTE").await.unwrap());
    }
}
