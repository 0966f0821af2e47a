use crate::core::Result;
use async_trait::async_trait;

/// Cooperative cluster-wide mutual exclusion.
///
/// Failing to acquire a lock is not an error: it means another runner owns the work.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// Tries to take `resource`; returns false when someone else holds it.
    async fn lock(&self, resource: &str) -> Result<bool>;

    /// Releases `resource` if this runner holds it.
    async fn unlock(&self, resource: &str) -> Result<()>;
}
