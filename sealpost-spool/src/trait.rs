use async_trait::async_trait;

use crate::{JobId, JobRecord};

/// Storage for persisted jobs.
///
/// Implementations must make `write` and `update` durable before returning,
/// since the executor acknowledges an enqueue only after `write` succeeds.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Persist a new record.
    ///
    /// # Errors
    /// `AlreadyExists` if a record with the same id is stored, or any storage
    /// failure.
    async fn write(&self, record: &JobRecord) -> crate::Result<()>;

    /// All stored ids, sorted.
    async fn list(&self) -> crate::Result<Vec<JobId>>;

    async fn read(&self, id: &JobId) -> crate::Result<JobRecord>;

    /// Replace an existing record.
    ///
    /// # Errors
    /// `NotFound` if nothing is stored under the record's id.
    async fn update(&self, record: &JobRecord) -> crate::Result<()>;

    async fn delete(&self, id: &JobId) -> crate::Result<()>;
}
