mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::models::GradingRecord;

pub(crate) use memory::InMemoryGradingRepository;
pub(crate) use postgres::PgGradingRepository;

#[derive(Debug, Error)]
pub(crate) enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Keyed storage for grading records. `upsert` overwrites unconditionally.
#[async_trait]
pub(crate) trait GradingRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<GradingRecord>, RepositoryError>;

    async fn upsert(&self, record: &GradingRecord) -> Result<(), RepositoryError>;

    /// Most recently submitted first; `owner` narrows to one submitter.
    async fn list_recent(
        &self,
        owner: Option<&str>,
        limit: i64,
    ) -> Result<Vec<GradingRecord>, RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;
}
