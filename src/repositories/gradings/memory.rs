use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{GradingRepository, RepositoryError};
use crate::db::models::GradingRecord;

/// Process-local store used when no database is configured.
#[derive(Default)]
pub(crate) struct InMemoryGradingRepository {
    records: RwLock<HashMap<String, GradingRecord>>,
}

impl InMemoryGradingRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GradingRepository for InMemoryGradingRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<GradingRecord>, RepositoryError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn upsert(&self, record: &GradingRecord) -> Result<(), RepositoryError> {
        self.records.write().await.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list_recent(
        &self,
        owner: Option<&str>,
        limit: i64,
    ) -> Result<Vec<GradingRecord>, RepositoryError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let guard = self.records.read().await;
        let mut records: Vec<GradingRecord> = guard
            .values()
            .filter(|record| owner.map_or(true, |owner| record.owner_username == owner))
            .cloned()
            .collect();
        drop(guard);

        records.sort_by(|left, right| {
            right.submit_time.cmp(&left.submit_time).then_with(|| right.id.cmp(&left.id))
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
