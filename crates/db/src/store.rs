//! The [`DomainStore`] seam the HTTP layer talks to.
//!
//! [`PgStore`] delegates to the repository functions; [`MemoryStore`] keeps
//! records in a map and backs `serve` without `DATABASE_URL` and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    models::{DomainRecord, RecordKind, TaskAttachment},
    repository::records,
    DbError, DbPool,
};

#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Persist a new record before any task is submitted for it.
    async fn create(&self, record: DomainRecord) -> Result<DomainRecord, DbError>;

    /// Apply the single post-submission update.
    async fn attach_tasks(&self, id: Uuid, attachment: TaskAttachment) -> Result<DomainRecord, DbError>;

    /// Fetch a record; a kind mismatch is `NotFound`.
    async fn get(&self, kind: RecordKind, id: Uuid) -> Result<DomainRecord, DbError>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl DomainStore for PgStore {
    #[instrument(skip(self, record), fields(record_id = %record.id, kind = %record.kind))]
    async fn create(&self, record: DomainRecord) -> Result<DomainRecord, DbError> {
        records::insert_record(&self.pool, &record).await
    }

    #[instrument(skip(self, attachment))]
    async fn attach_tasks(&self, id: Uuid, attachment: TaskAttachment) -> Result<DomainRecord, DbError> {
        records::attach_tasks(&self.pool, id, &attachment).await
    }

    async fn get(&self, kind: RecordKind, id: Uuid) -> Result<DomainRecord, DbError> {
        records::get_record(&self.pool, kind, id).await
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, DomainRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DomainStore for MemoryStore {
    async fn create(&self, record: DomainRecord) -> Result<DomainRecord, DbError> {
        debug!(record_id = %record.id, kind = %record.kind, "Storing record in memory");
        self.records.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn attach_tasks(&self, id: Uuid, attachment: TaskAttachment) -> Result<DomainRecord, DbError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(DbError::NotFound)?;
        record.apply(attachment);
        Ok(record.clone())
    }

    async fn get(&self, kind: RecordKind, id: Uuid) -> Result<DomainRecord, DbError> {
        self.records
            .read()
            .await
            .get(&id)
            .filter(|r| r.kind == kind)
            .cloned()
            .ok_or(DbError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStatus;
    use serde_json::json;

    #[tokio::test]
    async fn created_record_can_be_fetched_by_kind() {
        let store = MemoryStore::new();
        let record = store
            .create(DomainRecord::new(RecordKind::Order, json!({"customer_email": "a@b.co"})))
            .await
            .unwrap();

        let fetched = store.get(RecordKind::Order, record.id).await.unwrap();
        assert_eq!(fetched, record);
        assert_eq!(fetched.status, RecordStatus::Created);
    }

    #[tokio::test]
    async fn wrong_kind_is_not_found() {
        let store = MemoryStore::new();
        let record = store
            .create(DomainRecord::new(RecordKind::Order, json!({})))
            .await
            .unwrap();

        let err = store.get(RecordKind::AnalyticsJob, record.id).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[tokio::test]
    async fn attach_tasks_updates_the_stored_copy() {
        let store = MemoryStore::new();
        let record = store
            .create(DomainRecord::new(RecordKind::ComplianceCheck, json!({})))
            .await
            .unwrap();
        let task = Uuid::new_v4();

        store
            .attach_tasks(
                record.id,
                TaskAttachment {
                    status: RecordStatus::Pending,
                    task_uuid: Some(task),
                    task_uuids: [
                        ("customer_success".to_string(), Some(task)),
                        ("payments".to_string(), None),
                    ]
                    .into_iter()
                    .collect(),
                    correlation_id: Some(Uuid::new_v4()),
                },
            )
            .await
            .unwrap();

        let fetched = store.get(RecordKind::ComplianceCheck, record.id).await.unwrap();
        assert_eq!(fetched.status, RecordStatus::Pending);
        assert_eq!(fetched.task_uuid, Some(task));
        assert_eq!(fetched.task_uuids.len(), 2);
    }

    #[tokio::test]
    async fn attach_tasks_to_missing_record_fails() {
        let store = MemoryStore::new();
        let err = store
            .attach_tasks(
                Uuid::new_v4(),
                TaskAttachment {
                    status: RecordStatus::Processing,
                    task_uuid: None,
                    task_uuids: Default::default(),
                    correlation_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }
}
