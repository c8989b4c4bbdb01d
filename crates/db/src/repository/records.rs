//! Domain record CRUD operations.
//!
//! Queries are checked at runtime (`sqlx::query_as::<_, Row>`) so the crate
//! builds without a live database.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{DomainRecord, DomainRecordRow, RecordKind, TaskAttachment},
    DbError,
};

const COLUMNS: &str =
    "id, kind, payload, status, task_uuid, task_uuids, correlation_id, created_at, updated_at";

/// Insert a freshly created record.
pub async fn insert_record(pool: &PgPool, record: &DomainRecord) -> Result<DomainRecord, DbError> {
    let task_uuids = serde_json::to_value(&record.task_uuids)
        .map_err(|e| DbError::Decode(format!("task_uuids: {e}")))?;

    let sql = format!(
        r#"
        INSERT INTO domain_records
            (id, kind, payload, status, task_uuid, task_uuids, correlation_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {COLUMNS}
        "#
    );

    let row = sqlx::query_as::<_, DomainRecordRow>(&sql)
        .bind(record.id)
        .bind(record.kind.as_str())
        .bind(&record.payload)
        .bind(record.status.to_string())
        .bind(record.task_uuid)
        .bind(task_uuids)
        .bind(record.correlation_id)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(pool)
        .await?;

    row.try_into()
}

/// Fetch a single record of the given kind.
///
/// A record that exists under a different kind is reported as
/// `DbError::NotFound`, so `/orders/:id` never leaks an analytics job.
pub async fn get_record(pool: &PgPool, kind: RecordKind, id: Uuid) -> Result<DomainRecord, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM domain_records WHERE id = $1 AND kind = $2");

    let row = sqlx::query_as::<_, DomainRecordRow>(&sql)
        .bind(id)
        .bind(kind.as_str())
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;

    row.try_into()
}

/// Record the outcome of task submission.
///
/// Returns `DbError::NotFound` if no row was updated.
pub async fn attach_tasks(
    pool: &PgPool,
    id: Uuid,
    attachment: &TaskAttachment,
) -> Result<DomainRecord, DbError> {
    let task_uuids = serde_json::to_value(&attachment.task_uuids)
        .map_err(|e| DbError::Decode(format!("task_uuids: {e}")))?;

    let sql = format!(
        r#"
        UPDATE domain_records
        SET status = $2, task_uuid = $3, task_uuids = $4, correlation_id = $5, updated_at = $6
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    );

    let row = sqlx::query_as::<_, DomainRecordRow>(&sql)
        .bind(id)
        .bind(attachment.status.to_string())
        .bind(attachment.task_uuid)
        .bind(task_uuids)
        .bind(attachment.correlation_id)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;

    row.try_into()
}
