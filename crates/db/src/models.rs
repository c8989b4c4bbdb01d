//! Row structs that map 1-to-1 onto database tables, plus the typed
//! [`DomainRecord`] the rest of the application works with.
//!
//! These are *persistence* models: a record is the calling application's own
//! view of a business entity and carries the task handle(s) the orchestration
//! boundary returned for it. Nothing here knows how tasks run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Record kind
// ---------------------------------------------------------------------------

/// The business entity a record represents. Each kind drives one reference
/// workflow (or, for compliance checks, a pair of them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Order,
    AnalyticsJob,
    ServiceRequest,
    ComplianceCheck,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::AnalyticsJob => "analytics_job",
            Self::ServiceRequest => "service_request",
            Self::ComplianceCheck => "compliance_check",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order"            => Ok(Self::Order),
            "analytics_job"    => Ok(Self::AnalyticsJob),
            "service_request"  => Ok(Self::ServiceRequest),
            "compliance_check" => Ok(Self::ComplianceCheck),
            other              => Err(format!("unknown record kind: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Record status
// ---------------------------------------------------------------------------

/// Lifecycle of a record relative to task submission.
///
/// `Processing` means every task was created; `Pending` means at least one
/// submission failed and the record is waiting on the caller to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Created,
    Processing,
    Pending,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created    => write!(f, "created"),
            Self::Processing => write!(f, "processing"),
            Self::Pending    => write!(f, "pending"),
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created"    => Ok(Self::Created),
            "processing" => Ok(Self::Processing),
            "pending"    => Ok(Self::Pending),
            other        => Err(format!("unknown record status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// domain_records
// ---------------------------------------------------------------------------

/// A persisted domain record row, exactly as Postgres returns it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DomainRecordRow {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub task_uuid: Option<Uuid>,
    /// `{namespace: task_uuid | null}`
    pub task_uuids: serde_json::Value,
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Typed view of a domain record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub id: Uuid,
    pub kind: RecordKind,
    /// The request body the record was created from.
    pub payload: serde_json::Value,
    pub status: RecordStatus,
    /// Primary task; for compliance checks this is the customer-success task.
    pub task_uuid: Option<Uuid>,
    /// Every namespace that was targeted, including failed submissions.
    pub task_uuids: BTreeMap<String, Option<Uuid>>,
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DomainRecord {
    /// A fresh record that has not been submitted anywhere yet.
    pub fn new(kind: RecordKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            status: RecordStatus::Created,
            task_uuid: None,
            task_uuids: BTreeMap::new(),
            correlation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold the outcome of task submission into this record.
    pub fn apply(&mut self, attachment: TaskAttachment) {
        self.status = attachment.status;
        self.task_uuid = attachment.task_uuid;
        self.task_uuids = attachment.task_uuids;
        self.correlation_id = attachment.correlation_id;
        self.updated_at = Utc::now();
    }
}

impl TryFrom<DomainRecordRow> for DomainRecord {
    type Error = DbError;

    fn try_from(row: DomainRecordRow) -> Result<Self, Self::Error> {
        let kind = row.kind.parse().map_err(DbError::Decode)?;
        let status = row.status.parse().map_err(DbError::Decode)?;
        let task_uuids = serde_json::from_value(row.task_uuids)
            .map_err(|e| DbError::Decode(format!("task_uuids: {e}")))?;

        Ok(Self {
            id: row.id,
            kind,
            payload: row.payload,
            status,
            task_uuid: row.task_uuid,
            task_uuids,
            correlation_id: row.correlation_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// The one update a record receives after its tasks were submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskAttachment {
    pub status: RecordStatus,
    pub task_uuid: Option<Uuid>,
    pub task_uuids: BTreeMap<String, Option<Uuid>>,
    pub correlation_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(kind: &str, status: &str, task_uuids: serde_json::Value) -> DomainRecordRow {
        let now = Utc::now();
        DomainRecordRow {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload: json!({"customer_email": "a@example.com"}),
            status: status.into(),
            task_uuid: None,
            task_uuids,
            correlation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn row_converts_into_typed_record() {
        let task = Uuid::new_v4();
        let record = DomainRecord::try_from(row(
            "compliance_check",
            "processing",
            json!({"customer_success": task, "payments": null}),
        ))
        .unwrap();

        assert_eq!(record.kind, RecordKind::ComplianceCheck);
        assert_eq!(record.status, RecordStatus::Processing);
        assert_eq!(record.task_uuids["customer_success"], Some(task));
        assert_eq!(record.task_uuids["payments"], None);
    }

    #[test]
    fn unknown_kind_is_a_decode_error() {
        let err = DomainRecord::try_from(row("invoice", "created", json!({}))).unwrap_err();
        assert!(matches!(err, DbError::Decode(_)));
    }

    #[test]
    fn kind_round_trips_through_its_string_form() {
        for kind in [
            RecordKind::Order,
            RecordKind::AnalyticsJob,
            RecordKind::ServiceRequest,
            RecordKind::ComplianceCheck,
        ] {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
        }
    }

    #[test]
    fn apply_overwrites_submission_fields() {
        let mut record = DomainRecord::new(RecordKind::Order, json!({}));
        let task = Uuid::new_v4();
        record.apply(TaskAttachment {
            status: RecordStatus::Processing,
            task_uuid: Some(task),
            task_uuids: [("ecommerce".to_string(), Some(task))].into_iter().collect(),
            correlation_id: Some(Uuid::new_v4()),
        });

        assert_eq!(record.status, RecordStatus::Processing);
        assert_eq!(record.task_uuid, Some(task));
        assert!(record.updated_at >= record.created_at);
    }
}
