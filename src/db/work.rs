//! Work item rows: insert, conditional status writes, listings.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{JurisdictionId, SolicitorId, Status, WorkItem, WorkItemId};

const WORK_ITEM_COLUMNS: &str = "id, kind, business_location, registration_location, status, assignee, due_at, originator, zone, created_at, updated_at, version";

impl super::Db {
    pub async fn get_work_item(&self, id: WorkItemId) -> Result<WorkItem> {
        let row: WorkItemRow = sqlx::query_as(&format!(
            "SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("work item {id}")))?;
        row.try_into_work_item()
    }

    pub async fn insert_work_item(&self, item: &WorkItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO work_items (id, kind, business_location, registration_location, status, assignee, due_at, originator, zone, created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(item.id.0)
        .bind(item.kind.to_string())
        .bind(item.business_location.0)
        .bind(item.registration_location.map(|j| j.0))
        .bind(item.status.to_string())
        .bind(item.assignee.map(|s| s.0))
        .bind(item.due_at)
        .bind(&item.originator)
        .bind(&item.zone)
        .bind(item.created_at)
        .bind(item.updated_at)
        .bind(item.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write status, assignee and due date if nobody else wrote since
    /// `item.version` was read.
    pub async fn cas_work_item(&self, item: &WorkItem) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE work_items SET status = $1, assignee = $2, due_at = $3, updated_at = $4, version = version + 1
             WHERE id = $5 AND version = $6",
        )
        .bind(item.status.to_string())
        .bind(item.assignee.map(|s| s.0))
        .bind(item.due_at)
        .bind(item.updated_at)
        .bind(item.id.0)
        .bind(item.version)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    /// Most recent first.
    pub async fn list_work_items(
        &self,
        status: Option<Status>,
        limit: i64,
    ) -> Result<Vec<WorkItem>> {
        let rows: Vec<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {WORK_ITEM_COLUMNS} FROM work_items
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC, id
             LIMIT $2"
        ))
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.try_into_work_item()).collect()
    }

    pub async fn list_by_status(&self, status: Status) -> Result<Vec<WorkItem>> {
        let rows: Vec<WorkItemRow> = sqlx::query_as(&format!(
            "SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE status = $1 ORDER BY created_at, id"
        ))
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| r.try_into_work_item()).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: Uuid,
    kind: String,
    business_location: i64,
    registration_location: Option<i64>,
    status: String,
    assignee: Option<i64>,
    due_at: Option<DateTime<Utc>>,
    originator: String,
    zone: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl WorkItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: WorkItemId(self.id),
            kind: self.kind.parse()?,
            business_location: JurisdictionId(self.business_location),
            registration_location: self.registration_location.map(JurisdictionId),
            status: self.status.parse()?,
            assignee: self.assignee.map(SolicitorId),
            due_at: self.due_at,
            originator: self.originator,
            zone: self.zone,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}
