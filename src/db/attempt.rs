//! Assignment attempt rows: chain reads, batch insert, conditional writes,
//! scan listings and the paged active-flag updates.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ActiveFlagRow, AssignmentAttempt, AttemptId, SolicitorId, WorkItemId};

const ATTEMPT_COLUMNS: &str = "id, work_item_id, solicitor_id, solicitor_address, rotation_order, scheduled_at, accepted, currently_active, activated_at, accepted_at, rejected_at, created_at, version";

/// Postgres SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

impl super::Db {
    pub async fn list_attempts(&self, work_item: WorkItemId) -> Result<Vec<AssignmentAttempt>> {
        self.query_attempts(
            "WHERE work_item_id = $1 ORDER BY rotation_order",
            |q| q.bind(work_item.0),
        )
        .await
    }

    /// Insert a chain segment in one transaction. A clash on
    /// `(work_item_id, rotation_order)` means another writer appended first.
    pub async fn insert_attempts(&self, attempts: &[AssignmentAttempt]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        for a in attempts {
            let inserted = sqlx::query(
                "INSERT INTO assignment_attempts (id, work_item_id, solicitor_id, solicitor_address, rotation_order, scheduled_at, accepted, currently_active, activated_at, accepted_at, rejected_at, created_at, version)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(a.id.0)
            .bind(a.work_item_id.0)
            .bind(a.solicitor_id.0)
            .bind(&a.solicitor_address)
            .bind(a.rotation_order as i32)
            .bind(a.scheduled_at)
            .bind(a.accepted)
            .bind(a.currently_active)
            .bind(a.activated_at)
            .bind(a.accepted_at)
            .bind(a.rejected_at)
            .bind(a.created_at)
            .bind(a.version)
            .execute(&mut *tx)
            .await;
            match inserted {
                Ok(_) => {}
                Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                    tx.rollback().await?;
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }
        tx.commit().await?;
        Ok(true)
    }

    /// Write every mutable attempt column if the stored version still
    /// matches `attempt.version`.
    pub async fn cas_attempt(&self, attempt: &AssignmentAttempt) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE assignment_attempts
             SET scheduled_at = $1, accepted = $2, currently_active = $3, activated_at = $4,
                 accepted_at = $5, rejected_at = $6, version = version + 1
             WHERE id = $7 AND version = $8",
        )
        .bind(attempt.scheduled_at)
        .bind(attempt.accepted)
        .bind(attempt.currently_active)
        .bind(attempt.activated_at)
        .bind(attempt.accepted_at)
        .bind(attempt.rejected_at)
        .bind(attempt.id.0)
        .bind(attempt.version)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    pub async fn find_active_attempt(
        &self,
        work_item: WorkItemId,
    ) -> Result<Option<AssignmentAttempt>> {
        let mut attempts = self
            .query_attempts(
                "WHERE work_item_id = $1 AND currently_active
                 ORDER BY activated_at DESC NULLS LAST, rotation_order DESC
                 LIMIT 1",
                |q| q.bind(work_item.0),
            )
            .await?;
        Ok(attempts.pop())
    }

    pub async fn list_stale_accepted(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AssignmentAttempt>> {
        self.query_attempts(
            "WHERE currently_active AND accepted AND scheduled_at <= $1
             ORDER BY work_item_id, rotation_order",
            |q| q.bind(cutoff),
        )
        .await
    }

    pub async fn list_accepted_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AssignmentAttempt>> {
        self.query_attempts(
            "WHERE currently_active AND accepted AND scheduled_at > $1 AND scheduled_at <= $2
             ORDER BY work_item_id, rotation_order",
            |q| q.bind(from).bind(to),
        )
        .await
    }

    pub async fn list_reroute_due(&self, cutoff: DateTime<Utc>) -> Result<Vec<AssignmentAttempt>> {
        self.query_attempts(
            "WHERE currently_active AND NOT accepted AND scheduled_at <= $1
             ORDER BY work_item_id, rotation_order",
            |q| q.bind(cutoff),
        )
        .await
    }

    pub async fn read_active_flags(&self, ids: &[AttemptId]) -> Result<Vec<ActiveFlagRow>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let rows: Vec<(Uuid, bool, i64)> = sqlx::query_as(
            "SELECT id, currently_active, version FROM assignment_attempts WHERE id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, currently_active, version)| ActiveFlagRow {
                id: AttemptId(id),
                currently_active,
                version,
            })
            .collect())
    }

    /// One statement per page; rows whose version moved are left alone.
    pub async fn write_active_flags(
        &self,
        rows: &[ActiveFlagRow],
        target: bool,
    ) -> Result<Vec<AttemptId>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id.0).collect();
        let versions: Vec<i64> = rows.iter().map(|r| r.version).collect();
        let written: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE assignment_attempts a
             SET currently_active = $3, version = a.version + 1
             FROM unnest($1::uuid[], $2::bigint[]) AS expected(id, version)
             WHERE a.id = expected.id AND a.version = expected.version
             RETURNING a.id",
        )
        .bind(&ids)
        .bind(&versions)
        .bind(target)
        .fetch_all(&self.pool)
        .await?;
        Ok(written.into_iter().map(|(id,)| AttemptId(id)).collect())
    }

    async fn query_attempts<F>(&self, filter: &str, bind: F) -> Result<Vec<AssignmentAttempt>>
    where
        F: for<'q> FnOnce(AttemptQuery<'q>) -> AttemptQuery<'q>,
    {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM assignment_attempts {filter}");
        let rows: Vec<AttemptRow> = bind(sqlx::query_as(&sql)).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(AttemptRow::into_attempt).collect())
    }
}

type AttemptQuery<'q> =
    sqlx::query::QueryAs<'q, sqlx::Postgres, AttemptRow, sqlx::postgres::PgArguments>;

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    work_item_id: Uuid,
    solicitor_id: i64,
    solicitor_address: String,
    rotation_order: i32,
    scheduled_at: DateTime<Utc>,
    accepted: bool,
    currently_active: bool,
    activated_at: Option<DateTime<Utc>>,
    accepted_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    version: i64,
}

impl AttemptRow {
    fn into_attempt(self) -> AssignmentAttempt {
        AssignmentAttempt {
            id: AttemptId(self.id),
            work_item_id: WorkItemId(self.work_item_id),
            solicitor_id: SolicitorId(self.solicitor_id),
            solicitor_address: self.solicitor_address,
            rotation_order: self.rotation_order.max(0) as u32,
            scheduled_at: self.scheduled_at,
            accepted: self.accepted,
            currently_active: self.currently_active,
            activated_at: self.activated_at,
            accepted_at: self.accepted_at,
            rejected_at: self.rejected_at,
            created_at: self.created_at,
            version: self.version,
        }
    }
}
