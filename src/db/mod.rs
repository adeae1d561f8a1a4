//! Postgres ledger: connection pool, migrations, health check, and the
//! [`Store`] implementation the engine runs against in production.
//!
//! Query code lives in the submodules as inherent methods on [`Db`]; the
//! trait impls below only route to them.

pub mod attempt;
pub mod directory;
pub mod work;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::{Error, Result};
use crate::model::{
    ActiveFlagRow, AssignmentAttempt, AttemptId, Candidate, JurisdictionId, Status, WorkItem,
    WorkItemId,
};
use crate::store::{ActiveFlagStore, Store};

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ActiveFlagStore for Db {
    async fn read_active_flags(&self, ids: &[AttemptId]) -> Result<Vec<ActiveFlagRow>> {
        self.read_active_flags(ids).await
    }

    async fn write_active_flags(
        &self,
        rows: &[ActiveFlagRow],
        target: bool,
    ) -> Result<Vec<AttemptId>> {
        self.write_active_flags(rows, target).await
    }
}

#[async_trait]
impl Store for Db {
    async fn get_work_item(&self, id: WorkItemId) -> Result<WorkItem> {
        self.get_work_item(id).await
    }

    async fn insert_work_item(&self, item: &WorkItem) -> Result<()> {
        self.insert_work_item(item).await
    }

    async fn cas_work_item(&self, item: &WorkItem) -> Result<bool> {
        self.cas_work_item(item).await
    }

    async fn list_work_items(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem>> {
        self.list_work_items(status, limit).await
    }

    async fn list_by_status(&self, status: Status) -> Result<Vec<WorkItem>> {
        self.list_by_status(status).await
    }

    async fn find_candidates(&self, jurisdiction: JurisdictionId) -> Result<Vec<Candidate>> {
        self.find_candidates(jurisdiction).await
    }

    async fn list_attempts(&self, work_item: WorkItemId) -> Result<Vec<AssignmentAttempt>> {
        self.list_attempts(work_item).await
    }

    async fn insert_attempts(&self, attempts: &[AssignmentAttempt]) -> Result<bool> {
        self.insert_attempts(attempts).await
    }

    async fn cas_attempt(&self, attempt: &AssignmentAttempt) -> Result<bool> {
        self.cas_attempt(attempt).await
    }

    async fn find_active_attempt(
        &self,
        work_item: WorkItemId,
    ) -> Result<Option<AssignmentAttempt>> {
        self.find_active_attempt(work_item).await
    }

    async fn list_stale_accepted(&self, cutoff: DateTime<Utc>) -> Result<Vec<AssignmentAttempt>> {
        self.list_stale_accepted(cutoff).await
    }

    async fn list_accepted_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AssignmentAttempt>> {
        self.list_accepted_between(from, to).await
    }

    async fn list_reroute_due(&self, cutoff: DateTime<Utc>) -> Result<Vec<AssignmentAttempt>> {
        self.list_reroute_due(cutoff).await
    }
}
