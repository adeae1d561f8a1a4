//! Solicitor directory reads, plus the upserts used to seed it.

use crate::error::Result;
use crate::model::{Candidate, Firm, JurisdictionId, Solicitor, SolicitorId};

impl super::Db {
    /// Active, onboarded solicitors of every firm covering `jurisdiction`.
    /// Unordered; ranking is the engine's job.
    pub async fn find_candidates(&self, jurisdiction: JurisdictionId) -> Result<Vec<Candidate>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT s.id, s.address
             FROM solicitors s
             JOIN firms f ON f.id = s.firm_id
             WHERE f.jurisdiction_id = $1 AND s.active AND s.onboarded",
        )
        .bind(jurisdiction.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, address)| Candidate {
                solicitor_id: SolicitorId(id),
                address,
            })
            .collect())
    }

    pub async fn upsert_firm(&self, firm: &Firm) -> Result<()> {
        sqlx::query(
            "INSERT INTO firms (id, name, jurisdiction_id) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, jurisdiction_id = EXCLUDED.jurisdiction_id",
        )
        .bind(firm.id.0)
        .bind(&firm.name)
        .bind(firm.jurisdiction.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_solicitor(&self, solicitor: &Solicitor) -> Result<()> {
        sqlx::query(
            "INSERT INTO solicitors (id, firm_id, address, active, onboarded) VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET firm_id = EXCLUDED.firm_id, address = EXCLUDED.address,
                 active = EXCLUDED.active, onboarded = EXCLUDED.onboarded",
        )
        .bind(solicitor.id.0)
        .bind(solicitor.firm_id.0)
        .bind(&solicitor.address)
        .bind(solicitor.active)
        .bind(solicitor.onboarded)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
