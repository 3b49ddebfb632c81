//! Clinic membership and ownership lookups.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use clinsync_core::{ClinicMember, ClinicRole, Error, Result, RoleStore};

/// PostgreSQL role repository.
pub struct PgRoleRepository {
    pool: Pool<Postgres>,
}

impl PgRoleRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleStore for PgRoleRepository {
    async fn role_for(&self, user_id: Uuid, clinic_id: Uuid) -> Result<Option<ClinicRole>> {
        let row = sqlx::query(
            "SELECT role FROM user_clinic_role WHERE user_id = $1 AND clinic_id = $2",
        )
        .bind(user_id)
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| ClinicRole::parse(r.get("role"))))
    }

    async fn clinic_creator(&self, clinic_id: Uuid) -> Result<Option<Uuid>> {
        let row = sqlx::query("SELECT created_by FROM clinic WHERE id = $1")
            .bind(clinic_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(|r| r.get("created_by")))
    }

    async fn members(&self, clinic_id: Uuid) -> Result<Vec<ClinicMember>> {
        let rows = sqlx::query(
            "SELECT user_id, role FROM user_clinic_role WHERE clinic_id = $1
             ORDER BY user_id",
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|r| ClinicMember {
                user_id: r.get("user_id"),
                role: ClinicRole::parse(r.get("role")),
            })
            .collect())
    }
}
