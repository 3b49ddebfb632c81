//! Patient lookups backing the realtime pipeline.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use clinsync_core::{Error, PatientDetails, PatientDirectory, PatientRef, Result};

/// PostgreSQL patient directory.
pub struct PgPatientRepository {
    pool: Pool<Postgres>,
}

impl PgPatientRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PatientDirectory for PgPatientRepository {
    async fn patient_ref(&self, patient_id: Uuid) -> Result<Option<PatientRef>> {
        let row = sqlx::query("SELECT clinic_id, first_name, last_name FROM patient WHERE id = $1")
            .bind(patient_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(|r| PatientRef {
            clinic_id: r.get("clinic_id"),
            first_name: r.get("first_name"),
            last_name: r.get("last_name"),
        }))
    }

    async fn patient_details(&self, patient_id: Uuid) -> Result<Option<PatientDetails>> {
        let row = sqlx::query(
            "SELECT clinic_id, first_name, last_name, created_by FROM patient WHERE id = $1",
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let doctors = sqlx::query(
            "SELECT treating_doctor_id FROM treatment WHERE patient_id = $1
             ORDER BY created_at",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Some(PatientDetails {
            clinic_id: row.get("clinic_id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            created_by: row.get("created_by"),
            treating_doctor_ids: doctors
                .iter()
                .map(|r| r.get("treating_doctor_id"))
                .collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{cleanup_clinic, seed_clinic, TestDatabase};

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL with migrated database
    async fn test_patient_ref_found() {
        let test_db = TestDatabase::new().await;
        let seeded = seed_clinic(&test_db.db.pool).await;

        let repo = PgPatientRepository::new(test_db.db.pool.clone());
        let patient = repo
            .patient_ref(seeded.patient_id)
            .await
            .unwrap()
            .expect("seeded patient should exist");
        assert_eq!(patient.clinic_id, seeded.clinic_id);
        assert_eq!(patient.full_name(), "Test Patient");

        cleanup_clinic(&test_db.db.pool, &seeded).await;
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL with migrated database
    async fn test_patient_ref_missing() {
        let test_db = TestDatabase::new().await;
        let repo = PgPatientRepository::new(test_db.db.pool.clone());
        assert!(repo.patient_ref(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL with migrated database
    async fn test_patient_details_includes_treating_doctors() {
        let test_db = TestDatabase::new().await;
        let seeded = seed_clinic(&test_db.db.pool).await;

        let repo = PgPatientRepository::new(test_db.db.pool.clone());
        let details = repo
            .patient_details(seeded.patient_id)
            .await
            .unwrap()
            .expect("seeded patient should exist");
        assert_eq!(details.created_by, Some(seeded.creator_id));
        assert_eq!(details.treating_doctor_ids, vec![seeded.doctor_id]);

        cleanup_clinic(&test_db.db.pool, &seeded).await;
    }
}
