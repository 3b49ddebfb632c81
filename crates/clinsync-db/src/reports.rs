//! Report repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use clinsync_core::{
    CreateReportRequest, Error, Report, ReportStatus, ReportStore, Result,
};

/// PostgreSQL report repository.
pub struct PgReportRepository {
    pool: Pool<Postgres>,
}

impl PgReportRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(r: &sqlx::postgres::PgRow) -> Result<Report> {
        let report_type: String = r.get("report_type");
        let status: String = r.get("status");
        Ok(Report {
            id: r.get("id"),
            patient_id: r.get("patient_id"),
            report_type: report_type.parse().map_err(Error::InvalidInput)?,
            status: status.parse().map_err(Error::InvalidInput)?,
            created_at: r.get("created_at"),
            last_upload: r.get("last_upload"),
            report_url: r.get("report_url"),
            data_url: r.get("data_url"),
        })
    }
}

#[async_trait]
impl ReportStore for PgReportRepository {
    async fn insert(&self, req: CreateReportRequest) -> Result<Report> {
        let id = clinsync_core::new_v7();
        let now = Utc::now();
        let status = ReportStatus::Processing;

        sqlx::query(
            "INSERT INTO report (id, patient_id, report_type, status, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(req.patient_id)
        .bind(req.report_type.to_string())
        .bind(status.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Report {
            id,
            patient_id: req.patient_id,
            report_type: req.report_type,
            status,
            created_at: now,
            last_upload: None,
            report_url: None,
            data_url: None,
        })
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Report>> {
        let row = sqlx::query(
            "SELECT id, patient_id, report_type, status, created_at, last_upload,
                    report_url, data_url
             FROM report WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn update_status(&self, id: Uuid, status: ReportStatus) -> Result<()> {
        let result = sqlx::query("UPDATE report SET status = $1 WHERE id = $2")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::ReportNotFound(id));
        }
        Ok(())
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        status: ReportStatus,
        report_url: Option<&str>,
        data_url: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE report SET
                status = $1,
                report_url = COALESCE($2, report_url),
                data_url = COALESCE($3, data_url),
                last_upload = $4
             WHERE id = $5",
        )
        .bind(status.to_string())
        .bind(report_url)
        .bind(data_url)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::ReportNotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM report WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn count_for_patient(&self, patient_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM report WHERE patient_id = $1")
            .bind(patient_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.get("count"))
    }
}
