//! Report processing collaborator.
//!
//! Uploaded medical images are handed to an external processing service
//! which generates the report artifacts. The exchange is a single multipart
//! POST with a long explicit timeout; a timeout or error is a terminal
//! failure recorded on the report row, never retried. Processing always runs
//! detached from the REST request that triggered it, so completion reaches
//! clients through the change feed rather than an HTTP response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use clinsync_core::defaults::{PROCESSING_STATUS_TIMEOUT_SECS, PROCESSING_TIMEOUT_SECS};
use clinsync_core::models::{ReportStatus, ReportType};
use clinsync_core::traits::ReportStore;
use clinsync_core::{Error, Result};

/// One processing request: the uploaded source file plus routing context.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub report_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub report_type: ReportType,
    pub file_name: String,
    pub file_bytes: Vec<u8>,
}

/// Artifact URLs produced by a successful processing run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessingOutcome {
    #[serde(default)]
    pub report_url: Option<String>,
    #[serde(default)]
    pub data_url: Option<String>,
}

/// Backend that turns an uploaded image into report artifacts.
#[async_trait]
pub trait ReportProcessor: Send + Sync {
    async fn process(&self, job: ProcessingJob) -> Result<ProcessingOutcome>;

    /// Cheap availability probe with a short timeout.
    async fn status(&self) -> Result<bool>;
}

/// HTTP client for the external processing service.
pub struct HttpReportProcessor {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpReportProcessor {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
            timeout_secs: PROCESSING_TIMEOUT_SECS,
        }
    }

    /// Create from environment variables. Returns None when
    /// `PROCESSING_SERVICE_URL` is unset or empty so the server can run
    /// without a processing backend.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PROCESSING_SERVICE_URL` | (none) | Base URL of the processing service |
    /// | `PROCESSING_TIMEOUT_SECS` | `600` | Per-request timeout for uploads |
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("PROCESSING_SERVICE_URL").unwrap_or_default();
        if base_url.is_empty() {
            return None;
        }
        let timeout_secs = std::env::var("PROCESSING_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(PROCESSING_TIMEOUT_SECS);
        Some(Self::new(base_url).with_timeout_secs(timeout_secs))
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[async_trait]
impl ReportProcessor for HttpReportProcessor {
    async fn process(&self, job: ProcessingJob) -> Result<ProcessingOutcome> {
        let url = format!("{}/process/{}", self.base_url, job.report_type);

        let form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(job.file_bytes)
                    .file_name(job.file_name)
                    .mime_str("application/octet-stream")?,
            )
            .text("clinic_id", job.clinic_id.to_string())
            .text("patient_id", job.patient_id.to_string())
            .text("report_type", job.report_type.to_string())
            .text("report_id", job.report_id.to_string());

        info!(
            report_id = %job.report_id,
            report_type = %job.report_type,
            url = %url,
            timeout_secs = self.timeout_secs,
            "Submitting report for processing"
        );

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| Error::Processing(format!("Processing request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Processing(format!(
                "Processing service returned {}: {}",
                status, body
            )));
        }

        let outcome: ProcessingOutcome = response.json().await.map_err(|e| {
            Error::Processing(format!("Failed to parse processing response: {}", e))
        })?;
        Ok(outcome)
    }

    async fn status(&self) -> Result<bool> {
        let url = format!("{}/status", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(PROCESSING_STATUS_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

/// Run one processing job in a detached task and record the outcome on the
/// report row: `completed` plus artifact URLs on success, `failed` on any
/// error. The status write flows back to clients through the change feed.
pub fn spawn_report_processing(
    processor: Arc<dyn ReportProcessor>,
    reports: Arc<dyn ReportStore>,
    job: ProcessingJob,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let report_id = job.report_id;
        info!(%report_id, report_type = %job.report_type, "Background report processing started");

        match processor.process(job).await {
            Ok(outcome) => {
                if let Err(e) = reports
                    .record_outcome(
                        report_id,
                        ReportStatus::Completed,
                        outcome.report_url.as_deref(),
                        outcome.data_url.as_deref(),
                    )
                    .await
                {
                    error!(error = %e, %report_id, "Failed to record completed processing outcome");
                } else {
                    info!(%report_id, "Report processing completed");
                }
            }
            Err(e) => {
                warn!(error = %e, %report_id, "Report processing failed");
                if let Err(e) = reports
                    .record_outcome(report_id, ReportStatus::Failed, None, None)
                    .await
                {
                    error!(error = %e, %report_id, "Failed to record failed processing outcome");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeReportStore;
    use clinsync_core::models::CreateReportRequest;

    struct StubProcessor {
        result: std::sync::Mutex<Option<Result<ProcessingOutcome>>>,
    }

    impl StubProcessor {
        fn ok(outcome: ProcessingOutcome) -> Self {
            Self {
                result: std::sync::Mutex::new(Some(Ok(outcome))),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                result: std::sync::Mutex::new(Some(Err(Error::Processing(message.into())))),
            }
        }
    }

    #[async_trait]
    impl ReportProcessor for StubProcessor {
        async fn process(&self, _job: ProcessingJob) -> Result<ProcessingOutcome> {
            self.result.lock().unwrap().take().expect("process called twice")
        }

        async fn status(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn job_for(report_id: Uuid, patient_id: Uuid) -> ProcessingJob {
        ProcessingJob {
            report_id,
            clinic_id: Uuid::new_v4(),
            patient_id,
            report_type: ReportType::Pano,
            file_name: "scan.dcm".into(),
            file_bytes: vec![0u8; 16],
        }
    }

    #[tokio::test]
    async fn test_spawn_records_completed_with_urls() {
        let reports = Arc::new(FakeReportStore::new());
        let row = reports
            .insert(CreateReportRequest {
                patient_id: Uuid::new_v4(),
                report_type: ReportType::Pano,
            })
            .await
            .unwrap();

        let processor = Arc::new(StubProcessor::ok(ProcessingOutcome {
            report_url: Some("https://store/report.pdf".into()),
            data_url: Some("https://store/data.json".into()),
        }));

        let handle = spawn_report_processing(
            processor,
            reports.clone(),
            job_for(row.id, row.patient_id),
        );
        handle.await.unwrap();

        let stored = reports.fetch(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Completed);
        assert_eq!(stored.report_url.as_deref(), Some("https://store/report.pdf"));
        assert_eq!(stored.data_url.as_deref(), Some("https://store/data.json"));
        assert!(stored.last_upload.is_some());
    }

    #[tokio::test]
    async fn test_spawn_records_failed_on_error() {
        let reports = Arc::new(FakeReportStore::new());
        let row = reports
            .insert(CreateReportRequest {
                patient_id: Uuid::new_v4(),
                report_type: ReportType::Cbct,
            })
            .await
            .unwrap();

        let processor = Arc::new(StubProcessor::failing("service timeout"));
        let handle = spawn_report_processing(
            processor,
            reports.clone(),
            job_for(row.id, row.patient_id),
        );
        handle.await.unwrap();

        let stored = reports.fetch(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Failed);
        assert!(stored.report_url.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let processor = HttpReportProcessor::new("http://processing.local/");
        assert_eq!(processor.base_url, "http://processing.local");
        assert_eq!(processor.timeout_secs, PROCESSING_TIMEOUT_SECS);
    }

    #[test]
    fn test_outcome_deserialize_partial() {
        let outcome: ProcessingOutcome =
            serde_json::from_str(r#"{"report_url": "https://x/r.pdf"}"#).unwrap();
        assert_eq!(outcome.report_url.as_deref(), Some("https://x/r.pdf"));
        assert!(outcome.data_url.is_none());
    }
}
