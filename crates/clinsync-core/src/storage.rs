//! Object-storage URL construction.
//!
//! Report artifacts live in an external object store under a deterministic
//! prefix, so URLs are computed rather than persisted:
//! `{clinic}/{patient}/{report_type}/{report_id}/original.png` within the
//! reports bucket. Nothing here performs I/O.

use uuid::Uuid;

use crate::defaults;
use crate::models::ReportType;

/// Builds public object-storage URLs from a configured base.
#[derive(Debug, Clone)]
pub struct StorageUrls {
    public_base: String,
}

impl StorageUrls {
    pub fn new(public_base: impl Into<String>) -> Self {
        let mut public_base = public_base.into();
        while public_base.ends_with('/') {
            public_base.pop();
        }
        Self { public_base }
    }

    /// Read `STORAGE_PUBLIC_URL` from the environment, falling back to a
    /// local development store.
    pub fn from_env() -> Self {
        let base = std::env::var("STORAGE_PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:54321/storage/v1/object/public".to_string());
        Self::new(base)
    }

    /// Public URL for an arbitrary object path within a bucket.
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{}/{}", self.public_base, bucket, path)
    }

    /// Storage path of a report's original uploaded image, relative to the
    /// reports bucket.
    pub fn report_image_path(
        clinic_id: Uuid,
        patient_id: Uuid,
        report_type: ReportType,
        report_id: Uuid,
    ) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            clinic_id,
            patient_id,
            report_type,
            report_id,
            defaults::REPORT_ORIGINAL_IMAGE
        )
    }

    /// Public URL of a report's original uploaded image.
    pub fn report_image_url(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
        report_type: ReportType,
        report_id: Uuid,
    ) -> String {
        self.public_url(
            defaults::REPORTS_BUCKET,
            &Self::report_image_path(clinic_id, patient_id, report_type, report_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_image_path_layout() {
        let clinic = Uuid::nil();
        let patient = Uuid::nil();
        let report = Uuid::nil();
        let path = StorageUrls::report_image_path(clinic, patient, ReportType::Cbct, report);
        assert_eq!(
            path,
            format!("{}/{}/cbct/{}/original.png", clinic, patient, report)
        );
    }

    #[test]
    fn test_public_url_joins_base_bucket_path() {
        let urls = StorageUrls::new("https://store.example.com/object/public/");
        assert_eq!(
            urls.public_url("reports", "a/b/original.png"),
            "https://store.example.com/object/public/reports/a/b/original.png"
        );
    }

    #[test]
    fn test_report_image_url_uses_reports_bucket() {
        let urls = StorageUrls::new("http://localhost:54321/storage/v1/object/public");
        let url = urls.report_image_url(Uuid::nil(), Uuid::nil(), ReportType::Pano, Uuid::nil());
        assert!(url.starts_with("http://localhost:54321/storage/v1/object/public/reports/"));
        assert!(url.ends_with("/pano/00000000-0000-0000-0000-000000000000/original.png"));
    }

    #[test]
    fn test_3dmodel_path_segment() {
        let path =
            StorageUrls::report_image_path(Uuid::nil(), Uuid::nil(), ReportType::ThreeDModel, Uuid::nil());
        assert!(path.contains("/3dmodel/"));
    }
}
