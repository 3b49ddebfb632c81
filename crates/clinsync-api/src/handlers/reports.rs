//! Report lifecycle endpoints.
//!
//! Creation validates the patient and the requester's clinic
//! membership, inserts the row, then hands the uploaded file to the
//! background processor. All realtime fan-out (created, status
//! changed, deleted) comes from the change feed watching the `report`
//! table, never from these handlers.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use clinsync_core::{CreateReportRequest, ReportStatus, ReportType};
use clinsync_realtime::{spawn_report_processing, ProcessingJob};

use crate::{ApiError, AppState};

// ===== REQUEST TYPES =====

/// Body for the status update callback.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReportStatusRequest {
    pub status: String,
}

/// One file pulled out of the multipart form.
struct UploadedFile {
    file_name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Invalid multipart payload: {}", e))
}

// ===== HANDLERS =====

/// Create a report and start background processing.
///
/// Multipart fields: `patient_id`, `report_type`, `user_id` and an
/// optional `file`. The requester must hold a role in the patient's
/// clinic or be the clinic's creator. The row is inserted as
/// `processing`; the spawned processor records the terminal outcome
/// and the change feed broadcasts each transition.
#[utoipa::path(post, path = "/api/reports", tag = "Reports",
    responses(
        (status = 201, description = "Report created, processing started"),
        (status = 400, description = "Missing or invalid fields"),
        (status = 403, description = "Requester is not a clinic member"),
        (status = 404, description = "Patient not found")
    ))]
pub async fn create_report(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut patient_id: Option<Uuid> = None;
    let mut report_type_raw: Option<String> = None;
    let mut user_id: Option<Uuid> = None;
    let mut upload: Option<UploadedFile> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "patient_id" => {
                let text = field.text().await.map_err(bad_multipart)?;
                patient_id = Some(text.trim().parse().map_err(|_| {
                    ApiError::BadRequest("Patient ID must be a UUID".to_string())
                })?);
            }
            "report_type" => {
                report_type_raw = Some(field.text().await.map_err(bad_multipart)?);
            }
            "user_id" => {
                let text = field.text().await.map_err(bad_multipart)?;
                user_id = Some(text.trim().parse().map_err(|_| {
                    ApiError::BadRequest("User ID must be a UUID".to_string())
                })?);
            }
            "file" => {
                let file_name = field
                    .file_name()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "upload.bin".to_string());
                let content_type = field.content_type().map(ToString::to_string);
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                upload = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let patient_id =
        patient_id.ok_or_else(|| ApiError::BadRequest("Patient ID is required".to_string()))?;
    let report_type_raw = report_type_raw
        .ok_or_else(|| ApiError::BadRequest("Report type is required".to_string()))?;
    let user_id =
        user_id.ok_or_else(|| ApiError::BadRequest("User ID is required".to_string()))?;
    let report_type: ReportType = report_type_raw
        .trim()
        .parse()
        .map_err(ApiError::BadRequest)?;

    let patient = state
        .patients
        .patient_ref(patient_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Patient not found".to_string()))?;

    // Clinic membership gate: a role row, or being the clinic creator.
    let user_role = match state.roles.role_for(user_id, patient.clinic_id).await? {
        Some(role) => role.as_str().to_string(),
        None => {
            let creator = state.roles.clinic_creator(patient.clinic_id).await?;
            if creator == Some(user_id) {
                "owner".to_string()
            } else {
                return Err(ApiError::Forbidden(
                    "You must be a member of this clinic to create reports".to_string(),
                ));
            }
        }
    };

    let report = state
        .reports
        .insert(CreateReportRequest {
            patient_id,
            report_type,
        })
        .await?;
    info!(
        report_id = %report.id,
        %patient_id,
        %report_type,
        %user_id,
        "Report created"
    );

    let processing = match (&state.processor, &upload) {
        (Some(processor), Some(file)) => {
            let job = ProcessingJob {
                report_id: report.id,
                clinic_id: patient.clinic_id,
                patient_id,
                report_type,
                file_name: file.file_name.clone(),
                file_bytes: file.bytes.clone(),
            };
            spawn_report_processing(processor.clone(), state.reports.clone(), job);
            json!({
                "started": true,
                "message": "File processing started in background",
            })
        }
        (None, Some(_)) => json!({
            "started": false,
            "message": "Processing service not configured",
        }),
        (_, None) => json!({
            "started": false,
            "message": "No file uploaded",
        }),
    };

    let uploaded_file = upload.as_ref().map(|f| {
        json!({
            "filename": f.file_name,
            "size": f.bytes.len(),
            "mimetype": f.content_type,
        })
    });

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "AI Report created successfully",
            "status": "success",
            "report": report,
            "patient": {
                "id": patient_id,
                "name": patient.full_name(),
            },
            "userRole": user_role,
            "uploadedFile": uploaded_file,
            "processing": processing,
        })),
    ))
}

/// Update a report's status directly.
///
/// Callback path for the processing service. Writes the row and lets
/// the change feed broadcast the transition, so callers here get the
/// same fan-out as any other writer.
#[utoipa::path(patch, path = "/api/reports/{id}/status", tag = "Reports",
    params(("id" = Uuid, Path, description = "Report id")),
    request_body = ReportStatusRequest,
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Invalid or unchanged status"),
        (status = 404, description = "Report not found")
    ))]
pub async fn update_report_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReportStatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let new_status: ReportStatus = req.status.trim().parse().map_err(|_| {
        ApiError::BadRequest(
            "Invalid status. Valid statuses are: pending, processing, completed, failed, cancelled"
                .to_string(),
        )
    })?;

    let report = state
        .reports
        .fetch(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Report not found".to_string()))?;

    if report.status == new_status {
        return Err(ApiError::BadRequest(
            "Report status is already set to this value".to_string(),
        ));
    }

    state.reports.update_status(id, new_status).await?;
    info!(report_id = %id, from = %report.status, to = %new_status, "Report status updated");

    Ok(Json(json!({
        "success": true,
        "message": "Report status updated successfully",
        "status": "success",
        "report": {
            "id": id,
            "status": new_status,
        },
        "statusChange": {
            "from": report.status,
            "to": new_status,
        },
    })))
}

/// Delete a report.
///
/// The deletion broadcast (with recovered patient context) comes from
/// the change feed, which still holds the row's snapshot in cache.
#[utoipa::path(delete, path = "/api/reports/{id}", tag = "Reports",
    params(("id" = Uuid, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report deleted"),
        (status = 404, description = "Report not found")
    ))]
pub async fn delete_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .reports
        .fetch(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Report not found".to_string()))?;

    state.reports.delete(id).await?;
    info!(report_id = %id, "Report deleted");

    Ok(Json(json!({
        "success": true,
        "message": "Report deleted successfully",
        "status": "success",
        "deletedReportId": id,
    })))
}
