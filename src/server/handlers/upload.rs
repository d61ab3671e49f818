use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Path, State};
use serde::Serialize;
use tracing::info;

use crate::models::{FileReport, UploadFile, UploadOutcome};
use crate::server::AppState;
use crate::server::error::ApiError;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub kb_id: String,
    pub name: String,
    /// Files ingested by this request.
    pub file_names: Vec<String>,
    pub per_file_status: Vec<FileReport>,
    pub message: String,
}

impl From<UploadOutcome> for UploadResponse {
    fn from(outcome: UploadOutcome) -> Self {
        Self {
            kb_id: outcome.knowledge_base.id,
            name: outcome.knowledge_base.name,
            file_names: outcome.report.ingested_names(),
            message: outcome.report.summary(),
            per_file_status: outcome.report.files,
        }
    }
}

/// Parts of an upload form.
#[derive(Debug, Default)]
struct UploadForm {
    name: Option<String>,
    files: Vec<UploadFile>,
}

async fn read_form(mut multipart: Multipart, max_files: u64) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await? {
        let part = field.name().map(str::to_string);
        match part.as_deref() {
            Some("files") | Some("file") => {
                if form.files.len() as u64 >= max_files {
                    return Err(ApiError::BadRequest(format!(
                        "at most {max_files} files per upload"
                    )));
                }
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                form.files.push(UploadFile::new(file_name, bytes.to_vec()));
            }
            Some("name") => {
                form.name = Some(field.text().await?);
            }
            _ => {}
        }
    }

    Ok(form)
}

/// POST /api/v1/upload
pub async fn create_knowledge_base(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let form = read_form(multipart, state.config.server.max_files_per_upload).await?;
    info!(files = form.files.len(), "upload received");

    let outcome = state.kbs.create(form.name, form.files).await?;
    Ok(Json(outcome.into()))
}

/// POST /api/v1/kb/:kb_id/files
pub async fn add_files(
    State(state): State<Arc<AppState>>,
    Path(kb_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let form = read_form(multipart, state.config.server.max_files_per_upload).await?;
    info!(kb_id = %kb_id, files = form.files.len(), "files added");

    let outcome = state.kbs.add_files(&kb_id, form.files).await?;
    Ok(Json(outcome.into()))
}
