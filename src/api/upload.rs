use crate::api::AppState;
use crate::error::{Error, Result};
use axum::{Json, extract::Multipart, extract::State, response::IntoResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Response for a successful single-shot upload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub success: bool,
    /// SHA256 content hash
    pub hash: String,
    /// Dotted lowercase extension
    pub ext: String,
    /// Stable public URL
    pub url: String,
    /// Content size in bytes
    pub bytes: u64,
    /// MIME type
    pub mime: String,
}

/// Upload a single asset as multipart form data
#[utoipa::path(
    post,
    path = "/upload",
    request_body(content_type = "multipart/form-data", description = "Fields: `project` (alias), `file` (binary payload)"),
    responses(
        (status = 200, description = "Asset stored", body = UploadResponse),
        (status = 400, description = "Validation failure or unsupported type"),
        (status = 500, description = "Internal server error")
    ),
    tag = "assets"
)]
pub async fn upload_asset(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut project: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!(error = %e, "Failed to read multipart field");
        Error::MissingField {
            field: "multipart body".to_string(),
        }
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("project") => {
                let value = field.text().await.map_err(|_| Error::MissingField {
                    field: "project".to_string(),
                })?;
                project = Some(value);
            }
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let data = field.bytes().await.map_err(|e| {
                    tracing::warn!(error = %e, "Failed to read file field");
                    Error::MissingField {
                        field: "file".to_string(),
                    }
                })?;
                file = Some((filename, data.to_vec()));
            }
            _ => {}
        }
    }

    let project = project.ok_or_else(|| Error::MissingField {
        field: "project".to_string(),
    })?;
    let (filename, data) = file.ok_or_else(|| Error::MissingField {
        field: "file".to_string(),
    })?;

    // The multipart budget is slightly above the limit so an oversized
    // payload is reported as too large rather than as a broken body.
    let limit = state.config.server.max_upload_size.as_u64();
    if data.len() as u64 > limit {
        return Err(Error::FileTooLarge {
            size: data.len() as u64,
            limit,
        });
    }

    let info = state.service.upload(&project, &data, &filename).await?;
    let url = state.service.build_url(&project, &info.hash, &info.ext)?;

    Ok(Json(UploadResponse {
        success: true,
        hash: info.hash,
        ext: info.ext,
        url,
        bytes: info.bytes,
        mime: info.mime,
    }))
}
