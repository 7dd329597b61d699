mod upload;

pub use upload::UploadResponse;

use crate::config::Config;
use crate::content;
use crate::error::{Error, Result};
use crate::models::Asset;
use crate::service::AssetService;
use axum::{
    Json,
    extract::{Path as AxumPath, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

pub struct AppState {
    pub service: AssetService,
    pub config: Config,
}

/// Asset metadata as served by the API
#[derive(Debug, Serialize, ToSchema)]
pub struct AssetResponse {
    /// SHA256 content hash
    pub hash: String,
    /// Owning project alias
    pub alias: String,
    /// Dotted lowercase extension
    pub ext: String,
    /// Content size in bytes
    pub bytes: u64,
    /// MIME type
    pub mime: String,
    /// First-upload timestamp
    pub created_at: DateTime<Utc>,
    /// Stable public URL
    pub url: String,
}

impl AssetResponse {
    fn new(asset: Asset, url: String) -> Self {
        Self {
            hash: asset.hash,
            alias: asset.alias,
            ext: asset.ext,
            bytes: asset.bytes,
            mime: asset.mime,
            created_at: asset.created_at,
            url,
        }
    }
}

/// Fetch asset metadata by hash
#[utoipa::path(
    get,
    path = "/assets/{alias}/{hash}",
    params(
        ("alias" = String, Path, description = "Project alias"),
        ("hash" = String, Path, description = "SHA256 content hash")
    ),
    responses(
        (status = 200, description = "Asset metadata", body = AssetResponse),
        (status = 400, description = "Invalid alias or hash"),
        (status = 404, description = "Asset not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "assets"
)]
pub async fn get_asset_meta(
    State(state): State<Arc<AppState>>,
    AxumPath((alias, hash)): AxumPath<(String, String)>,
) -> Result<Json<AssetResponse>> {
    content::validate_alias(&alias)?;

    let asset = state.service.get_asset(&hash).await?;
    // The URL points at the project that owns the file, which a re-upload
    // may have moved away from the requested alias.
    let url = state
        .service
        .build_url(&asset.alias, &asset.hash, &asset.ext)?;

    Ok(Json(AssetResponse::new(asset, url)))
}

/// Serve an asset file at its stable public URL.
///
/// The filename is `<hash><ext>`; the read re-hashes the content, so a
/// corrupted vault file surfaces here instead of reaching a document.
pub async fn serve_asset(
    State(state): State<Arc<AppState>>,
    AxumPath((alias, filename)): AxumPath<(String, String)>,
) -> Result<impl IntoResponse> {
    let (hash, ext) = filename
        .split_at_checked(64)
        .ok_or_else(|| Error::InvalidHash {
            hash: filename.clone(),
        })?;

    let data = state.service.read_asset(&alias, hash, ext).await?;
    let content_type = content::detect_mime(ext);

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        data,
    )
        .into_response())
}

#[derive(OpenApi)]
#[openapi(
    components(
        schemas(
            Asset,
            AssetResponse,
            upload::UploadResponse,
        )
    ),
    tags(
        (name = "assets", description = "Asset upload and metadata endpoints")
    )
)]
pub struct ApiDoc;

/// Create the API router with all routes
pub fn create_api_router(state: Arc<AppState>) -> OpenApiRouter {
    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(upload::upload_asset))
        .routes(routes!(get_asset_meta))
        .with_state(state)
}
