use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{error, info};
use uuid::Uuid;

use parley_core::CoreError;
use parley_db::models::UploadRow;
use parley_db::ts;
use parley_types::api::{Claims, UploadResponse};

use crate::error::{ApiError, ApiResult, blocking};
use crate::state::AppState;

/// 25 MiB upload limit
pub const MAX_UPLOAD_SIZE: usize = 25 * 1024 * 1024;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 255)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// POST /uploads. Raw body, stored as `{upload_dir}/{id}`.
pub async fn upload(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    bytes: Bytes,
) -> ApiResult<impl IntoResponse> {
    if bytes.is_empty() {
        return Err(ApiError::bad_request("upload is empty"));
    }
    if bytes.len() > MAX_UPLOAD_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }

    let id = Uuid::new_v4();
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let path = state.upload_dir.join(id.to_string());
    tokio::fs::write(&path, &bytes).await.map_err(|e| {
        error!("Failed to write upload {}: {}", path.display(), e);
        ApiError::Internal
    })?;

    let row = UploadRow {
        id: id.to_string(),
        owner_id: claims.sub.to_string(),
        content_type: content_type(&headers),
        size: bytes.len() as i64,
        sha256: sha256.clone(),
        created_at: ts(&Utc::now()),
    };
    blocking(&state.db, move |db| db.insert_upload(&row)).await?;

    info!("{} uploaded {} ({} bytes)", claims.username, id, bytes.len());
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            id,
            size: bytes.len() as u64,
            sha256,
        }),
    ))
}

/// GET /uploads/{id}. The id is a parsed `Uuid`, so it cannot escape the
/// upload directory.
pub async fn download(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let row = blocking(&state.db, move |db| {
        Ok(db
            .get_upload(&upload_id.to_string())?
            .ok_or(CoreError::NotFound("upload"))?)
    })
    .await?;

    let path = state.upload_dir.join(&row.id);
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        error!("Failed to read upload {}: {}", path.display(), e);
        ApiError::Core(CoreError::NotFound("upload"))
    })?;

    Ok(([(header::CONTENT_TYPE, row.content_type)], bytes))
}
