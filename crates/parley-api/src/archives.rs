use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;

use parley_types::api::{ArchiveRequest, Claims};
use parley_types::models::ChatRef;

use crate::chat::open_chat;
use crate::error::{ApiResult, blocking};
use crate::state::AppState;

/// The caller's archived chats, most recently archived first.
pub async fn list_archives(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let user = claims.sub;
    let chats = blocking(&state.db, move |db| {
        let rows = db.get_archives(&user.to_string())?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let chat = ChatRef::from_storage(&row.chat_kind, &row.chat_id, user);
                if chat.is_none() {
                    warn!("Skipping corrupt archive entry {}:{}", row.chat_kind, row.chat_id);
                }
                chat
            })
            .collect::<Vec<_>>())
    })
    .await?;
    Ok(Json(chats))
}

pub async fn archive(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ArchiveRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = claims.sub;
    blocking(&state.db, move |db| {
        let (kind, chat_id) = open_chat(db, user, req.chat)?;
        db.archive_chat(&user.to_string(), kind, &chat_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Works on chats the caller has since left.
pub async fn unarchive(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ArchiveRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = claims.sub;
    blocking(&state.db, move |db| {
        let (kind, chat_id) = req.chat.storage_key(user);
        db.unarchive_chat(&user.to_string(), kind, &chat_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
