use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_core::CoreError;
use parley_types::api::{Claims, GroupSummary, UpdateProfileRequest};

use crate::chat::user_from_row;
use crate::error::{ApiError, ApiResult, blocking};
use crate::state::AppState;

const MAX_DISPLAY_NAME: usize = 64;
const MAX_ABOUT: usize = 280;

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    get_user(State(state), Path(claims.sub)).await
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.display_name.as_ref().is_some_and(|n| n.chars().count() > MAX_DISPLAY_NAME) {
        return Err(ApiError::bad_request("display name is too long"));
    }
    if req.about.as_ref().is_some_and(|a| a.chars().count() > MAX_ABOUT) {
        return Err(ApiError::bad_request("about is too long"));
    }

    let id = claims.sub.to_string();
    let user = blocking(&state.db, move |db| {
        db.update_profile(&id, req.display_name.as_deref(), req.about.as_deref())?;
        let row = db.get_user_by_id(&id)?.ok_or(CoreError::NotFound("user"))?;
        user_from_row(row)
    })
    .await?;

    Ok(Json(user))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let user = blocking(&state.db, move |db| {
        let row = db
            .get_user_by_id(&user_id.to_string())?
            .ok_or(CoreError::NotFound("user"))?;
        user_from_row(row)
    })
    .await?;

    Ok(Json(user))
}

/// Groups the caller shares with another user.
pub async fn common_groups(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let groups = blocking(&state.db, move |db| db.common_groups(claims.sub, user_id)).await?;
    let summaries: Vec<GroupSummary> = groups.iter().map(GroupSummary::from).collect();
    Ok(Json(summaries))
}
