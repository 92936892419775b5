use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_core::{CoreError, Permission};
use parley_types::api::{Claims, ToggleReactionRequest};
use parley_types::events::GatewayEvent;
use parley_types::models::ChatRef;

use crate::chat::{audience, deliver, open_chat};
use crate::error::{ApiError, ApiResult, blocking};
use crate::state::AppState;

const MAX_EMOJI_LEN: usize = 32;

/// Add the caller's reaction, or remove it if already present.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    let emoji = req.emoji.trim().to_string();
    if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_LEN {
        return Err(ApiError::bad_request("emoji must be 1-32 characters"));
    }

    let user = claims.sub;
    let stored = emoji.clone();
    let (added, people) = blocking(&state.db, move |db| {
        let row = db
            .get_message(&message_id.to_string())?
            .filter(|m| !m.deleted)
            .ok_or(CoreError::NotFound("message"))?;
        let chat = ChatRef::from_storage(&row.chat_kind, &row.chat_id, user)
            .ok_or(CoreError::NotFound("message"))?;
        open_chat(db, user, chat)?;
        if let ChatRef::Group(id) = chat {
            db.get_group(id)?.authorize(user, Permission::SendMessages)?;
        }

        let added = db.toggle_reaction(
            &Uuid::new_v4().to_string(),
            &row.id,
            &user.to_string(),
            &stored,
        )?;
        Ok((added, audience(db, &row.chat_kind, &row.chat_id)?))
    })
    .await?;

    if added {
        deliver(&state, people, |chat| GatewayEvent::ReactionAdd {
            message_id,
            chat,
            user_id: user,
            username: claims.username.clone(),
            emoji: emoji.clone(),
        })
        .await;
    } else {
        deliver(&state, people, |chat| GatewayEvent::ReactionRemove {
            message_id,
            chat,
            user_id: user,
            emoji: emoji.clone(),
        })
        .await;
    }

    Ok(Json(serde_json::json!({ "added": added })))
}
