use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use parley_core::{CoreError, ForbiddenReason, Permission};
use parley_db::Database;
use parley_db::models::{MessageRow, NewMessage};
use parley_db::ts;
use parley_types::api::{
    Claims, EditMessageRequest, MessageResponse, PinRequest, SendMessageRequest, group_reactions,
};
use parley_types::events::GatewayEvent;
use parley_types::models::ChatRef;

use crate::chat::{audience, deliver, message_from_row, open_chat};
use crate::error::{ApiResult, blocking};
use crate::state::AppState;

pub const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Id of the oldest message from the previous page.
    pub before: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

fn validate_body(body: &str, has_media: bool) -> Result<(), CoreError> {
    if body.trim().is_empty() && !has_media {
        return Err(CoreError::invalid("message is empty"));
    }
    if body.chars().count() > MAX_MESSAGE_LEN {
        return Err(CoreError::invalid("message is too long"));
    }
    Ok(())
}

/// Check `perm` for group chats; direct chats only need participation.
fn authorize_in(db: &Database, user: Uuid, row: &MessageRow, perm: Permission) -> anyhow::Result<()> {
    match row.chat_kind.as_str() {
        "group" => {
            db.get_group(row.chat_id.parse()?)?.authorize(user, perm)?;
        }
        "direct" => {
            if !row.chat_id.split(':').any(|id| id == user.to_string()) {
                return Err(CoreError::NotFound("message").into());
            }
        }
        _ => return Err(CoreError::invalid("not a message chat").into()),
    }
    Ok(())
}

fn load_message(db: &Database, id: Uuid) -> anyhow::Result<MessageRow> {
    Ok(db
        .get_message(&id.to_string())?
        .ok_or(CoreError::NotFound("message"))?)
}

/// Re-read a message with its reactions and resolve who should hear about it.
fn refreshed(
    db: &Database,
    id: Uuid,
    viewer: Uuid,
) -> anyhow::Result<(MessageResponse, Vec<(Uuid, ChatRef)>)> {
    let row = load_message(db, id)?;
    let reactions = db.get_reactions_for_messages(&[row.id.clone()])?;
    let grouped = group_reactions(reactions.into_iter().filter_map(|r| {
        Some((r.message_id.parse().ok()?, r.emoji, r.user_id.parse().ok()?))
    }));
    let people = audience(db, &row.chat_kind, &row.chat_id)?;
    let message = message_from_row(row, viewer, grouped.get(&id).cloned().unwrap_or_default())?;
    Ok((message, people))
}

async fn broadcast_update(state: &AppState, message: &MessageResponse, people: Vec<(Uuid, ChatRef)>) {
    deliver(state, people, |chat| GatewayEvent::MessageUpdate {
        message: MessageResponse {
            chat,
            ..message.clone()
        },
    })
    .await;
}

async fn send(state: AppState, claims: Claims, chat: ChatRef, req: SendMessageRequest) -> ApiResult<impl IntoResponse> {
    validate_body(&req.body, req.media_id.is_some())?;

    let author = claims.sub;
    let (message, people) = blocking(&state.db, move |db| {
        if let ChatRef::Group(id) = chat {
            let group = db.get_group(id)?;
            group.authorize(author, Permission::SendMessages)?;
            if req.media_id.is_some() {
                group.authorize(author, Permission::SendMedia)?;
            }
        }
        let (kind, chat_id) = open_chat(db, author, chat)?;

        if let Some(reply_to) = req.reply_to {
            let parent = load_message(db, reply_to)?;
            if parent.chat_kind != kind || parent.chat_id != chat_id {
                return Err(CoreError::invalid("reply target is in another chat").into());
            }
        }
        if let Some(media_id) = req.media_id {
            if db.get_upload(&media_id.to_string())?.is_none() {
                return Err(CoreError::NotFound("upload").into());
            }
        }

        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let author_str = author.to_string();
        let media = req.media_id.map(|m| m.to_string());
        let reply = req.reply_to.map(|r| r.to_string());
        let created_at = ts(&chrono::Utc::now());
        db.insert_message(&NewMessage {
            id: &id_str,
            chat_kind: kind,
            chat_id: &chat_id,
            author_id: &author_str,
            body: req.body.trim(),
            media_id: media.as_deref(),
            reply_to: reply.as_deref(),
            created_at: &created_at,
        })?;
        refreshed(db, id, author)
    })
    .await?;

    deliver(&state, people, |chat| GatewayEvent::MessageCreate {
        message: MessageResponse {
            chat,
            ..message.clone()
        },
    })
    .await;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn history(state: AppState, claims: Claims, chat: ChatRef, query: MessageQuery) -> ApiResult<impl IntoResponse> {
    let viewer = claims.sub;
    let limit = query.limit.clamp(1, 200);
    let messages = blocking(&state.db, move |db| {
        let (kind, chat_id) = open_chat(db, viewer, chat)?;
        let before = query.before.map(|b| b.to_string());
        let rows = db.get_messages(kind, &chat_id, limit, before.as_deref())?;

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reactions = db.get_reactions_for_messages(&ids)?;
        let mut grouped = group_reactions(reactions.into_iter().filter_map(|r| {
            Some((r.message_id.parse().ok()?, r.emoji, r.user_id.parse().ok()?))
        }));

        rows.into_iter()
            .map(|row| {
                let reactions = row
                    .id
                    .parse::<Uuid>()
                    .ok()
                    .and_then(|id| grouped.remove(&id))
                    .unwrap_or_default();
                message_from_row(row, viewer, reactions)
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await?;

    Ok(Json(messages))
}

pub async fn send_group_message(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    send(state, claims, ChatRef::Group(group_id), req).await
}

pub async fn get_group_messages(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    history(state, claims, ChatRef::Group(group_id), query).await
}

pub async fn send_direct_message(
    State(state): State<AppState>,
    Path(peer): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    send(state, claims, ChatRef::Direct(peer), req).await
}

pub async fn get_direct_messages(
    State(state): State<AppState>,
    Path(peer): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    history(state, claims, ChatRef::Direct(peer), query).await
}

pub async fn get_group_pins(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let viewer = claims.sub;
    let pinned = blocking(&state.db, move |db| {
        let (kind, chat_id) = open_chat(db, viewer, ChatRef::Group(group_id))?;
        db.get_pinned_messages(kind, &chat_id)?
            .into_iter()
            .map(|row| message_from_row(row, viewer, Vec::new()))
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await?;
    Ok(Json(pinned))
}

/// Only the author may edit, and only while the message exists.
pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let editor = claims.sub;
    let (message, people) = blocking(&state.db, move |db| {
        let row = load_message(db, message_id)?;
        if row.author_id != editor.to_string() {
            return Err(CoreError::from(ForbiddenReason::NotAuthor).into());
        }
        if row.deleted {
            return Err(CoreError::NotFound("message").into());
        }
        validate_body(&req.body, row.media_id.is_some())?;
        db.edit_message(&row.id, req.body.trim())?;
        refreshed(db, message_id, editor)
    })
    .await?;

    broadcast_update(&state, &message, people).await;
    Ok(Json(message))
}

/// Authors delete their own messages; group moderators need `DeleteMessages`.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let actor = claims.sub;
    let people = blocking(&state.db, move |db| {
        let row = load_message(db, message_id)?;
        if row.deleted {
            return Err(CoreError::NotFound("message").into());
        }
        if row.author_id != actor.to_string() {
            if row.chat_kind == "direct" {
                return Err(CoreError::from(ForbiddenReason::NotAuthor).into());
            }
            authorize_in(db, actor, &row, Permission::DeleteMessages)?;
        }
        db.delete_message(&row.id)?;
        audience(db, &row.chat_kind, &row.chat_id)
    })
    .await?;

    deliver(&state, people, |chat| GatewayEvent::MessageDelete {
        id: message_id,
        chat,
    })
    .await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pin_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PinRequest>,
) -> ApiResult<impl IntoResponse> {
    let actor = claims.sub;
    let (message, people) = blocking(&state.db, move |db| {
        let row = load_message(db, message_id)?;
        if row.deleted {
            return Err(CoreError::NotFound("message").into());
        }
        authorize_in(db, actor, &row, Permission::PinMessages)?;
        db.set_pinned(&row.id, req.pinned)?;
        refreshed(db, message_id, actor)
    })
    .await?;

    broadcast_update(&state, &message, people).await;
    Ok(Json(message))
}
