//! Who may open a chat, who hears about it, and how stored rows map back
//! onto wire types for a given viewer.

use anyhow::{Result, anyhow};
use uuid::Uuid;

use parley_core::{CoreError, ForbiddenReason, Group};
use parley_db::models::{CallRow, MessageRow, StoryRow, UserRow};
use parley_db::{Database, parse_ts};
use parley_types::api::{MessageResponse, ReactionGroup};
use parley_types::events::GatewayEvent;
use parley_types::models::{CallKind, CallRecord, CallStatus, ChatRef, Story, User};

use crate::state::AppState;

/// Stored `(kind, id)` of a chat `user` may read. Outsiders are refused.
pub fn open_chat(db: &Database, user: Uuid, chat: ChatRef) -> Result<(&'static str, String)> {
    match chat {
        ChatRef::Group(id) => {
            db.get_group(id)?.require_member(user)?;
        }
        ChatRef::Direct(peer) => {
            if peer == user {
                return Err(CoreError::invalid("cannot open a direct chat with yourself").into());
            }
            if db.get_user_by_id(&peer.to_string())?.is_none() {
                return Err(CoreError::NotFound("user").into());
            }
        }
        ChatRef::Channel(id) => {
            if db.get_channel(id)?.is_blocked(user) {
                return Err(CoreError::from(ForbiddenReason::Blocked).into());
            }
        }
    }
    Ok(chat.storage_key(user))
}

/// Everyone who sees a stored chat, each paired with how they address it.
pub fn audience(db: &Database, kind: &str, chat_id: &str) -> Result<Vec<(Uuid, ChatRef)>> {
    match kind {
        "group" => {
            let group = db.get_group(chat_id.parse()?)?;
            let chat = ChatRef::Group(group.id);
            Ok(group.member_ids().into_iter().map(|id| (id, chat)).collect())
        }
        "direct" => {
            let (a, b) = chat_id
                .split_once(':')
                .ok_or_else(|| anyhow!("corrupt direct key {}", chat_id))?;
            let (a, b): (Uuid, Uuid) = (a.parse()?, b.parse()?);
            Ok(vec![(a, ChatRef::Direct(b)), (b, ChatRef::Direct(a))])
        }
        "channel" => {
            let channel = db.get_channel(chat_id.parse()?)?;
            let chat = ChatRef::Channel(channel.id);
            Ok(channel.follower_ids().into_iter().map(|id| (id, chat)).collect())
        }
        other => Err(anyhow!("unknown chat kind {}", other)),
    }
}

/// Send each audience member an event built for their view of the chat.
pub async fn deliver<F>(state: &AppState, audience: Vec<(Uuid, ChatRef)>, build: F)
where
    F: Fn(ChatRef) -> GatewayEvent,
{
    for (user, chat) in audience {
        state.dispatcher.send_to_user(user, build(chat)).await;
    }
}

pub async fn publish_group(state: &AppState, group: &Group) {
    state
        .dispatcher
        .send_to_users(
            group.member_ids(),
            GatewayEvent::GroupUpdate {
                group: group.clone(),
            },
        )
        .await;
}

// -- Row conversions --

fn parse_opt_uuid(raw: Option<String>) -> Result<Option<Uuid>> {
    Ok(raw.map(|s| s.parse()).transpose()?)
}

pub fn user_from_row(row: UserRow) -> Result<User> {
    Ok(User {
        id: row.id.parse()?,
        username: row.username,
        display_name: row.display_name,
        about: row.about,
        created_at: parse_ts(&row.created_at)?,
    })
}

pub fn message_from_row(
    row: MessageRow,
    viewer: Uuid,
    reactions: Vec<ReactionGroup>,
) -> Result<MessageResponse> {
    let chat = ChatRef::from_storage(&row.chat_kind, &row.chat_id, viewer)
        .ok_or_else(|| anyhow!("message {} has a corrupt chat key", row.id))?;
    Ok(MessageResponse {
        id: row.id.parse()?,
        chat,
        author_id: row.author_id.parse()?,
        author_username: row.author_username,
        body: row.body,
        media_id: parse_opt_uuid(row.media_id)?,
        reply_to: parse_opt_uuid(row.reply_to)?,
        created_at: parse_ts(&row.created_at)?,
        edited_at: row.edited_at.as_deref().map(parse_ts).transpose()?,
        deleted: row.deleted,
        pinned: row.pinned,
        reactions,
    })
}

pub fn call_from_row(row: CallRow, viewer: Uuid) -> Result<CallRecord> {
    Ok(CallRecord {
        id: row.id.parse()?,
        caller_id: row.caller_id.parse()?,
        chat: ChatRef::from_storage(&row.chat_kind, &row.chat_id, viewer)
            .ok_or_else(|| anyhow!("call {} has a corrupt chat key", row.id))?,
        kind: CallKind::parse(&row.kind).ok_or_else(|| anyhow!("bad call kind {}", row.kind))?,
        status: CallStatus::parse(&row.status)
            .ok_or_else(|| anyhow!("bad call status {}", row.status))?,
        started_at: parse_ts(&row.started_at)?,
        answered_at: row.answered_at.as_deref().map(parse_ts).transpose()?,
        ended_at: row.ended_at.as_deref().map(parse_ts).transpose()?,
    })
}

pub fn story_from_row(row: StoryRow) -> Result<Story> {
    Ok(Story {
        id: row.id.parse()?,
        author_id: row.author_id.parse()?,
        author_username: row.author_username,
        body: row.body,
        media_id: parse_opt_uuid(row.media_id)?,
        created_at: parse_ts(&row.created_at)?,
        expires_at: parse_ts(&row.expires_at)?,
        view_count: row.view_count.max(0) as usize,
    })
}
