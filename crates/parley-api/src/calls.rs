use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use parley_core::{CoreError, ForbiddenReason, Permission};
use parley_db::models::CallRow;
use parley_db::{Database, ts};
use parley_types::api::{Claims, StartCallRequest};
use parley_types::events::GatewayEvent;
use parley_types::models::{CallRecord, CallStatus, ChatRef};

use crate::chat::{call_from_row, open_chat};
use crate::error::{ApiResult, blocking};
use crate::state::AppState;

const HISTORY_LIMIT: u32 = 50;

/// Each participant with the call as they see it.
fn participant_views(db: &Database, call_id: &str) -> anyhow::Result<Vec<(Uuid, CallRecord)>> {
    let row = db.get_call(call_id)?.ok_or(CoreError::NotFound("call"))?;
    db.get_call_participants(call_id)?
        .into_iter()
        .map(|id| {
            let user: Uuid = id.parse()?;
            Ok((user, call_from_row(row.clone(), user)?))
        })
        .collect()
}

async fn announce(state: &AppState, views: Vec<(Uuid, CallRecord)>) {
    for (user, call) in views {
        state
            .dispatcher
            .send_to_user(user, GatewayEvent::CallUpdate { call })
            .await;
    }
}

fn own_view(views: &[(Uuid, CallRecord)], user: Uuid) -> anyhow::Result<CallRecord> {
    views
        .iter()
        .find(|(id, _)| *id == user)
        .map(|(_, call)| call.clone())
        .ok_or_else(|| CoreError::from(ForbiddenReason::NotMember).into())
}

pub async fn start_call(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartCallRequest>,
) -> ApiResult<impl IntoResponse> {
    let caller = claims.sub;
    let (mine, views) = blocking(&state.db, move |db| {
        let participants: Vec<String> = match req.chat {
            ChatRef::Group(id) => {
                let group = db.get_group(id)?;
                group.authorize(caller, Permission::SendMessages)?;
                group.member_ids().iter().map(Uuid::to_string).collect()
            }
            ChatRef::Direct(peer) => {
                open_chat(db, caller, req.chat)?;
                vec![caller.to_string(), peer.to_string()]
            }
            ChatRef::Channel(_) => return Err(CoreError::invalid("channels have no calls").into()),
        };
        let (kind, chat_id) = req.chat.storage_key(caller);

        let id = Uuid::new_v4().to_string();
        db.insert_call(
            &CallRow {
                id: id.clone(),
                caller_id: caller.to_string(),
                chat_kind: kind.to_string(),
                chat_id,
                kind: req.kind.as_str().to_string(),
                status: CallStatus::Ringing.as_str().to_string(),
                started_at: ts(&Utc::now()),
                answered_at: None,
                ended_at: None,
            },
            &participants,
        )?;
        let views = participant_views(db, &id)?;
        Ok((own_view(&views, caller)?, views))
    })
    .await?;

    info!("{} started call {}", claims.username, mine.id);
    announce(&state, views).await;
    Ok((StatusCode::CREATED, Json(mine)))
}

/// Move a call to its next state. Only participants may act. The write only
/// lands if the call is still in the state `next` decided from.
async fn transition<F>(state: &AppState, call_id: Uuid, user: Uuid, next: F) -> ApiResult<CallRecord>
where
    F: FnOnce(&CallRecord) -> Result<CallStatus, CoreError> + Send + 'static,
{
    let (mine, views) = blocking(&state.db, move |db| {
        let id = call_id.to_string();
        let current = own_view(&participant_views(db, &id)?, user)?;
        let status = next(&current)?;

        let now = ts(&Utc::now());
        let (answered_at, ended_at) = match status {
            CallStatus::Active => (Some(now.as_str()), None),
            _ => (None, Some(now.as_str())),
        };
        let from = current.status.as_str();
        if !db.transition_call(&id, from, status.as_str(), answered_at, ended_at)? {
            return Err(CoreError::conflict("call changed state, try again").into());
        }

        let views = participant_views(db, &id)?;
        Ok((own_view(&views, user)?, views))
    })
    .await?;

    announce(state, views).await;
    Ok(mine)
}

pub async fn answer_call(
    State(state): State<AppState>,
    Path(call_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let user = claims.sub;
    let call = transition(&state, call_id, user, move |call| {
        if call.caller_id == user {
            return Err(CoreError::invalid("the caller cannot answer their own call"));
        }
        match call.status {
            CallStatus::Ringing => Ok(CallStatus::Active),
            _ => Err(CoreError::conflict("call is not ringing")),
        }
    })
    .await?;
    Ok(Json(call))
}

/// Hang up. A call that was never answered is recorded as missed.
pub async fn end_call(
    State(state): State<AppState>,
    Path(call_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let call = transition(&state, call_id, claims.sub, |call| match call.status {
        CallStatus::Ringing => Ok(CallStatus::Missed),
        CallStatus::Active => Ok(CallStatus::Ended),
        CallStatus::Ended | CallStatus::Missed => Err(CoreError::conflict("call already ended")),
    })
    .await?;
    Ok(Json(call))
}

pub async fn call_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let user = claims.sub;
    let calls = blocking(&state.db, move |db| {
        db.get_calls_for_user(&user.to_string(), HISTORY_LIMIT)?
            .into_iter()
            .map(|row| call_from_row(row, user))
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await?;
    Ok(Json(calls))
}
