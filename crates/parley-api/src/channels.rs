use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use parley_core::Channel;
use parley_db::aggregates::list_channels;
use parley_types::api::{
    ChannelResponse, Claims, CreateChannelRequest, CreatePostRequest, PostQuery,
    UpdateChannelRequest,
};
use parley_types::events::GatewayEvent;

use crate::error::{ApiResult, blocking};
use crate::state::AppState;

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

async fn mutate<F, T>(state: &AppState, id: Uuid, f: F) -> ApiResult<(Channel, T)>
where
    F: FnOnce(&mut Channel) -> parley_core::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let (channel, out) = blocking(&state.db, move |db| db.update_channel(id, f)).await?;
    state
        .dispatcher
        .send_to_users(
            channel.follower_ids(),
            GatewayEvent::ChannelUpdate {
                channel: ChannelResponse::from(&channel),
            },
        )
        .await;
    Ok((channel, out))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChannelRequest>,
) -> ApiResult<impl IntoResponse> {
    let channel = blocking(&state.db, move |db| {
        let channel = Channel::create(claims.sub, &req.name, req.description)?;
        db.insert_channel(&channel)?;
        Ok(channel)
    })
    .await?;

    info!("{} created channel {} ({})", claims.username, channel.name, channel.id);
    Ok((StatusCode::CREATED, Json(ChannelResponse::from(&channel))))
}

/// Channel directory, newest activity first.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ChannelQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.min(MAX_PAGE);
    let channels = blocking(&state.db, move |db| {
        db.with_conn(|conn| list_channels(conn, query.search.as_deref(), limit))
    })
    .await?;

    let visible: Vec<ChannelResponse> = channels
        .iter()
        .filter(|c| !c.is_blocked(claims.sub))
        .map(ChannelResponse::from)
        .collect();
    Ok(Json(visible))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let channel = blocking(&state.db, move |db| {
        let channel = db.get_channel(channel_id)?;
        channel.authorize_view(claims.sub)?;
        Ok(channel)
    })
    .await?;
    Ok(Json(ChannelResponse::from(&channel)))
}

pub async fn update_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateChannelRequest>,
) -> ApiResult<impl IntoResponse> {
    let (channel, _) = mutate(&state, channel_id, move |c| {
        c.update_info(claims.sub, req.name.as_deref(), req.description, req.avatar)
    })
    .await?;
    Ok(Json(ChannelResponse::from(&channel)))
}

// -- Followers and moderation --

pub async fn follow(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (channel, _) = mutate(&state, channel_id, move |c| c.follow(claims.sub)).await?;
    Ok(Json(ChannelResponse::from(&channel)))
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    mutate(&state, channel_id, move |c| c.unfollow(claims.sub)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_admin(
    State(state): State<AppState>,
    Path((channel_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (channel, _) = mutate(&state, channel_id, move |c| c.add_admin(claims.sub, user_id)).await?;
    Ok(Json(ChannelResponse::from(&channel)))
}

pub async fn remove_admin(
    State(state): State<AppState>,
    Path((channel_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (channel, _) =
        mutate(&state, channel_id, move |c| c.remove_admin(claims.sub, user_id)).await?;
    Ok(Json(ChannelResponse::from(&channel)))
}

pub async fn block(
    State(state): State<AppState>,
    Path((channel_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (channel, _) = mutate(&state, channel_id, move |c| c.block(claims.sub, user_id)).await?;
    Ok(Json(ChannelResponse::from(&channel)))
}

pub async fn unblock(
    State(state): State<AppState>,
    Path((channel_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (channel, _) = mutate(&state, channel_id, move |c| c.unblock(claims.sub, user_id)).await?;
    Ok(Json(ChannelResponse::from(&channel)))
}

// -- Posts --

pub async fn list_posts(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PostQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    let posts = blocking(&state.db, move |db| {
        db.get_channel(channel_id)?.authorize_view(claims.sub)?;
        db.get_channel_posts(channel_id, query.before, limit)
    })
    .await?;
    Ok(Json(posts))
}

pub async fn create_post(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let (channel, post) = blocking(&state.db, move |db| {
        db.publish_post(channel_id, |c| c.post(claims.sub, &req.body, req.media_id))
    })
    .await?;

    state
        .dispatcher
        .send_to_users(
            channel.follower_ids(),
            GatewayEvent::ChannelPost {
                channel_id,
                post: post.clone(),
            },
        )
        .await;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path((channel_id, post_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let channel = blocking(&state.db, move |db| {
        db.delete_channel_post(channel_id, claims.sub, post_id)
    })
    .await?;

    state
        .dispatcher
        .send_to_users(
            channel.follower_ids(),
            GatewayEvent::ChannelPostDelete { channel_id, post_id },
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn view_post(
    State(state): State<AppState>,
    Path((channel_id, post_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let views = blocking(&state.db, move |db| {
        db.view_channel_post(channel_id, claims.sub, post_id)
    })
    .await?;
    Ok(Json(serde_json::json!({ "views": views })))
}
