use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_core::{Community, Group};
use parley_db::Database;
use parley_db::aggregates::{
    load_community, load_group, remove_group, save_community, save_group,
};
use parley_types::api::{
    Claims, CommunityResponse, CreateCommunityRequest, GroupSummary, UpdateCommunityRequest,
};
use parley_types::events::{GatewayEvent, RemovalReason};

use crate::chat::publish_group;
use crate::error::{ApiResult, blocking};
use crate::state::AppState;

fn describe(db: &Database, community: Community, announcements: &Group) -> anyhow::Result<CommunityResponse> {
    let mut linked = Vec::with_capacity(community.linked_groups.len());
    for id in &community.linked_groups {
        linked.push(GroupSummary::from(&db.get_group(*id)?));
    }
    Ok(CommunityResponse {
        community,
        announcements: GroupSummary::from(announcements),
        linked,
    })
}

pub(crate) async fn publish(state: &AppState, community: &Community, announcements: &Group) {
    state
        .dispatcher
        .send_to_users(
            announcements.member_ids(),
            GatewayEvent::CommunityUpdate {
                community: community.clone(),
            },
        )
        .await;
}

pub async fn create_community(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommunityRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = blocking(&state.db, move |db| {
        let (community, announcements) = Community::create(claims.sub, &req.name, req.description)?;
        db.write(|tx| {
            save_group(tx, &announcements)?;
            save_community(tx, &community, &announcements)
        })?;
        describe(db, community, &announcements)
    })
    .await?;

    info!(
        "{} created community {} ({})",
        claims.username, response.community.name, response.community.id
    );
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_community(
    State(state): State<AppState>,
    Path(community_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let response = blocking(&state.db, move |db| {
        let community = db.get_community(community_id)?;
        let announcements = db.get_group(community.announcement_group)?;
        describe(db, community, &announcements)
    })
    .await?;
    Ok(Json(response))
}

pub async fn update_community(
    State(state): State<AppState>,
    Path(community_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateCommunityRequest>,
) -> ApiResult<impl IntoResponse> {
    let (community, announcements, _) = blocking(&state.db, move |db| {
        db.update_community(community_id, |c, ann| {
            c.update_info(claims.sub, ann, req.name.as_deref(), req.description)
        })
    })
    .await?;

    publish(&state, &community, &announcements).await;
    publish_group(&state, &announcements).await;
    Ok(Json(community))
}

pub async fn link_group(
    State(state): State<AppState>,
    Path((community_id, group_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (community, announcements, group) = blocking(&state.db, move |db| {
        db.write(|tx| {
            let mut community = load_community(tx, community_id)?;
            let announcements = load_group(tx, community.announcement_group)?;
            let mut group = load_group(tx, group_id)?;
            if community.link_group(claims.sub, &announcements, &mut group)? {
                save_group(tx, &group)?;
                save_community(tx, &community, &announcements)?;
            }
            Ok((community, announcements, group))
        })
    })
    .await?;

    publish(&state, &community, &announcements).await;
    publish_group(&state, &group).await;
    Ok(Json(community))
}

pub async fn unlink_group(
    State(state): State<AppState>,
    Path((community_id, group_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (community, announcements, group) = blocking(&state.db, move |db| {
        db.write(|tx| {
            let mut community = load_community(tx, community_id)?;
            let announcements = load_group(tx, community.announcement_group)?;
            let mut group = load_group(tx, group_id)?;
            community.unlink_group(claims.sub, &announcements, &mut group)?;
            save_group(tx, &group)?;
            save_community(tx, &community, &announcements)?;
            Ok((community, announcements, group))
        })
    })
    .await?;

    publish(&state, &community, &announcements).await;
    publish_group(&state, &group).await;
    Ok(Json(community))
}

pub async fn join_community(
    State(state): State<AppState>,
    Path(community_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (community, announcements, _) = blocking(&state.db, move |db| {
        db.update_community(community_id, |c, ann| c.join(claims.sub, ann))
    })
    .await?;

    publish_group(&state, &announcements).await;
    Ok(Json(community))
}

/// Leave the announcement group and every linked group in one transaction.
pub async fn leave_community(
    State(state): State<AppState>,
    Path(community_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let user = claims.sub;
    let (community, announcements, changed) = blocking(&state.db, move |db| {
        db.write(|tx| {
            let mut community = load_community(tx, community_id)?;
            let mut announcements = load_group(tx, community.announcement_group)?;
            let mut linked = community
                .linked_groups
                .iter()
                .map(|id| load_group(tx, *id))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let changed_ids = community.leave(user, &mut announcements, &mut linked)?;

            let mut changed = Vec::new();
            for group in linked {
                if !changed_ids.contains(&group.id) {
                    continue;
                }
                if group.members.is_empty() {
                    remove_group(tx, &group)?;
                    community.forget_group(group.id);
                } else {
                    save_group(tx, &group)?;
                    changed.push(group);
                }
            }
            save_group(tx, &announcements)?;
            save_community(tx, &community, &announcements)?;
            Ok((community, announcements, changed))
        })
    })
    .await?;

    publish_group(&state, &announcements).await;
    state
        .dispatcher
        .send_to_user(
            user,
            GatewayEvent::GroupRemoved {
                group_id: announcements.id,
                reason: RemovalReason::Left,
            },
        )
        .await;
    for group in &changed {
        publish_group(&state, group).await;
        state
            .dispatcher
            .send_to_user(
                user,
                GatewayEvent::GroupRemoved {
                    group_id: group.id,
                    reason: RemovalReason::Left,
                },
            )
            .await;
    }
    publish(&state, &community, &announcements).await;
    Ok(StatusCode::NO_CONTENT)
}
