use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_core::{CoreError, Group, LeaveOutcome};
use parley_db::aggregates::{load_community, load_group, remove_group, save_community, save_group};
use parley_types::api::{
    AdminOnlyRequest, BanRequest, Claims, CreateGroupRequest, CreateRoleRequest, GroupSummary,
    InviteResponse, PermissionsResponse, RolePermissionsRequest, SetRoleRequest,
    UpdateGroupRequest, UserIdRequest,
};
use parley_types::events::{GatewayEvent, RemovalReason};

use crate::chat::publish_group;
use crate::error::{ApiResult, blocking};
use crate::state::AppState;

/// Apply one group mutation atomically, then push the new state to members.
async fn mutate<F, T>(state: &AppState, id: Uuid, f: F) -> ApiResult<(Group, T)>
where
    F: FnOnce(&mut Group) -> parley_core::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let (group, out) = blocking(&state.db, move |db| db.update_group(id, f)).await?;
    publish_group(state, &group).await;
    Ok((group, out))
}

async fn notify_removed(state: &AppState, user: Uuid, group_id: Uuid, reason: RemovalReason) {
    state
        .dispatcher
        .send_to_user(user, GatewayEvent::GroupRemoved { group_id, reason })
        .await;
}

fn require_user(db: &parley_db::Database, user: Uuid) -> anyhow::Result<()> {
    match db.get_user_by_id(&user.to_string())? {
        Some(_) => Ok(()),
        None => Err(CoreError::NotFound("user").into()),
    }
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let group = blocking(&state.db, move |db| {
        for member in &req.members {
            require_user(db, *member)?;
        }
        let mut group = Group::create(claims.sub, &req.name, req.members)?;
        if req.description.is_some() {
            group.update_info(claims.sub, None, req.description, None)?;
        }
        db.insert_group(&group)?;
        Ok(group)
    })
    .await?;

    info!("{} created group {} ({})", claims.username, group.name, group.id);
    publish_group(&state, &group).await;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn list_groups(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let groups = blocking(&state.db, move |db| db.get_groups_for_user(claims.sub)).await?;
    let summaries: Vec<GroupSummary> = groups.iter().map(GroupSummary::from).collect();
    Ok(Json(summaries))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let group = blocking(&state.db, move |db| {
        let group = db.get_group(group_id)?;
        group.require_member(claims.sub)?;
        Ok(group)
    })
    .await?;
    Ok(Json(group))
}

pub async fn update_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let (group, _) = mutate(&state, group_id, move |g| {
        g.update_info(claims.sub, req.name.as_deref(), req.description, req.avatar)
    })
    .await?;
    Ok(Json(group))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let group = blocking(&state.db, move |db| {
        db.write(|tx| {
            let group = load_group(tx, group_id)?;
            group.authorize_delete(claims.sub)?;
            remove_group(tx, &group)?;
            Ok(group)
        })
    })
    .await?;

    info!("{} deleted group {}", claims.username, group_id);
    state
        .dispatcher
        .send_to_users(
            group.member_ids(),
            GatewayEvent::GroupRemoved {
                group_id,
                reason: RemovalReason::Deleted,
            },
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}

// -- Membership --

pub async fn add_member(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UserIdRequest>,
) -> ApiResult<impl IntoResponse> {
    let target = req.user_id;
    blocking(&state.db, move |db| require_user(db, target)).await?;
    let (group, _) = mutate(&state, group_id, move |g| g.add_member(claims.sub, target)).await?;
    Ok(Json(group))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (group, _) = mutate(&state, group_id, move |g| g.remove_member(claims.sub, user_id)).await?;
    notify_removed(&state, user_id, group_id, RemovalReason::Removed).await;
    Ok(Json(group))
}

pub async fn leave_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let user = claims.sub;
    let (group, outcome) = blocking(&state.db, move |db| {
        db.write(|tx| {
            let mut group = load_group(tx, group_id)?;
            let outcome = group.leave(user)?;
            match outcome {
                LeaveOutcome::Left => save_group(tx, &group)?,
                LeaveOutcome::Emptied => remove_group(tx, &group)?,
            }
            Ok((group, outcome))
        })
    })
    .await?;

    if outcome == LeaveOutcome::Left {
        publish_group(&state, &group).await;
    } else {
        info!("Group {} emptied and removed", group_id);
    }
    notify_removed(&state, user, group_id, RemovalReason::Left).await;
    Ok(StatusCode::NO_CONTENT)
}

// -- Admins and roles --

pub async fn promote_admin(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (group, _) = mutate(&state, group_id, move |g| g.promote_admin(claims.sub, user_id)).await?;
    Ok(Json(group))
}

pub async fn demote_admin(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (group, _) = mutate(&state, group_id, move |g| g.demote_admin(claims.sub, user_id)).await?;
    Ok(Json(group))
}

pub async fn set_member_role(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let (group, _) = mutate(&state, group_id, move |g| {
        g.set_member_role(claims.sub, user_id, &req.role)
    })
    .await?;
    Ok(Json(group))
}

pub async fn create_role(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let (_, name) = mutate(&state, group_id, move |g| g.create_role(claims.sub, &req.name)).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "name": name }))))
}

pub async fn delete_role(
    State(state): State<AppState>,
    Path((group_id, role)): Path<(Uuid, String)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (_, reassigned) = mutate(&state, group_id, move |g| g.delete_role(claims.sub, &role)).await?;
    Ok(Json(serde_json::json!({ "reassigned": reassigned })))
}

pub async fn update_role_permissions(
    State(state): State<AppState>,
    Path((group_id, role)): Path<(Uuid, String)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RolePermissionsRequest>,
) -> ApiResult<impl IntoResponse> {
    let (group, _) = mutate(&state, group_id, move |g| {
        g.update_role_permissions(claims.sub, &role, req.permissions)
    })
    .await?;
    Ok(Json(group))
}

// -- Moderation --

pub async fn ban_member(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BanRequest>,
) -> ApiResult<impl IntoResponse> {
    let target = req.user_id;
    let (group, _) = mutate(&state, group_id, move |g| {
        g.ban_member(claims.sub, target, req.reason)
    })
    .await?;
    info!("{} banned {} from group {}", claims.username, target, group_id);
    notify_removed(&state, target, group_id, RemovalReason::Banned).await;
    Ok(Json(group))
}

pub async fn unban_member(
    State(state): State<AppState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (group, _) = mutate(&state, group_id, move |g| g.unban_member(claims.sub, user_id)).await?;
    Ok(Json(group))
}

pub async fn set_admin_only(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AdminOnlyRequest>,
) -> ApiResult<impl IntoResponse> {
    let (group, _) = mutate(&state, group_id, move |g| {
        g.set_admin_only_chat(claims.sub, req.enabled)
    })
    .await?;
    Ok(Json(group))
}

/// Transferring a community's announcement group hands over the whole
/// community, so both records change in one transaction.
pub async fn transfer_ownership(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UserIdRequest>,
) -> ApiResult<impl IntoResponse> {
    let (group, community) = blocking(&state.db, move |db| {
        db.write(|tx| {
            let mut group = load_group(tx, group_id)?;
            let community = match group.community_id {
                Some(id) => Some(load_community(tx, id)?)
                    .filter(|c| c.announcement_group == group.id),
                None => None,
            };
            match community {
                Some(mut community) => {
                    community.transfer_ownership(claims.sub, &mut group, req.user_id)?;
                    save_group(tx, &group)?;
                    save_community(tx, &community, &group)?;
                    Ok((group, Some(community)))
                }
                None => {
                    group.transfer_ownership(claims.sub, req.user_id)?;
                    save_group(tx, &group)?;
                    Ok((group, None))
                }
            }
        })
    })
    .await?;

    info!("Group {} now owned by {}", group_id, group.creator);
    publish_group(&state, &group).await;
    if let Some(community) = &community {
        crate::communities::publish(&state, community, &group).await;
    }
    Ok(Json(group))
}

// -- Invites --

pub async fn regenerate_invite(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let (_, code) = mutate(&state, group_id, move |g| g.regenerate_invite(claims.sub)).await?;
    Ok(Json(InviteResponse { code }))
}

pub async fn revoke_invite(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    mutate(&state, group_id, move |g| g.revoke_invite(claims.sub)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn join_by_invite(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let lookup = code.clone();
    let group_id = blocking(&state.db, move |db| db.group_id_by_invite(&lookup)).await?;
    let (group, _) = mutate(&state, group_id, move |g| g.join_by_invite(claims.sub, &code)).await?;
    Ok(Json(group))
}

/// The caller's resolved rights in a group.
pub async fn my_permissions(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let group = blocking(&state.db, move |db| {
        let group = db.get_group(group_id)?;
        group.require_member(claims.sub)?;
        Ok(group)
    })
    .await?;

    let user = claims.sub;
    Ok(Json(PermissionsResponse {
        role: group.role_of(user).map(str::to_string),
        is_owner: group.is_owner(user),
        is_admin: group.is_admin(user),
        permissions: group.effective_permissions(user),
    }))
}
