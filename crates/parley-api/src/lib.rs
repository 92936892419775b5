pub mod archives;
pub mod auth;
pub mod calls;
pub mod channels;
pub mod chat;
pub mod communities;
pub mod error;
pub mod groups;
pub mod link_preview;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod state;
pub mod stories;
pub mod uploads;
pub mod users;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post, put},
};

pub use error::{ApiError, ApiResult};
pub use state::{AppState, AppStateInner};

/// Every HTTP route. Everything outside `/auth` sits behind `require_auth`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        // Users
        .route("/users/me", get(users::me).patch(users::update_me))
        .route("/users/{user_id}", get(users::get_user))
        .route("/users/{user_id}/common-groups", get(users::common_groups))
        // Groups
        .route("/groups", post(groups::create_group).get(groups::list_groups))
        .route(
            "/groups/{group_id}",
            get(groups::get_group)
                .patch(groups::update_group)
                .delete(groups::delete_group),
        )
        .route("/groups/{group_id}/members", post(groups::add_member))
        .route("/groups/{group_id}/members/{user_id}", delete(groups::remove_member))
        .route("/groups/{group_id}/members/{user_id}/role", put(groups::set_member_role))
        .route("/groups/{group_id}/leave", post(groups::leave_group))
        .route(
            "/groups/{group_id}/admins/{user_id}",
            post(groups::promote_admin).delete(groups::demote_admin),
        )
        .route("/groups/{group_id}/roles", post(groups::create_role))
        .route("/groups/{group_id}/roles/{role}", delete(groups::delete_role))
        .route(
            "/groups/{group_id}/roles/{role}/permissions",
            put(groups::update_role_permissions),
        )
        .route("/groups/{group_id}/bans", post(groups::ban_member))
        .route("/groups/{group_id}/bans/{user_id}", delete(groups::unban_member))
        .route("/groups/{group_id}/admin-only", put(groups::set_admin_only))
        .route("/groups/{group_id}/transfer", post(groups::transfer_ownership))
        .route(
            "/groups/{group_id}/invite",
            post(groups::regenerate_invite).delete(groups::revoke_invite),
        )
        .route("/groups/join/{code}", post(groups::join_by_invite))
        .route("/groups/{group_id}/permissions", get(groups::my_permissions))
        .route(
            "/groups/{group_id}/messages",
            get(messages::get_group_messages).post(messages::send_group_message),
        )
        .route("/groups/{group_id}/pins", get(messages::get_group_pins))
        // Direct messages
        .route(
            "/direct/{user_id}/messages",
            get(messages::get_direct_messages).post(messages::send_direct_message),
        )
        // Messages
        .route(
            "/messages/{message_id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .route("/messages/{message_id}/pin", put(messages::pin_message))
        .route("/messages/{message_id}/reactions", post(reactions::toggle_reaction))
        // Channels
        .route("/channels", post(channels::create_channel).get(channels::list))
        .route(
            "/channels/{channel_id}",
            get(channels::get_channel).patch(channels::update_channel),
        )
        .route(
            "/channels/{channel_id}/follow",
            post(channels::follow).delete(channels::unfollow),
        )
        .route(
            "/channels/{channel_id}/admins/{user_id}",
            post(channels::add_admin).delete(channels::remove_admin),
        )
        .route(
            "/channels/{channel_id}/blocked/{user_id}",
            post(channels::block).delete(channels::unblock),
        )
        .route(
            "/channels/{channel_id}/posts",
            get(channels::list_posts).post(channels::create_post),
        )
        .route("/channels/{channel_id}/posts/{post_id}", delete(channels::delete_post))
        .route("/channels/{channel_id}/posts/{post_id}/view", post(channels::view_post))
        // Communities
        .route("/communities", post(communities::create_community))
        .route(
            "/communities/{community_id}",
            get(communities::get_community).patch(communities::update_community),
        )
        .route(
            "/communities/{community_id}/groups/{group_id}",
            post(communities::link_group).delete(communities::unlink_group),
        )
        .route("/communities/{community_id}/join", post(communities::join_community))
        .route("/communities/{community_id}/leave", post(communities::leave_community))
        // Calls
        .route("/calls", post(calls::start_call).get(calls::call_history))
        .route("/calls/{call_id}/answer", post(calls::answer_call))
        .route("/calls/{call_id}/end", post(calls::end_call))
        // Stories
        .route("/stories", post(stories::create_story).get(stories::list_stories))
        .route("/stories/{story_id}", delete(stories::delete_story))
        .route("/stories/{story_id}/view", post(stories::view_story))
        .route("/stories/{story_id}/viewers", get(stories::story_viewers))
        // Archives
        .route(
            "/archives",
            get(archives::list_archives)
                .put(archives::archive)
                .delete(archives::unarchive),
        )
        // Link previews & uploads
        .route("/link-preview", get(link_preview::link_preview))
        .route(
            "/uploads",
            post(uploads::upload).layer(DefaultBodyLimit::max(uploads::MAX_UPLOAD_SIZE + 1)),
        )
        .route("/uploads/{upload_id}", get(uploads::download))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
