use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use parley_api::{AppStateInner, router};
use parley_db::Database;
use parley_gateway::Dispatcher;

const SECRET: &str = "test-secret";

fn app() -> Router {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let upload_dir = std::env::temp_dir().join(format!("parley-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&upload_dir).unwrap();
    let state = AppStateInner::new(
        db,
        SECRET.to_string(),
        Dispatcher::new(),
        upload_dir,
        chrono::Duration::hours(24),
    )
    .unwrap();
    router(Arc::new(state))
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => req.body(Body::empty()),
    }
    .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Register a user and return `(id, token)`.
async fn register(app: &Router, username: &str) -> (String, String) {
    let (status, body) = call(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "username": username, "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (
        body["user_id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

async fn create_group(app: &Router, token: &str, members: &[&str]) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/groups",
        Some(token),
        Some(json!({ "name": "book club", "members": members })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn register_then_login() {
    let app = app();
    let (alice, _) = register(&app, "alice").await;

    let (status, body) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "username": "alice", "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], alice);

    let (status, _) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "username": "alice", "password": "wrong horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "username": "alice", "password": "another one" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let app = app();
    let (status, _) = call(&app, "GET", "/groups", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/groups", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn custom_roles_grant_exactly_their_permissions() {
    let app = app();
    let (_, alice) = register(&app, "alice").await;
    let (bob_id, bob) = register(&app, "bob").await;
    let group = create_group(&app, &alice, &[&bob_id]).await;

    // A plain member cannot manage roles.
    let (status, _) = call(
        &app,
        "POST",
        &format!("/groups/{group}/roles"),
        Some(&bob),
        Some(json!({ "name": "moderator" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/groups/{group}/roles"),
        Some(&alice),
        Some(json!({ "name": "Moderator" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "moderator");

    let (status, _) = call(
        &app,
        "POST",
        &format!("/groups/{group}/roles"),
        Some(&alice),
        Some(json!({ "name": "moderator" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/groups/{group}/roles/moderator/permissions"),
        Some(&alice),
        Some(json!({ "permissions": ["send_messages", "pin_messages"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/groups/{group}/members/{bob_id}/role"),
        Some(&alice),
        Some(json!({ "role": "moderator" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "GET",
        &format!("/groups/{group}/permissions"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "moderator");
    assert_eq!(body["is_admin"], false);
    assert_eq!(body["permissions"], json!(["send_messages", "pin_messages"]));

    // Deleting the role drops bob back to member defaults.
    let (status, body) = call(
        &app,
        "DELETE",
        &format!("/groups/{group}/roles/moderator"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reassigned"], 1);

    let (_, body) = call(
        &app,
        "GET",
        &format!("/groups/{group}/permissions"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(body["role"], "member");
}

#[tokio::test]
async fn admin_only_chat_silences_members() {
    let app = app();
    let (_, alice) = register(&app, "alice").await;
    let (bob_id, bob) = register(&app, "bob").await;
    let group = create_group(&app, &alice, &[&bob_id]).await;
    let messages = format!("/groups/{group}/messages");

    let (status, _) = call(&app, "POST", &messages, Some(&bob), Some(json!({ "body": "hi" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/groups/{group}/admin-only"),
        Some(&bob),
        Some(json!({ "enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/groups/{group}/admin-only"),
        Some(&alice),
        Some(json!({ "enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["admin_only_chat"], true);

    let (status, _) = call(&app, "POST", &messages, Some(&bob), Some(json!({ "body": "still here?" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, "POST", &messages, Some(&alice), Some(json!({ "body": "quiet please" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    // Members can still read.
    let (status, body) = call(&app, "GET", &messages, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn outsiders_cannot_read_a_group() {
    let app = app();
    let (_, alice) = register(&app, "alice").await;
    let (_, mallory) = register(&app, "mallory").await;
    let group = create_group(&app, &alice, &[]).await;

    let (status, _) = call(
        &app,
        "GET",
        &format!("/groups/{group}/messages"),
        Some(&mallory),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn direct_messages_reach_both_sides() {
    let app = app();
    let (alice_id, alice) = register(&app, "alice").await;
    let (bob_id, bob) = register(&app, "bob").await;

    let (status, sent) = call(
        &app,
        "POST",
        &format!("/direct/{bob_id}/messages"),
        Some(&alice),
        Some(json!({ "body": "hey bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &app,
        "GET",
        &format!("/direct/{alice_id}/messages"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let history = body.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["id"], sent["id"]);
    assert_eq!(history[0]["body"], "hey bob");

    // Only the author edits.
    let (status, _) = call(
        &app,
        "PATCH",
        &format!("/messages/{}", sent["id"].as_str().unwrap()),
        Some(&bob),
        Some(json!({ "body": "hey alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/direct/{alice_id}/messages"),
        Some(&alice),
        Some(json!({ "body": "talking to myself" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invite_links_admit_until_revoked() {
    let app = app();
    let (_, alice) = register(&app, "alice").await;
    let (carol_id, carol) = register(&app, "carol").await;
    let (_, dave) = register(&app, "dave").await;
    let group = create_group(&app, &alice, &[]).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/groups/{group}/invite"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let code = body["code"].as_str().unwrap().to_string();

    let (status, body) = call(&app, "POST", &format!("/groups/join/{code}"), Some(&carol), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["members"].as_array().unwrap().contains(&json!(carol_id)));

    let (status, _) = call(
        &app,
        "DELETE",
        &format!("/groups/{group}/invite"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(&app, "POST", &format!("/groups/join/{code}"), Some(&dave), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn banned_users_cannot_rejoin() {
    let app = app();
    let (_, alice) = register(&app, "alice").await;
    let (bob_id, bob) = register(&app, "bob").await;
    let group = create_group(&app, &alice, &[&bob_id]).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/groups/{group}/bans"),
        Some(&alice),
        Some(json!({ "user_id": bob_id, "reason": "spam" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["members"].as_array().unwrap().contains(&json!(bob_id)));

    let (_, body) = call(&app, "POST", &format!("/groups/{group}/invite"), Some(&alice), None).await;
    let code = body["code"].as_str().unwrap().to_string();
    let (status, _) = call(&app, "POST", &format!("/groups/join/{code}"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn only_the_current_owner_deletes_a_group() {
    let app = app();
    let (alice_id, alice) = register(&app, "alice").await;
    let (bob_id, bob) = register(&app, "bob").await;
    let group = create_group(&app, &alice, &[&bob_id]).await;
    let uri = format!("/groups/{group}");

    let (status, _) = call(&app, "DELETE", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/groups/{group}/transfer"),
        Some(&alice),
        Some(json!({ "user_id": bob_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["creator"], bob_id);
    assert!(body["admins"].as_array().unwrap().contains(&json!(alice_id)));

    let (status, _) = call(&app, "DELETE", &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "DELETE", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(&app, "GET", &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn channel_posts_views_and_blocking() {
    let app = app();
    let (_, alice) = register(&app, "alice").await;
    let (bob_id, bob) = register(&app, "bob").await;

    let (status, body) = call(
        &app,
        "POST",
        "/channels",
        Some(&alice),
        Some(json!({ "name": "Daily News" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let channel = body["id"].as_str().unwrap().to_string();

    let (status, body) = call(&app, "POST", &format!("/channels/{channel}/follow"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["followers"].as_array().unwrap().contains(&json!(bob_id)));

    let posts = format!("/channels/{channel}/posts");
    let (status, _) = call(&app, "POST", &posts, Some(&bob), Some(json!({ "body": "me too" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, post) = call(&app, "POST", &posts, Some(&alice), Some(json!({ "body": "headline" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let post_id = post["id"].as_str().unwrap().to_string();

    let view = format!("/channels/{channel}/posts/{post_id}/view");
    let (status, body) = call(&app, "POST", &view, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["views"], 1);
    let (_, body) = call(&app, "POST", &view, Some(&alice), None).await;
    assert_eq!(body["views"], 2);

    let (status, body) = call(&app, "GET", &posts, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["views"], 2);

    let (_, body) = call(&app, "GET", &format!("/channels/{channel}"), Some(&alice), None).await;
    assert_eq!(body["stats"]["views"], 2);
    assert_eq!(body["stats"]["posts_published"], 1);

    let (_, body) = call(&app, "GET", "/channels?search=daily", Some(&bob), None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    // Blocking cuts the user off from everything in the channel.
    let (status, body) = call(
        &app,
        "POST",
        &format!("/channels/{channel}/blocked/{bob_id}"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["followers"].as_array().unwrap().contains(&json!(bob_id)));

    for (method, uri) in [
        ("GET", format!("/channels/{channel}")),
        ("GET", posts.clone()),
        ("POST", view.clone()),
        ("POST", format!("/channels/{channel}/follow")),
    ] {
        let (status, _) = call(&app, method, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
    }
    let (_, body) = call(&app, "GET", "/channels", Some(&bob), None).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = call(
        &app,
        "DELETE",
        &format!("/channels/{channel}/posts/{post_id}"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = call(&app, "GET", &posts, Some(&alice), None).await;
    assert!(body.as_array().unwrap().is_empty());
}

async fn create_community(app: &Router, token: &str) -> (String, String) {
    let (status, body) = call(
        app,
        "POST",
        "/communities",
        Some(token),
        Some(json!({ "name": "Neighbours" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (
        body["community"]["id"].as_str().unwrap().to_string(),
        body["community"]["announcement_group"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn leaving_a_community_leaves_its_groups() {
    let app = app();
    let (_, alice) = register(&app, "alice").await;
    let (bob_id, bob) = register(&app, "bob").await;
    let (community, announcements) = create_community(&app, &alice).await;

    let (status, _) = call(&app, "POST", &format!("/communities/{community}/join"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);

    // Members read announcements but cannot post in them.
    let (status, _) = call(
        &app,
        "POST",
        &format!("/groups/{announcements}/messages"),
        Some(&bob),
        Some(json!({ "body": "hello all" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let shared = create_group(&app, &alice, &[&bob_id]).await;
    let (status, body) = call(
        &app,
        "POST",
        &format!("/communities/{community}/groups/{shared}"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["linked_groups"].as_array().unwrap().contains(&json!(shared)));

    // Bob gets admin on announcements and links a group only he is in.
    let (status, _) = call(
        &app,
        "POST",
        &format!("/groups/{announcements}/admins/{bob_id}"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let solo = create_group(&app, &bob, &[]).await;
    let (status, _) = call(
        &app,
        "POST",
        &format!("/communities/{community}/groups/{solo}"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, "POST", &format!("/communities/{community}/leave"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = call(&app, "GET", &format!("/groups/{shared}"), Some(&alice), None).await;
    assert!(!body["members"].as_array().unwrap().contains(&json!(bob_id)));
    let (status, _) = call(&app, "GET", &format!("/groups/{solo}"), Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = call(&app, "GET", &format!("/communities/{community}"), Some(&alice), None).await;
    assert_eq!(body["linked"].as_array().unwrap().len(), 1);
    assert_eq!(body["announcements"]["member_count"], 1);

    let (status, _) = call(&app, "POST", &format!("/communities/{community}/leave"), Some(&alice), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn handing_over_announcements_hands_over_the_community() {
    let app = app();
    let (_, alice) = register(&app, "alice").await;
    let (dave_id, dave) = register(&app, "dave").await;
    let (community, announcements) = create_community(&app, &alice).await;
    call(&app, "POST", &format!("/communities/{community}/join"), Some(&dave), None).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/groups/{announcements}/transfer"),
        Some(&alice),
        Some(json!({ "user_id": dave_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["creator"], dave_id);

    let (_, body) = call(&app, "GET", &format!("/communities/{community}"), Some(&alice), None).await;
    assert_eq!(body["community"]["owner"], dave_id);

    let (status, _) = call(&app, "POST", &format!("/communities/{community}/leave"), Some(&dave), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = call(&app, "POST", &format!("/communities/{community}/leave"), Some(&alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn calls_move_through_their_states_once() {
    let app = app();
    let (alice_id, alice) = register(&app, "alice").await;
    let (bob_id, bob) = register(&app, "bob").await;
    let (_, carol) = register(&app, "carol").await;
    let start = json!({ "chat": { "kind": "direct", "id": bob_id }, "kind": "voice" });

    let (status, ringing) = call(&app, "POST", "/calls", Some(&alice), Some(start.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ringing["status"], "ringing");
    assert_eq!(ringing["chat"], json!({ "kind": "direct", "id": bob_id }));
    let call_id = ringing["id"].as_str().unwrap().to_string();
    let answer = format!("/calls/{call_id}/answer");
    let end = format!("/calls/{call_id}/end");

    let (status, _) = call(&app, "POST", &answer, Some(&alice), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, "POST", &answer, Some(&carol), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&app, "POST", &answer, Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    assert_eq!(body["chat"], json!({ "kind": "direct", "id": alice_id }));
    let (status, _) = call(&app, "POST", &answer, Some(&bob), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = call(&app, "POST", &end, Some(&alice), None).await;
    assert_eq!(body["status"], "ended");
    let (status, _) = call(&app, "POST", &end, Some(&bob), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Hanging up before anyone answers records a missed call.
    let (_, ringing) = call(&app, "POST", "/calls", Some(&alice), Some(start)).await;
    let (_, body) = call(
        &app,
        "POST",
        &format!("/calls/{}/end", ringing["id"].as_str().unwrap()),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(body["status"], "missed");

    let (_, history) = call(&app, "GET", "/calls", Some(&bob), None).await;
    assert_eq!(history.as_array().unwrap().len(), 2);
    let (_, history) = call(&app, "GET", "/calls", Some(&carol), None).await;
    assert!(history.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn archives_are_per_user() {
    let app = app();
    let (_, alice) = register(&app, "alice").await;
    let (bob_id, bob) = register(&app, "bob").await;
    let (_, mallory) = register(&app, "mallory").await;
    let group = create_group(&app, &alice, &[&bob_id]).await;
    let group_chat = json!({ "kind": "group", "id": group });
    let direct_chat = json!({ "kind": "direct", "id": bob_id });

    let (status, _) = call(&app, "PUT", "/archives", Some(&alice), Some(json!({ "chat": group_chat }))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "PUT", "/archives", Some(&alice), Some(json!({ "chat": direct_chat }))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "PUT", "/archives", Some(&mallory), Some(json!({ "chat": group_chat }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&app, "GET", "/archives", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    let archived = body.as_array().unwrap();
    assert_eq!(archived.len(), 2);
    assert!(archived.contains(&group_chat));
    assert!(archived.contains(&direct_chat));

    let (_, body) = call(&app, "GET", "/archives", Some(&bob), None).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = call(&app, "DELETE", "/archives", Some(&alice), Some(json!({ "chat": group_chat }))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = call(&app, "GET", "/archives", Some(&alice), None).await;
    assert_eq!(body, json!([direct_chat]));
}

#[tokio::test]
async fn link_previews_refuse_internal_hosts() {
    let app = app();
    let (_, alice) = register(&app, "alice").await;
    for url in [
        "http%3A%2F%2F127.0.0.1%3A9%2F",
        "http%3A%2F%2F169.254.169.254%2Flatest",
        "http%3A%2F%2F%5B%3A%3A1%5D%2F",
        "ftp%3A%2F%2Fexample.com%2F",
    ] {
        let uri = format!("/link-preview?url={url}");
        let (status, _) = call(&app, "GET", &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{url}");
    }
}
