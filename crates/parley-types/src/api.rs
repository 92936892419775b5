use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use parley_core::{Channel, ChannelStats, Community, Group, Permission};

use crate::models::{CallKind, ChatRef};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub about: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GroupSummary {
    pub id: Uuid,
    pub name: String,
    pub avatar: Option<String>,
    pub member_count: usize,
    pub community_id: Option<Uuid>,
}

impl From<&Group> for GroupSummary {
    fn from(g: &Group) -> Self {
        Self {
            id: g.id,
            name: g.name.clone(),
            avatar: g.avatar.clone(),
            member_count: g.members.len(),
            community_id: g.community_id,
        }
    }
}

// -- Groups --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub members: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserIdRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoleRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolePermissionsRequest {
    pub permissions: BTreeSet<Permission>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BanRequest {
    pub user_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminOnlyRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub code: String,
}

/// What the caller may do in a group, resolved server-side so clients
/// never reimplement the rules.
#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub role: Option<String>,
    pub is_owner: bool,
    pub is_admin: bool,
    pub permissions: BTreeSet<Permission>,
}

// -- Channels --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub body: String,
    pub media_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub owner: Uuid,
    pub admins: BTreeSet<Uuid>,
    pub followers: BTreeSet<Uuid>,
    pub blocked: BTreeSet<Uuid>,
    pub stats: ChannelStats,
    pub created_at: DateTime<Utc>,
}

impl From<&Channel> for ChannelResponse {
    fn from(c: &Channel) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            description: c.description.clone(),
            avatar: c.avatar.clone(),
            owner: c.owner,
            admins: c.admins.clone(),
            followers: c.followers.clone(),
            blocked: c.blocked.clone(),
            stats: c.stats.clone(),
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateChannelRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostQuery {
    pub before: Option<Uuid>,
    pub limit: Option<u32>,
}

// -- Communities --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommunityRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCommunityRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommunityResponse {
    pub community: Community,
    pub announcements: GroupSummary,
    pub linked: Vec<GroupSummary>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub body: String,
    pub reply_to: Option<Uuid>,
    pub media_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PinRequest {
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub chat: ChatRef,
    pub author_id: Uuid,
    pub author_username: String,
    pub body: String,
    pub media_id: Option<Uuid>,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub pinned: bool,
    pub reactions: Vec<ReactionGroup>,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

/// Fold `(message_id, emoji, user_id)` triples into per-message groups.
/// Emoji order within a message follows first appearance.
pub fn group_reactions(
    rows: impl IntoIterator<Item = (Uuid, String, Uuid)>,
) -> HashMap<Uuid, Vec<ReactionGroup>> {
    let mut map: HashMap<Uuid, Vec<ReactionGroup>> = HashMap::new();
    for (message_id, emoji, user_id) in rows {
        let groups = map.entry(message_id).or_default();
        match groups.iter_mut().find(|g| g.emoji == emoji) {
            Some(group) => {
                group.user_ids.push(user_id);
                group.count += 1;
            }
            None => groups.push(ReactionGroup {
                emoji,
                count: 1,
                user_ids: vec![user_id],
            }),
        }
    }
    map
}

// -- Calls --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartCallRequest {
    pub chat: ChatRef,
    pub kind: CallKind,
}

// -- Stories --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateStoryRequest {
    pub body: Option<String>,
    pub media_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct StoryViewer {
    pub user_id: Uuid,
    pub username: String,
    pub viewed_at: DateTime<Utc>,
}

// -- Archives --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveRequest {
    pub chat: ChatRef,
}

// -- Link previews & uploads --

#[derive(Debug, Deserialize)]
pub struct LinkPreviewQuery {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub size: u64,
    pub sha256: String,
}
