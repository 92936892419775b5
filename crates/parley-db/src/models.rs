/// Database row types. These map directly to SQLite rows.
/// Distinct from parley-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
    pub about: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub chat_kind: String,
    pub chat_id: String,
    pub author_id: String,
    pub author_username: String,
    pub body: String,
    pub media_id: Option<String>,
    pub reply_to: Option<String>,
    pub pinned: bool,
    pub deleted: bool,
    pub created_at: String,
    pub edited_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub chat_kind: &'a str,
    pub chat_id: &'a str,
    pub author_id: &'a str,
    pub body: &'a str,
    pub media_id: Option<&'a str>,
    pub reply_to: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct CallRow {
    pub id: String,
    pub caller_id: String,
    pub chat_kind: String,
    pub chat_id: String,
    pub kind: String,
    pub status: String,
    pub started_at: String,
    pub answered_at: Option<String>,
    pub ended_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoryRow {
    pub id: String,
    pub author_id: String,
    pub author_username: String,
    pub body: Option<String>,
    pub media_id: Option<String>,
    pub created_at: String,
    pub expires_at: String,
    pub view_count: i64,
}

#[derive(Debug, Clone)]
pub struct StoryViewRow {
    pub viewer_id: String,
    pub username: String,
    pub viewed_at: String,
}

#[derive(Debug, Clone)]
pub struct ArchiveRow {
    pub chat_kind: String,
    pub chat_id: String,
    pub archived_at: String,
}

#[derive(Debug, Clone)]
pub struct UploadRow {
    pub id: String,
    pub owner_id: String,
    pub content_type: String,
    pub size: i64,
    pub sha256: String,
    pub created_at: String,
}
