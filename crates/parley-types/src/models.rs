use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub about: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Where a message, call or archive entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ChatRef {
    Group(Uuid),
    /// Keyed by the peer's user id from the viewer's side.
    Direct(Uuid),
    Channel(Uuid),
}

impl ChatRef {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Group(_) => "group",
            Self::Direct(_) => "direct",
            Self::Channel(_) => "channel",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Group(id) | Self::Direct(id) | Self::Channel(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Option<Self> {
        match kind {
            "group" => Some(Self::Group(id)),
            "direct" => Some(Self::Direct(id)),
            "channel" => Some(Self::Channel(id)),
            _ => None,
        }
    }
}

/// Direct conversations are stored under a key both participants derive
/// identically: the two user ids in ascending order.
pub fn direct_conversation_key(a: Uuid, b: Uuid) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

impl ChatRef {
    /// `(kind, id)` as stored in the database, seen from `viewer`.
    pub fn storage_key(&self, viewer: Uuid) -> (&'static str, String) {
        match self {
            Self::Direct(peer) => (self.kind(), direct_conversation_key(viewer, *peer)),
            other => (other.kind(), other.id().to_string()),
        }
    }

    /// Inverse of [`ChatRef::storage_key`]. Direct keys resolve to the
    /// participant who is not `viewer`.
    pub fn from_storage(kind: &str, id: &str, viewer: Uuid) -> Option<Self> {
        if kind == "direct" {
            let (a, b) = id.split_once(':')?;
            let (a, b): (Uuid, Uuid) = (a.parse().ok()?, b.parse().ok()?);
            let peer = if a == viewer { b } else if b == viewer { a } else { return None };
            return Some(Self::Direct(peer));
        }
        Self::from_parts(kind, id.parse().ok()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub body: Option<String>,
    pub media_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub view_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Voice,
    Video,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "voice" => Some(Self::Voice),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ringing,
    Active,
    Ended,
    Missed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Missed => "missed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(Self::Ringing),
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            "missed" => Some(Self::Missed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub caller_id: Uuid,
    pub chat: ChatRef,
    pub kind: CallKind,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub content_type: String,
    pub size: u64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkPreview {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub site_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_keys_are_symmetric() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(direct_conversation_key(a, b), direct_conversation_key(b, a));

        let (kind, key) = ChatRef::Direct(b).storage_key(a);
        assert_eq!(kind, "direct");
        assert_eq!(ChatRef::from_storage(kind, &key, a), Some(ChatRef::Direct(b)));
        assert_eq!(ChatRef::from_storage(kind, &key, b), Some(ChatRef::Direct(a)));
        assert_eq!(ChatRef::from_storage(kind, &key, Uuid::new_v4()), None);
    }

    #[test]
    fn group_keys_are_plain_ids() {
        let g = Uuid::new_v4();
        let (kind, key) = ChatRef::Group(g).storage_key(Uuid::new_v4());
        assert_eq!(ChatRef::from_storage(kind, &key, Uuid::new_v4()), Some(ChatRef::Group(g)));
        assert_eq!(ChatRef::from_storage("bogus", &key, g), None);
    }
}
