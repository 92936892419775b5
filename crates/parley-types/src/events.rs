use serde::{Deserialize, Serialize};
use uuid::Uuid;

use parley_core::{Community, Group, Post};

use crate::api::{ChannelResponse, MessageResponse};
use crate::models::{CallRecord, ChatRef, Story};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },

    MessageCreate { message: MessageResponse },

    /// Edited, pinned or unpinned
    MessageUpdate { message: MessageResponse },

    MessageDelete { id: Uuid, chat: ChatRef },

    ReactionAdd {
        message_id: Uuid,
        chat: ChatRef,
        user_id: Uuid,
        username: String,
        emoji: String,
    },

    ReactionRemove {
        message_id: Uuid,
        chat: ChatRef,
        user_id: Uuid,
        emoji: String,
    },

    /// A user started typing
    TypingStart {
        chat: ChatRef,
        user_id: Uuid,
        username: String,
    },

    /// Full group state after any change, sent to every member
    GroupUpdate { group: Group },

    /// The receiving user is no longer part of the group
    GroupRemoved { group_id: Uuid, reason: RemovalReason },

    ChannelUpdate { channel: ChannelResponse },

    ChannelPost { channel_id: Uuid, post: Post },

    ChannelPostDelete { channel_id: Uuid, post_id: Uuid },

    CommunityUpdate { community: Community },

    StoryCreate { story: Story },

    StoryDelete { story_id: Uuid },

    CallUpdate { call: CallRecord },

    /// Call signaling message targeted to a specific user
    CallSignal {
        from_user_id: Uuid,
        call_id: Uuid,
        signal: CallSignalPayload,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Left,
    Removed,
    Banned,
    Deleted,
}

impl GatewayEvent {
    /// The group or channel this event belongs to, if any.
    pub fn room(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } | Self::MessageUpdate { message } => {
                room_of(&message.chat)
            }
            Self::MessageDelete { chat, .. }
            | Self::ReactionAdd { chat, .. }
            | Self::ReactionRemove { chat, .. }
            | Self::TypingStart { chat, .. } => room_of(chat),
            Self::GroupUpdate { group } => Some(group.id),
            Self::GroupRemoved { group_id, .. } => Some(*group_id),
            Self::ChannelUpdate { channel } => Some(channel.id),
            Self::ChannelPost { channel_id, .. } | Self::ChannelPostDelete { channel_id, .. } => {
                Some(*channel_id)
            }
            _ => None,
        }
    }

    /// Ephemeral events are only delivered for rooms the connection has
    /// subscribed to; everything else is always delivered.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::TypingStart { .. })
    }
}

fn room_of(chat: &ChatRef) -> Option<Uuid> {
    match chat {
        ChatRef::Group(id) | ChatRef::Channel(id) => Some(*id),
        ChatRef::Direct(_) => None,
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Rooms the client currently has open. Replaces the previous set.
    Subscribe { rooms: Vec<Uuid> },

    /// Indicate typing in a chat
    StartTyping { chat: ChatRef },

    /// Relay a signaling message to a call participant
    CallSignalSend {
        call_id: Uuid,
        target_user_id: Uuid,
        signal: CallSignalPayload,
    },
}

/// WebRTC signaling payload relayed between peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal_type")]
pub enum CallSignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u16>,
    },
}
