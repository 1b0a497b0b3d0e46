/// Canonical shapes shared by the messaging client
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of client-issued ids for messages awaiting server confirmation
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Kind of principal behind a message. Employees, visitors, and the
/// automated bot are structurally different accounts, not subtypes of one
/// user model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Employee,
    Visitor,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    /// Exactly two participants
    Private,
    Group,
    Supplier,
}

/// Denormalized display snapshot of a sender at message-creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(rename = "type")]
    pub participant_type: SenderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-issued for confirmed messages; `temp-` prefixed for
    /// optimistic entries still awaiting confirmation
    pub id: String,
    pub content: String,
    pub room_id: String,
    pub sender_type: SenderType,
    /// Empty string permitted while the local sender is unresolved
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderInfo>,
}

impl ChatMessage {
    /// Whether this is an optimistic entry not yet confirmed by the server
    pub fn is_pending(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    /// Client-issued id for an optimistic entry: the temp prefix plus a
    /// high-resolution clock value
    pub fn temp_id() -> String {
        format!(
            "{}{}",
            TEMP_ID_PREFIX,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: String,
    pub name: String,
    pub room_type: RoomType,
    pub created_at: DateTime<Utc>,
    /// Advances locally whenever `last_message` changes
    pub updated_at: DateTime<Utc>,
    /// Display cache for list previews, not authoritative history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<ChatMessage>,
    /// Cleared only by an explicit mark-as-read, never by message receipt
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl ChatRoom {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.id == user_id)
    }
}

/// One page of room history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl MessagePage {
    /// Degraded result for a history fetch that timed out; an empty chat
    /// view is a safe state, a hard failure on page-open is not.
    pub fn empty() -> Self {
        Self {
            messages: Vec::new(),
            has_more: false,
            next_cursor: None,
        }
    }
}

/// The locally authenticated account on whose behalf messages are sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPrincipal {
    pub id: String,
    #[serde(rename = "type")]
    pub principal_type: SenderType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl LocalPrincipal {
    /// Placeholder identity used if a send happens before the principal is
    /// known; the sender id stays the empty-string sentinel.
    pub fn unresolved() -> Self {
        Self {
            id: String::new(),
            principal_type: SenderType::Employee,
            name: String::new(),
            email: None,
        }
    }

    pub fn sender_info(&self) -> SenderInfo {
        SenderInfo {
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Advisory typing indicator relayed from the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub room_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

/// Events broadcast to UI consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The channel is live (initial connect or after a reconnect)
    Connected,
    /// The channel is down for good; reconnect attempts are exhausted
    Disconnected { reason: String },
    /// The server rejected the credential; the token store was cleared and
    /// the user should be routed back through login
    AuthRejected,
    NewMessage { message: ChatMessage },
    RoomCreated { room: ChatRoom },
    RoomUpdated { room: ChatRoom },
    Typing { notice: TypingNotice },
}
