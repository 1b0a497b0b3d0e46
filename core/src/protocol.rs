/// Wire protocol: JSON text frames over one WebSocket connection.
///
/// Client frames carry an `event` name, an optional `ack` correlation id,
/// and a `data` payload. Server frames either answer a request (`ack` +
/// `data`) or push an unsolicited event (`event` + `data`).
use crate::error::{ChatError, Result};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Outbound request vocabulary
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum Request {
    GetRooms,

    #[serde(rename_all = "camelCase")]
    SendMessage { room_id: String, content: String },

    #[serde(rename_all = "camelCase")]
    SendMessageToBot {
        room_id: String,
        content: String,
        supplier_id: String,
    },

    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String },

    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },

    #[serde(rename_all = "camelCase")]
    GetRoomMessages {
        room_id: String,
        limit: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        cursor: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    CreatePrivateRoom {
        target_user_id: String,
        target_user_type: crate::models::SenderType,
    },

    #[serde(rename_all = "camelCase")]
    MarkAsRead { room_id: String },

    /// Advisory, fire-and-forget: sent without an ack id
    #[serde(rename_all = "camelCase")]
    Typing { room_id: String, is_typing: bool },
}

impl Request {
    /// Wire event name, for logs and timeout messages
    pub fn event_name(&self) -> &'static str {
        match self {
            Request::GetRooms => "getRooms",
            Request::SendMessage { .. } => "sendMessage",
            Request::SendMessageToBot { .. } => "sendMessageToBot",
            Request::JoinRoom { .. } => "joinRoom",
            Request::LeaveRoom { .. } => "leaveRoom",
            Request::GetRoomMessages { .. } => "getRoomMessages",
            Request::CreatePrivateRoom { .. } => "createPrivateRoom",
            Request::MarkAsRead { .. } => "markAsRead",
            Request::Typing { .. } => "typing",
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request({})", self.event_name())
    }
}

/// Client frame: a request plus its correlation id (absent for advisories)
#[derive(Debug, Clone, Serialize)]
pub struct ClientFrame {
    #[serde(flatten)]
    pub request: Request,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
}

impl ClientFrame {
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server frame, split by the presence of `ack`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Ack { ack: u64, data: Value },
    Push { event: String, data: Value },
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(text)?;
        if let Some(ack) = value.get("ack").and_then(Value::as_u64) {
            return Ok(ServerFrame::Ack {
                ack,
                data: value.get_mut("data").map(Value::take).unwrap_or(Value::Null),
            });
        }
        match value.get("event").and_then(Value::as_str) {
            Some(event) => Ok(ServerFrame::Push {
                event: event.to_string(),
                data: value.get_mut("data").map(Value::take).unwrap_or(Value::Null),
            }),
            None => Err(ChatError::Protocol(
                "frame carries neither ack nor event".to_string(),
            )),
        }
    }
}

/// Unwrap an operation acknowledgment, mapping a reported failure to an
/// error. Accepts both the `{success, data}` and the bot path's `{status}`
/// ack shapes.
pub fn ack_data(mut ack: Value) -> Result<Value> {
    let success = ack.get("success").and_then(Value::as_bool);
    let status = ack.get("status").and_then(Value::as_str);
    let accepted = success == Some(true) || (success.is_none() && matches!(status, Some(s) if s != "error"));
    if accepted {
        return Ok(ack.get_mut("data").map(Value::take).unwrap_or(Value::Null));
    }
    let reason = ack
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("request rejected by server")
        .to_string();
    Err(ChatError::Operation(reason))
}

/// Whether a failure reason names an authentication problem, as opposed to
/// a transient network one. Auth failures are never retried.
pub fn is_auth_failure(reason: &str) -> bool {
    let reason = reason.to_lowercase();
    ["unauthorized", "forbidden", "authentication", "invalid token", "401"]
        .iter()
        .any(|marker| reason.contains(marker))
}
