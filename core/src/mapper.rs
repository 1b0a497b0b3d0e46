/// Pure translation from server-shaped payloads into the canonical shapes.
///
/// The backend has gone through several payload revisions, so the same
/// concept can arrive under different field names (`roomId`,
/// `chat_room_id`, `room_id`, ...). All of that tolerance lives here and
/// only here; nothing else in the crate inspects raw payloads. Mapping
/// never fails: every missing field has a defined default.
use crate::models::{
    ChatMessage, ChatRoom, MessagePage, Participant, RoomType, SenderInfo, SenderType,
    TypingNotice,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

const ROOM_ID_FIELDS: &[&str] = &["roomId", "chat_room_id", "room_id"];
const MESSAGE_ID_FIELDS: &[&str] = &["id", "messageId", "message_id", "_id"];
const CREATED_AT_FIELDS: &[&str] = &["createdAt", "created_at", "timestamp", "sentAt"];
const UPDATED_AT_FIELDS: &[&str] = &["updatedAt", "updated_at"];

fn str_field(raw: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| raw.get(name).and_then(Value::as_str))
        .map(str::to_string)
}

fn u32_field(raw: &Value, names: &[&str]) -> Option<u32> {
    names
        .iter()
        .find_map(|name| raw.get(name).and_then(Value::as_u64))
        .map(|n| n as u32)
}

fn bool_field(raw: &Value, names: &[&str]) -> Option<bool> {
    names
        .iter()
        .find_map(|name| raw.get(name).and_then(Value::as_bool))
}

/// Timestamps arrive as RFC3339 strings or epoch milliseconds; anything
/// unreadable falls back to the current time.
fn time_field(raw: &Value, names: &[&str]) -> DateTime<Utc> {
    for name in names {
        match raw.get(name) {
            Some(Value::String(s)) => {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                    return parsed.with_timezone(&Utc);
                }
            }
            Some(Value::Number(n)) => {
                if let Some(millis) = n.as_i64() {
                    if let Some(parsed) = Utc.timestamp_millis_opt(millis).single() {
                        return parsed;
                    }
                }
            }
            _ => {}
        }
    }
    Utc::now()
}

fn parse_sender_type(name: &str) -> Option<SenderType> {
    match name.to_lowercase().as_str() {
        "employee" => Some(SenderType::Employee),
        "visitor" => Some(SenderType::Visitor),
        "bot" => Some(SenderType::Bot),
        _ => None,
    }
}

/// Explicit type tag if present, otherwise inferred from which of the
/// mutually exclusive sender-reference fields is populated.
fn sender_type_of(raw: &Value) -> (SenderType, Option<String>) {
    let explicit = str_field(raw, &["senderType", "sender_type"]).and_then(|s| parse_sender_type(&s));

    let employee_ref = str_field(raw, &["employeeId", "employee_id"]);
    let visitor_ref = str_field(raw, &["visitorId", "visitor_id"]);
    let bot_ref = str_field(raw, &["botId", "bot_id"]);

    let inferred = if employee_ref.is_some() {
        SenderType::Employee
    } else if visitor_ref.is_some() {
        SenderType::Visitor
    } else if bot_ref.is_some() || bool_field(raw, &["isBot", "is_bot"]) == Some(true) {
        SenderType::Bot
    } else {
        SenderType::Employee
    };

    let reference = employee_ref.or(visitor_ref).or(bot_ref);
    (explicit.unwrap_or(inferred), reference)
}

fn sender_snapshot(raw: &Value) -> Option<SenderInfo> {
    if let Some(sender) = raw.get("sender").filter(|v| v.is_object()) {
        return Some(SenderInfo {
            name: str_field(sender, &["name", "displayName", "display_name"]).unwrap_or_default(),
            email: str_field(sender, &["email"]),
        });
    }
    str_field(raw, &["senderName", "sender_name"]).map(|name| SenderInfo {
        name,
        email: str_field(raw, &["senderEmail", "sender_email"]),
    })
}

pub fn map_message(raw: &Value) -> ChatMessage {
    let (sender_type, sender_ref) = sender_type_of(raw);
    let sender_id = str_field(raw, &["senderId", "sender_id"])
        .or(sender_ref)
        .unwrap_or_default();

    ChatMessage {
        id: str_field(raw, MESSAGE_ID_FIELDS).unwrap_or_default(),
        content: str_field(raw, &["content", "message", "text"]).unwrap_or_default(),
        room_id: str_field(raw, ROOM_ID_FIELDS).unwrap_or_default(),
        sender_type,
        sender_id,
        created_at: time_field(raw, CREATED_AT_FIELDS),
        sender: sender_snapshot(raw),
    }
}

fn map_participant(raw: &Value) -> Participant {
    let explicit = str_field(raw, &["type", "userType", "user_type"])
        .and_then(|s| parse_sender_type(&s));
    let employee_ref = str_field(raw, &["employeeId", "employee_id"]);
    let visitor_ref = str_field(raw, &["visitorId", "visitor_id"]);

    let participant_type = explicit.unwrap_or(if visitor_ref.is_some() {
        SenderType::Visitor
    } else {
        SenderType::Employee
    });

    Participant {
        id: str_field(raw, &["id", "userId", "user_id"])
            .or(employee_ref)
            .or(visitor_ref)
            .unwrap_or_default(),
        participant_type,
        name: str_field(raw, &["name", "displayName", "display_name"]),
    }
}

fn parse_room_type(name: &str) -> Option<RoomType> {
    match name.to_lowercase().as_str() {
        "private" => Some(RoomType::Private),
        "group" => Some(RoomType::Group),
        "supplier" => Some(RoomType::Supplier),
        _ => None,
    }
}

pub fn map_room(raw: &Value) -> ChatRoom {
    let participants: Vec<Participant> = ["participants", "members"]
        .iter()
        .find_map(|name| raw.get(name).and_then(Value::as_array))
        .map(|list| list.iter().map(map_participant).collect())
        .unwrap_or_default();

    let room_type = str_field(raw, &["roomType", "room_type", "type"])
        .and_then(|s| parse_room_type(&s))
        .unwrap_or(if participants.len() == 2 {
            RoomType::Private
        } else {
            RoomType::Group
        });

    let last_message = ["lastMessage", "last_message"]
        .iter()
        .find_map(|name| raw.get(name).filter(|v| v.is_object()))
        .map(map_message);

    ChatRoom {
        id: str_field(raw, &["id", "roomId", "chat_room_id", "room_id", "_id"])
            .unwrap_or_default(),
        name: str_field(raw, &["name", "roomName", "room_name"]).unwrap_or_default(),
        room_type,
        created_at: time_field(raw, CREATED_AT_FIELDS),
        updated_at: time_field(raw, UPDATED_AT_FIELDS),
        last_message,
        unread_count: u32_field(raw, &["unreadCount", "unread_count"]).unwrap_or(0),
        participants,
    }
}

/// Room listings arrive either as a bare array or wrapped in `{rooms: []}`
pub fn map_rooms(raw: &Value) -> Vec<ChatRoom> {
    let list = raw
        .as_array()
        .or_else(|| raw.get("rooms").and_then(Value::as_array));
    list.map(|rooms| rooms.iter().map(map_room).collect())
        .unwrap_or_default()
}

pub fn map_message_page(raw: &Value) -> MessagePage {
    let messages = ["messages", "data"]
        .iter()
        .find_map(|name| raw.get(name).and_then(Value::as_array))
        .map(|list| list.iter().map(map_message).collect())
        .unwrap_or_default();

    MessagePage {
        messages,
        has_more: bool_field(raw, &["hasMore", "has_more"]).unwrap_or(false),
        next_cursor: str_field(raw, &["nextCursor", "next_cursor"]),
    }
}

pub fn map_typing(raw: &Value) -> TypingNotice {
    TypingNotice {
        room_id: str_field(raw, ROOM_ID_FIELDS).unwrap_or_default(),
        user_id: str_field(raw, &["userId", "user_id", "senderId", "sender_id"])
            .unwrap_or_default(),
        is_typing: bool_field(raw, &["isTyping", "is_typing", "typing"]).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_room_id_variants_map_to_same_id() {
        // Every historical spelling of the room reference yields the same
        // canonical id.
        for field in ["roomId", "chat_room_id", "room_id"] {
            let raw = json!({"id": "m1", "content": "hi", field: "r42"});
            assert_eq!(map_message(&raw).room_id, "r42", "variant {field}");
        }
    }

    #[test]
    fn test_sender_type_inferred_from_populated_reference() {
        let employee = json!({"id": "m1", "employeeId": "e7", "content": "x", "roomId": "r1"});
        let visitor = json!({"id": "m2", "visitor_id": "v3", "content": "x", "roomId": "r1"});
        let bot = json!({"id": "m3", "isBot": true, "content": "x", "roomId": "r1"});

        let mapped = map_message(&employee);
        assert_eq!(mapped.sender_type, SenderType::Employee);
        assert_eq!(mapped.sender_id, "e7");

        let mapped = map_message(&visitor);
        assert_eq!(mapped.sender_type, SenderType::Visitor);
        assert_eq!(mapped.sender_id, "v3");

        assert_eq!(map_message(&bot).sender_type, SenderType::Bot);
    }

    #[test]
    fn test_explicit_sender_type_wins_over_inference() {
        let raw = json!({
            "id": "m1",
            "senderType": "bot",
            "employeeId": "e7",
            "content": "x",
            "roomId": "r1"
        });
        assert_eq!(map_message(&raw).sender_type, SenderType::Bot);
    }

    #[test]
    fn test_empty_payload_maps_to_defaults() {
        let message = map_message(&json!({}));
        assert_eq!(message.id, "");
        assert_eq!(message.content, "");
        assert_eq!(message.room_id, "");
        assert_eq!(message.sender_id, "");
        assert!(message.sender.is_none());

        let room = map_room(&json!({}));
        assert_eq!(room.id, "");
        assert_eq!(room.unread_count, 0);
        assert!(room.participants.is_empty());
        assert!(room.last_message.is_none());
    }

    #[test]
    fn test_timestamps_rfc3339_millis_and_fallback() {
        let rfc = json!({"createdAt": "2026-01-15T10:30:00Z"});
        assert_eq!(
            map_message(&rfc).created_at,
            "2026-01-15T10:30:00Z".parse::<DateTime<Utc>>().unwrap()
        );

        let millis = json!({"created_at": 1_736_937_000_000_i64});
        assert_eq!(
            map_message(&millis).created_at.timestamp_millis(),
            1_736_937_000_000_i64
        );

        // Garbage falls back to "now" rather than failing
        let before = Utc::now();
        let mapped = map_message(&json!({"createdAt": "not a date"}));
        assert!(mapped.created_at >= before);
    }

    #[test]
    fn test_sender_snapshot_variants() {
        let nested = json!({"sender": {"name": "Ana", "email": "ana@example.com"}});
        let snapshot = map_message(&nested).sender.unwrap();
        assert_eq!(snapshot.name, "Ana");
        assert_eq!(snapshot.email.as_deref(), Some("ana@example.com"));

        let flat = json!({"senderName": "Bo"});
        assert_eq!(map_message(&flat).sender.unwrap().name, "Bo");
    }

    #[test]
    fn test_room_type_inferred_from_participant_count() {
        let pair = json!({
            "id": "r1",
            "participants": [{"id": "e1"}, {"id": "v1", "visitorId": "v1"}]
        });
        assert_eq!(map_room(&pair).room_type, RoomType::Private);

        let trio = json!({
            "id": "r2",
            "participants": [{"id": "a"}, {"id": "b"}, {"id": "c"}]
        });
        assert_eq!(map_room(&trio).room_type, RoomType::Group);
    }

    #[test]
    fn test_room_with_last_message_and_unread() {
        let raw = json!({
            "id": "r1",
            "name": "Front desk",
            "roomType": "supplier",
            "unread_count": 4,
            "lastMessage": {"id": "m9", "content": "latest", "room_id": "r1"}
        });
        let room = map_room(&raw);
        assert_eq!(room.room_type, RoomType::Supplier);
        assert_eq!(room.unread_count, 4);
        assert_eq!(room.last_message.unwrap().content, "latest");
    }

    #[test]
    fn test_message_page_variants() {
        let page = map_message_page(&json!({
            "messages": [{"id": "m1", "content": "a", "roomId": "r1"}],
            "hasMore": true,
            "nextCursor": "c-2"
        }));
        assert_eq!(page.messages.len(), 1);
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("c-2"));

        let snake = map_message_page(&json!({"data": [], "has_more": false}));
        assert!(snake.messages.is_empty());
        assert!(!snake.has_more);
        assert!(snake.next_cursor.is_none());
    }

    #[test]
    fn test_typing_notice() {
        let notice = map_typing(&json!({"roomId": "r1", "userId": "v2", "isTyping": true}));
        assert_eq!(notice.room_id, "r1");
        assert_eq!(notice.user_id, "v2");
        assert!(notice.is_typing);
    }
}
