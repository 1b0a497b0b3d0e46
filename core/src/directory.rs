/// Room directory: the authoritative local set of rooms for this session.
///
/// Rooms enter through explicit creation or server push and stay for the
/// process lifetime; only a wholesale refresh from the server replaces the
/// collection.
use crate::models::{ChatMessage, ChatRoom, RoomType};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone, Default)]
pub struct RoomDirectory {
    rooms: Arc<RwLock<HashMap<String, ChatRoom>>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a room if its id is unseen. A duplicate insert is a no-op:
    /// the existing entry keeps every field. Returns whether the room was
    /// actually inserted.
    pub async fn upsert(&self, room: ChatRoom) -> bool {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.id) {
            debug!("room {} already known, keeping existing entry", room.id);
            return false;
        }
        rooms.insert(room.id.clone(), room);
        true
    }

    /// Replace the `last_message` preview of an existing room and advance
    /// its `updated_at`. Unknown room ids are ignored; receiving a message
    /// for a room we do not know must not conjure a placeholder entry.
    pub async fn update_last_message(&self, room_id: &str, message: ChatMessage) {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(room_id) {
            Some(room) => {
                room.updated_at = Utc::now();
                room.last_message = Some(message);
            }
            None => debug!("last-message update for unknown room {}", room_id),
        }
    }

    /// The private room, if any, whose participants include `user_id`.
    /// Used to reuse an existing conversation instead of creating a second
    /// room for the same pair.
    pub async fn find_private_by_participant(&self, user_id: &str) -> Option<ChatRoom> {
        let rooms = self.rooms.read().await;
        rooms
            .values()
            .find(|room| room.room_type == RoomType::Private && room.has_participant(user_id))
            .cloned()
    }

    /// Wholesale refresh from a server listing. Unlike `upsert`, this
    /// replaces everything.
    pub async fn replace_all(&self, listing: Vec<ChatRoom>) {
        let mut rooms = self.rooms.write().await;
        rooms.clear();
        for room in listing {
            rooms.insert(room.id.clone(), room);
        }
    }

    /// Targeted merge for a server-pushed room update: refresh the display
    /// fields of an existing entry, fall back to insertion for unknown ids.
    pub async fn apply_update(&self, update: ChatRoom) {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(&update.id) {
            Some(room) => {
                room.name = update.name;
                room.unread_count = update.unread_count;
                room.updated_at = update.updated_at;
                if update.last_message.is_some() {
                    room.last_message = update.last_message;
                }
                if !update.participants.is_empty() {
                    room.participants = update.participants;
                }
            }
            None => {
                rooms.insert(update.id.clone(), update);
            }
        }
    }

    /// Local half of mark-as-read
    pub async fn clear_unread(&self, room_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_id) {
            room.unread_count = 0;
        }
    }

    pub async fn get(&self, room_id: &str) -> Option<ChatRoom> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// All rooms, most recently active first
    pub async fn snapshot(&self) -> Vec<ChatRoom> {
        let rooms = self.rooms.read().await;
        let mut listing: Vec<ChatRoom> = rooms.values().cloned().collect();
        listing.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        listing
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}
