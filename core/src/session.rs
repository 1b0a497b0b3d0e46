/// Active room session: the one room currently open and its message
/// timeline.
///
/// Sends are optimistic: the message appears locally before any network
/// round trip, then the server's `newMessage` push confirms it in place or
/// a transport failure retracts it. Only one room is open at a time;
/// opening another discards the previous timeline entirely.
use crate::error::Result;
use crate::models::{ChatMessage, ChatRoom, LocalPrincipal};
use crate::transport::Transport;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Default)]
struct SessionInner {
    room: Option<ChatRoom>,
    timeline: Vec<ChatMessage>,
    has_more: bool,
    next_cursor: Option<String>,
    /// Bumped on every open/close so a late history response for a room
    /// that is no longer current can be recognized and discarded.
    epoch: u64,
}

#[derive(Clone)]
pub struct ActiveRoom {
    transport: Arc<Transport>,
    page_size: u32,
    inner: Arc<RwLock<SessionInner>>,
}

impl ActiveRoom {
    pub fn new(transport: Arc<Transport>, page_size: u32) -> Self {
        Self {
            transport,
            page_size,
            inner: Arc::new(RwLock::new(SessionInner::default())),
        }
    }

    /// Open a room: join it and load the first history page. Whatever was
    /// open before is discarded up front; a failed join or history fetch
    /// leaves the session closed.
    pub async fn open(&self, room: ChatRoom) -> Result<()> {
        let epoch = {
            let mut inner = self.inner.write().await;
            if let Some(previous) = inner.room.take() {
                // Switching rooms should not fail on the old one; leave in
                // the background and move on.
                let transport = Arc::clone(&self.transport);
                let previous_id = previous.id.clone();
                tokio::spawn(async move {
                    if let Err(e) = transport.leave_room(&previous_id).await {
                        debug!("leave {} on room switch failed: {}", previous_id, e);
                    }
                });
            }
            inner.timeline.clear();
            inner.has_more = false;
            inner.next_cursor = None;
            inner.epoch += 1;
            inner.epoch
        };

        self.transport.join_room(&room.id).await?;
        let page = self
            .transport
            .get_room_messages(&room.id, self.page_size, None)
            .await?;

        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            // Another open/close won the race while history was loading;
            // this response belongs to a stale timeline.
            debug!("discarding stale history for {}", room.id);
            return Ok(());
        }
        let mut timeline: Vec<ChatMessage> = Vec::with_capacity(page.messages.len());
        for message in page.messages {
            if !timeline.iter().any(|m| m.id == message.id) {
                timeline.push(message);
            }
        }
        debug!("opened {} with {} message(s)", room.id, timeline.len());
        inner.room = Some(room);
        inner.timeline = timeline;
        inner.has_more = page.has_more;
        inner.next_cursor = page.next_cursor;
        Ok(())
    }

    /// Leave the current room and clear the timeline. No-op when nothing
    /// is open; a failed leave is logged, local state clears regardless.
    pub async fn close(&self) {
        let room = {
            let mut inner = self.inner.write().await;
            inner.epoch += 1;
            inner.timeline.clear();
            inner.has_more = false;
            inner.next_cursor = None;
            inner.room.take()
        };
        if let Some(room) = room {
            if let Err(e) = self.transport.leave_room(&room.id).await {
                warn!("leave {} failed: {}", room.id, e);
            }
        }
    }

    /// Optimistic send. The entry is visible in the timeline before the
    /// request goes out; a transport failure retracts it and surfaces the
    /// error. Empty content and no-open-room are silent no-ops.
    pub async fn send(&self, content: &str, principal: &LocalPrincipal) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }

        let (room_id, temp_id) = {
            let mut inner = self.inner.write().await;
            let Some(room) = inner.room.as_ref() else {
                return Ok(());
            };
            let room_id = room.id.clone();
            let message = ChatMessage {
                id: ChatMessage::temp_id(),
                content: content.to_string(),
                room_id: room_id.clone(),
                sender_type: principal.principal_type,
                sender_id: principal.id.clone(),
                created_at: Utc::now(),
                sender: Some(principal.sender_info()),
            };
            let temp_id = message.id.clone();
            inner.timeline.push(message);
            (room_id, temp_id)
        };

        if let Err(e) = self.transport.send_message(&room_id, content).await {
            // The server never saw it; the timeline must not keep it.
            warn!("send failed, retracting optimistic entry: {}", e);
            let mut inner = self.inner.write().await;
            inner.timeline.retain(|m| m.id != temp_id);
            return Err(e);
        }
        Ok(())
    }

    /// Bot messages carry no optimistic entry; the reply arrives through
    /// the ordinary inbound path and is simply appended.
    pub async fn send_to_bot(&self, content: &str, supplier_id: &str) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }
        let room_id = {
            let inner = self.inner.read().await;
            match inner.room.as_ref() {
                Some(room) => room.id.clone(),
                None => return Ok(()),
            }
        };
        self.transport
            .send_bot_message(&room_id, content, supplier_id)
            .await
    }

    /// Merge an inbound message into the timeline. Exact-id duplicates are
    /// dropped; otherwise the oldest pending optimistic entry with matching
    /// content and sender is confirmed in place, preserving its position;
    /// otherwise the message is appended. Returns whether the timeline
    /// changed.
    pub async fn reconcile(&self, message: ChatMessage) -> bool {
        let mut inner = self.inner.write().await;
        let Some(room) = inner.room.as_ref() else {
            return false;
        };
        if room.id != message.room_id {
            return false;
        }

        if inner.timeline.iter().any(|m| m.id == message.id) {
            debug!("dropping duplicate message {}", message.id);
            return false;
        }

        let pending_slot = inner.timeline.iter().position(|m| {
            m.is_pending() && m.content == message.content && m.sender_id == message.sender_id
        });
        match pending_slot {
            Some(slot) => {
                debug!(
                    "confirmed optimistic entry {} as {}",
                    inner.timeline[slot].id, message.id
                );
                inner.timeline[slot] = message;
            }
            None => inner.timeline.push(message),
        }
        true
    }

    /// Fetch the page preceding the loaded window and prepend it. Returns
    /// how many messages were actually added.
    pub async fn load_older(&self) -> Result<usize> {
        let (room_id, cursor, epoch) = {
            let inner = self.inner.read().await;
            let Some(room) = inner.room.as_ref() else {
                return Ok(0);
            };
            if !inner.has_more {
                return Ok(0);
            }
            (room.id.clone(), inner.next_cursor.clone(), inner.epoch)
        };

        let page = self
            .transport
            .get_room_messages(&room_id, self.page_size, cursor)
            .await?;

        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            debug!("discarding stale older page for {}", room_id);
            return Ok(0);
        }
        inner.has_more = page.has_more;
        inner.next_cursor = page.next_cursor;

        let mut head: Vec<ChatMessage> = Vec::new();
        for message in page.messages {
            let seen = inner.timeline.iter().any(|m| m.id == message.id)
                || head.iter().any(|m| m.id == message.id);
            if !seen {
                head.push(message);
            }
        }
        let added = head.len();
        let tail = std::mem::take(&mut inner.timeline);
        head.extend(tail);
        inner.timeline = head;
        Ok(added)
    }

    pub async fn current_room(&self) -> Option<ChatRoom> {
        self.inner.read().await.room.clone()
    }

    pub async fn is_open(&self) -> bool {
        self.inner.read().await.room.is_some()
    }

    pub async fn timeline(&self) -> Vec<ChatMessage> {
        self.inner.read().await.timeline.clone()
    }

    pub async fn has_more(&self) -> bool {
        self.inner.read().await.has_more
    }
}
