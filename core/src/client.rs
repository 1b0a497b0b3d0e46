/// Connection orchestrator: the one surface callers depend on.
///
/// Ties connection lifecycle to the ambient authentication state
/// (`on_authenticated` / `on_session_ended`), fans inbound pushes out into
/// the room directory and the active room session, and re-broadcasts them
/// as `ClientEvent`s for UI consumers. Owns every piece of mutable state;
/// callers only read snapshots and invoke operations.
use crate::auth::TokenStore;
use crate::config::ClientConfig;
use crate::directory::RoomDirectory;
use crate::error::{ChatError, Result};
use crate::mapper;
use crate::models::{ChatMessage, ChatRoom, ClientEvent, LocalPrincipal, SenderType};
use crate::session::ActiveRoom;
use crate::transport::{ConnectionState, PushEvent, Transport};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct ChatClient {
    /// Instance identifier, for log correlation when several clients run
    /// in one process (tests, multi-account tooling)
    pub id: String,
    config: ClientConfig,
    tokens: Arc<dyn TokenStore>,
    transport: Arc<Transport>,
    directory: RoomDirectory,
    session: ActiveRoom,
    principal: RwLock<Option<LocalPrincipal>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(config: ClientConfig, tokens: Arc<dyn TokenStore>) -> Arc<Self> {
        let (transport, push_rx) = Transport::new(config.clone(), Arc::clone(&tokens));
        let session = ActiveRoom::new(Arc::clone(&transport), config.history_page_size);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let id = Uuid::new_v4().to_string();
        debug!("created messaging client {}", id);

        let client = Arc::new(Self {
            id,
            config,
            tokens,
            transport,
            directory: RoomDirectory::new(),
            session,
            principal: RwLock::new(None),
            events,
        });
        client.spawn_pump(push_rx);
        client
    }

    /// Inbound pushes are handled on one task, in arrival order; the task
    /// holds only a weak handle so a dropped client shuts it down.
    fn spawn_pump(self: &Arc<Self>, mut push_rx: mpsc::UnboundedReceiver<PushEvent>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(push) = push_rx.recv().await {
                let Some(client) = weak.upgrade() else {
                    break;
                };
                client.handle_push(push).await;
            }
        });
    }

    async fn handle_push(&self, push: PushEvent) {
        match push {
            PushEvent::Reconnected => {
                info!("reconnected, refreshing room list");
                if let Err(e) = self.refresh_rooms().await {
                    warn!("room refresh after reconnect failed: {}", e);
                }
                let _ = self.events.send(ClientEvent::Connected);
            }
            PushEvent::NewMessage(raw) => {
                let message = mapper::map_message(&raw);
                // Both views advance on every inbound message: the room's
                // list preview and, if the room is open, the timeline.
                self.directory
                    .update_last_message(&message.room_id, message.clone())
                    .await;
                self.session.reconcile(message.clone()).await;
                let _ = self.events.send(ClientEvent::NewMessage { message });
            }
            PushEvent::RoomCreated(raw) => {
                let room = mapper::map_room(&raw);
                // Our own createPrivateRoom may have inserted it already;
                // upsert keeps the first entry either way.
                if self.directory.upsert(room.clone()).await {
                    let _ = self.events.send(ClientEvent::RoomCreated { room });
                }
            }
            PushEvent::RoomUpdated(raw) => {
                let room = mapper::map_room(&raw);
                self.directory.apply_update(room.clone()).await;
                let _ = self.events.send(ClientEvent::RoomUpdated { room });
            }
            PushEvent::UserTyping(raw) => {
                let _ = self.events.send(ClientEvent::Typing {
                    notice: mapper::map_typing(&raw),
                });
            }
            PushEvent::Disconnected { reason } => {
                let _ = self.events.send(ClientEvent::Disconnected { reason });
            }
            PushEvent::AuthRejected { reason } => {
                warn!("credential rejected: {}", reason);
                let _ = self.events.send(ClientEvent::AuthRejected);
            }
        }
    }

    /// Called by the authentication collaborator once a principal is known.
    /// Connects if no connection exists, then refreshes the room directory
    /// from the server; connecting without that refresh would leave a
    /// connected client with an empty room list.
    pub async fn on_authenticated(&self, principal: LocalPrincipal) -> Result<()> {
        *self.principal.write().await = Some(principal);

        if self.transport.is_connected().await {
            return Ok(());
        }
        let token = self
            .tokens
            .token()
            .ok_or_else(|| ChatError::Auth("no stored credential".to_string()))?;

        self.transport.connect(&token).await?;
        self.refresh_rooms().await?;
        let _ = self.events.send(ClientEvent::Connected);
        Ok(())
    }

    /// Called when the session ends or the owning surface goes away. The
    /// disconnect is unconditional so a live connection can never outlast
    /// its caller.
    pub async fn on_session_ended(&self) {
        *self.principal.write().await = None;
        self.session.close().await;
        self.transport.disconnect().await;
    }

    /// Wholesale room-list refresh into the directory. Returns the number
    /// of rooms listed.
    pub async fn refresh_rooms(&self) -> Result<usize> {
        let rooms = self.transport.get_rooms().await?;
        let count = rooms.len();
        self.directory.replace_all(rooms).await;
        debug!("room directory refreshed ({} rooms)", count);
        Ok(count)
    }

    /// Start (or resume) a private conversation with the given counterpart.
    /// An existing private room with that participant is reused; otherwise
    /// the server creates one, which lands in the directory immediately,
    /// with a delayed full refresh to pick up the server's authoritative
    /// view of it.
    pub async fn create_private_room(
        &self,
        target_id: &str,
        target_type: SenderType,
    ) -> Result<ChatRoom> {
        if !self.transport.is_connected().await {
            return Err(ChatError::NotConnected);
        }

        if let Some(existing) = self.directory.find_private_by_participant(target_id).await {
            debug!("reusing private room {} for {}", existing.id, target_id);
            return Ok(existing);
        }

        let room = self
            .transport
            .create_private_room(target_id, target_type)
            .await?;
        self.directory.upsert(room.clone()).await;

        // The immediate ack can be a partial, denormalized view; reconcile
        // against the server listing shortly after. Failures here are only
        // logged, the caller already has a usable room.
        let transport = Arc::clone(&self.transport);
        let directory = self.directory.clone();
        let delay = self.config.refresh_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match transport.get_rooms().await {
                Ok(rooms) => directory.replace_all(rooms).await,
                Err(e) => warn!("post-create room refresh failed: {}", e),
            }
        });

        Ok(room)
    }

    /// Open a room from the directory and load its history.
    pub async fn open_room(&self, room_id: &str) -> Result<Vec<ChatMessage>> {
        let room = self
            .directory
            .get(room_id)
            .await
            .ok_or_else(|| ChatError::Room(format!("unknown room {}", room_id)))?;
        self.session.open(room).await?;
        Ok(self.session.timeline().await)
    }

    pub async fn close_room(&self) {
        self.session.close().await;
    }

    /// Optimistic send into the open room (see `ActiveRoom::send`).
    pub async fn send(&self, content: &str) -> Result<()> {
        let principal = self
            .principal
            .read()
            .await
            .clone()
            .unwrap_or_else(LocalPrincipal::unresolved);
        self.session.send(content, &principal).await
    }

    pub async fn send_to_bot(&self, content: &str, supplier_id: &str) -> Result<()> {
        self.session.send_to_bot(content, supplier_id).await
    }

    /// Load the next-older history page into the open room's timeline.
    pub async fn load_older(&self) -> Result<usize> {
        self.session.load_older().await
    }

    /// Mark a room read on the server, then clear the local unread
    /// counter. This is the only path that decrements it.
    pub async fn mark_read(&self, room_id: &str) -> Result<()> {
        self.transport.mark_as_read(room_id).await?;
        self.directory.clear_unread(room_id).await;
        Ok(())
    }

    /// Advisory typing indicator for the open room; no-op when closed.
    pub async fn typing(&self, is_typing: bool) -> Result<()> {
        let Some(room) = self.session.current_room().await else {
            return Ok(());
        };
        self.transport.send_typing(&room.id, is_typing).await
    }

    /// Snapshot of the known rooms, most recently active first.
    pub async fn rooms(&self) -> Vec<ChatRoom> {
        self.directory.snapshot().await
    }

    pub async fn timeline(&self) -> Vec<ChatMessage> {
        self.session.timeline().await
    }

    pub async fn current_room(&self) -> Option<ChatRoom> {
        self.session.current_room().await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.transport.state().await
    }

    pub async fn principal(&self) -> Option<LocalPrincipal> {
        self.principal.read().await.clone()
    }

    /// Subscribe to client events. A consumer that falls behind loses the
    /// oldest events; this is an advisory stream, not a queue.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}
