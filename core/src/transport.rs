/// WebSocket transport: owns the single live connection to the chat server.
///
/// Request/acknowledgment exchanges are correlated through ack ids and a
/// pending map; unsolicited pushes flow out through a channel consumed by
/// the orchestrator. Unexpected drops trigger supervised reconnection with
/// capped backoff; authentication failures are terminal and clear the
/// credential store instead of retrying.
use crate::auth::TokenStore;
use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::mapper;
use crate::models::{ChatRoom, MessagePage, SenderType};
use crate::protocol::{ack_data, is_auth_failure, ClientFrame, Request, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection state of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// WebSocket handshake in progress
    Connecting,
    /// Channel open, waiting for the server's authentication acknowledgment
    Authenticating,
    /// Fully connected and ready
    Connected,
    /// Teardown in progress
    Closing,
}

/// Inbound events surfaced to the orchestrator
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// An automatic reconnection succeeded; local caches need a refresh
    Reconnected,
    NewMessage(Value),
    RoomCreated(Value),
    RoomUpdated(Value),
    UserTyping(Value),
    /// Reconnect attempts exhausted; the transport is down for good
    Disconnected { reason: String },
    /// The server rejected the credential; the token store was cleared
    AuthRejected { reason: String },
}

pub struct Transport {
    config: ClientConfig,
    tokens: Arc<dyn TokenStore>,
    state: RwLock<ConnectionState>,
    outbound: RwLock<Option<mpsc::UnboundedSender<WsMessage>>>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    next_ack: AtomicU64,
    connecting: AtomicBool,
    cancel: RwLock<CancellationToken>,
    push_tx: mpsc::UnboundedSender<PushEvent>,
}

impl Transport {
    pub fn new(
        config: ClientConfig,
        tokens: Arc<dyn TokenStore>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PushEvent>) {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            config,
            tokens,
            state: RwLock::new(ConnectionState::Disconnected),
            outbound: RwLock::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_ack: AtomicU64::new(0),
            connecting: AtomicBool::new(false),
            cancel: RwLock::new(CancellationToken::new()),
            push_tx,
        });
        (transport, push_rx)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Establish the channel. Resolves once the server has accepted the
    /// WebSocket handshake AND pushed its `connected` acknowledgment; the
    /// whole exchange is bounded by `connect_timeout`.
    ///
    /// A connect already in flight turns a concurrent call into a no-op.
    /// An existing live connection is torn down first.
    pub async fn connect(self: &Arc<Self>, credential: &str) -> Result<()> {
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("connect already in flight, ignoring concurrent call");
            return Ok(());
        }
        let result = self.connect_inner(credential).await;
        self.connecting.store(false, Ordering::SeqCst);
        result
    }

    async fn connect_inner(self: &Arc<Self>, credential: &str) -> Result<()> {
        if *self.state.read().await != ConnectionState::Disconnected {
            info!("replacing existing connection");
            self.disconnect().await;
        }

        let cancel = CancellationToken::new();
        *self.cancel.write().await = cancel.clone();

        let closed_rx = match self.open_connection(credential, &cancel).await {
            Ok(rx) => rx,
            Err(e) => {
                if let ChatError::Auth(reason) = &e {
                    warn!("credential rejected during connect: {}", reason);
                    self.tokens.clear();
                    let _ = self.push_tx.send(PushEvent::AuthRejected {
                        reason: reason.clone(),
                    });
                }
                return Err(e);
            }
        };

        // Watch for unexpected drops and drive reconnection.
        let transport = Arc::clone(self);
        let credential = credential.to_string();
        tokio::spawn(async move { transport.supervise(credential, closed_rx, cancel).await });

        Ok(())
    }

    /// Tear down the channel and reject every in-flight request. Safe to
    /// call at any time, connected or not.
    pub async fn disconnect(&self) {
        *self.state.write().await = ConnectionState::Closing;
        self.cancel.read().await.cancel();
        self.drop_connection().await;
        *self.state.write().await = ConnectionState::Disconnected;
        debug!("transport disconnected");
    }

    async fn drop_connection(&self) {
        *self.outbound.write().await = None;
        let mut pending = self.pending.lock().await;
        if !pending.is_empty() {
            debug!("dropping {} in-flight request(s)", pending.len());
        }
        // Dropped ack senders reject the waiting callers
        pending.clear();
    }

    /// One full connect attempt: WebSocket handshake, reader/writer tasks,
    /// then the server's `connected` push. Returns a channel that yields
    /// the close reason when this connection later dies.
    async fn open_connection(
        &self,
        credential: &str,
        cancel: &CancellationToken,
    ) -> Result<oneshot::Receiver<String>> {
        let attempt_cancel = cancel.child_token();
        match timeout(
            self.config.connect_timeout,
            self.open_attempt(credential, &attempt_cancel),
        )
        .await
        {
            Ok(Ok(closed_rx)) => Ok(closed_rx),
            Ok(Err(e)) => {
                attempt_cancel.cancel();
                *self.state.write().await = ConnectionState::Disconnected;
                Err(e)
            }
            Err(_) => {
                attempt_cancel.cancel();
                *self.state.write().await = ConnectionState::Disconnected;
                Err(ChatError::Timeout(
                    "no authentication acknowledgment from server".to_string(),
                ))
            }
        }
    }

    async fn open_attempt(
        &self,
        credential: &str,
        cancel: &CancellationToken,
    ) -> Result<oneshot::Receiver<String>> {
        *self.state.write().await = ConnectionState::Connecting;

        // The credential travels twice: query parameter and handshake
        // header, for compatibility across server revisions.
        let url = format!(
            "{}?token={}",
            self.config.server_url,
            urlencoding::encode(credential)
        );
        let mut request = url
            .into_client_request()
            .map_err(|e| ChatError::Connection(format!("invalid server url: {}", e)))?;
        let bearer = format!("Bearer {}", credential);
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|_| ChatError::Connection("credential is not header-safe".to_string()))?,
        );

        debug!("connecting to {}", self.config.server_url);
        let ws = match connect_async(request).await {
            Ok((ws, _response)) => ws,
            Err(WsError::Http(response)) => {
                let status = response.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(ChatError::Auth(format!(
                        "server rejected credential ({})",
                        status
                    )));
                }
                return Err(ChatError::Connection(format!(
                    "http error during handshake: {}",
                    status
                )));
            }
            Err(e) => return Err(ChatError::Connection(e.to_string())),
        };

        *self.state.write().await = ConnectionState::Authenticating;
        let (mut sink, mut stream) = ws.split();

        // Writer: single task owns the sink; everything outbound goes
        // through this channel.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                    msg = out_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = sink.send(msg).await {
                                debug!("writer stopped: {}", e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        // Reader: resolves the authentication ack, routes acks to their
        // waiting requests and pushes to the orchestrator, and reports the
        // close reason when the stream ends.
        let (ready_tx, ready_rx) = oneshot::channel::<Value>();
        let (closed_tx, closed_rx) = oneshot::channel::<String>();
        let pending = Arc::clone(&self.pending);
        let push_tx = self.push_tx.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ready_tx = Some(ready_tx);
            let mut reason = String::from("connection closed");
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => {
                        reason = "cancelled".to_string();
                        break;
                    }
                    frame = stream.next() => {
                        let msg = match frame {
                            Some(Ok(msg)) => msg,
                            Some(Err(e)) => {
                                reason = e.to_string();
                                break;
                            }
                            None => break,
                        };
                        match msg {
                            WsMessage::Text(text) => match ServerFrame::parse(text.as_str()) {
                                Ok(ServerFrame::Ack { ack, data }) => {
                                    match pending.lock().await.remove(&ack) {
                                        Some(tx) => {
                                            let _ = tx.send(data);
                                        }
                                        None => debug!("ack {} arrived after its request timed out", ack),
                                    }
                                }
                                Ok(ServerFrame::Push { event, data }) => match event.as_str() {
                                    "connected" => match ready_tx.take() {
                                        Some(tx) => {
                                            let _ = tx.send(data);
                                        }
                                        None => debug!("duplicate connected push ignored"),
                                    },
                                    "newMessage" => {
                                        let _ = push_tx.send(PushEvent::NewMessage(data));
                                    }
                                    "roomCreated" => {
                                        let _ = push_tx.send(PushEvent::RoomCreated(data));
                                    }
                                    "roomUpdate" => {
                                        let _ = push_tx.send(PushEvent::RoomUpdated(data));
                                    }
                                    "userTyping" => {
                                        let _ = push_tx.send(PushEvent::UserTyping(data));
                                    }
                                    "disconnect" => {
                                        reason = data
                                            .get("reason")
                                            .and_then(Value::as_str)
                                            .unwrap_or("server disconnect")
                                            .to_string();
                                        break;
                                    }
                                    other => debug!("ignoring unknown push event {}", other),
                                },
                                Err(e) => warn!("dropping malformed frame: {}", e),
                            },
                            WsMessage::Close(frame) => {
                                if let Some(frame) = frame {
                                    reason = frame.reason.as_str().to_string();
                                }
                                break;
                            }
                            // tungstenite answers pings on its own
                            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                            other => debug!("ignoring non-text frame: {:?}", other),
                        }
                    }
                }
            }
            let _ = closed_tx.send(reason);
        });

        // The channel only counts as up once the server confirms the
        // credential with its `connected` push.
        match ready_rx.await {
            Ok(ack) => {
                debug!("authentication acknowledged: {}", ack);
                *self.outbound.write().await = Some(out_tx);
                *self.state.write().await = ConnectionState::Connected;
                info!("connected to {}", self.config.server_url);
                Ok(closed_rx)
            }
            Err(_) => {
                // The connection died before the ack; classify by reason.
                let reason = closed_rx
                    .await
                    .unwrap_or_else(|_| "connection closed".to_string());
                if is_auth_failure(&reason) {
                    Err(ChatError::Auth(reason))
                } else {
                    Err(ChatError::Connection(reason))
                }
            }
        }
    }

    /// Watches a live connection and drives reconnection when it drops.
    async fn supervise(
        self: Arc<Self>,
        credential: String,
        mut closed_rx: oneshot::Receiver<String>,
        cancel: CancellationToken,
    ) {
        loop {
            let reason = tokio::select! {
                _ = cancel.cancelled() => return,
                reason = &mut closed_rx => {
                    reason.unwrap_or_else(|_| "connection closed".to_string())
                }
            };
            if cancel.is_cancelled() {
                return;
            }

            self.drop_connection().await;

            if is_auth_failure(&reason) {
                warn!("authentication failure, not retrying: {}", reason);
                self.tokens.clear();
                *self.state.write().await = ConnectionState::Disconnected;
                let _ = self.push_tx.send(PushEvent::AuthRejected { reason });
                return;
            }

            warn!("connection lost ({}), reconnecting", reason);
            match self.reconnect(&credential, &cancel).await {
                Some(rx) => {
                    closed_rx = rx;
                    let _ = self.push_tx.send(PushEvent::Reconnected);
                }
                None => return,
            }
        }
    }

    /// Bounded reconnection: capped exponential delay with jitter, up to
    /// `max_reconnect_attempts`. Signals the terminal state itself and
    /// returns `None` once there is nothing left to try.
    async fn reconnect(
        &self,
        credential: &str,
        cancel: &CancellationToken,
    ) -> Option<oneshot::Receiver<String>> {
        for attempt in 1..=self.config.max_reconnect_attempts {
            let delay = self.backoff_delay(attempt);
            debug!(
                "reconnect attempt {}/{} in {:?}",
                attempt, self.config.max_reconnect_attempts, delay
            );
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.open_connection(credential, cancel).await {
                Ok(rx) => {
                    info!("reconnected after {} attempt(s)", attempt);
                    return Some(rx);
                }
                Err(ChatError::Auth(reason)) => {
                    warn!("authentication failure during reconnect: {}", reason);
                    self.tokens.clear();
                    *self.state.write().await = ConnectionState::Disconnected;
                    let _ = self.push_tx.send(PushEvent::AuthRejected { reason });
                    return None;
                }
                Err(e) => warn!("reconnect attempt {} failed: {}", attempt, e),
            }
        }

        warn!("reconnect attempts exhausted, giving up");
        *self.state.write().await = ConnectionState::Disconnected;
        let _ = self.push_tx.send(PushEvent::Disconnected {
            reason: "reconnect attempts exhausted".to_string(),
        });
        None
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .config
            .reconnect_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.config.reconnect_max_delay);
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..250))
    }

    /// One request/acknowledgment exchange with its own timeout window.
    async fn request(&self, request: Request, window: Duration) -> Result<Value> {
        let ack = self.next_ack.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = ClientFrame {
            request,
            ack: Some(ack),
        };
        let text = frame.to_text()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(ack, tx);

        let sent = match self.outbound.read().await.as_ref() {
            Some(out) => out.send(WsMessage::text(text)).is_ok(),
            None => false,
        };
        if !sent {
            self.pending.lock().await.remove(&ack);
            return Err(ChatError::NotConnected);
        }

        match timeout(window, rx).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(_)) => Err(ChatError::Connection("connection closed".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&ack);
                Err(ChatError::Timeout(format!(
                    "{} timed out",
                    frame.request.event_name()
                )))
            }
        }
    }

    pub async fn get_rooms(&self) -> Result<Vec<ChatRoom>> {
        let ack = self
            .request(Request::GetRooms, self.config.request_timeout)
            .await?;
        Ok(mapper::map_rooms(&ack_data(ack)?))
    }

    pub async fn send_message(&self, room_id: &str, content: &str) -> Result<()> {
        let ack = self
            .request(
                Request::SendMessage {
                    room_id: room_id.to_string(),
                    content: content.to_string(),
                },
                self.config.request_timeout,
            )
            .await?;
        ack_data(ack).map(|_| ())
    }

    pub async fn send_bot_message(
        &self,
        room_id: &str,
        content: &str,
        supplier_id: &str,
    ) -> Result<()> {
        let ack = self
            .request(
                Request::SendMessageToBot {
                    room_id: room_id.to_string(),
                    content: content.to_string(),
                    supplier_id: supplier_id.to_string(),
                },
                self.config.request_timeout,
            )
            .await?;
        ack_data(ack).map(|_| ())
    }

    pub async fn join_room(&self, room_id: &str) -> Result<()> {
        let ack = self
            .request(
                Request::JoinRoom {
                    room_id: room_id.to_string(),
                },
                self.config.request_timeout,
            )
            .await?;
        ack_data(ack).map(|_| ())
    }

    pub async fn leave_room(&self, room_id: &str) -> Result<()> {
        let ack = self
            .request(
                Request::LeaveRoom {
                    room_id: room_id.to_string(),
                },
                self.config.request_timeout,
            )
            .await?;
        ack_data(ack).map(|_| ())
    }

    /// Fetch one history page. A timed-out fetch resolves to an empty page
    /// instead of an error: a chat view with no history is a safe degraded
    /// state, and the next refresh will fill it in.
    pub async fn get_room_messages(
        &self,
        room_id: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<MessagePage> {
        let request = Request::GetRoomMessages {
            room_id: room_id.to_string(),
            limit,
            cursor,
        };
        match self.request(request, self.config.history_timeout).await {
            Ok(ack) => Ok(mapper::map_message_page(&ack)),
            Err(ChatError::Timeout(_)) => {
                warn!("history fetch for {} timed out, serving empty page", room_id);
                Ok(MessagePage::empty())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create_private_room(
        &self,
        target_user_id: &str,
        target_user_type: SenderType,
    ) -> Result<ChatRoom> {
        let ack = self
            .request(
                Request::CreatePrivateRoom {
                    target_user_id: target_user_id.to_string(),
                    target_user_type,
                },
                self.config.request_timeout,
            )
            .await?;
        Ok(mapper::map_room(&ack_data(ack)?))
    }

    pub async fn mark_as_read(&self, room_id: &str) -> Result<()> {
        let ack = self
            .request(
                Request::MarkAsRead {
                    room_id: room_id.to_string(),
                },
                self.config.request_timeout,
            )
            .await?;
        ack_data(ack).map(|_| ())
    }

    /// Advisory typing indicator: fire-and-forget, no acknowledgment.
    pub async fn send_typing(&self, room_id: &str, is_typing: bool) -> Result<()> {
        let frame = ClientFrame {
            request: Request::Typing {
                room_id: room_id.to_string(),
                is_typing,
            },
            ack: None,
        };
        let text = frame.to_text()?;
        match self.outbound.read().await.as_ref() {
            Some(out) if out.send(WsMessage::text(text)).is_ok() => Ok(()),
            _ => Err(ChatError::NotConnected),
        }
    }
}
