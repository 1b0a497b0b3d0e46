/// In-process chat server speaking the wire protocol, for integration
/// tests. Connections are served one at a time so reconnect sequences are
/// observable; pushes injected through the handle go to the live
/// connection.
use futures_util::{SinkExt, StreamExt};
use lobbylink_core::ClientConfig;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone)]
pub struct ServerBehavior {
    /// Push the `connected` acknowledgment after the WebSocket handshake
    pub send_connected: bool,
    /// Close every connection immediately with this reason
    pub reject_reason: Option<String>,
    /// Events to swallow without acknowledging (timeout simulation)
    pub silent_events: Vec<String>,
    /// Events acknowledged with `success: false`
    pub fail_events: Vec<String>,
    /// `getRooms` listing (rooms created during the test are appended)
    pub rooms: Vec<Value>,
    /// `getRoomMessages` first-page contents
    pub history: Vec<Value>,
    /// Page served when a cursor is supplied; its presence makes the first
    /// page report `hasMore`
    pub older_history: Vec<Value>,
    /// Refuse further connections after this many have been served
    pub max_connections: Option<usize>,
}

impl Default for ServerBehavior {
    fn default() -> Self {
        Self {
            send_connected: true,
            reject_reason: None,
            silent_events: Vec::new(),
            fail_events: Vec::new(),
            rooms: Vec::new(),
            history: Vec::new(),
            older_history: Vec::new(),
            max_connections: None,
        }
    }
}

pub struct TestServer {
    pub url: String,
    inject: mpsc::UnboundedSender<Value>,
    seen: Mutex<mpsc::UnboundedReceiver<Value>>,
    connections: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn spawn(behavior: ServerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<Value>();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel::<Value>();
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&connections);
        tokio::spawn(async move {
            let mut served = 0usize;
            let mut created_rooms: Vec<Value> = Vec::new();
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                if let Some(max) = behavior.max_connections {
                    if served >= max {
                        drop(stream);
                        continue;
                    }
                }
                served += 1;
                counter.fetch_add(1, Ordering::SeqCst);
                serve_connection(stream, &behavior, &mut created_rooms, &mut inject_rx, &seen_tx)
                    .await;
            }
        });

        Self {
            url: format!("ws://{}/chat", addr),
            inject: inject_tx,
            seen: Mutex::new(seen_rx),
            connections,
        }
    }

    /// Send a raw push frame to the currently connected client
    pub fn push(&self, frame: Value) {
        let _ = self.inject.send(frame);
    }

    pub fn push_message(&self, data: Value) {
        self.push(json!({"event": "newMessage", "data": data}));
    }

    /// Close the live connection with the given reason
    pub fn kill_current(&self, reason: &str) {
        let _ = self.inject.send(json!({"__close": reason}));
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Drain the frames received so far and count those with this event
    pub async fn count_seen(&self, event: &str) -> usize {
        self.frames_seen(event).await.len()
    }

    /// Drain the frames received so far and return those with this event
    pub async fn frames_seen(&self, event: &str) -> Vec<Value> {
        let mut seen = self.seen.lock().await;
        let mut frames = Vec::new();
        while let Ok(frame) = seen.try_recv() {
            if frame["event"].as_str() == Some(event) {
                frames.push(frame);
            }
        }
        frames
    }
}

async fn serve_connection(
    stream: TcpStream,
    behavior: &ServerBehavior,
    created_rooms: &mut Vec<Value>,
    inject_rx: &mut mpsc::UnboundedReceiver<Value>,
    seen_tx: &mpsc::UnboundedSender<Value>,
) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    if let Some(reason) = &behavior.reject_reason {
        let _ = ws
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: reason.clone().into(),
            })))
            .await;
        return;
    }

    if behavior.send_connected {
        let frame = json!({"event": "connected", "data": {"userId": "emp-1"}});
        if ws.send(Message::text(frame.to_string())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            injected = inject_rx.recv() => {
                let Some(frame) = injected else { return };
                if let Some(reason) = frame.get("__close").and_then(Value::as_str) {
                    let _ = ws
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Away,
                            reason: reason.to_string().into(),
                        })))
                        .await;
                    return;
                }
                if ws.send(Message::text(frame.to_string())).await.is_err() {
                    return;
                }
            }
            frame = ws.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    _ => return,
                };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => return,
                    _ => continue,
                };
                let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                let _ = seen_tx.send(value.clone());

                let event = value["event"].as_str().unwrap_or_default().to_string();
                if behavior.silent_events.iter().any(|e| e == &event) {
                    continue;
                }
                // Advisories carry no ack id and get no reply
                let Some(ack) = value["ack"].as_u64() else { continue };
                let data = ack_payload(behavior, created_rooms, &event, &value["data"]);
                let reply = json!({"ack": ack, "data": data});
                if ws.send(Message::text(reply.to_string())).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn ack_payload(
    behavior: &ServerBehavior,
    created_rooms: &mut Vec<Value>,
    event: &str,
    data: &Value,
) -> Value {
    if behavior.fail_events.iter().any(|e| e == event) {
        return json!({"success": false, "error": "rejected by test server"});
    }
    match event {
        "getRooms" => {
            let mut listing = behavior.rooms.clone();
            listing.extend(created_rooms.iter().cloned());
            json!({"success": true, "data": listing})
        }
        "getRoomMessages" => {
            if data.get("cursor").and_then(Value::as_str).is_some() {
                json!({
                    "messages": behavior.older_history,
                    "hasMore": false,
                    "nextCursor": null
                })
            } else {
                let has_more = !behavior.older_history.is_empty();
                json!({
                    "messages": behavior.history,
                    "hasMore": has_more,
                    "nextCursor": if has_more { json!("cursor-1") } else { json!(null) }
                })
            }
        }
        "createPrivateRoom" => {
            let room = json!({
                "id": format!("room-created-{}", created_rooms.len() + 1),
                "name": "Private",
                "roomType": "private",
                "participants": [
                    {"id": "emp-1", "type": "employee"},
                    {"id": data["targetUserId"], "type": data["targetUserType"]}
                ]
            });
            created_rooms.push(room.clone());
            json!({"success": true, "data": room})
        }
        "sendMessageToBot" => json!({"status": "queued"}),
        _ => json!({"success": true}),
    }
}

/// Client config with test-sized timeouts
pub fn test_config(url: &str) -> ClientConfig {
    ClientConfig {
        server_url: url.to_string(),
        connect_timeout: Duration::from_millis(1500),
        request_timeout: Duration::from_millis(500),
        history_timeout: Duration::from_millis(400),
        reconnect_base_delay: Duration::from_millis(40),
        reconnect_max_delay: Duration::from_millis(120),
        max_reconnect_attempts: 3,
        refresh_delay: Duration::from_millis(80),
        history_page_size: 50,
    }
}

pub fn room_json(id: &str, name: &str, participants: &[(&str, &str)]) -> Value {
    json!({
        "id": id,
        "name": name,
        "roomType": if participants.len() == 2 { "private" } else { "group" },
        "createdAt": "2026-01-10T08:00:00Z",
        "updatedAt": "2026-01-10T08:00:00Z",
        "unreadCount": 0,
        "participants": participants
            .iter()
            .map(|(id, kind)| json!({"id": id, "type": kind}))
            .collect::<Vec<_>>()
    })
}

pub fn message_json(id: &str, room_id: &str, content: &str, sender_id: &str) -> Value {
    json!({
        "id": id,
        "roomId": room_id,
        "content": content,
        "senderId": sender_id,
        "senderType": "employee",
        "createdAt": "2026-01-10T09:00:00Z"
    })
}

/// Poll until the condition holds or a couple of seconds pass
pub async fn eventually<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached: {}", what);
}
