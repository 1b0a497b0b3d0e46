/// LobbyLink - Real-time messaging client core
///
/// A client library for the visitor-lobby chat service: it keeps one
/// authenticated WebSocket to the server, reconciles optimistic local sends
/// against server-confirmed events, tracks room membership, and recovers
/// from connection failures. Any front-end can consume it; the `lobby`
/// binary is the reference terminal client.

pub mod auth;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod mapper;
pub mod models;
pub mod protocol;
pub mod session;
pub mod transport;

pub use auth::{MemoryTokenStore, TokenStore};
pub use client::ChatClient;
pub use config::ClientConfig;
pub use error::{ChatError, Result};
pub use models::{
    ChatMessage, ChatRoom, ClientEvent, LocalPrincipal, MessagePage, Participant, RoomType,
    SenderInfo, SenderType, TypingNotice,
};
pub use transport::ConnectionState;
