/// Client configuration
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_HISTORY_PAGE_SIZE: u32 = 50;

/// Messaging client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint of the chat server (ws:// or wss://)
    pub server_url: String,

    /// Window for the full connect handshake, including the server's
    /// authentication acknowledgment
    pub connect_timeout: Duration,

    /// Acknowledgment window for ordinary request/ack operations
    pub request_timeout: Duration,

    /// Acknowledgment window for message-history fetches (history pages can
    /// be large, so this is wider than `request_timeout`)
    pub history_timeout: Duration,

    /// First reconnect delay; doubles per attempt up to `reconnect_max_delay`
    pub reconnect_base_delay: Duration,

    /// Upper bound on the delay between reconnect attempts
    pub reconnect_max_delay: Duration,

    /// Reconnect attempts before giving up and reporting a terminal
    /// disconnect
    pub max_reconnect_attempts: u32,

    /// Delay before the room-list refresh that follows a room creation
    pub refresh_delay: Duration,

    /// Messages fetched per history page
    pub history_page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8085/chat".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            history_timeout: Duration::from_secs(15),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            refresh_delay: Duration::from_millis(500),
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Create config from command line arguments.
    ///
    /// Identity flags (`--token`, `--user-id`, `--name`, `--email`,
    /// `--visitor`) belong to the caller; they are skipped here together
    /// with their values.
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            return Err(ChatError::Config(format!(
                "Usage: {} <server-url> --token <bearer> [--user-id <id>] [--name <name>] [--email <email>] [--visitor] [--history-page <n>] [--connect-timeout-ms <n>] [--request-timeout-ms <n>] [--history-timeout-ms <n>]",
                args.first().map(String::as_str).unwrap_or("lobby")
            )));
        }

        let mut server_url: Option<String> = None;
        let mut connect_timeout_ms: Option<u64> = None;
        let mut request_timeout_ms: Option<u64> = None;
        let mut history_timeout_ms: Option<u64> = None;
        let mut history_page: Option<u32> = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--connect-timeout-ms" => {
                    connect_timeout_ms = Some(parse_flag_value(args, i, "--connect-timeout-ms")?);
                    i += 2;
                }
                "--request-timeout-ms" => {
                    request_timeout_ms = Some(parse_flag_value(args, i, "--request-timeout-ms")?);
                    i += 2;
                }
                "--history-timeout-ms" => {
                    history_timeout_ms = Some(parse_flag_value(args, i, "--history-timeout-ms")?);
                    i += 2;
                }
                "--history-page" => {
                    history_page = Some(parse_flag_value(args, i, "--history-page")?);
                    i += 2;
                }
                // Identity flags handled by the binary itself
                "--token" | "--user-id" | "--name" | "--email" => {
                    i += 2;
                }
                "--visitor" => {
                    i += 1;
                }
                other if !other.starts_with("--") => {
                    if server_url.is_some() {
                        return Err(ChatError::Config(format!(
                            "Unexpected argument: {}",
                            other
                        )));
                    }
                    server_url = Some(other.to_string());
                    i += 1;
                }
                other => {
                    return Err(ChatError::Config(format!("Unknown flag: {}", other)));
                }
            }
        }

        // Env override (nice for scripts)
        if let Ok(url) = std::env::var("LOBBYLINK_SERVER_URL") {
            server_url = Some(url);
        }

        let server_url =
            server_url.ok_or_else(|| ChatError::Config("A server URL is required".to_string()))?;
        if !server_url.starts_with("ws://") && !server_url.starts_with("wss://") {
            return Err(ChatError::Config(
                "Server URL must start with ws:// or wss://".to_string(),
            ));
        }

        let defaults = Self::default();
        Ok(Self {
            server_url,
            connect_timeout: connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            history_timeout: history_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.history_timeout),
            history_page_size: history_page.unwrap_or(defaults.history_page_size),
            ..defaults
        })
    }
}

fn parse_flag_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T> {
    args.get(i + 1)
        .ok_or_else(|| ChatError::Config(format!("{} requires a value", flag)))?
        .parse::<T>()
        .map_err(|_| ChatError::Config(format!("{} must be a valid number", flag)))
}
