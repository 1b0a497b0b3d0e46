/// LobbyLink terminal client - reference consumer of the messaging core
use anyhow::Context;
use colored::*;
use lobbylink_core::{
    ChatClient, ChatRoom, ClientConfig, ClientEvent, LocalPrincipal, MemoryTokenStore, SenderType,
};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing goes to stderr so it never interleaves with the chat view
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let config = ClientConfig::from_args(&args).map_err(|e| anyhow::anyhow!("{}", e))?;

    let token = flag_value(&args, "--token").context("--token <bearer> is required")?;
    let user_id = flag_value(&args, "--user-id").unwrap_or_default();
    let name = flag_value(&args, "--name").unwrap_or_else(|| "anonymous".to_string());
    let email = flag_value(&args, "--email");
    let principal_type = if args.iter().any(|a| a == "--visitor") {
        SenderType::Visitor
    } else {
        SenderType::Employee
    };

    let tokens = Arc::new(MemoryTokenStore::new(token));
    let client = ChatClient::new(config.clone(), tokens);

    println!("{}", "LobbyLink".bright_cyan().bold());
    println!("Connecting to {}...", config.server_url.cyan());

    client
        .on_authenticated(LocalPrincipal {
            id: user_id,
            principal_type,
            name,
            email,
        })
        .await
        .map_err(|e| anyhow::anyhow!("connect failed: {}", e))?;

    println!("{}", "✓ Connected".green().bold());
    print_rooms(&client.rooms().await);
    print_help();

    // Render inbound events as they arrive
    let mut events = client.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => render_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("{}", format!("... skipped {} events", n).dimmed());
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_whitespace().next().unwrap_or_default() {
            "/quit" => break,
            "/rooms" => print_rooms(&client.rooms().await),
            "/open" => {
                let Some(room_id) = line.split_whitespace().nth(1) else {
                    eprintln!("{}", "Usage: /open <room-id>".yellow());
                    continue;
                };
                match client.open_room(room_id).await {
                    Ok(timeline) => {
                        println!(
                            "{}",
                            format!("─── {} ({} messages) ───", room_id, timeline.len()).dimmed()
                        );
                        for message in &timeline {
                            print_message(&message.sender_id, &message.content);
                        }
                    }
                    Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
                }
            }
            "/close" => {
                client.close_room().await;
                println!("{}", "Room closed".dimmed());
            }
            "/read" => match client.current_room().await {
                Some(room) => match client.mark_read(&room.id).await {
                    Ok(()) => println!("{}", "Marked read".dimmed()),
                    Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
                },
                None => eprintln!("{}", "No room open".yellow()),
            },
            "/older" => match client.load_older().await {
                Ok(count) => println!("{}", format!("Loaded {} older messages", count).dimmed()),
                Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
            },
            "/bot" => {
                let mut parts = line.splitn(3, ' ');
                let (_cmd, supplier, text) = (parts.next(), parts.next(), parts.next());
                let (Some(supplier), Some(text)) = (supplier, text) else {
                    eprintln!("{}", "Usage: /bot <supplier-id> <message>".yellow());
                    continue;
                };
                if let Err(e) = client.send_to_bot(text, supplier).await {
                    eprintln!("{} {}", "✗".red().bold(), e);
                }
            }
            "/help" => print_help(),
            _ => {
                if client.current_room().await.is_none() {
                    eprintln!("{}", "No room open - /open <room-id> first".yellow());
                    continue;
                }
                if let Err(e) = client.send(line).await {
                    eprintln!("{} send failed: {}", "✗".red().bold(), e);
                }
            }
        }
    }

    client.on_session_ended().await;
    println!("{}", "Disconnected".dimmed());
    Ok(())
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn print_help() {
    println!("{}", "Commands:".bright_white().bold());
    println!("  {}                list rooms", "/rooms".cyan());
    println!("  {} <room-id>      join a room and load history", "/open".cyan());
    println!("  {}               leave the open room", "/close".cyan());
    println!("  {}                mark the open room read", "/read".cyan());
    println!("  {}               load older history", "/older".cyan());
    println!("  {} <id> <text>     message the supplier bot", "/bot".cyan());
    println!("  {}                exit", "/quit".cyan());
    println!("  anything else is sent to the open room");
}

fn print_rooms(rooms: &[ChatRoom]) {
    if rooms.is_empty() {
        println!("{}", "No rooms".yellow());
        return;
    }
    println!("{}", format!("Rooms ({})", rooms.len()).bright_cyan().bold());
    for room in rooms {
        let preview = room
            .last_message
            .as_ref()
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let unread = if room.unread_count > 0 {
            format!(" [{}]", room.unread_count).green().to_string()
        } else {
            String::new()
        };
        println!(
            "  {} {}{}  {}",
            room.id.cyan(),
            room.name.bright_white(),
            unread,
            preview.dimmed()
        );
    }
}

fn print_message(sender: &str, content: &str) {
    println!("  {} {}", format!("{}:", sender).cyan(), content);
}

fn render_event(event: &ClientEvent) {
    match event {
        ClientEvent::Connected => println!("{}", "✓ Connected".green()),
        ClientEvent::Disconnected { reason } => {
            println!("{} {}", "✗ Disconnected:".red().bold(), reason)
        }
        ClientEvent::AuthRejected => {
            println!("{}", "✗ Session expired - please log in again".red().bold())
        }
        ClientEvent::NewMessage { message } => {
            let sender = message
                .sender
                .as_ref()
                .map(|s| s.name.as_str())
                .filter(|n| !n.is_empty())
                .unwrap_or(message.sender_id.as_str());
            print_message(sender, &message.content);
        }
        ClientEvent::RoomCreated { room } => {
            println!("{} {} ({})", "+ New room:".green(), room.name, room.id.cyan())
        }
        ClientEvent::RoomUpdated { .. } => {}
        ClientEvent::Typing { notice } => {
            if notice.is_typing {
                println!("{}", format!("{} is typing...", notice.user_id).dimmed());
            }
        }
    }
}
