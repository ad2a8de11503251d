use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use chat_sync::api::client::ApiClient;
use chat_sync::api::models::ConversationId;
use chat_sync::app::AppState;
use chat_sync::sync::{ChatView, Intent, SyncDriver, SyncOutput};
use chat_sync::transport::TransportSession;
use chat_sync::utils::{normalize_url, socket_url};

/// Terminal chat client. Lines are sent as messages; `/join <id>`,
/// `/leave`, `/chats` and `/quit` are commands.
#[derive(Parser, Debug)]
#[command(name = "chat-sync", version)]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    /// Conversation to open on start
    #[arg(long)]
    conversation: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> chat_sync::Result<()> {
    let mut state = match &cli.config {
        Some(path) => AppState::load_from(path)?,
        None => AppState::load(),
    };
    if let Some(base_url) = cli.base_url {
        state.base_url = normalize_url(&base_url);
    }
    if cli.token.is_some() {
        state.token = cli.token;
    }
    state.validate()?;

    let api = Arc::new(ApiClient::new(&state.base_url, state.token.clone()));
    let transport = TransportSession::new(socket_url(&state.base_url)?, state.token.clone());
    let (driver, mut handle) = SyncDriver::new(
        transport,
        Arc::clone(&api),
        state.user(),
        state.typing_window(),
        state.reconnect.clone(),
    );
    let sync_task = tokio::spawn(driver.run());

    if let Some(id) = cli.conversation {
        handle.select(ConversationId::new(id))?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown = 0usize;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if let Some(id) = line.strip_prefix("/join ") {
                    shown = 0;
                    handle.select(ConversationId::new(id.trim()))?;
                } else if line == "/leave" {
                    handle.intent(Intent::Leave)?;
                } else if line == "/chats" {
                    print_chats(&api).await;
                } else if line == "/quit" {
                    break;
                } else if !line.is_empty() {
                    handle.send_text(line)?;
                }
            }
            changed = handle.view.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = handle.view.borrow_and_update().clone();
                shown = render(&view, shown);
            }
            Some(output) = handle.outputs.recv() => match output {
                SyncOutput::Notice(notice) => println!("! {}: {}", notice.title, notice.description),
                SyncOutput::RefreshChats => print_chats(&api).await,
                SyncOutput::SendRejected(reason) => println!("! not sent: {}", reason),
            },
        }
    }

    let _ = handle.shutdown();
    match sync_task.await {
        Ok(result) => result,
        Err(e) => {
            log::warn!("sync task ended abnormally: {}", e);
            Ok(())
        }
    }
}

fn render(view: &ChatView, shown: usize) -> usize {
    let shown = shown.min(view.messages.len());
    for msg in &view.messages[shown..] {
        let marker = if msg.is_pending() { "*" } else { " " };
        println!("{} [{}] {}: {}", marker, msg.created_at.format("%H:%M"), msg.sender_id, msg.body);
    }
    if view.peer_typing {
        println!("  (typing...)");
    }
    view.messages.len()
}

async fn print_chats(api: &ApiClient) {
    match api.conversations().await {
        Ok(chats) => {
            for chat in chats {
                println!("# {} {}", chat.id, chat.name);
            }
        }
        Err(e) => println!("! could not load chats: {}", e),
    }
}
