use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::prelude::*;

use agent_session::config::default_config_path;
use agent_session::{
    ChannelEvent, ClientConfig, ConnectionState, Message, SessionChannelClient, SessionId,
    SessionService, Timeline, TimelineChange, Topic,
};

#[derive(Parser, Debug)]
#[command(name = "agent-session", about = "Chat with an agent session from the terminal")]
struct Args {
    /// Config file (default: <config dir>/agent-session/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Resume an existing session instead of creating one
    #[arg(long)]
    session: Option<String>,

    /// User id to attach to a newly created session
    #[arg(long)]
    user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("agent_session=info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_path = args.config.clone().or_else(default_config_path);
    let config =
        ClientConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    let service = SessionService::new(&config);

    let timeline = Arc::new(Mutex::new(Timeline::new()));
    let session_id = match args.session {
        Some(id) => {
            let session_id = SessionId::new(id);
            let page = service
                .get_history(&session_id, config.history_limit)
                .await
                .context("Failed to load session history")?;
            info!(%session_id, loaded = page.messages.len(), total = page.total_count, "resuming session");
            render(
                &timeline,
                &ChannelEvent::MessageHistory {
                    messages: page.messages,
                    total_count: Some(page.total_count),
                },
            );
            session_id
        }
        None => {
            service
                .create_session(args.user.as_deref())
                .await
                .context("Failed to create session")?
                .session_id
        }
    };
    info!(%session_id, ws = %config.ws_url(&session_id), "starting session");
    println!("[session {session_id}]  /history /ping /status /agents /providers /stats /delete /quit");

    let client = SessionChannelClient::new(session_id.clone(), &config);
    let view = timeline.clone();
    client.on_message(Topic::Any, move |event| render(&view, event));

    let mut state = client.watch_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            if current == ConnectionState::Closed {
                eprintln!("[connection closed]");
            }
        }
    });

    client
        .connect()
        .await
        .context("Failed to connect session channel")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/history" => {
                // Failures are rendered through the error handler.
                let _ = client.request_history();
            }
            "/ping" => client.ping(),
            "/status" => {
                let metrics = client.metrics();
                println!(
                    "[{:?}] opened={} reconnects={} in={} out={} malformed={}",
                    client.state(),
                    metrics.connections_opened,
                    metrics.reconnect_attempts,
                    metrics.frames_received,
                    metrics.frames_sent,
                    metrics.malformed_frames,
                );
            }
            "/agents" => match service.list_agents().await {
                Ok(overview) => println!("[agents] {}", overview.available_agents.join(", ")),
                Err(e) => eprintln!("[error] {e}"),
            },
            "/providers" => match service.llm_providers().await {
                Ok(providers) => println!("[providers] {}", providers.available.join(", ")),
                Err(e) => eprintln!("[error] {e}"),
            },
            "/stats" => match service.stats().await {
                Ok(stats) => println!(
                    "[stats] sessions={} active={} agents={} providers={}",
                    stats.session_count,
                    stats.active_sessions,
                    stats.available_agents,
                    stats.available_llm_providers,
                ),
                Err(e) => eprintln!("[error] {e}"),
            },
            "/delete" => {
                client.disconnect().await;
                service
                    .delete_session(&session_id)
                    .await
                    .context("Failed to delete session")?;
                println!("[session {session_id} deleted]");
                return Ok(());
            }
            text => {
                let _ = client.send(text, None);
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

fn render(timeline: &Mutex<Timeline>, event: &ChannelEvent) {
    let mut timeline = timeline.lock().unwrap_or_else(PoisonError::into_inner);
    match (timeline.apply(event), event) {
        (TimelineChange::Replaced, _) => {
            println!("--- history: {} message(s) ---", timeline.len());
            for message in timeline.messages() {
                print_message(message);
            }
        }
        (
            TimelineChange::Appended,
            ChannelEvent::Message { message } | ChannelEvent::MessageReceived { message },
        ) => print_message(message),
        (TimelineChange::Status, ChannelEvent::Typing { .. }) => {
            println!("[{} ...]", timeline.typing().unwrap_or("agent"));
        }
        (TimelineChange::Status, ChannelEvent::Error { error, .. }) => {
            eprintln!("[error] {error}");
        }
        (_, ChannelEvent::ConnectionEstablished { message, .. }) => {
            println!("[{}]", message.as_deref().unwrap_or("connected"));
        }
        (_, ChannelEvent::Pong) => println!("[pong]"),
        _ => {}
    }
}

fn print_message(message: &Message) {
    match &message.agent_name {
        Some(agent) => println!("{} ({agent}): {}", message.kind, message.content),
        None => println!("{}: {}", message.kind, message.content),
    }
}
