//! `WireChat`: line-mode chat client.
//!
//! Signs in to the chat server, then reads commands and messages from stdin
//! while printing timeline changes as they arrive. Configuration via CLI
//! flags, environment variables, or config file
//! (`~/.config/wirechat/config.toml`).
//!
//! ```bash
//! cargo run --bin wirechat -- --host 127.0.0.1 --user-id 5 --peer 9
//!
//! # Token sign-in; the user id is looked up from the server
//! WIRECHAT_TOKEN=secret cargo run --bin wirechat -- --host chat.example.com --secure
//! ```

use std::io;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use wirechat::api::RestClient;
use wirechat::app::{self, Command};
use wirechat::chat::DeliveryState;
use wirechat::config::{CliArgs, ClientConfig};
use wirechat::session::{SessionCoordinator, SessionUpdate};
use wirechat::transport::websocket::WsConnector;
use wirechat_proto::message::UserId;

type Session = SessionCoordinator<WsConnector>;

enum Input {
    Line(Option<String>),
    Update(Option<SessionUpdate>),
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::from_cli(&cli)
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("wirechat starting");

    let Some(identity) = config.identity() else {
        eprintln!("No identity configured: pass --token or --user-id.");
        return Ok(());
    };

    let api = RestClient::for_endpoint(&config.endpoint, config.token.clone())
        .map_err(io::Error::other)?;
    let mut session = SessionCoordinator::new(
        Arc::new(WsConnector::new()),
        config.endpoint.clone(),
        config.reconnect.clone(),
    )
    .with_history_limit(config.history_limit);

    session.sign_in(identity).map_err(io::Error::other)?;
    if session.local_user().is_none() {
        match session.resolve_local_user(&api).await {
            Ok(me) => println!("-- signed in as {me}"),
            Err(e) => println!("-- could not look up your user id ({e}); sending is disabled"),
        }
    }
    if let Some(peer) = config.peer {
        switch_peer(&mut session, &api, peer, &config.timestamp_format).await;
    }

    let result = run(&mut session, &api, &config).await;

    session.sign_out();
    tracing::info!("wirechat exiting");
    result
}

/// Initialize file-based logging.
///
/// Logs go to a file so they never interleave with the chat on stdout.
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("wirechat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Multiplex stdin and session updates until `/quit` or end of input.
async fn run(session: &mut Session, api: &RestClient, config: &ClientConfig) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let time_format = config.timestamp_format.as_str();

    loop {
        let input = tokio::select! {
            line = lines.next_line() => Input::Line(line?),
            update = session.next_update() => Input::Update(update),
        };

        match input {
            Input::Line(None) | Input::Update(None) => return Ok(()),
            Input::Line(Some(line)) => match app::parse_command(&line) {
                Ok(None) => {}
                Ok(Some(Command::Quit)) => return Ok(()),
                Ok(Some(command)) => handle_command(session, api, command, time_format).await,
                Err(e) => println!("-- {e}"),
            },
            Input::Update(Some(update)) => show_update(session, &update, time_format),
        }
    }
}

async fn handle_command(
    session: &mut Session,
    api: &RestClient,
    command: Command,
    time_format: &str,
) {
    match command {
        Command::Users => {
            for line in app::render_users(&session.list_peers(api).await) {
                println!("{line}");
            }
        }
        Command::Peer(peer) => switch_peer(session, api, peer, time_format).await,
        Command::History => match session.refresh_history(api).await {
            Ok(_) => print_timeline(session, time_format),
            Err(e) => println!("-- {e}"),
        },
        Command::Chats => {
            let peers = session.conversations();
            for line in app::render_conversations(&peers, session.selected_peer()) {
                println!("{line}");
            }
        }
        Command::Forget => match session.selected_peer() {
            Some(peer) => match session.forget_peer(peer) {
                Ok(true) => println!("-- dropped local copy of {peer}; /history reloads it"),
                Ok(false) => println!("-- nothing stored for {peer}"),
                Err(e) => println!("-- {e}"),
            },
            None => println!("-- no peer selected"),
        },
        Command::Status => {
            let pending = session.connection().map_or(0, |s| s.pending);
            println!(
                "{}",
                app::render_status(session.status(), session.selected_peer(), pending)
            );
        }
        Command::Help => println!("{}", app::HELP),
        Command::Send(body) => match session.send(&body) {
            Ok(message) => {
                let state = session
                    .store()
                    .map_or(DeliveryState::Pending, |s| s.delivery_state(&message));
                println!(
                    "{}",
                    app::render_entry(&message, state, session.local_user(), &now(time_format))
                );
            }
            Err(e) => println!("-- {e}"),
        },
        Command::Quit => {}
    }
}

async fn switch_peer(session: &mut Session, api: &RestClient, peer: UserId, time_format: &str) {
    session.select_peer(peer);
    println!("-- talking to {peer}");
    if let Err(e) = session.refresh_history(api).await {
        println!("-- {e}");
    }
    print_timeline(session, time_format);
}

fn show_update(session: &Session, update: &SessionUpdate, time_format: &str) {
    if let Some(notice) = app::render_update(update) {
        println!("{notice}");
        return;
    }
    if let SessionUpdate::Message {
        peer: Some(peer),
        applied,
    } = update
    {
        if !applied.changed() {
            return;
        }
        if Some(*peer) != session.selected_peer() {
            println!("-- new message from {peer}");
            return;
        }
        if let Some((message, state)) = session.timeline().last() {
            println!(
                "{}",
                app::render_entry(message, *state, session.local_user(), &now(time_format))
            );
        }
    }
}

fn print_timeline(session: &Session, time_format: &str) {
    for line in app::render_timeline(&session.timeline(), session.local_user(), &now(time_format)) {
        println!("{line}");
    }
}

fn now(format: &str) -> String {
    chrono::Local::now().format(format).to_string()
}
