//! `setchat`: line-oriented client for the `SetChat` relay.
//!
//! Reads commands and messages from stdin and prints conversation updates
//! to stdout. Logs go to a file.
//!
//! ```bash
//! # Connect as alice to the default relay (ws://127.0.0.1:5000/ws)
//! cargo run --bin setchat -- --id alice
//!
//! # Or via environment variables
//! SETCHAT_SERVER=ws://relay.example:5000/ws SETCHAT_ID=alice cargo run --bin setchat
//! ```

use std::io;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use setchat_proto::identity::Identity;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use setchat::app::{App, Outcome};
use setchat::channel::ChannelAdapter;
use setchat::config::{CliArgs, ClientConfig};
use setchat::session::Session;
use setchat::state::LocalState;
use setchat::store::ConversationStore;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&config.log_level, &config.log_file);
    tracing::info!(server = %config.server_url, "setchat starting");

    let saved = match config.state_file.as_deref() {
        Some(path) => LocalState::load(path).await.unwrap_or_else(|e| {
            eprintln!("Warning: {e}; starting with empty state");
            LocalState::default()
        }),
        None => LocalState::default(),
    };
    let identity = config.identity.clone().or(saved.id);

    let store = Arc::new(ConversationStore::from_conversations(
        identity.clone().unwrap_or_else(|| Identity::new("")),
        saved.conversations,
    ));
    let channel = Arc::new(
        ChannelAdapter::with_options(
            &config.server_url,
            config.connect_timeout,
            config.channel_capacity,
        )
        .map_err(io::Error::other)?,
    );

    match identity {
        Some(id) => match channel.set_identity(Some(id.clone())).await {
            Ok(()) => println!("connected as {id}"),
            Err(e) => println!("offline as {id}: {e}"),
        },
        None => println!("no identity set; choose one with /id IDENTITY"),
    }

    let app = App::new(
        Session::new(Arc::clone(&store), Arc::clone(&channel)),
        saved.contacts,
    );
    let dispatch = app.session().spawn_inbound_dispatch();
    let persistence = config
        .state_file
        .clone()
        .map(|path| app.session().spawn_persistence(path, app.subscribe_contacts()));

    let result = run(&app).await;

    if let Some(path) = config.state_file.as_deref() {
        if let Err(e) = app.session().local_state(&app.contacts()).save(path).await {
            tracing::warn!(err = %e, "failed to save local state on exit");
        }
    }
    if let Some(task) = persistence {
        task.abort();
    }
    channel.shutdown().await;
    let _ = dispatch.await;

    tracing::info!("setchat exiting");
    result
}

/// Reads stdin until EOF or `/quit`, printing command output and
/// messages from others as they arrive.
async fn run(app: &App) -> io::Result<()> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut updates = app.session().store().subscribe();
    let mut seen = Arc::clone(&updates.borrow_and_update());

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else { break };
                match app.handle_line(&line).await {
                    Outcome::Continue(lines) => print_lines(&lines),
                    Outcome::Quit => break,
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = Arc::clone(&updates.borrow_and_update());
                print_lines(&app.updates(&seen, &current));
                seen = current;
            }
        }
    }
    Ok(())
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

/// Initialize file-based logging.
///
/// Stdout belongs to the conversation view, so logs go to a file. The
/// returned [`WorkerGuard`] must be held until shutdown to flush buffered
/// entries.
fn init_logging(level: &str, log_path: &Path) -> Option<WorkerGuard> {
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
