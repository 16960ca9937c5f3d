//! `SetChat` relay server.
//!
//! An axum WebSocket server that rewrites each message per recipient and
//! fans it out to every live connection of that recipient's identity.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5000
//! cargo run --bin setchat-relay
//!
//! # Run on custom address
//! cargo run --bin setchat-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! SETCHAT_RELAY_ADDR=127.0.0.1:8080 cargo run --bin setchat-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use setchat_relay::config::{RelayCliArgs, RelayConfig};
use setchat_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting setchat relay server");

    let state = Arc::new(RelayState::with_config(config.max_frame_size));

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
