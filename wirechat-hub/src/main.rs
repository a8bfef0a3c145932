//! `WireChat` hub: a small chat server for local development.
//!
//! ```bash
//! # Default address 0.0.0.0:8080
//! cargo run --bin wirechat-hub
//!
//! # Custom address
//! cargo run --bin wirechat-hub -- --bind 127.0.0.1:9001
//! ```

use std::sync::Arc;

use clap::Parser;
use wirechat_hub::config::{HubCliArgs, HubConfig};
use wirechat_hub::hub::{self, HubState};

#[tokio::main]
async fn main() {
    let cli = HubCliArgs::parse();

    let config = match HubConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let state = Arc::new(HubState::with_config(config.max_frame_size));
    for user in &config.users {
        state.directory.add_user(user.id, user.name.as_str()).await;
        let token = match &user.token {
            Some(token) => {
                state.directory.grant_token(user.id, token.as_str()).await;
                token.clone()
            }
            None => state.directory.issue_token(user.id).await,
        };
        tracing::info!(user = %user.id, name = %user.name, %token, "user ready");
    }

    tracing::info!(addr = %config.bind_addr, "starting wirechat hub");
    match hub::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "hub listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "hub task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start hub");
            std::process::exit(1);
        }
    }
}
