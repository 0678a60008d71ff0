//! `TaskShare` hub server.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9400 with two known users
//! cargo run --bin taskshare-hub -- --token alice-secret=alice --token bob-secret=bob
//!
//! # Run on custom address
//! cargo run --bin taskshare-hub -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! TASKSHARE_HUB_ADDR=127.0.0.1:8080 cargo run --bin taskshare-hub
//! ```

use std::sync::Arc;

use clap::Parser;
use taskshare_hub::config::{HubCliArgs, HubConfig};
use taskshare_hub::hub::Hub;
use taskshare_hub::server::{self, HubState};
use taskshare_hub::service::Service;
use taskshare_hub::store::MemoryStore;

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

    let tokens = config.token_table();
    if tokens.is_empty() {
        tracing::warn!("no tokens configured; every connection will be rejected");
    }
    tracing::info!(addr = %config.bind_addr, users = tokens.len(), "starting taskshare hub");

    let hub = Arc::new(Hub::new());
    let service = Service::new(Arc::new(MemoryStore::new()), Arc::clone(&hub));
    let state = Arc::new(HubState::new(service, tokens).with_max_frame_size(config.max_frame_size));

    let handle = match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "hub listening");
            handle
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start hub");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "hub server task failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            hub.shutdown().await;
        }
    }
}
