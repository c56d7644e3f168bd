//! Relay edge server.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────┐
//!                      │                 RELAY SERVER                   │
//!                      │                                                │
//!  Client Request      │  ┌─────────┐   ┌──────────────┐   ┌────────┐  │
//!  ────────────────────┼─▶│ ingress │──▶│   request    │──▶│  hub   │──┼──▶ Connector
//!                      │  │pipeline │   │ coordinator  │   │session │  │    (WebSocket,
//!                      │  └────▲────┘   └──────────────┘   └────────┘  │     dialled out
//!                      │       │                                       │     from target)
//!                      │  ┌────┴─────┐   ┌──────────────┐              │
//!  Client Response     │  │ response │◀──│    broker    │◀─────────────┼──── Connector
//!  ◀───────────────────┼──│  waiter  │   │  consumers   │   /_relay    │     return path
//!                      │  └──────────┘   └──────────────┘   endpoints  │     (HTTP)
//!                      │                                                │
//!                      │  config · tenants · body store · metrics      │
//!                      └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backhaul::config::loader::load_config;
use backhaul::config::RelayConfig;
use backhaul::ingress::Interceptors;
use backhaul::protocol::TenantId;
use backhaul::store::FsBodyStore;
use backhaul::tenant::{InMemoryTenantRegistry, Tenant};
use backhaul::{RelayApp, Shutdown};

#[derive(Parser)]
#[command(name = "backhaul")]
#[command(about = "Reverse HTTP relay edge server", long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };

    // RUST_LOG wins; otherwise the configured filter applies.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(&config.observability.log_level)
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("backhaul v0.1.0 starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        tenants = config.tenants.len(),
        max_inline_body_bytes = config.relay.max_inline_body_bytes,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            backhaul::observability::metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let tenants = Arc::new(InMemoryTenantRegistry::new(config.tenants.iter().map(
        |entry| Tenant {
            id: TenantId::new(),
            name: entry.name.clone(),
            config: entry.tenant_config(),
        },
    )));

    let store = FsBodyStore::open(&config.relay.body_store_path).await?;
    let app = RelayApp::new(store, config.relay_settings());
    tracing::info!(origin_id = %app.origin_id, "origin bound");

    let shutdown = Shutdown::new();
    let consumers = app.spawn_consumers(shutdown.token());

    let router = app.router(tenants, Arc::new(Interceptors::new()));
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let signal_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
            tracing::info!("Shutdown signal received");
            signal_shutdown.trigger();
        })
        .await?;

    shutdown.trigger();
    let _ = consumers.await;
    tracing::info!("Shutdown complete");
    Ok(())
}
