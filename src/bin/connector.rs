//! Connector daemon: runs next to the private target, dials out to
//! the relay server, and forwards relayed requests to the target.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use backhaul::connector::{
    ConnectorConnection, ConnectorOptions, HttpOutbound, HttpTargetHandler,
};

#[derive(Parser)]
#[command(name = "backhaul-connector")]
#[command(about = "Relay connector for a private target", long_about = None)]
struct Args {
    /// Base URL of the relay server, e.g. https://relay.example.com/
    #[arg(short, long)]
    server: Url,

    /// Tenant this connector serves.
    #[arg(short, long)]
    tenant: String,

    /// Base URL of the local target, e.g. http://127.0.0.1:3000/
    #[arg(long)]
    target: Url,

    /// Name reported to the server, for logs and diagnostics.
    #[arg(long, default_value = "connector")]
    name: String,

    /// Largest inline body in bytes; bigger payloads use the body store.
    #[arg(long)]
    binary_size_limit: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backhaul=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!(
        server = %args.server,
        tenant = %args.tenant,
        target = %args.target,
        "backhaul-connector starting"
    );

    let options = ConnectorOptions {
        server_url: args.server.clone(),
        tenant: args.tenant,
        connector_name: args.name,
        binary_size_limit: args.binary_size_limit,
    };
    let handler = Arc::new(HttpTargetHandler::new(args.target));
    let outbound = Arc::new(HttpOutbound::new(args.server));

    let connection = ConnectorConnection::new(options, handler, outbound);
    connection.start().await?;

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received");
    connection.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
