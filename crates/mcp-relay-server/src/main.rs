use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use mcp_relay::{StreamableHttpConfig, StreamableHttpServer, model::Implementation};
use tracing::info;

mod tools;

#[derive(Debug, Parser)]
#[command(name = "mcp-relay-server", version, about = "Tool server speaking streamable HTTP")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
    /// URL path of the protocol endpoint.
    #[arg(long, default_value = "/mcp")]
    path: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = StreamableHttpConfig {
        bind: args.bind,
        path: args.path,
        server_info: Implementation {
            name: "mcp-relay-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
        },
        instructions: Some(
            "Demonstration tools: echo, simulate_emissions, search_directory, convert_document."
                .to_string(),
        ),
        ..Default::default()
    };

    let server = StreamableHttpServer::serve_with_config(tools::registry(), config).await?;
    info!(address = %server.config.bind, path = %server.config.path, "listening");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.shutdown().await;
    Ok(())
}
