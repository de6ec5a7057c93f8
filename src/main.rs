//! PDF Form Bridge - Entry point
//!
//! MCP server over stdio. Arguments are directories that PDF paths and
//! output paths are confined to.

use pdf_form_bridge::{run_server, run_server_with_dirs};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the MCP transport, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_form_bridge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting PDF form bridge");

    let resource_dirs: Vec<String> = std::env::args().skip(1).collect();
    if resource_dirs.is_empty() {
        run_server().await
    } else {
        run_server_with_dirs(resource_dirs).await
    }
}
