// deepscope-server entry point
//
// Validates configuration, initializes stderr logging, and serves the
// JSON-RPC tool surface over stdin/stdout. stdout is reserved for
// protocol traffic; everything diagnostic goes to stderr.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deepscope_gemini::GeminiChatClient;
use deepscope_server::{serve, Gateway};

#[tokio::main]
async fn main() -> Result<()> {
    // DEBUG=1 turns on verbose diagnostics; RUST_LOG still wins if set.
    let default_filter = if std::env::var("DEBUG").is_ok() {
        "deepscope_server=debug,deepscope_core=debug,deepscope_gemini=debug"
    } else {
        "deepscope_server=info,deepscope_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let client = GeminiChatClient::from_env()
        .context("GEMINI_API_KEY environment variable is required")?;
    tracing::info!(model = client.model(), "gemini client configured");

    let project_root = match std::env::var("PROJECT_ROOT") {
        Ok(root) => std::path::PathBuf::from(root),
        Err(_) => std::env::current_dir().context("cannot determine working directory")?,
    };
    tracing::info!(project_root = %project_root.display(), "deepscope-server starting");

    let gateway = Arc::new(
        Gateway::new(Arc::new(client), project_root).context("failed to wire the gateway")?,
    );
    serve(gateway).await
}
