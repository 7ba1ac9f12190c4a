//! mdquote: synchronous batch quotes over an asynchronous market-data feed.
//!
//! # Commands
//! ```
//! mdquote serve --config <path.yaml>
//! mdquote check --config <path.yaml>
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use mdquote_core::{BatchRegistry, MarketDataSession, QuoteService};
use mdquote_server::{create_router, init_tracing, AppConfig, AppState, ConnectionMode};
use mdquote_ws::WsSession;

const READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(
    name = "mdquote",
    about = "Synchronous batch quotes over a streaming market-data feed",
    long_about = "
mdquote: HTTP service answering GET /quotes/<ric,ric,...> with one snapshot
per item, collected from a WebSocket market-data feed.

ENVIRONMENT VARIABLES:
  CLIENT_ID       OAuth2 client id (rto mode)
  CLIENT_SECRET   OAuth2 client secret (rto mode)
  RUST_LOG        Log filter, overrides the config file
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the feed and serve the HTTP API
    Serve {
        /// Path to the YAML configuration file
        #[arg(short, long, default_value = "mdquote.yaml")]
        config: PathBuf,
        #[arg(long, env = "CLIENT_ID", hide_env_values = true)]
        client_id: Option<String>,
        #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,
    },

    /// Validate a configuration file and exit
    Check {
        #[arg(short, long, default_value = "mdquote.yaml")]
        config: PathBuf,
        #[arg(long, env = "CLIENT_ID", hide_env_values = true)]
        client_id: Option<String>,
        #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,
    },
}

fn load_config(path: &Path, client_id: Option<String>, client_secret: Option<String>) -> Result<AppConfig> {
    let mut cfg = AppConfig::load(path)?;
    cfg.market_data.set_client_credentials(client_id, client_secret);
    cfg.validate()
        .with_context(|| format!("{} failed validation", path.display()))?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, client_id, client_secret } => {
            let cfg = load_config(&config, client_id, client_secret)?;
            serve(cfg).await
        }

        Commands::Check { config, client_id, client_secret } => {
            let cfg = load_config(&config, client_id, client_secret)?;
            let md = &cfg.market_data;
            println!("configuration OK: {}", config.display());
            println!("  mode:     {:?}", md.connection_mode);
            println!("  endpoint: {}", md.endpoint_url());
            println!("  service:  {}", md.service_name);
            if md.apply_view {
                println!("  view:     {:?}", md.view_fids);
            }
            println!("  timeout:  {} ms", md.batch_request_timeout_ms);
            println!("  bind:     {}", cfg.server.bind);
            Ok(())
        }
    }
}

async fn serve(cfg: AppConfig) -> Result<()> {
    init_tracing(&cfg.log);

    let registry = BatchRegistry::new();
    let session = Arc::new(WsSession::connect(cfg.market_data.session_config(), registry.clone())?);
    tracing::info!(
        endpoint = session.endpoint(),
        service = %cfg.market_data.service_name,
        rto = cfg.market_data.connection_mode == ConnectionMode::Rto,
        "market data session starting"
    );
    if !session.wait_ready(READY_TIMEOUT).await {
        tracing::warn!(
            timeout_s = READY_TIMEOUT.as_secs(),
            "login not accepted yet; requests fail with 503 until it is"
        );
    }

    let dyn_session: Arc<dyn MarketDataSession> = session.clone();
    let service = Arc::new(QuoteService::new(
        dyn_session,
        registry,
        cfg.market_data.batch_timeout(),
    ));
    let app = create_router(Arc::new(AppState::new(service)));

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("cannot bind {}", cfg.server.bind))?;
    tracing::info!(bind = %cfg.server.bind, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("shutting down market data session");
    session.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
