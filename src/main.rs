use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;

use parley_core::identity::{IdentityProvider, StaticTokenVerifier};
use parley_core::push::PushGateway;
use parley_core::store::ConversationStore;
use parley_push::{HttpPushGateway, NoopPushGateway};
use parley_server::{CoordinatorConfig, ServerConfig};
use parley_store::{Database, SqliteConversationStore};
use parley_telemetry::TelemetryConfig;

/// Real-time conversation and call-signaling coordinator.
#[derive(Parser, Debug)]
#[command(name = "parley", version)]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "PARLEY_PORT", default_value_t = 9440)]
    port: u16,

    /// Path to the conversation database.
    #[arg(long, env = "PARLEY_DB")]
    db: Option<PathBuf>,

    /// Push gateway base URL. Pushes are dropped when unset.
    #[arg(long, env = "PARLEY_PUSH_URL")]
    push_url: Option<String>,

    /// Bearer token for the push gateway.
    #[arg(long, env = "PARLEY_PUSH_TOKEN", hide_env_values = true)]
    push_token: Option<String>,

    /// Token table as `token:user,token:user,...`.
    #[arg(long, env = "PARLEY_TOKENS", hide_env_values = true, default_value = "")]
    tokens: String,

    /// Seconds a call rings before timing out.
    #[arg(long, default_value_t = 45)]
    ring_timeout_secs: u64,

    /// Disable the SQLite warn+ log sink.
    #[arg(long)]
    no_log_db: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = parley_dir();
    let _telemetry = parley_telemetry::init_telemetry(TelemetryConfig {
        log_to_sqlite: !args.no_log_db,
        log_db_path: data_dir.join("logs.db"),
        ..TelemetryConfig::default()
    });

    tracing::info!("starting parley coordinator");

    let db_path = args.db.unwrap_or_else(|| data_dir.join("parley.db"));
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let db = Database::open(&db_path).context("opening conversation database")?;
    tracing::info!(path = %db_path.display(), "database opened");
    let store: Arc<dyn ConversationStore> = Arc::new(SqliteConversationStore::new(db));

    let push: Arc<dyn PushGateway> = match args.push_url {
        Some(url) => {
            let token = SecretString::from(args.push_token.unwrap_or_default());
            Arc::new(HttpPushGateway::new(url, token).context("configuring push gateway")?)
        }
        None => {
            tracing::info!("no push gateway configured, pushes will be dropped");
            Arc::new(NoopPushGateway)
        }
    };

    let verifier = StaticTokenVerifier::from_spec(&args.tokens);
    if verifier.is_empty() {
        tracing::warn!("token table is empty, every connection will be rejected");
    }
    let identity: Arc<dyn IdentityProvider> = Arc::new(verifier);

    let config = ServerConfig {
        port: args.port,
        coordinator: CoordinatorConfig {
            ring_timeout: Duration::from_secs(args.ring_timeout_secs),
            ..CoordinatorConfig::default()
        },
    };
    let handle = parley_server::start(config, store, push, identity)
        .await
        .context("starting server")?;

    tracing::info!(port = handle.port, "parley ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;

    tracing::info!("shutting down");
    Ok(())
}

fn parley_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".parley")
}
