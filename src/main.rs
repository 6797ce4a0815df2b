//! ODDSEDGE — Sports Odds Value Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the SQLite store, and executes one model run for the configured
//! league and market.

use anyhow::Result;
use tracing::{error, info};

use oddsedge::config::AppConfig;
use oddsedge::engine::RunOrchestrator;
use oddsedge::storage::sqlite::SqliteStore;

/// How many of the ranked recommendations to echo in the log.
const TOP_N: usize = 10;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    let request = cfg.run_request();
    info!(
        config = %config_path,
        scope = %request.scope,
        model = request.model.name(),
        run_type = %request.run_type,
        lookback_hours = cfg.run.lookback_hours,
        "ODDSEDGE starting up"
    );

    // -- Store -------------------------------------------------------------

    let database_url = cfg.database_url()?;
    let store = SqliteStore::connect(&database_url, cfg.database.max_connections).await?;
    store.init_schema().await?;

    // -- Run ---------------------------------------------------------------

    let orchestrator = RunOrchestrator::new(store);
    let report = match orchestrator.run(&request).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, scope = %request.scope, "Run aborted");
            return Err(e.into());
        }
    };

    info!("{report}");
    for rec in report.recommendations.iter().take(TOP_N) {
        info!("  {rec}");
    }

    Ok(())
}

/// Initialise the tracing subscriber.
///
/// Uses `RUST_LOG` when set, `oddsedge=info` otherwise. Set
/// `ODDSEDGE_LOG_JSON` for JSON lines.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("oddsedge=info"));

    let json_logging = std::env::var("ODDSEDGE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
