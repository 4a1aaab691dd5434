mod analyzer;
mod api;
mod collector;
mod config;
mod dates;
mod db;
mod error;
mod fetcher;
mod scorer;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::repo;
use crate::error::Result;
use crate::fetcher::{GoogleTrendsClient, ItunesClient};
use crate::state::TaskStore;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::open(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let interrupted = repo::fail_interrupted_tasks(&pool).await?;
    if interrupted > 0 {
        warn!(interrupted, "tasks from a previous run were left unfinished and marked as failed");
    }

    // --- Upstream clients ---
    let itunes = ItunesClient::new(&cfg)?;
    let trends = GoogleTrendsClient::new(&cfg)?;
    info!(
        itunes = %cfg.itunes_api_url,
        trends = %cfg.trends_api_url,
        country = %cfg.scrape_country,
        delay_ms = cfg.scrape_delay_ms,
        "upstream sources configured"
    );
    info!(
        weights = ?cfg.scoring.weights,
        min_score = cfg.scoring.thresholds.min_score,
        min_reviews = cfg.scoring.thresholds.min_reviews,
        "scoring configuration loaded"
    );

    // --- HTTP API server ---
    let api_state = ApiState {
        pool,
        tasks: TaskStore::new(),
        scoring: Arc::new(RwLock::new(cfg.scoring)),
        apps: Arc::new(itunes),
        trends: Arc::new(trends),
        health: Arc::new(HealthState::new()),
        latency: Arc::new(LatencyStats::new()),
        request_delay: Duration::from_millis(cfg.scrape_delay_ms),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
