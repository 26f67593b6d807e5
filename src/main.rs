//! Diamond Market - background service
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌───────────────────┐    ┌────────────┐
//! │  Config  │───▶│ Postgres │───▶│ Recycling Matcher │───▶│  Platform  │
//! │  (YAML)  │    │ (schema) │    │  (every N secs)   │    │ (gateway)  │
//! └──────────┘    └──────────┘    └───────────────────┘    └────────────┘
//! ```
//!
//! The request-serving tier embeds the library directly; this binary only
//! hosts the matcher.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use diamond_market::config::AppConfig;
use diamond_market::logging::init_logging;
use diamond_market::store::schema::init_schema;
use diamond_market::{HttpSettlementGateway, OrderExecutor, PgMarketStore, RecyclingMatcher};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).with_context(|| format!("loading config for {}", env))?;
    let _log_guard = init_logging(&config);

    tracing::info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        "Starting Diamond Market"
    );

    let postgres_url = config
        .postgres_url
        .as_deref()
        .context("postgres_url is not configured")?;
    let store = PgMarketStore::connect(postgres_url, config.lock_timeout_ms)
        .await
        .context("connecting to Postgres")?;
    store.health_check().await.context("Postgres health check")?;
    init_schema(store.pool())
        .await
        .context("initializing schema")?;
    let store = Arc::new(store);

    let gateway = Arc::new(
        HttpSettlementGateway::new(&config.settlement).context("building settlement client")?,
    );
    let executor = Arc::new(OrderExecutor::new(
        store.clone(),
        gateway.clone(),
        config.market.service_fee_rate,
    ));

    if !config.recycler.enabled {
        tracing::warn!("Recycling matcher disabled, nothing to run");
        return Ok(());
    }

    let matcher = RecyclingMatcher::new(store, gateway, executor, &config.recycler);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move { matcher.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    // the matcher finishes its current cycle first
    let _ = shutdown_tx.send(true);
    worker.await.context("matcher task panicked")?;

    tracing::info!("Diamond Market stopped");
    Ok(())
}
