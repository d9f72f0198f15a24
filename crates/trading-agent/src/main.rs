use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;

mod api;
mod approval;
mod context;
mod executor;
mod monitor;
mod report;
mod scheduler;
#[cfg(test)]
mod testutil;

use agent_core::config::AgentConfig;
use agent_core::{Broker, ChatChannel};
use angelone_broker::{AngelOneClient, Credentials};
use approval::ApprovalGateway;
use context::AgentContext;
use executor::ExecutionEngine;
use fundamental_analysis::FundamentalsClient;
use instrument_registry::InstrumentRegistry;
use market_data::{IndexSeriesClient, MarketDataEngine, PortfolioValuator, SnapshotStore};
use monitor::PositionMonitor;
use signal_engine::SignalEngine;
use telegram_notifier::{OffsetStore, TelegramNotifier};
use trade_store::TradeStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting equity trading agent");

    // Configuration file holds tunables; secrets come from the environment.
    let config_path =
        std::env::var("AGENT_CONFIG").unwrap_or_else(|_| "config/agent.toml".to_string());
    let config = AgentConfig::load(&config_path)?;
    tracing::info!("Configuration loaded from {config_path}");
    tracing::info!(
        "  Mode: {} | universe cap: {} | min confidence: {:.0}% | max positions: {}",
        if config.simulation.enabled { "simulation" } else { "live" },
        config.filters.max_analysis_universe,
        config.signal.min_confidence_to_notify,
        config.portfolio.max_open_positions
    );

    // Broker client (market data in both modes; orders only in live mode)
    let credentials = Credentials::from_env()?;
    let angel = Arc::new(AngelOneClient::new(credentials)?);
    let broker: Arc<dyn Broker> = angel.clone();

    // Instrument registry: fallback first, then the day's catalog
    let registry = Arc::new(InstrumentRegistry::new(
        config.filters.include_secondary_exchange,
    )?);
    registry.install_fallback();
    if registry.reload().await.is_ok() {
        tracing::info!("Instrument registry ready ({} symbols)", registry.len());
    }

    // Persistence
    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        format!("sqlite://{}/agent.db?mode=rwc", config.data.state_dir)
    });
    std::fs::create_dir_all(&config.data.state_dir)
        .with_context(|| format!("creating state dir {}", config.data.state_dir))?;
    let trade_store = Arc::new(TradeStore::connect(&database_url).await?);
    trade_store.init_tables().await?;
    tracing::info!("Trade store ready at {database_url}");

    // Market data
    let snapshots = Arc::new(SnapshotStore::new());
    let valuator = Arc::new(PortfolioValuator::new(
        broker.clone(),
        config.simulation.enabled,
        config.simulation.virtual_balance,
        config.portfolio.total_value,
    ));
    let market_data = Arc::new(MarketDataEngine::new(
        broker.clone(),
        registry.clone(),
        valuator.clone(),
        snapshots.clone(),
        IndexSeriesClient::new()?,
        config.clone(),
    ));

    // Analysis
    let fundamentals_url = std::env::var("FUNDAMENTALS_PROVIDER_URL")
        .unwrap_or_else(|_| "http://localhost:8001".to_string());
    let fundamentals = Arc::new(FundamentalsClient::new(
        fundamentals_url,
        config.data.fundamental_concurrency,
    )?);
    let signals = Arc::new(SignalEngine::new(fundamentals, config.clone()));

    // Chat channel with persisted update offset
    let offset_store = OffsetStore::new(config.data.state_dir.clone());
    let telegram = Arc::new(TelegramNotifier::from_env(
        config.chat.chat_id,
        offset_store,
    )?);
    if telegram.is_configured() {
        tracing::info!(
            "Chat channel ready (resuming after update {})",
            telegram.last_update_id()
        );
    } else {
        tracing::warn!("TELEGRAM_BOT_TOKEN or chat_id missing; operator channel disabled");
    }
    let chat: Arc<dyn ChatChannel> = telegram;

    // Execution, approval, monitoring
    let executor = Arc::new(ExecutionEngine::new(
        broker.clone(),
        chat.clone(),
        trade_store.clone(),
        config.clone(),
    ));
    let gateway = Arc::new(ApprovalGateway::new(
        chat.clone(),
        trade_store.clone(),
        executor.clone(),
        config.clone(),
    ));
    let monitor = Arc::new(PositionMonitor::new(
        broker.clone(),
        registry.clone(),
        executor.clone(),
        trade_store.clone(),
        chat.clone(),
        config.clone(),
    ));

    let ctx = Arc::new(AgentContext {
        config: config.clone(),
        angel,
        registry,
        market_data,
        snapshots,
        valuator,
        signals,
        trade_store,
        chat,
        gateway,
        monitor,
        last_refresh: RwLock::new(None),
        started_at: Utc::now(),
    });

    startup_checks(&ctx).await?;

    ctx.chat
        .send(&format!(
            "🚀 Trading agent started ({} mode)\nPortfolio: ₹{:.0} | Universe cap: {} | Min confidence: {:.0}%",
            if config.simulation.enabled { "simulation" } else { "live" },
            ctx.valuator.current(),
            config.filters.max_analysis_universe,
            config.signal.min_confidence_to_notify,
        ))
        .await
        .ok();

    // Background loops + HTTP surface, stopped together on SIGINT/SIGTERM
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loops = scheduler::spawn_loops(ctx.clone(), shutdown_rx);

    let app = api::router(ctx.clone());
    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("binding HTTP surface to {}", config.api.bind))?;
    tracing::info!("HTTP surface listening on {}", config.api.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received, stopping loops");
    shutdown_tx.send(true).ok();
    for handle in loops {
        handle.abort();
    }
    ctx.chat
        .send("🛑 Trading agent stopped — graceful shutdown")
        .await
        .ok();
    tracing::info!("Trading agent shut down");
    Ok(())
}

fn init_tracing() {
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Connectivity checks before any loop starts. The database and (in live
/// mode) the broker session are fatal; the chat channel is warn-only.
async fn startup_checks(ctx: &AgentContext) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(ctx.trade_store.pool())
        .await
        .context("database connectivity check failed")?;
    tracing::info!("Startup check: database OK");

    if !ctx.config.simulation.enabled {
        ctx.angel
            .login()
            .await
            .context("broker login check failed")?;
        tracing::info!("Startup check: broker session OK");
    } else {
        tracing::info!("Startup check: broker login deferred (simulation mode)");
    }

    match ctx.chat.send("Agent connectivity check").await {
        Ok(()) => tracing::info!("Startup check: chat channel OK"),
        Err(e) => tracing::warn!("Startup check: chat channel unavailable ({e:#})"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(e) => {
            tracing::error!("Cannot install SIGTERM handler: {e}");
            return std::future::pending().await;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
    }
}
