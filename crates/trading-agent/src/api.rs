use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::context::AgentContext;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn internal(e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

/// Dashboard-facing HTTP surface, served in-process so it can read the live
/// snapshot store and pending map.
pub fn router(ctx: Arc<AgentContext>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/positions", get(positions))
        .route("/api/signals/pending", get(pending_signals))
        .route("/api/signals/history", get(signal_history))
        .route("/api/performance", get(performance))
        .route("/api/analyse/:symbol", get(analyse_symbol))
        .route("/api/telegram/test", post(telegram_test))
        .route("/api/broker/login", post(broker_login))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

async fn status(State(ctx): State<Arc<AgentContext>>) -> ApiResult {
    let macro_snapshot = ctx.snapshots.macro_snapshot();
    let open_positions = ctx
        .trade_store
        .open_positions()
        .await
        .map_err(internal)?
        .len();
    let refresh = ctx.last_refresh_outcome();

    Ok(Json(json!({
        "mode": if ctx.config.simulation.enabled { "simulation" } else { "live" },
        "started_at": ctx.started_at.to_rfc3339(),
        "regime": macro_snapshot.regime.name(),
        "vix": macro_snapshot.vix,
        "new_buys_suppressed": macro_snapshot.new_buys_suppressed,
        "snapshots": ctx.snapshots.len(),
        "last_refresh_at": ctx.snapshots.last_refresh().map(|t| t.to_rfc3339()),
        "last_refresh_partial": refresh.map(|o| o.partial),
        "registry_symbols": ctx.registry.len(),
        "pending_signals": ctx.gateway.pending_count(),
        "open_positions": open_positions,
        "portfolio_value": ctx.valuator.current(),
    })))
}

async fn positions(State(ctx): State<Arc<AgentContext>>) -> ApiResult {
    let positions = ctx.trade_store.all_positions().await.map_err(internal)?;
    Ok(Json(json!({ "positions": positions })))
}

async fn pending_signals(State(ctx): State<Arc<AgentContext>>) -> ApiResult {
    Ok(Json(json!({ "pending": ctx.gateway.pending_proposals() })))
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_days")]
    days: i64,
}

fn default_history_days() -> i64 {
    7
}

async fn signal_history(
    State(ctx): State<Arc<AgentContext>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(query.days.clamp(1, 365));
    let records = ctx
        .trade_store
        .records_since(cutoff)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "days": query.days, "signals": records })))
}

async fn performance(State(ctx): State<Arc<AgentContext>>) -> ApiResult {
    let summary = ctx.trade_store.learning_summary().await.map_err(internal)?;
    Ok(Json(serde_json::to_value(summary).map_err(internal)?))
}

/// Full analysis bundle for one symbol, with no threshold filtering.
async fn analyse_symbol(
    State(ctx): State<Arc<AgentContext>>,
    Path(symbol): Path<String>,
) -> ApiResult {
    let symbol = symbol.to_ascii_uppercase();
    let Some(snapshot) = ctx.snapshots.get(&symbol) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("{symbol} is not in today's analysis universe") })),
        ));
    };

    let macro_snapshot = ctx.snapshots.macro_snapshot();
    let bundle = ctx.signals.analyse_symbol(&snapshot, &macro_snapshot).await;
    Ok(Json(serde_json::to_value(bundle).map_err(internal)?))
}

async fn telegram_test(State(ctx): State<Arc<AgentContext>>) -> ApiResult {
    ctx.chat
        .send("✅ Test message from the trading agent")
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "sent": true })))
}

async fn broker_login(State(ctx): State<Arc<AgentContext>>) -> ApiResult {
    ctx.angel.login().await.map_err(internal)?;
    Ok(Json(json!({ "logged_in": true })))
}
