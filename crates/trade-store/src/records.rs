use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use agent_core::{Exchange, ExitReason, Position};

/// One persisted trade record, as served by the signal-history endpoint.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: String,
    pub exchange: String,
    pub side: String,
    pub sector: String,
    pub status: String,
    pub entry_price: f64,
    pub target_price: f64,
    pub stop_loss: f64,
    pub risk_reward: f64,
    pub confidence_composite: f64,
    pub confidence_fundamental: f64,
    pub confidence_technical: f64,
    pub confidence_macro: f64,
    pub confidence_risk_reward: f64,
    pub capital_allocation: f64,
    pub allocation_pct: f64,
    pub fundamental_summary: String,
    pub technical_summary: String,
    pub macro_summary: String,
    pub generated_at: String,
    pub expires_at: String,
    pub approved_at: Option<String>,
    pub rejected_at: Option<String>,
    pub expired_at: Option<String>,
    pub executed_at: Option<String>,
    pub failed_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub rejection_reason: Option<String>,
    pub broker_order_id: Option<String>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<String>,
    pub exit_reason: Option<String>,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_pct: Option<f64>,
}

/// Raw positions row; converted into the domain type after parsing the
/// TEXT-encoded enums and timestamps.
#[derive(Debug, sqlx::FromRow)]
pub struct PositionRow {
    pub proposal_id: String,
    pub symbol: String,
    pub exchange: String,
    pub token: String,
    pub sector: String,
    pub entry_price: f64,
    pub quantity: i64,
    pub invested: f64,
    pub initial_stop: f64,
    pub current_stop: f64,
    pub target: f64,
    pub current_price: f64,
    pub active: i64,
    pub entry_time: String,
    pub partial_profit_suggested: i64,
    pub target_notified: i64,
    pub broker_order_id: Option<String>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<String>,
    pub exit_reason: Option<String>,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_pct: Option<f64>,
}

impl PositionRow {
    pub fn into_position(self) -> Result<Position> {
        Ok(Position {
            exchange: Exchange::parse(&self.exchange)
                .ok_or_else(|| anyhow!("unknown exchange {:?}", self.exchange))?,
            entry_time: parse_timestamp(&self.entry_time)?,
            exit_time: self.exit_time.as_deref().map(parse_timestamp).transpose()?,
            exit_reason: self.exit_reason.as_deref().and_then(ExitReason::parse),
            proposal_id: self.proposal_id,
            symbol: self.symbol,
            token: self.token,
            sector: self.sector,
            entry_price: self.entry_price,
            quantity: self.quantity,
            invested: self.invested,
            initial_stop: self.initial_stop,
            current_stop: self.current_stop,
            target: self.target,
            current_price: self.current_price,
            active: self.active != 0,
            partial_profit_suggested: self.partial_profit_suggested != 0,
            target_notified: self.target_notified != 0,
            broker_order_id: self.broker_order_id,
            exit_price: self.exit_price,
            realized_pnl: self.realized_pnl,
            realized_pnl_pct: self.realized_pnl_pct,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("bad timestamp {raw:?}: {e}"))
}
