mod learning;
mod records;

pub use learning::{BucketStats, LearningSummary, SectorStats};
pub use records::TradeRecord;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use agent_core::{ExitReason, Position, TradeProposal, TradeStatus};

/// Persistence for trade records, open positions and small agent state.
///
/// Trade records are upserted at every status transition; closed trades are
/// append-only. The position monitor is the only writer of `current_stop`.
pub struct TradeStore {
    pool: SqlitePool,
}

impl TradeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .with_context(|| format!("connecting to {database_url}"))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trade_records (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                side TEXT NOT NULL,
                sector TEXT NOT NULL,
                status TEXT NOT NULL,
                entry_price REAL NOT NULL,
                target_price REAL NOT NULL,
                stop_loss REAL NOT NULL,
                risk_reward REAL NOT NULL,
                confidence_composite REAL NOT NULL,
                confidence_fundamental REAL NOT NULL,
                confidence_technical REAL NOT NULL,
                confidence_macro REAL NOT NULL,
                confidence_risk_reward REAL NOT NULL,
                capital_allocation REAL NOT NULL,
                allocation_pct REAL NOT NULL,
                fundamental_summary TEXT NOT NULL DEFAULT '',
                technical_summary TEXT NOT NULL DEFAULT '',
                macro_summary TEXT NOT NULL DEFAULT '',
                generated_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                approved_at TEXT,
                rejected_at TEXT,
                expired_at TEXT,
                executed_at TEXT,
                failed_at TEXT,
                cancelled_at TEXT,
                rejection_reason TEXT,
                broker_order_id TEXT,
                exit_price REAL,
                exit_time TEXT,
                exit_reason TEXT,
                realized_pnl REAL,
                realized_pnl_pct REAL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS positions (
                proposal_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                token TEXT NOT NULL,
                sector TEXT NOT NULL,
                entry_price REAL NOT NULL,
                quantity INTEGER NOT NULL,
                invested REAL NOT NULL,
                initial_stop REAL NOT NULL,
                current_stop REAL NOT NULL,
                target REAL NOT NULL,
                current_price REAL NOT NULL,
                active INTEGER NOT NULL,
                entry_time TEXT NOT NULL,
                partial_profit_suggested INTEGER NOT NULL DEFAULT 0,
                target_notified INTEGER NOT NULL DEFAULT 0,
                broker_order_id TEXT,
                exit_price REAL,
                exit_time TEXT,
                exit_reason TEXT,
                realized_pnl REAL,
                realized_pnl_pct REAL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Trade records
    // ------------------------------------------------------------------

    /// Insert or refresh the full record for a proposal; called on first
    /// submission and whenever price-independent fields change.
    pub async fn upsert_trade(&self, proposal: &TradeProposal) -> Result<()> {
        sqlx::query(
            "INSERT INTO trade_records (
                id, symbol, exchange, side, sector, status,
                entry_price, target_price, stop_loss, risk_reward,
                confidence_composite, confidence_fundamental, confidence_technical,
                confidence_macro, confidence_risk_reward,
                capital_allocation, allocation_pct,
                fundamental_summary, technical_summary, macro_summary,
                generated_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET status = excluded.status",
        )
        .bind(&proposal.id)
        .bind(&proposal.symbol)
        .bind(proposal.exchange.as_str())
        .bind(proposal.side.as_str())
        .bind(&proposal.sector)
        .bind(proposal.status.as_str())
        .bind(proposal.entry_price)
        .bind(proposal.target_price)
        .bind(proposal.stop_loss)
        .bind(proposal.risk_reward)
        .bind(proposal.confidence.composite)
        .bind(proposal.confidence.fundamental)
        .bind(proposal.confidence.technical)
        .bind(proposal.confidence.macro_regime)
        .bind(proposal.confidence.risk_reward)
        .bind(proposal.capital_allocation)
        .bind(proposal.allocation_pct)
        .bind(truncate(&proposal.fundamental_summary, 500))
        .bind(truncate(&proposal.technical_summary, 500))
        .bind(truncate(&proposal.macro_summary, 300))
        .bind(proposal.generated_at.to_rfc3339())
        .bind(proposal.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a status transition with its timestamp (and rejection reason
    /// where applicable).
    pub async fn mark_status(
        &self,
        trade_id: &str,
        status: TradeStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let column = match status {
            TradeStatus::Approved => "approved_at",
            TradeStatus::Rejected => "rejected_at",
            TradeStatus::Expired => "expired_at",
            TradeStatus::Executed => "executed_at",
            TradeStatus::Failed => "failed_at",
            TradeStatus::Cancelled => "cancelled_at",
            TradeStatus::PendingApproval => {
                anyhow::bail!("no transition back to PENDING_APPROVAL")
            }
        };
        let sql = format!(
            "UPDATE trade_records
             SET status = ?, {column} = ?, rejection_reason = COALESCE(?, rejection_reason)
             WHERE id = ?"
        );
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(reason)
            .bind(trade_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_broker_order(&self, trade_id: &str, broker_order_id: &str) -> Result<()> {
        sqlx::query("UPDATE trade_records SET broker_order_id = ? WHERE id = ?")
            .bind(broker_order_id)
            .bind(trade_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append exit outcome to a closed trade's record.
    pub async fn record_trade_exit(
        &self,
        trade_id: &str,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
        realized_pnl: f64,
        realized_pnl_pct: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE trade_records
             SET exit_price = ?, exit_time = ?, exit_reason = ?,
                 realized_pnl = ?, realized_pnl_pct = ?
             WHERE id = ?",
        )
        .bind(exit_price)
        .bind(exit_time.to_rfc3339())
        .bind(reason.as_str())
        .bind(realized_pnl)
        .bind(realized_pnl_pct)
        .bind(trade_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn trade_record(&self, trade_id: &str) -> Result<Option<TradeRecord>> {
        let row: Option<TradeRecord> =
            sqlx::query_as("SELECT * FROM trade_records WHERE id = ?")
                .bind(trade_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    pub async fn records_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let rows: Vec<TradeRecord> = sqlx::query_as(
            "SELECT * FROM trade_records WHERE generated_at >= ? ORDER BY generated_at DESC",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Executed BUY entries since the cutoff; backs the weekly new-buy budget.
    pub async fn count_buys_since(&self, cutoff: DateTime<Utc>) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM trade_records
             WHERE side = 'BUY' AND executed_at IS NOT NULL AND executed_at >= ?",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u32)
    }

    // ------------------------------------------------------------------
    // Positions
    // ------------------------------------------------------------------

    /// Insert or replace the whole position row. The monitor reads, mutates
    /// and upserts one position at a time.
    pub async fn upsert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO positions (
                proposal_id, symbol, exchange, token, sector,
                entry_price, quantity, invested,
                initial_stop, current_stop, target, current_price,
                active, entry_time, partial_profit_suggested, target_notified,
                broker_order_id, exit_price, exit_time, exit_reason,
                realized_pnl, realized_pnl_pct
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&position.proposal_id)
        .bind(&position.symbol)
        .bind(position.exchange.as_str())
        .bind(&position.token)
        .bind(&position.sector)
        .bind(position.entry_price)
        .bind(position.quantity)
        .bind(position.invested)
        .bind(position.initial_stop)
        .bind(position.current_stop)
        .bind(position.target)
        .bind(position.current_price)
        .bind(position.active as i64)
        .bind(position.entry_time.to_rfc3339())
        .bind(position.partial_profit_suggested as i64)
        .bind(position.target_notified as i64)
        .bind(position.broker_order_id.as_deref())
        .bind(position.exit_price)
        .bind(position.exit_time.map(|t| t.to_rfc3339()))
        .bind(position.exit_reason.map(|r| r.as_str()))
        .bind(position.realized_pnl)
        .bind(position.realized_pnl_pct)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows: Vec<records::PositionRow> = sqlx::query_as(
            "SELECT * FROM positions WHERE active = 1 ORDER BY entry_time ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(records::PositionRow::into_position).collect()
    }

    pub async fn all_positions(&self) -> Result<Vec<Position>> {
        let rows: Vec<records::PositionRow> =
            sqlx::query_as("SELECT * FROM positions ORDER BY entry_time ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(records::PositionRow::into_position).collect()
    }

    /// Open-position count, today's closed count and today's realised P&L,
    /// for the end-of-day summary.
    pub async fn eod_stats(&self, today: NaiveDate) -> Result<(i64, i64, f64)> {
        let (open,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM positions WHERE active = 1")
                .fetch_one(&self.pool)
                .await?;
        let day_prefix = format!("{today}%");
        let (closed, pnl): (i64, Option<f64>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(realized_pnl) FROM positions
             WHERE active = 0 AND exit_time LIKE ?",
        )
        .bind(&day_prefix)
        .fetch_one(&self.pool)
        .await?;
        Ok((open, closed, pnl.unwrap_or(0.0)))
    }

    // ------------------------------------------------------------------
    // Agent state (key-value)
    // ------------------------------------------------------------------

    pub async fn save_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_state (key, value, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM agent_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
