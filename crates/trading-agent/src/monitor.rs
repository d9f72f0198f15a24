use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Asia::Kolkata;

use agent_core::config::AgentConfig;
use agent_core::{Broker, ChatChannel, Exchange, ExitReason, Position};
use instrument_registry::InstrumentRegistry;
use trade_store::TradeStore;

use crate::executor::ExecutionEngine;
use crate::report;

/// Prices all open positions on a fixed interval and enforces exits.
///
/// Stop-loss and drawdown exits are autonomous (no operator approval); target
/// hits only notify. The monitor is the sole writer of `current_stop`, which
/// never moves down.
pub struct PositionMonitor {
    broker: Arc<dyn Broker>,
    registry: Arc<InstrumentRegistry>,
    executor: Arc<ExecutionEngine>,
    store: Arc<TradeStore>,
    chat: Arc<dyn ChatChannel>,
    config: AgentConfig,
}

impl PositionMonitor {
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<InstrumentRegistry>,
        executor: Arc<ExecutionEngine>,
        store: Arc<TradeStore>,
        chat: Arc<dyn ChatChannel>,
        config: AgentConfig,
    ) -> Self {
        Self {
            broker,
            registry,
            executor,
            store,
            chat,
            config,
        }
    }

    /// One monitoring pass over every open position. Ticks are driven
    /// sequentially by the scheduler and never overlap.
    pub async fn tick(&self) -> Result<()> {
        let positions = self.store.open_positions().await?;
        for position in positions {
            let symbol = position.symbol.clone();
            if let Err(e) = self.check_position(position).await {
                tracing::warn!("Monitor pass failed for {symbol}: {e:#}");
            }
        }
        Ok(())
    }

    async fn check_position(&self, mut position: Position) -> Result<()> {
        let Some(price) = self.fetch_price(&position).await else {
            tracing::debug!("No price for {}, skipping this tick", position.symbol);
            return Ok(());
        };
        position.current_price = price;

        // Hard exits first; neither asks the operator.
        if price <= position.current_stop {
            return self.close_position(position, price, ExitReason::StopLossHit).await;
        }

        let entry = position.entry_price;
        let drawdown_pct = if entry > 0.0 {
            (entry - price) / entry * 100.0
        } else {
            0.0
        };
        if drawdown_pct >= self.config.risk.max_single_trade_drawdown_pct {
            return self.close_position(position, price, ExitReason::MaxDrawdown).await;
        }

        // Target and halfway notifications, once each per position.
        if price >= position.target {
            if !position.target_notified {
                position.target_notified = true;
                self.chat
                    .send(&format!(
                        "🎯 TARGET HIT: {} at ₹{price:.2} (target ₹{:.2}). \
                         Reply APPROVE to book? The agent will not sell on its own.",
                        position.symbol, position.target
                    ))
                    .await
                    .ok();
            }
        } else {
            let midpoint = entry + (position.target - entry) * 0.5;
            if price >= midpoint && !position.partial_profit_suggested {
                position.partial_profit_suggested = true;
                self.chat
                    .send(&format!(
                        "📈 {} is {:.1}% up and past halfway to target — consider partial profits",
                        position.symbol,
                        position.gain_pct()
                    ))
                    .await
                    .ok();
            }
        }

        // Trailing stop: activates strictly beyond the paper-gain threshold
        // and only ever moves up.
        let gain_pct = if entry > 0.0 {
            (price - entry) / entry * 100.0
        } else {
            0.0
        };
        if gain_pct > self.config.risk.trailing_stop_activate_pct {
            let new_stop = price - (entry - position.initial_stop);
            if new_stop > position.current_stop {
                tracing::info!(
                    "Raising stop for {}: {:.2} -> {:.2}",
                    position.symbol,
                    position.current_stop,
                    new_stop
                );
                position.current_stop = new_stop;
                self.chat
                    .send(&format!(
                        "🔒 Trailing stop for {} raised to ₹{new_stop:.2} (LTP ₹{price:.2})",
                        position.symbol
                    ))
                    .await
                    .ok();
            }
        }

        self.store.upsert_position(&position).await
    }

    async fn close_position(
        &self,
        mut position: Position,
        price: f64,
        reason: ExitReason,
    ) -> Result<()> {
        let order_id = self
            .executor
            .place_sell(
                &position.symbol,
                &position.token,
                position.exchange,
                position.quantity,
                price,
                reason,
            )
            .await;

        let realized_pnl = (price - position.entry_price) * position.quantity as f64;
        let realized_pnl_pct = if position.entry_price > 0.0 {
            (price - position.entry_price) / position.entry_price * 100.0
        } else {
            0.0
        };
        let now = Utc::now();

        position.current_price = price;
        position.active = false;
        position.exit_price = Some(price);
        position.exit_time = Some(now);
        position.exit_reason = Some(reason);
        position.realized_pnl = Some(realized_pnl);
        position.realized_pnl_pct = Some(realized_pnl_pct);
        self.store.upsert_position(&position).await?;
        self.store
            .record_trade_exit(
                &position.proposal_id,
                price,
                now,
                reason,
                realized_pnl,
                realized_pnl_pct,
            )
            .await?;

        let headline = match reason {
            ExitReason::StopLossHit => "🛑 STOP-LOSS HIT",
            ExitReason::MaxDrawdown => "🛑 MAX DRAWDOWN EXIT",
            ExitReason::TargetBooked => "🎯 TARGET BOOKED",
            ExitReason::Manual => "ℹ MANUAL EXIT",
        };
        self.chat
            .send(&format!(
                "{headline}: SELL {} x{} @ ₹{price:.2} | P&L ₹{realized_pnl:.2} ({realized_pnl_pct:+.1}%){}",
                position.symbol,
                position.quantity,
                order_id
                    .map(|id| format!(" | order {id}"))
                    .unwrap_or_default()
            ))
            .await
            .ok();

        tracing::info!(
            "Closed {} ({}): exit {:.2}, P&L {:.2}",
            position.symbol,
            reason.as_str(),
            price,
            realized_pnl
        );
        Ok(())
    }

    /// Live price, preferring the position's own exchange and falling back to
    /// the other exchange when the registry can resolve the symbol there.
    async fn fetch_price(&self, position: &Position) -> Option<f64> {
        match self
            .broker
            .ltp(position.exchange, &position.symbol, &position.token)
            .await
        {
            Ok(price) => Some(price),
            Err(primary_err) => {
                let other = match position.exchange {
                    Exchange::Nse => Exchange::Bse,
                    Exchange::Bse => Exchange::Nse,
                };
                let token = self.registry.resolve(&position.symbol, other)?;
                match self.broker.ltp(other, &position.symbol, &token).await {
                    Ok(price) => Some(price),
                    Err(fallback_err) => {
                        tracing::debug!(
                            "Price fetch failed for {} on both exchanges: {primary_err:#} / {fallback_err:#}",
                            position.symbol
                        );
                        None
                    }
                }
            }
        }
    }

    /// Push the once-per-day close-of-market summary; deduplicated across
    /// restarts via the agent-state table.
    pub async fn end_of_day_summary(&self) -> Result<()> {
        let today = Utc::now().with_timezone(&Kolkata).date_naive();
        let already_sent = self
            .store
            .load_state("last_eod_report_date")
            .await?
            .map(|d| d == today.to_string())
            .unwrap_or(false);
        if already_sent {
            return Ok(());
        }

        let (open, closed_today, pnl_today) = self.store.eod_stats(today).await?;
        self.chat
            .send(&report::end_of_day_summary(open, closed_today, pnl_today))
            .await?;
        self.store
            .save_state("last_eod_report_date", &today.to_string())
            .await
    }
}
