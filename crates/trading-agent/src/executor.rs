use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;

use agent_core::config::AgentConfig;
use agent_core::{
    Broker, ChatChannel, Exchange, ExitReason, OrderRequest, Position, TradeProposal, TradeStatus,
};
use trade_store::TradeStore;

/// Places limit orders at the broker, records broker identifiers and opens
/// positions. All orders are LIMIT; market orders never reach this layer.
pub struct ExecutionEngine {
    broker: Arc<dyn Broker>,
    chat: Arc<dyn ChatChannel>,
    store: Arc<TradeStore>,
    config: AgentConfig,
}

impl ExecutionEngine {
    pub fn new(
        broker: Arc<dyn Broker>,
        chat: Arc<dyn ChatChannel>,
        store: Arc<TradeStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            broker,
            chat,
            store,
            config,
        }
    }

    fn simulation(&self) -> bool {
        self.config.simulation.enabled
    }

    /// Execute an approved proposal. Owns the APPROVED → EXECUTED/FAILED
    /// transition, position creation, the operator confirmation and the
    /// fill-timeout probe.
    pub async fn execute(&self, proposal: &TradeProposal) -> Result<String> {
        let quantity = if proposal.entry_price > 0.0 {
            (proposal.capital_allocation / proposal.entry_price).floor() as i64
        } else {
            0
        };
        if quantity <= 0 {
            let message = format!(
                "❌ {} {}: allocation ₹{:.0} buys zero shares at ₹{:.2}; order abandoned",
                proposal.id, proposal.symbol, proposal.capital_allocation, proposal.entry_price
            );
            self.store
                .mark_status(&proposal.id, TradeStatus::Failed, Some("zero quantity"))
                .await?;
            self.chat.send(&message).await.ok();
            return Err(anyhow!("zero quantity for {}", proposal.id));
        }

        let order_id = if self.simulation() {
            format!("PAPER-{}", Utc::now().timestamp_millis())
        } else {
            let order = OrderRequest::limit_buy(
                proposal.symbol.clone(),
                proposal.token.clone(),
                proposal.exchange,
                proposal.entry_price,
                quantity,
            );
            match self.broker.place_order(&order).await {
                Ok(order_id) => order_id,
                Err(e) => {
                    self.store
                        .mark_status(&proposal.id, TradeStatus::Failed, Some(&e.to_string()))
                        .await?;
                    self.chat
                        .send(&format!(
                            "❌ Order rejected for {} {}: {e}",
                            proposal.id, proposal.symbol
                        ))
                        .await
                        .ok();
                    return Err(e);
                }
            }
        };

        self.store
            .mark_status(&proposal.id, TradeStatus::Executed, None)
            .await?;
        self.store.set_broker_order(&proposal.id, &order_id).await?;

        let position = Position {
            proposal_id: proposal.id.clone(),
            symbol: proposal.symbol.clone(),
            exchange: proposal.exchange,
            token: proposal.token.clone(),
            sector: proposal.sector.clone(),
            entry_price: proposal.entry_price,
            quantity,
            invested: proposal.entry_price * quantity as f64,
            initial_stop: proposal.stop_loss,
            current_stop: proposal.stop_loss,
            target: proposal.target_price,
            current_price: proposal.entry_price,
            active: true,
            entry_time: Utc::now(),
            partial_profit_suggested: false,
            target_notified: false,
            broker_order_id: Some(order_id.clone()),
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            realized_pnl: None,
            realized_pnl_pct: None,
        };
        self.store.upsert_position(&position).await?;

        if self.simulation() {
            self.chat
                .send(&format!(
                    "✅ {} {} — simulated fill, {} shares @ ₹{:.2} (order {})",
                    proposal.id, proposal.symbol, quantity, proposal.entry_price, order_id
                ))
                .await
                .ok();
        } else {
            self.chat
                .send(&format!(
                    "✅ {} {} — LIMIT BUY placed, {} shares @ ₹{:.2} (order {})",
                    proposal.id, proposal.symbol, quantity, proposal.entry_price, order_id
                ))
                .await
                .ok();
            self.schedule_fill_probe(proposal.id.clone(), proposal.symbol.clone(), order_id.clone());
        }

        tracing::info!(
            "Executed {} {} x{} @ {:.2} (order {})",
            proposal.id,
            proposal.symbol,
            quantity,
            proposal.entry_price,
            order_id
        );
        Ok(order_id)
    }

    /// Place an exit SELL for a monitored position. Returns the broker order
    /// id, or `None` when the order could not be placed (already alerted).
    pub async fn place_sell(
        &self,
        symbol: &str,
        token: &str,
        exchange: Exchange,
        quantity: i64,
        price: f64,
        reason: ExitReason,
    ) -> Option<String> {
        if self.simulation() {
            return Some(format!("PAPER-{}", Utc::now().timestamp_millis()));
        }

        let order = OrderRequest::limit_sell(symbol, token, exchange, price, quantity);
        match self.broker.place_order(&order).await {
            Ok(order_id) => Some(order_id),
            Err(e) => {
                tracing::error!("Exit SELL failed for {symbol} ({}): {e:#}", reason.as_str());
                self.chat
                    .send(&format!(
                        "❌ Exit order failed for {symbol} ({}): {e}. Manual intervention needed.",
                        reason.as_str()
                    ))
                    .await
                    .ok();
                None
            }
        }
    }

    /// One reminder after the fill window; the order is never cancelled
    /// automatically.
    fn schedule_fill_probe(&self, trade_id: String, symbol: String, order_id: String) {
        let chat = Arc::clone(&self.chat);
        let minutes = self.config.execution.order_fill_timeout_minutes;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(minutes * 60)).await;
            chat.send(&format!(
                "⏱ {trade_id} {symbol}: order {order_id} placed {minutes} minutes ago — \
                 please verify the fill at the broker"
            ))
            .await
            .ok();
        });
    }
}
