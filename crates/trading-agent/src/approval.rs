use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;

use agent_core::config::AgentConfig;
use agent_core::{ChatChannel, ChatUpdate, TradeProposal, TradeStatus};
use risk_manager::RiskValidation;
use trade_store::TradeStore;

use crate::executor::ExecutionEngine;
use crate::report;

/// Operator messages the gateway understands.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Approve(String),
    Reject(String, Option<String>),
    Status,
    Positions,
    Unrecognised,
}

/// Parse an operator reply. Keywords and trade ids are case-insensitive;
/// everything after the id on a REJECT is a free-text reason.
pub fn parse_command(text: &str) -> OperatorCommand {
    let mut words = text.split_whitespace();
    let keyword = match words.next() {
        Some(word) => word.to_ascii_uppercase(),
        None => return OperatorCommand::Unrecognised,
    };

    match keyword.as_str() {
        "APPROVE" => match words.next() {
            Some(id) => OperatorCommand::Approve(id.to_ascii_uppercase()),
            None => OperatorCommand::Unrecognised,
        },
        "REJECT" => match words.next() {
            Some(id) => {
                let reason: String = words.collect::<Vec<_>>().join(" ");
                OperatorCommand::Reject(
                    id.to_ascii_uppercase(),
                    if reason.is_empty() { None } else { Some(reason) },
                )
            }
            None => OperatorCommand::Unrecognised,
        },
        "STATUS" => OperatorCommand::Status,
        "POSITIONS" => OperatorCommand::Positions,
        _ => OperatorCommand::Unrecognised,
    }
}

/// Holds proposals awaiting an operator decision and drives every transition
/// out of PENDING_APPROVAL. Removal from the pending map is the
/// synchronization point: whoever removes an id drives its transition, so a
/// reply racing the expiry sweep can never double-fire.
pub struct ApprovalGateway {
    pending: DashMap<String, TradeProposal>,
    chat: Arc<dyn ChatChannel>,
    store: Arc<TradeStore>,
    executor: Arc<ExecutionEngine>,
    config: AgentConfig,
}

impl ApprovalGateway {
    pub fn new(
        chat: Arc<dyn ChatChannel>,
        store: Arc<TradeStore>,
        executor: Arc<ExecutionEngine>,
        config: AgentConfig,
    ) -> Self {
        Self {
            pending: DashMap::new(),
            chat,
            store,
            executor,
            config,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_proposals(&self) -> Vec<TradeProposal> {
        let mut list: Vec<TradeProposal> =
            self.pending.iter().map(|entry| entry.value().clone()).collect();
        list.sort_by(|a, b| a.generated_at.cmp(&b.generated_at));
        list
    }

    /// Send the pre-trade report and park the proposal in the pending map.
    /// A failed chat send discards the proposal — no retry, nothing persisted.
    pub async fn submit(&self, proposal: TradeProposal, validation: &RiskValidation) -> Result<()> {
        if self.config.execution.auto_mode
            && proposal.confidence.composite >= self.config.signal.auto_execute_threshold
        {
            return self.auto_execute(proposal).await;
        }

        let message = report::pre_trade_report(&proposal, validation);
        if let Err(e) = self.chat.send(&message).await {
            tracing::warn!(
                "Chat send failed, dropping proposal {} {}: {e:#}",
                proposal.id,
                proposal.symbol
            );
            return Ok(());
        }

        self.store.upsert_trade(&proposal).await?;
        tracing::info!(
            "Proposal {} {} pending approval until {}",
            proposal.id,
            proposal.symbol,
            proposal.expires_at
        );
        self.pending.insert(proposal.id.clone(), proposal);
        Ok(())
    }

    /// Auto-mode bypass for very high conviction signals.
    async fn auto_execute(&self, mut proposal: TradeProposal) -> Result<()> {
        tracing::info!(
            "Auto-executing {} {} (composite {:.1} >= {:.1})",
            proposal.id,
            proposal.symbol,
            proposal.confidence.composite,
            self.config.signal.auto_execute_threshold
        );
        self.store.upsert_trade(&proposal).await?;
        self.store
            .mark_status(&proposal.id, TradeStatus::Approved, None)
            .await?;
        proposal.status = TradeStatus::Approved;
        self.chat
            .send(&format!(
                "🤖 Auto-executing {} {} at {:.1}% confidence",
                proposal.id, proposal.symbol, proposal.confidence.composite
            ))
            .await
            .ok();
        self.executor.execute(&proposal).await.ok();
        Ok(())
    }

    /// Consume one operator reply.
    pub async fn on_reply(&self, update: &ChatUpdate) -> Result<()> {
        match parse_command(&update.text) {
            OperatorCommand::Approve(id) => self.handle_approve(&id).await,
            OperatorCommand::Reject(id, reason) => self.handle_reject(&id, reason).await,
            OperatorCommand::Status => {
                let open = self.store.open_positions().await?.len();
                let message = report::pending_status(&self.pending_proposals(), open);
                self.chat.send(&message).await
            }
            OperatorCommand::Positions => {
                let positions = self.store.open_positions().await?;
                self.chat.send(&report::positions_report(&positions)).await
            }
            OperatorCommand::Unrecognised => Ok(()),
        }
    }

    async fn handle_approve(&self, id: &str) -> Result<()> {
        // Duplicate approvals and unknown ids land here identically: the id
        // is no longer in the map.
        let Some((_, mut proposal)) = self.pending.remove(id) else {
            return self
                .chat
                .send(&format!("Trade {id} not found (already handled or expired)"))
                .await;
        };

        self.store
            .mark_status(&proposal.id, TradeStatus::Approved, None)
            .await?;
        proposal.status = TradeStatus::Approved;
        tracing::info!("Operator approved {} {}", proposal.id, proposal.symbol);

        if self.config.simulation.enabled {
            // Simulated fills are immediate; no point deferring.
            self.executor.execute(&proposal).await.ok();
        } else {
            let executor = Arc::clone(&self.executor);
            tokio::spawn(async move {
                executor.execute(&proposal).await.ok();
            });
        }
        Ok(())
    }

    async fn handle_reject(&self, id: &str, reason: Option<String>) -> Result<()> {
        let Some((_, proposal)) = self.pending.remove(id) else {
            return self
                .chat
                .send(&format!("Trade {id} not found (already handled or expired)"))
                .await;
        };

        let reason = reason.unwrap_or_else(|| "User rejected".to_string());
        self.store
            .mark_status(&proposal.id, TradeStatus::Rejected, Some(&reason))
            .await?;
        tracing::info!("Operator rejected {} {}: {reason}", proposal.id, proposal.symbol);
        self.chat
            .send(&format!("🚫 {} {} rejected: {reason}", proposal.id, proposal.symbol))
            .await
            .ok();
        Ok(())
    }

    /// Expire every pending proposal whose window has lapsed.
    pub async fn expire_timed_out(&self) -> Result<()> {
        let now = Utc::now();
        let expired_ids: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().expires_at < now)
            .map(|entry| entry.key().clone())
            .collect();

        for id in expired_ids {
            // The reply consumer may win the race; only the remover acts.
            let Some((_, proposal)) = self.pending.remove(&id) else {
                continue;
            };
            self.store
                .mark_status(&proposal.id, TradeStatus::Expired, None)
                .await?;
            tracing::info!("Proposal {} {} expired unanswered", proposal.id, proposal.symbol);
            self.chat
                .send(&format!(
                    "⌛ {} {} expired without a decision",
                    proposal.id, proposal.symbol
                ))
                .await
                .ok();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{executed_fixture, gateway_fixture, proposal_with, GatewayFixture};
    use agent_core::TradeSide;
    use chrono::Duration;

    #[test]
    fn command_parsing() {
        assert_eq!(
            parse_command("approve trd-0a1b2c3d4e5f"),
            OperatorCommand::Approve("TRD-0A1B2C3D4E5F".to_string())
        );
        assert_eq!(
            parse_command("REJECT TRD-AAAA11112222 too risky for me"),
            OperatorCommand::Reject(
                "TRD-AAAA11112222".to_string(),
                Some("too risky for me".to_string())
            )
        );
        assert_eq!(
            parse_command("reject TRD-AAAA11112222"),
            OperatorCommand::Reject("TRD-AAAA11112222".to_string(), None)
        );
        assert_eq!(parse_command("status"), OperatorCommand::Status);
        assert_eq!(parse_command("POSITIONS"), OperatorCommand::Positions);
        assert_eq!(parse_command("hello there"), OperatorCommand::Unrecognised);
        assert_eq!(parse_command(""), OperatorCommand::Unrecognised);
        assert_eq!(parse_command("APPROVE"), OperatorCommand::Unrecognised);
    }

    #[tokio::test]
    async fn submit_parks_proposal_and_sends_report() {
        let f = gateway_fixture().await;
        let proposal = proposal_with("TRD-0A1B2C3D4E5F", "RELIANCE", 77.0);
        f.gateway
            .submit(proposal.clone(), &RiskValidation {
                passed: true,
                failures: vec![],
                warnings: vec![],
            })
            .await
            .unwrap();

        assert_eq!(f.gateway.pending_count(), 1);
        let sent = f.chat.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("PRE-TRADE ANALYSIS REPORT"));
        let record = f.store.trade_record(&proposal.id).await.unwrap().unwrap();
        assert_eq!(record.status, "PENDING_APPROVAL");
    }

    #[tokio::test]
    async fn chat_failure_discards_proposal() {
        let f = gateway_fixture().await;
        f.chat.fail_sends(true);
        let proposal = proposal_with("TRD-0A1B2C3D4E5F", "RELIANCE", 77.0);
        f.gateway
            .submit(proposal.clone(), &RiskValidation {
                passed: true,
                failures: vec![],
                warnings: vec![],
            })
            .await
            .unwrap();

        assert_eq!(f.gateway.pending_count(), 0);
        assert!(f.store.trade_record(&proposal.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn approve_executes_in_simulation() {
        let f = gateway_fixture().await;
        let proposal = proposal_with("TRD-0A1B2C3D4E5F", "RELIANCE", 77.0);
        submit_ok(&f, proposal.clone()).await;

        f.gateway
            .on_reply(&reply("APPROVE TRD-0A1B2C3D4E5F"))
            .await
            .unwrap();

        assert_eq!(f.gateway.pending_count(), 0);
        let record = f.store.trade_record(&proposal.id).await.unwrap().unwrap();
        assert_eq!(record.status, "EXECUTED");
        assert!(record.broker_order_id.unwrap().starts_with("PAPER-"));

        // Quantity = floor(50000 / 100) = 500
        let positions = f.store.open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, 500);
        assert_eq!(positions[0].initial_stop, positions[0].current_stop);
    }

    #[tokio::test]
    async fn duplicate_approve_is_unknown() {
        let f = gateway_fixture().await;
        submit_ok(&f, proposal_with("TRD-0A1B2C3D4E5F", "RELIANCE", 77.0)).await;

        f.gateway
            .on_reply(&reply("APPROVE TRD-0A1B2C3D4E5F"))
            .await
            .unwrap();
        let positions_before = f.store.open_positions().await.unwrap().len();

        f.gateway
            .on_reply(&reply("APPROVE TRD-0A1B2C3D4E5F"))
            .await
            .unwrap();

        // State unchanged and the operator told the id is gone
        assert_eq!(f.store.open_positions().await.unwrap().len(), positions_before);
        let last = f.chat.sent().last().unwrap().clone();
        assert!(last.contains("not found"));
    }

    #[tokio::test]
    async fn reject_stores_reason() {
        let f = gateway_fixture().await;
        let proposal = proposal_with("TRD-0A1B2C3D4E5F", "RELIANCE", 77.0);
        submit_ok(&f, proposal.clone()).await;

        f.gateway
            .on_reply(&reply("REJECT trd-0a1b2c3d4e5f stretched valuations"))
            .await
            .unwrap();

        let record = f.store.trade_record(&proposal.id).await.unwrap().unwrap();
        assert_eq!(record.status, "REJECTED");
        assert_eq!(record.rejection_reason.as_deref(), Some("stretched valuations"));
        assert!(f.store.open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reject_without_reason_defaults() {
        let f = gateway_fixture().await;
        let proposal = proposal_with("TRD-0A1B2C3D4E5F", "RELIANCE", 77.0);
        submit_ok(&f, proposal.clone()).await;

        f.gateway
            .on_reply(&reply("REJECT TRD-0A1B2C3D4E5F"))
            .await
            .unwrap();
        let record = f.store.trade_record(&proposal.id).await.unwrap().unwrap();
        assert_eq!(record.rejection_reason.as_deref(), Some("User rejected"));
    }

    #[tokio::test]
    async fn expiry_sweep_expires_lapsed_proposals() {
        let f = gateway_fixture().await;
        let mut lapsed = proposal_with("TRD-0A1B2C3D4E5F", "RELIANCE", 77.0);
        lapsed.expires_at = Utc::now() - Duration::minutes(1);
        let fresh = proposal_with("TRD-AAAA22223333", "TCS", 72.0);
        submit_ok(&f, lapsed.clone()).await;
        submit_ok(&f, fresh.clone()).await;

        f.gateway.expire_timed_out().await.unwrap();

        assert_eq!(f.gateway.pending_count(), 1);
        let record = f.store.trade_record(&lapsed.id).await.unwrap().unwrap();
        assert_eq!(record.status, "EXPIRED");
        let record = f.store.trade_record(&fresh.id).await.unwrap().unwrap();
        assert_eq!(record.status, "PENDING_APPROVAL");

        // A reply arriving after the sweep is treated as unknown
        f.gateway
            .on_reply(&reply("APPROVE TRD-0A1B2C3D4E5F"))
            .await
            .unwrap();
        let last = f.chat.sent().last().unwrap().clone();
        assert!(last.contains("not found"));
    }

    #[tokio::test]
    async fn status_and_positions_commands_reply() {
        let f = gateway_fixture().await;
        submit_ok(&f, proposal_with("TRD-0A1B2C3D4E5F", "RELIANCE", 77.0)).await;

        f.gateway.on_reply(&reply("STATUS")).await.unwrap();
        assert!(f.chat.sent().last().unwrap().contains("awaiting approval"));

        f.gateway.on_reply(&reply("POSITIONS")).await.unwrap();
        assert!(f.chat.sent().last().unwrap().contains("No open positions"));
    }

    #[tokio::test]
    async fn auto_mode_bypasses_approval_above_threshold() {
        let f = executed_fixture(|config| {
            config.execution.auto_mode = true;
            config.signal.auto_execute_threshold = 90.0;
        })
        .await;

        let hot = proposal_with("TRD-0A1B2C3D4E5F", "RELIANCE", 95.0);
        submit_ok(&f, hot.clone()).await;
        assert_eq!(f.gateway.pending_count(), 0);
        let record = f.store.trade_record(&hot.id).await.unwrap().unwrap();
        assert_eq!(record.status, "EXECUTED");

        // Below the threshold the normal pending path applies
        let warm = proposal_with("TRD-AAAA22223333", "TCS", 80.0);
        submit_ok(&f, warm.clone()).await;
        assert_eq!(f.gateway.pending_count(), 1);
    }

    fn reply(text: &str) -> ChatUpdate {
        ChatUpdate {
            update_id: 1,
            chat_id: 7,
            text: text.to_string(),
        }
    }

    async fn submit_ok(f: &GatewayFixture, proposal: TradeProposal) {
        assert_eq!(proposal.side, TradeSide::Buy);
        f.gateway
            .submit(proposal, &RiskValidation {
                passed: true,
                failures: vec![],
                warnings: vec![],
            })
            .await
            .unwrap();
    }
}
