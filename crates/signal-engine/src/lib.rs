use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use agent_core::config::{AgentConfig, RiskConfig};
use agent_core::{
    ConfidenceScore, MacroSnapshot, StockSnapshot, TradeProposal, TradeSide, TradeStatus,
};
use fundamental_analysis::{FundamentalReport, FundamentalSource};
use macro_analysis::MacroReport;
use market_data::SnapshotStore;
use technical_analysis::TechnicalReport;

/// Concurrent per-symbol analyses in flight; the fundamentals provider applies
/// its own tighter bound underneath.
const ANALYSIS_CONCURRENCY: usize = 16;

/// Entry/stop/target levels derived from the snapshot's price structure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceLevels {
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub risk_reward: f64,
}

/// Everything the analysis produced for one symbol, unfiltered. Served by the
/// on-demand analysis endpoint and reduced to proposals by the generator.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisBundle {
    pub symbol: String,
    pub fundamental: Option<FundamentalReport>,
    pub technical: Option<TechnicalReport>,
    pub macro_report: MacroReport,
    pub levels: Option<PriceLevels>,
    pub confidence: Option<ConfidenceScore>,
}

/// Fans analysis out across the snapshot store and reduces the results to a
/// set of trade proposals. Pure with respect to portfolio state: sizing uses
/// the portfolio value handed in per cycle.
pub struct SignalEngine {
    fundamentals: Arc<dyn FundamentalSource>,
    config: AgentConfig,
}

impl SignalEngine {
    pub fn new(fundamentals: Arc<dyn FundamentalSource>, config: AgentConfig) -> Self {
        Self {
            fundamentals,
            config,
        }
    }

    /// Run the full per-symbol fan-out and return the surviving proposals,
    /// best composite first. An empty set is a normal outcome.
    pub async fn generate(
        &self,
        store: &SnapshotStore,
        portfolio_value: f64,
    ) -> Vec<TradeProposal> {
        let macro_snapshot = store.macro_snapshot();
        let macro_report =
            macro_analysis::score(&macro_snapshot, &self.config.macro_thresholds);

        if macro_report.suppressed {
            tracing::warn!("New buys suppressed by macro conditions; no signals this cycle");
            return Vec::new();
        }

        let snapshots = store.all();
        if snapshots.is_empty() {
            tracing::info!("Snapshot store is empty; no signals this cycle");
            return Vec::new();
        }

        let limiter = Arc::new(Semaphore::new(ANALYSIS_CONCURRENCY));
        let mut tasks: JoinSet<Option<TradeProposal>> = JoinSet::new();

        for snapshot in snapshots {
            let fundamentals = Arc::clone(&self.fundamentals);
            let limiter = Arc::clone(&limiter);
            let config = self.config.clone();
            let macro_report = macro_report.clone();

            tasks.spawn(async move {
                let _permit = limiter.acquire().await.ok()?;
                evaluate_symbol(
                    &snapshot,
                    fundamentals.as_ref(),
                    &macro_report,
                    &config,
                    portfolio_value,
                )
                .await
            });
        }

        let mut proposals: Vec<TradeProposal> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(proposal)) = joined {
                proposals.push(proposal);
            }
        }

        proposals.sort_by(|a, b| {
            b.confidence
                .composite
                .partial_cmp(&a.confidence.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        tracing::info!("Signal cycle produced {} proposals", proposals.len());
        proposals
    }

    /// Full analysis bundle for one symbol with no threshold filtering.
    pub async fn analyse_symbol(
        &self,
        snapshot: &StockSnapshot,
        macro_snapshot: &MacroSnapshot,
    ) -> AnalysisBundle {
        let macro_report = macro_analysis::score(macro_snapshot, &self.config.macro_thresholds);
        let technical = technical_analysis::analyze(snapshot, &self.config.technical);
        let fundamental = match self.fundamentals.fundamentals(&snapshot.symbol).await {
            Ok(Some(data)) => Some(fundamental_analysis::score(&data, &self.config.fundamental)),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("Fundamentals unavailable for {}: {e:#}", snapshot.symbol);
                None
            }
        };

        let levels = technical.as_ref().map(|t| {
            derive_levels(
                snapshot.last_price,
                t.result.support,
                t.result.resistance,
                &self.config.risk,
            )
        });

        let confidence = match (&fundamental, &technical, &levels) {
            (Some(f), Some(t), Some(l)) => Some(self.compose(
                f.score,
                t.score,
                &macro_report,
                rr_score(l.risk_reward),
            )),
            _ => None,
        };

        AnalysisBundle {
            symbol: snapshot.symbol.clone(),
            fundamental,
            technical,
            macro_report,
            levels,
            confidence,
        }
    }

    fn compose(
        &self,
        fundamental: f64,
        technical: f64,
        macro_report: &MacroReport,
        rr: f64,
    ) -> ConfidenceScore {
        let macro_sub = (macro_report.score - macro_report.confidence_penalty).max(0.0);
        ConfidenceScore {
            fundamental,
            technical,
            macro_regime: macro_sub,
            risk_reward: rr,
            composite: self
                .config
                .weights
                .composite(fundamental, technical, macro_sub, rr),
        }
    }
}

async fn evaluate_symbol(
    snapshot: &StockSnapshot,
    fundamentals: &dyn FundamentalSource,
    macro_report: &MacroReport,
    config: &AgentConfig,
    portfolio_value: f64,
) -> Option<TradeProposal> {
    // Fundamental fetch and technical scoring run concurrently; the
    // technical side is pure CPU over the cached bars.
    let (fundamental_data, technical) = tokio::join!(
        fundamentals.fundamentals(&snapshot.symbol),
        async { technical_analysis::analyze(snapshot, &config.technical) }
    );

    let fundamental_data = match fundamental_data {
        Ok(Some(data)) => data,
        Ok(None) => return None,
        Err(e) => {
            tracing::debug!("Fundamentals fetch failed for {}: {e:#}", snapshot.symbol);
            return None;
        }
    };
    let technical = technical?;

    let fundamental = fundamental_analysis::score(&fundamental_data, &config.fundamental);
    if fundamental.score <= 0.0 {
        tracing::debug!("{} disqualified on fundamentals", snapshot.symbol);
        return None;
    }

    let levels = derive_levels(
        snapshot.last_price,
        technical.result.support,
        technical.result.resistance,
        &config.risk,
    );

    let rr = rr_score(levels.risk_reward);
    let macro_sub = (macro_report.score - macro_report.confidence_penalty).max(0.0);
    let composite = config
        .weights
        .composite(fundamental.score, technical.score, macro_sub, rr);

    if composite < config.signal.min_confidence_to_notify {
        return None;
    }

    // Position sizing against the cycle's portfolio value.
    let capital_allocation = portfolio_value * config.sizing.max_single_stock_pct / 100.0;
    let post_trade_cash = portfolio_value
        * (1.0 - config.portfolio.emergency_cash_buffer_pct / 100.0)
        - capital_allocation;
    let cash_buffer_safe = post_trade_cash >= 0.0;

    let now = Utc::now();
    Some(TradeProposal {
        id: new_trade_id(),
        symbol: snapshot.symbol.clone(),
        exchange: snapshot.exchange,
        token: snapshot.token.clone(),
        side: TradeSide::Buy,
        entry_price: levels.entry,
        target_price: levels.target,
        stop_loss: levels.stop,
        risk_reward: levels.risk_reward,
        confidence: ConfidenceScore {
            fundamental: fundamental.score,
            technical: technical.score,
            macro_regime: macro_sub,
            risk_reward: rr,
            composite,
        },
        capital_allocation,
        allocation_pct: config.sizing.max_single_stock_pct,
        cash_buffer_safe,
        sector: fundamental_data
            .sector
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        fundamental_summary: fundamental.summary.clone(),
        technical_summary: technical.summary.clone(),
        macro_summary: macro_report.summary.clone(),
        generated_at: now,
        expires_at: now + Duration::minutes(config.signal.approval_window_minutes),
        status: TradeStatus::PendingApproval,
    })
}

/// Stable 12-hex-char trade identifier, unique within a run.
pub fn new_trade_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("TRD-{}", &hex[..12])
}

/// Stop sits just under support but is clamped into the configured stop band;
/// the target is the recent resistance when it pays at least 3%, otherwise a
/// flat 10% objective.
pub fn derive_levels(entry: f64, support: f64, resistance: f64, risk: &RiskConfig) -> PriceLevels {
    let floor = entry * (1.0 - risk.max_stop_loss_pct / 100.0);
    let ceiling = entry * (1.0 - risk.min_stop_loss_pct / 100.0);
    let stop = if support > 0.0 {
        (support * 0.99).clamp(floor, ceiling)
    } else {
        ceiling
    };

    let target = if resistance > entry * 1.03 {
        resistance
    } else {
        entry * 1.10
    };

    let risk_reward = if entry > stop {
        (target - entry) / (entry - stop)
    } else {
        0.0
    };

    PriceLevels {
        entry,
        stop,
        target,
        risk_reward,
    }
}

/// Risk-reward sub-score bands.
pub fn rr_score(risk_reward: f64) -> f64 {
    if risk_reward >= 3.0 {
        100.0
    } else if risk_reward >= 2.5 {
        85.0
    } else if risk_reward >= 2.0 {
        70.0
    } else if risk_reward >= 1.5 {
        40.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests;
