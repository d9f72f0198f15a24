use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use agent_core::config::AgentConfig;
use agent_core::ChatChannel;
use angelone_broker::AngelOneClient;
use instrument_registry::InstrumentRegistry;
use market_data::{MarketDataEngine, PortfolioValuator, RefreshOutcome, SnapshotStore};
use signal_engine::SignalEngine;
use trade_store::TradeStore;

use crate::approval::ApprovalGateway;
use crate::monitor::PositionMonitor;

/// Everything the loops and the HTTP surface share. Assembled once at startup.
pub struct AgentContext {
    pub config: AgentConfig,
    pub angel: Arc<AngelOneClient>,
    pub registry: Arc<InstrumentRegistry>,
    pub market_data: Arc<MarketDataEngine>,
    pub snapshots: Arc<SnapshotStore>,
    pub valuator: Arc<PortfolioValuator>,
    pub signals: Arc<SignalEngine>,
    pub trade_store: Arc<TradeStore>,
    pub chat: Arc<dyn ChatChannel>,
    pub gateway: Arc<ApprovalGateway>,
    pub monitor: Arc<PositionMonitor>,
    pub last_refresh: RwLock<Option<RefreshOutcome>>,
    pub started_at: DateTime<Utc>,
}

impl AgentContext {
    pub fn record_refresh(&self, outcome: RefreshOutcome) {
        *self.last_refresh.write().expect("refresh lock poisoned") = Some(outcome);
    }

    pub fn last_refresh_outcome(&self) -> Option<RefreshOutcome> {
        self.last_refresh
            .read()
            .expect("refresh lock poisoned")
            .clone()
    }
}
