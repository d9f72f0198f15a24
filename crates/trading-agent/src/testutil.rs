//! Shared mocks and fixtures for the agent's async tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;

use agent_core::config::AgentConfig;
use agent_core::{
    Bar, Broker, ChatChannel, ChatUpdate, ConfidenceScore, Exchange, Holding, OrderRequest,
    QuoteTick, TradeProposal, TradeSide, TradeStatus,
};
use instrument_registry::InstrumentRegistry;
use trade_store::TradeStore;

use crate::approval::ApprovalGateway;
use crate::executor::ExecutionEngine;
use crate::monitor::PositionMonitor;

pub struct MockChat {
    sent: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl MockChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatChannel for MockChat {
    async fn send(&self, text: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("chat unavailable");
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn poll(&self, _timeout_secs: u64) -> Result<Vec<ChatUpdate>> {
        Ok(Vec::new())
    }
}

pub struct MockBroker {
    ltp_script: Mutex<VecDeque<f64>>,
    orders: Mutex<Vec<OrderRequest>>,
    order_counter: AtomicU64,
    reject_orders: AtomicBool,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ltp_script: Mutex::new(VecDeque::new()),
            orders: Mutex::new(Vec::new()),
            order_counter: AtomicU64::new(0),
            reject_orders: AtomicBool::new(false),
        })
    }

    pub fn script_prices(&self, prices: &[f64]) {
        self.ltp_script.lock().unwrap().extend(prices.iter().copied());
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    pub fn reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn quotes(&self, _: Exchange, _: &[String]) -> Result<Vec<QuoteTick>> {
        Ok(Vec::new())
    }

    async fn daily_history(
        &self,
        _: Exchange,
        _: &str,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        Ok(Vec::new())
    }

    async fn ltp(&self, _: Exchange, _: &str, _: &str) -> Result<f64> {
        self.ltp_script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no quote available"))
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String> {
        if self.reject_orders.load(Ordering::SeqCst) {
            anyhow::bail!("RMS rejection: insufficient margin");
        }
        self.orders.lock().unwrap().push(order.clone());
        let n = self.order_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("OD{n:06}"))
    }

    async fn funds(&self) -> Result<f64> {
        Ok(0.0)
    }

    async fn holdings(&self) -> Result<Vec<Holding>> {
        Ok(Vec::new())
    }
}

pub struct GatewayFixture {
    pub gateway: Arc<ApprovalGateway>,
    pub chat: Arc<MockChat>,
    pub broker: Arc<MockBroker>,
    pub store: Arc<TradeStore>,
    pub executor: Arc<ExecutionEngine>,
}

async fn memory_store() -> Arc<TradeStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite");
    let store = Arc::new(TradeStore::new(pool));
    store.init_tables().await.unwrap();
    store
}

pub async fn gateway_fixture() -> GatewayFixture {
    executed_fixture(|_| {}).await
}

pub async fn executed_fixture(customise: impl FnOnce(&mut AgentConfig)) -> GatewayFixture {
    let mut config = AgentConfig::default();
    config.simulation.enabled = true;
    customise(&mut config);

    let chat = MockChat::new();
    let broker = MockBroker::new();
    let store = memory_store().await;
    let executor = Arc::new(ExecutionEngine::new(
        broker.clone(),
        chat.clone(),
        store.clone(),
        config.clone(),
    ));
    let gateway = Arc::new(ApprovalGateway::new(
        chat.clone(),
        store.clone(),
        executor.clone(),
        config.clone(),
    ));

    GatewayFixture {
        gateway,
        chat,
        broker,
        store,
        executor,
    }
}

pub struct MonitorFixture {
    pub monitor: PositionMonitor,
    pub chat: Arc<MockChat>,
    pub broker: Arc<MockBroker>,
    pub store: Arc<TradeStore>,
}

pub async fn monitor_fixture(customise: impl FnOnce(&mut AgentConfig)) -> MonitorFixture {
    let mut config = AgentConfig::default();
    config.simulation.enabled = true;
    customise(&mut config);

    let chat = MockChat::new();
    let broker = MockBroker::new();
    let store = memory_store().await;
    let registry = Arc::new(InstrumentRegistry::new(false).unwrap());
    let executor = Arc::new(ExecutionEngine::new(
        broker.clone(),
        chat.clone(),
        store.clone(),
        config.clone(),
    ));
    let monitor = PositionMonitor::new(
        broker.clone(),
        registry,
        executor,
        store.clone(),
        chat.clone(),
        config,
    );

    MonitorFixture {
        monitor,
        chat,
        broker,
        store,
    }
}

pub fn proposal_with(id: &str, symbol: &str, composite: f64) -> TradeProposal {
    TradeProposal {
        id: id.to_string(),
        symbol: symbol.to_string(),
        exchange: Exchange::Nse,
        token: "2885".to_string(),
        side: TradeSide::Buy,
        entry_price: 100.0,
        target_price: 120.0,
        stop_loss: 95.0,
        risk_reward: 4.0,
        confidence: ConfidenceScore {
            fundamental: 80.0,
            technical: 70.0,
            macro_regime: 65.0,
            risk_reward: 100.0,
            composite,
        },
        capital_allocation: 50_000.0,
        allocation_pct: 10.0,
        cash_buffer_safe: true,
        sector: "Energy".to_string(),
        fundamental_summary: String::new(),
        technical_summary: String::new(),
        macro_summary: String::new(),
        generated_at: Utc::now(),
        expires_at: Utc::now() + Duration::hours(4),
        status: TradeStatus::PendingApproval,
    }
}
