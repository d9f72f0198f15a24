use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Bar, Exchange, TradeSide};

// ---------------------------------------------------------------------------
// Broker-agnostic order and market-data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LIMIT" => Some(OrderType::Limit),
            "MARKET" => Some(OrderType::Market),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    Delivery,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        "DELIVERY"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub token: String,
    pub exchange: Exchange,
    pub side: TradeSide,
    pub order_type: OrderType,
    pub product: ProductType,
    pub price: f64,
    pub quantity: i64,
}

impl OrderRequest {
    pub fn limit_buy(
        symbol: impl Into<String>,
        token: impl Into<String>,
        exchange: Exchange,
        price: f64,
        quantity: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            token: token.into(),
            exchange,
            side: TradeSide::Buy,
            order_type: OrderType::Limit,
            product: ProductType::Delivery,
            price,
            quantity,
        }
    }

    pub fn limit_sell(
        symbol: impl Into<String>,
        token: impl Into<String>,
        exchange: Exchange,
        price: f64,
        quantity: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            token: token.into(),
            exchange,
            side: TradeSide::Sell,
            order_type: OrderType::Limit,
            product: ProductType::Delivery,
            price,
            quantity,
        }
    }
}

/// One entry of a batch-quote response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteTick {
    pub token: String,
    pub last_price: f64,
    /// Total traded value for the day, in the exchange's native currency.
    pub traded_value: f64,
}

/// One demat holding, marked to market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub quantity: i64,
    pub ltp: f64,
}

// ---------------------------------------------------------------------------
// The narrow broker interface every component goes through
// ---------------------------------------------------------------------------

/// Broker surface shared by ingestion, execution, the monitor and the
/// valuator. Implementations handle session renewal internally; callers only
/// see the final result.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Batch quote for up to 250 tokens on one exchange.
    async fn quotes(&self, exchange: Exchange, tokens: &[String]) -> Result<Vec<QuoteTick>>;

    /// Daily OHLCV candles, ordered by timestamp ascending.
    async fn daily_history(
        &self,
        exchange: Exchange,
        token: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>>;

    /// Last traded price for a single instrument.
    async fn ltp(&self, exchange: Exchange, symbol: &str, token: &str) -> Result<f64>;

    /// Place an order; returns the broker's order identifier.
    async fn place_order(&self, order: &OrderRequest) -> Result<String>;

    /// Available cash.
    async fn funds(&self) -> Result<f64>;

    /// Demat holdings marked to market.
    async fn holdings(&self) -> Result<Vec<Holding>>;
}
