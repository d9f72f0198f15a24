use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Minimum daily bars required before a snapshot is eligible for technical
/// analysis (200-period indicators need headroom).
pub const MIN_HISTORY_BARS: usize = 210;

/// Exchange segment for the cash market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Nse,
    Bse,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Nse => "NSE",
            Exchange::Bse => "BSE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NSE" => Some(Exchange::Nse),
            "BSE" => Some(Exchange::Bse),
            _ => None,
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tradeable equity as listed in the broker's instrument catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub exchange: Exchange,
    pub token: String,
    pub name: String,
}

/// OHLCV bar data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Per-symbol market snapshot built by the daily refresh.
///
/// Only constructed once the bar history is long enough for the 200-period
/// indicators (`MIN_HISTORY_BARS`); replaced atomically per refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub symbol: String,
    pub exchange: Exchange,
    pub token: String,
    pub name: String,
    pub last_price: f64,
    pub day: Bar,
    pub avg_volume_20d: f64,
    pub avg_traded_value_20d: f64,
    pub bars: Vec<Bar>,
    pub fetched_at: DateTime<Utc>,
}

/// Market-wide regime derived from the volatility index and the broad index's
/// position relative to its 200-day mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    Bull,
    Bear,
    Sideways,
    HighVolatility,
}

impl MarketRegime {
    pub fn name(&self) -> &'static str {
        match self {
            MarketRegime::Bull => "BULL",
            MarketRegime::Bear => "BEAR",
            MarketRegime::Sideways => "SIDEWAYS",
            MarketRegime::HighVolatility => "HIGH_VOLATILITY",
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Market-wide macro snapshot, recomputed once per refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroSnapshot {
    pub date: NaiveDate,
    pub vix: f64,
    pub index_price: f64,
    pub index_200d_mean: f64,
    /// Percent deviation of the index from its 200-day mean.
    pub index_deviation_pct: f64,
    pub regime: MarketRegime,
    pub new_buys_suppressed: bool,
    /// Net foreign institutional flow in crores; no live source populates
    /// this yet, so scoring treats `None` as neutral.
    pub fii_net_flow: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl MacroSnapshot {
    /// Neutral default installed when the macro refresh fails.
    pub fn neutral(date: NaiveDate) -> Self {
        Self {
            date,
            vix: 15.0,
            index_price: 0.0,
            index_200d_mean: 0.0,
            index_deviation_pct: 0.0,
            regime: MarketRegime::Sideways,
            new_buys_suppressed: false,
            fii_net_flow: None,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a trade proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    PendingApproval,
    Approved,
    Rejected,
    Expired,
    Executed,
    Cancelled,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::PendingApproval => "PENDING_APPROVAL",
            TradeStatus::Approved => "APPROVED",
            TradeStatus::Rejected => "REJECTED",
            TradeStatus::Expired => "EXPIRED",
            TradeStatus::Executed => "EXECUTED",
            TradeStatus::Cancelled => "CANCELLED",
            TradeStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING_APPROVAL" => Some(TradeStatus::PendingApproval),
            "APPROVED" => Some(TradeStatus::Approved),
            "REJECTED" => Some(TradeStatus::Rejected),
            "EXPIRED" => Some(TradeStatus::Expired),
            "EXECUTED" => Some(TradeStatus::Executed),
            "CANCELLED" => Some(TradeStatus::Cancelled),
            "FAILED" => Some(TradeStatus::Failed),
            _ => None,
        }
    }

    /// Legal transitions form a DAG; in particular nothing ever returns to
    /// `PendingApproval`.
    pub fn can_transition(self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        matches!(
            (self, next),
            (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (PendingApproval, Expired)
                | (Approved, Executed)
                | (Approved, Failed)
                | (Executed, Cancelled)
        )
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four sub-scores in [0,100] and their weighted composite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub fundamental: f64,
    pub technical: f64,
    pub macro_regime: f64,
    pub risk_reward: f64,
    pub composite: f64,
}

/// Relative weights of the four sub-scores; must sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub fundamental: f64,
    pub technical: f64,
    pub macro_regime: f64,
    pub risk_reward: f64,
}

impl ConfidenceWeights {
    pub fn sum(&self) -> f64 {
        self.fundamental + self.technical + self.macro_regime + self.risk_reward
    }

    pub fn composite(&self, f: f64, t: f64, m: f64, rr: f64) -> f64 {
        (f * self.fundamental + t * self.technical + m * self.macro_regime + rr * self.risk_reward)
            .clamp(0.0, 100.0)
    }
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            fundamental: 0.35,
            technical: 0.30,
            macro_regime: 0.20,
            risk_reward: 0.15,
        }
    }
}

/// A high-conviction trade proposal awaiting operator decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeProposal {
    /// Stable `TRD-` identifier, assigned once at generation.
    pub id: String,
    pub symbol: String,
    pub exchange: Exchange,
    pub token: String,
    pub side: TradeSide,
    pub entry_price: f64,
    pub target_price: f64,
    pub stop_loss: f64,
    pub risk_reward: f64,
    pub confidence: ConfidenceScore,
    pub capital_allocation: f64,
    pub allocation_pct: f64,
    pub cash_buffer_safe: bool,
    pub sector: String,
    pub fundamental_summary: String,
    pub technical_summary: String,
    pub macro_summary: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TradeStatus,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLossHit,
    MaxDrawdown,
    TargetBooked,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLossHit => "STOP_LOSS_HIT",
            ExitReason::MaxDrawdown => "MAX_DRAWDOWN",
            ExitReason::TargetBooked => "TARGET_BOOKED",
            ExitReason::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STOP_LOSS_HIT" => Some(ExitReason::StopLossHit),
            "MAX_DRAWDOWN" => Some(ExitReason::MaxDrawdown),
            "TARGET_BOOKED" => Some(ExitReason::TargetBooked),
            "MANUAL" => Some(ExitReason::Manual),
            _ => None,
        }
    }
}

/// An open (or closed) position created from an executed proposal.
///
/// `current_stop` is monotone non-decreasing for the life of the position and
/// the position monitor is its only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub proposal_id: String,
    pub symbol: String,
    pub exchange: Exchange,
    pub token: String,
    pub sector: String,
    pub entry_price: f64,
    pub quantity: i64,
    pub invested: f64,
    pub initial_stop: f64,
    pub current_stop: f64,
    pub target: f64,
    pub current_price: f64,
    pub active: bool,
    pub entry_time: DateTime<Utc>,
    /// One-time flags so the monitor alerts only once per position.
    pub partial_profit_suggested: bool,
    pub target_notified: bool,
    pub broker_order_id: Option<String>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_pct: Option<f64>,
}

impl Position {
    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.entry_price) * self.quantity as f64
    }

    pub fn gain_pct(&self) -> f64 {
        if self.entry_price > 0.0 {
            (self.current_price - self.entry_price) / self.entry_price * 100.0
        } else {
            0.0
        }
    }
}
