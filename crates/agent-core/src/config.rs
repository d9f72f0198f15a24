use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Grouped agent configuration, loaded from a single TOML file. Every field
/// has a default so a bare file (or none at all, in simulation mode) works.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub portfolio: PortfolioConfig,
    pub sizing: SizingConfig,
    pub risk: RiskConfig,
    pub signal: SignalConfig,
    pub weights: crate::types::ConfidenceWeights,
    pub filters: FilterConfig,
    pub technical: TechnicalConfig,
    pub fundamental: FundamentalConfig,
    #[serde(rename = "macro")]
    pub macro_thresholds: MacroConfig,
    pub execution: ExecutionConfig,
    pub simulation: SimulationConfig,
    pub api: ApiConfig,
    pub chat: ChatConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub total_value: f64,
    pub emergency_cash_buffer_pct: f64,
    pub max_open_positions: usize,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            total_value: 500_000.0,
            emergency_cash_buffer_pct: 10.0,
            max_open_positions: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub max_single_stock_pct: f64,
    pub max_sector_pct: f64,
    pub min_position_size: f64,
    pub hard_cap_single_stock_pct: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_single_stock_pct: 10.0,
            max_sector_pct: 25.0,
            min_position_size: 10_000.0,
            hard_cap_single_stock_pct: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_single_trade_drawdown_pct: f64,
    pub max_portfolio_drawdown_pct: f64,
    pub min_stop_loss_pct: f64,
    pub max_stop_loss_pct: f64,
    pub min_risk_reward_ratio: f64,
    pub trailing_stop_activate_pct: f64,
    pub max_new_buys_per_week: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_single_trade_drawdown_pct: 8.0,
            max_portfolio_drawdown_pct: 15.0,
            min_stop_loss_pct: 3.0,
            max_stop_loss_pct: 15.0,
            min_risk_reward_ratio: 1.5,
            trailing_stop_activate_pct: 10.0,
            max_new_buys_per_week: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub min_confidence_to_notify: f64,
    pub auto_execute_threshold: f64,
    pub approval_window_minutes: i64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_confidence_to_notify: 60.0,
            auto_execute_threshold: 90.0,
            approval_window_minutes: 240,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_stock_price: f64,
    /// Minimum total traded value for the day, in rupees.
    pub min_avg_daily_volume: f64,
    pub include_secondary_exchange: bool,
    pub max_analysis_universe: usize,
    /// Symbols admitted unconditionally, ahead of filtered candidates.
    pub watchlist: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_stock_price: 50.0,
            min_avg_daily_volume: 10_000_000.0,
            include_secondary_exchange: false,
            max_analysis_universe: 500,
            watchlist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalConfig {
    pub ma_long: usize,
    pub ma_mid: usize,
    pub ma_short: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub volume_ma_period: usize,
    /// Maximum percent extension above the long MA before the trend is
    /// considered overheated.
    pub max_extension_above_long_ma_pct: f64,
}

impl Default for TechnicalConfig {
    fn default() -> Self {
        Self {
            ma_long: 200,
            ma_mid: 50,
            ma_short: 20,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            volume_ma_period: 20,
            max_extension_above_long_ma_pct: 25.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundamentalConfig {
    /// Debt-to-equity above this is an immediate disqualifier.
    pub max_debt_to_equity: f64,
    pub min_cagr_years: usize,
}

impl Default for FundamentalConfig {
    fn default() -> Self {
        Self {
            max_debt_to_equity: 2.0,
            min_cagr_years: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroConfig {
    /// VIX above this suppresses all new buys.
    pub vix_no_buys: f64,
    pub vix_caution: f64,
    pub vix_favorable: f64,
}

impl Default for MacroConfig {
    fn default() -> Self {
        Self {
            vix_no_buys: 25.0,
            vix_caution: 20.0,
            vix_favorable: 15.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub auto_mode: bool,
    pub order_type: String,
    pub allow_margin: bool,
    pub order_fill_timeout_minutes: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            auto_mode: false,
            order_type: "LIMIT".to_string(),
            allow_margin: false,
            order_fill_timeout_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub enabled: bool,
    pub virtual_balance: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            virtual_balance: 500_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub chat_id: i64,
    pub poll_interval_secs: u64,
    /// Server-side long-poll wait; kept under the client read timeout.
    pub poll_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            chat_id: 0,
            poll_interval_secs: 2,
            poll_timeout_secs: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory for local state files (chat offset, sqlite default path).
    pub state_dir: String,
    pub history_days: i64,
    pub quote_batch_size: usize,
    pub history_concurrency: usize,
    pub fundamental_concurrency: usize,
    pub refresh_deadline_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            state_dir: "data".to_string(),
            history_days: 365,
            quote_batch_size: 250,
            history_concurrency: 10,
            fundamental_concurrency: 5,
            refresh_deadline_secs: 600,
        }
    }
}

impl AgentConfig {
    /// Load from a TOML file; a missing file yields the defaults (useful in
    /// simulation mode).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let weight_sum = self.weights.sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            anyhow::bail!("confidence weights must sum to 1.0, got {weight_sum}");
        }
        if self.risk.min_stop_loss_pct <= 0.0
            || self.risk.max_stop_loss_pct <= self.risk.min_stop_loss_pct
        {
            anyhow::bail!(
                "stop-loss bounds invalid: min {} / max {}",
                self.risk.min_stop_loss_pct,
                self.risk.max_stop_loss_pct
            );
        }
        if self.sizing.max_single_stock_pct > self.sizing.hard_cap_single_stock_pct {
            anyhow::bail!("max_single_stock_pct exceeds hard_cap_single_stock_pct");
        }
        if self.portfolio.total_value <= 0.0 {
            anyhow::bail!("portfolio total_value must be positive");
        }
        if crate::broker::OrderType::parse(&self.execution.order_type).is_none() {
            anyhow::bail!("unrecognised order_type {:?}", self.execution.order_type);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AgentConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_weight_sum() {
        let mut config = AgentConfig::default();
        config.weights.fundamental = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_stop_bounds() {
        let mut config = AgentConfig::default();
        config.risk.min_stop_loss_pct = 12.0;
        config.risk.max_stop_loss_pct = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_grouped_toml() {
        let raw = r#"
            [portfolio]
            total_value = 1000000.0
            max_open_positions = 8

            [weights]
            fundamental = 0.4
            technical = 0.3
            macro_regime = 0.2
            risk_reward = 0.1

            [filters]
            watchlist = ["RELIANCE", "TCS"]

            [simulation]
            enabled = false
        "#;
        let config: AgentConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.portfolio.max_open_positions, 8);
        assert_eq!(config.filters.watchlist, vec!["RELIANCE", "TCS"]);
        assert!(!config.simulation.enabled);
        // Untouched groups fall back to defaults
        assert_eq!(config.technical.ma_long, 200);
    }
}
