use std::sync::{Arc, RwLock};

use agent_core::Broker;

/// Computes the current total portfolio value (cash + holdings marked to
/// market). The last good value is cached; in simulation mode the configured
/// virtual balance is returned unconditionally.
pub struct PortfolioValuator {
    broker: Arc<dyn Broker>,
    simulation: bool,
    virtual_balance: f64,
    /// Used when live valuation fails and no prior value exists.
    fallback_value: f64,
    cached: RwLock<Option<f64>>,
}

impl PortfolioValuator {
    pub fn new(
        broker: Arc<dyn Broker>,
        simulation: bool,
        virtual_balance: f64,
        fallback_value: f64,
    ) -> Self {
        Self {
            broker,
            simulation,
            virtual_balance,
            fallback_value,
            cached: RwLock::new(None),
        }
    }

    /// Re-price the portfolio at the broker and cache the result. Failures
    /// keep the prior cached value; with no prior value the configured
    /// fallback is used.
    pub async fn refresh(&self) -> f64 {
        if self.simulation {
            return self.virtual_balance;
        }

        match self.value_at_broker().await {
            Ok(value) => {
                *self.cached.write().expect("valuator lock poisoned") = Some(value);
                tracing::info!("Portfolio valued at ₹{value:.0}");
                value
            }
            Err(e) => {
                tracing::warn!("Portfolio valuation failed, using last good value: {e:#}");
                self.current()
            }
        }
    }

    /// Last cached value, without touching the broker.
    pub fn current(&self) -> f64 {
        if self.simulation {
            return self.virtual_balance;
        }
        self.cached
            .read()
            .expect("valuator lock poisoned")
            .unwrap_or(self.fallback_value)
    }

    async fn value_at_broker(&self) -> anyhow::Result<f64> {
        let cash = self.broker.funds().await?;
        let holdings = self.broker.holdings().await?;
        let holdings_value: f64 = holdings.iter().map(|h| h.quantity as f64 * h.ltp).sum();
        Ok(cash + holdings_value)
    }
}
