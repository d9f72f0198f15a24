use serde::{Deserialize, Serialize};

use agent_core::{AgentConfig, OrderType, Position, TradeProposal};

#[cfg(test)]
mod tests;

/// Portfolio state the gate is evaluated against. The validator itself is
/// stateless: same proposal, same context, same verdict.
#[derive(Debug, Clone)]
pub struct RiskContext<'a> {
    pub open_positions: &'a [Position],
    pub portfolio_value: f64,
    pub new_buys_this_week: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskValidation {
    pub passed: bool,
    pub failures: Vec<String>,
    pub warnings: Vec<String>,
}

/// Apply every hard rule and advisory to a proposal. Failures block the
/// proposal before it reaches the operator; warnings ride along in the report.
pub fn validate(
    proposal: &TradeProposal,
    context: &RiskContext<'_>,
    config: &AgentConfig,
) -> RiskValidation {
    let mut failures: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let entry = proposal.entry_price;
    let stop_pct = if entry > 0.0 {
        (entry - proposal.stop_loss) / entry * 100.0
    } else {
        0.0
    };

    // 1. Penny-stock floor
    if entry < config.filters.min_stock_price {
        failures.push(format!(
            "Entry ₹{:.2} below minimum stock price ₹{:.2}",
            entry, config.filters.min_stock_price
        ));
    }

    // 2. Risk-reward floor
    if proposal.risk_reward < config.risk.min_risk_reward_ratio {
        failures.push(format!(
            "Risk-reward {:.2} below minimum {:.2}",
            proposal.risk_reward, config.risk.min_risk_reward_ratio
        ));
    }

    // 3. Stop distance inside the configured band
    if stop_pct < config.risk.min_stop_loss_pct || stop_pct > config.risk.max_stop_loss_pct {
        failures.push(format!(
            "Stop distance {:.1}% outside [{:.1}%, {:.1}%]",
            stop_pct, config.risk.min_stop_loss_pct, config.risk.max_stop_loss_pct
        ));
    }

    // 4. Target must beat entry on a buy
    if proposal.side == agent_core::TradeSide::Buy && proposal.target_price <= entry {
        failures.push(format!(
            "Target ₹{:.2} not above entry ₹{:.2}",
            proposal.target_price, entry
        ));
    }

    // 5. Hard single-stock cap
    if proposal.allocation_pct > config.sizing.hard_cap_single_stock_pct {
        failures.push(format!(
            "Allocation {:.1}% exceeds hard cap {:.1}%",
            proposal.allocation_pct, config.sizing.hard_cap_single_stock_pct
        ));
    }

    // 6. Open-position ceiling
    let active = context.open_positions.iter().filter(|p| p.active).count();
    if active >= config.portfolio.max_open_positions {
        failures.push(format!(
            "Already holding {active} positions (max {})",
            config.portfolio.max_open_positions
        ));
    }

    // 7. Emergency cash buffer must survive the trade
    if !proposal.cash_buffer_safe {
        failures.push("Trade would breach the emergency cash buffer".to_string());
    }

    // 8. Sector concentration
    let sector_exposure_pct = sector_exposure_pct(
        context.open_positions,
        &proposal.sector,
        context.portfolio_value,
    );
    if sector_exposure_pct + proposal.allocation_pct > config.sizing.max_sector_pct {
        failures.push(format!(
            "Sector {} exposure {:.1}% + {:.1}% exceeds cap {:.1}%",
            proposal.sector,
            sector_exposure_pct,
            proposal.allocation_pct,
            config.sizing.max_sector_pct
        ));
    }

    // 9. No averaging down
    if context
        .open_positions
        .iter()
        .any(|p| p.active && p.symbol == proposal.symbol)
    {
        failures.push(format!("Already holding an open position in {}", proposal.symbol));
    }

    // 10. Market orders are forbidden
    match OrderType::parse(&config.execution.order_type) {
        Some(OrderType::Limit) => {}
        _ => failures.push(format!(
            "Order type {:?} is not allowed (LIMIT only)",
            config.execution.order_type
        )),
    }

    // 11. Margin advisory
    if config.execution.allow_margin {
        warnings.push("Margin trading is enabled; delivery-only is recommended".to_string());
    }

    // 12. Weekly new-buy budget
    if context.new_buys_this_week >= config.risk.max_new_buys_per_week {
        failures.push(format!(
            "{} new buys already this week (max {})",
            context.new_buys_this_week, config.risk.max_new_buys_per_week
        ));
    }

    // 13. Minimum position size
    if proposal.capital_allocation < config.sizing.min_position_size {
        failures.push(format!(
            "Allocation ₹{:.0} below minimum position size ₹{:.0}",
            proposal.capital_allocation, config.sizing.min_position_size
        ));
    }

    // 14. Low-conviction advisory
    if proposal.confidence.composite < 70.0 {
        warnings.push(format!(
            "Composite confidence {:.1}% is moderate; consider a reduced size",
            proposal.confidence.composite
        ));
    }

    // 15. Wide-stop advisory
    if stop_pct > 10.0 {
        warnings.push(format!("Stop distance {stop_pct:.1}% is wide"));
    }

    RiskValidation {
        passed: failures.is_empty(),
        failures,
        warnings,
    }
}

/// Capital of open positions in a sector as a percentage of portfolio value.
pub fn sector_exposure_pct(positions: &[Position], sector: &str, portfolio_value: f64) -> f64 {
    if portfolio_value <= 0.0 {
        return 0.0;
    }
    let invested: f64 = positions
        .iter()
        .filter(|p| p.active && p.sector == sector)
        .map(|p| p.invested)
        .sum();
    invested / portfolio_value * 100.0
}
