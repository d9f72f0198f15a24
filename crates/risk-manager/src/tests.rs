#[cfg(test)]
mod validator_tests {
    use crate::{sector_exposure_pct, validate, RiskContext};
    use agent_core::{
        AgentConfig, ConfidenceScore, Exchange, Position, TradeProposal, TradeSide, TradeStatus,
    };
    use chrono::{Duration, Utc};

    fn proposal() -> TradeProposal {
        TradeProposal {
            id: "TRD-1A2B3C4D5E6F".to_string(),
            symbol: "RELIANCE".to_string(),
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
                composite: 77.0,
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

    fn position(symbol: &str, sector: &str, invested: f64) -> Position {
        Position {
            proposal_id: format!("TRD-{symbol}"),
            symbol: symbol.to_string(),
            exchange: Exchange::Nse,
            token: "1".to_string(),
            sector: sector.to_string(),
            entry_price: 100.0,
            quantity: (invested / 100.0) as i64,
            invested,
            initial_stop: 95.0,
            current_stop: 95.0,
            target: 120.0,
            current_price: 100.0,
            active: true,
            entry_time: Utc::now(),
            partial_profit_suggested: false,
            target_notified: false,
            broker_order_id: None,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            realized_pnl: None,
            realized_pnl_pct: None,
        }
    }

    fn context(positions: &[Position]) -> RiskContext<'_> {
        RiskContext {
            open_positions: positions,
            portfolio_value: 500_000.0,
            new_buys_this_week: 0,
        }
    }

    #[test]
    fn clean_proposal_passes() {
        let result = validate(&proposal(), &context(&[]), &AgentConfig::default());
        assert!(result.passed, "failures: {:?}", result.failures);
        assert!(result.warnings.is_empty(), "warnings: {:?}", result.warnings);
    }

    #[test]
    fn validation_is_idempotent() {
        let p = proposal();
        let positions = vec![position("TCS", "IT", 40_000.0)];
        let config = AgentConfig::default();
        let first = validate(&p, &context(&positions), &config);
        let second = validate(&p, &context(&positions), &config);
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_penny_stock_entry() {
        let mut p = proposal();
        p.entry_price = 20.0;
        p.stop_loss = 19.0;
        let result = validate(&p, &context(&[]), &AgentConfig::default());
        assert!(!result.passed);
        assert!(result.failures.iter().any(|f| f.contains("minimum stock price")));
    }

    #[test]
    fn rejects_poor_risk_reward() {
        let mut p = proposal();
        p.risk_reward = 1.0;
        let result = validate(&p, &context(&[]), &AgentConfig::default());
        assert!(result.failures.iter().any(|f| f.contains("Risk-reward")));
    }

    #[test]
    fn rejects_stop_outside_band() {
        let mut p = proposal();
        p.stop_loss = 99.0; // 1% stop, below the 3% minimum
        let result = validate(&p, &context(&[]), &AgentConfig::default());
        assert!(result.failures.iter().any(|f| f.contains("Stop distance")));

        let mut p = proposal();
        p.stop_loss = 80.0; // 20% stop, above the 15% maximum
        let result = validate(&p, &context(&[]), &AgentConfig::default());
        assert!(result.failures.iter().any(|f| f.contains("Stop distance")));
    }

    #[test]
    fn rejects_target_below_entry() {
        let mut p = proposal();
        p.target_price = 99.0;
        let result = validate(&p, &context(&[]), &AgentConfig::default());
        assert!(result.failures.iter().any(|f| f.contains("Target")));
    }

    #[test]
    fn rejects_allocation_above_hard_cap() {
        let mut p = proposal();
        p.allocation_pct = 20.0;
        let result = validate(&p, &context(&[]), &AgentConfig::default());
        assert!(result.failures.iter().any(|f| f.contains("hard cap")));
    }

    #[test]
    fn rejects_when_position_slots_full() {
        let positions: Vec<Position> = (0..5)
            .map(|i| position(&format!("SYM{i}"), "Misc", 10_000.0))
            .collect();
        let result = validate(&proposal(), &context(&positions), &AgentConfig::default());
        assert!(result.failures.iter().any(|f| f.contains("max 5")));
    }

    #[test]
    fn inactive_positions_do_not_count() {
        let mut positions: Vec<Position> = (0..5)
            .map(|i| position(&format!("SYM{i}"), "Misc", 10_000.0))
            .collect();
        for p in positions.iter_mut() {
            p.active = false;
        }
        let result = validate(&proposal(), &context(&positions), &AgentConfig::default());
        assert!(result.passed, "failures: {:?}", result.failures);
    }

    #[test]
    fn rejects_unsafe_cash_buffer() {
        let mut p = proposal();
        p.cash_buffer_safe = false;
        let result = validate(&p, &context(&[]), &AgentConfig::default());
        assert!(result.failures.iter().any(|f| f.contains("cash buffer")));
    }

    #[test]
    fn rejects_sector_concentration() {
        // 100k of 500k already in Energy = 20%; +10% proposal breaches 25% cap
        let positions = vec![
            position("ONGC", "Energy", 60_000.0),
            position("IOC", "Energy", 40_000.0),
        ];
        let result = validate(&proposal(), &context(&positions), &AgentConfig::default());
        assert!(result.failures.iter().any(|f| f.contains("Sector Energy")));
    }

    #[test]
    fn rejects_averaging_down() {
        let positions = vec![position("RELIANCE", "Energy", 20_000.0)];
        let result = validate(&proposal(), &context(&positions), &AgentConfig::default());
        assert!(result
            .failures
            .iter()
            .any(|f| f.contains("open position in RELIANCE")));
    }

    #[test]
    fn rejects_market_order_config() {
        let mut config = AgentConfig::default();
        config.execution.order_type = "MARKET".to_string();
        let result = validate(&proposal(), &context(&[]), &config);
        assert!(result.failures.iter().any(|f| f.contains("LIMIT only")));
    }

    #[test]
    fn warns_on_margin() {
        let mut config = AgentConfig::default();
        config.execution.allow_margin = true;
        let result = validate(&proposal(), &context(&[]), &config);
        assert!(result.passed);
        assert!(result.warnings.iter().any(|w| w.contains("Margin")));
    }

    #[test]
    fn rejects_weekly_buy_budget_exhausted() {
        let positions: Vec<Position> = Vec::new();
        let context = RiskContext {
            open_positions: &positions,
            portfolio_value: 500_000.0,
            new_buys_this_week: 3,
        };
        let result = validate(&proposal(), &context, &AgentConfig::default());
        assert!(result.failures.iter().any(|f| f.contains("new buys")));
    }

    #[test]
    fn rejects_dust_allocation() {
        let mut p = proposal();
        p.capital_allocation = 5_000.0;
        let result = validate(&p, &context(&[]), &AgentConfig::default());
        assert!(result
            .failures
            .iter()
            .any(|f| f.contains("minimum position size")));
    }

    #[test]
    fn warns_on_moderate_conviction_and_wide_stop() {
        let mut p = proposal();
        p.confidence.composite = 65.0;
        p.stop_loss = 88.0; // 12% stop: legal but wide
        let result = validate(&p, &context(&[]), &AgentConfig::default());
        assert!(result.passed, "failures: {:?}", result.failures);
        assert!(result.warnings.iter().any(|w| w.contains("reduced size")));
        assert!(result.warnings.iter().any(|w| w.contains("wide")));
    }

    #[test]
    fn sector_exposure_ignores_closed_positions() {
        let mut closed = position("ONGC", "Energy", 60_000.0);
        closed.active = false;
        let open = position("IOC", "Energy", 40_000.0);
        let exposure = sector_exposure_pct(&[closed, open], "Energy", 500_000.0);
        assert!((exposure - 8.0).abs() < 1e-9);
    }
}
