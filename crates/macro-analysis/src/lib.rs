use serde::{Deserialize, Serialize};

use agent_core::config::MacroConfig;
use agent_core::{MacroSnapshot, MarketRegime};

/// Typed result record of the macro scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroReport {
    pub score: f64,
    /// Set when market conditions suppress all new buys; the score is 0 and
    /// the signal cycle emits nothing.
    pub suppressed: bool,
    /// Non-negative penalty the signal engine subtracts from the macro
    /// sub-score before weighting.
    pub confidence_penalty: f64,
    pub regime: MarketRegime,
    pub summary: String,
}

/// Score the market regime on a 0–100 scale.
pub fn score(snapshot: &MacroSnapshot, config: &MacroConfig) -> MacroReport {
    if snapshot.new_buys_suppressed {
        return MacroReport {
            score: 0.0,
            suppressed: true,
            confidence_penalty: 0.0,
            regime: snapshot.regime,
            summary: format!(
                "New buys suppressed (VIX {:.1}, index {:.1}% vs 200-day mean)",
                snapshot.vix, snapshot.index_deviation_pct
            ),
        };
    }

    let mut score: f64 = 50.0;
    let mut notes: Vec<String> = Vec::new();

    // Volatility bands
    if snapshot.vix < config.vix_favorable {
        score += 20.0;
        notes.push(format!("+ VIX calm ({:.1})", snapshot.vix));
    } else if snapshot.vix < config.vix_caution {
        score += 8.0;
        notes.push(format!("+ VIX moderate ({:.1})", snapshot.vix));
    } else {
        score -= 15.0;
        notes.push(format!("- VIX elevated ({:.1})", snapshot.vix));
    }

    // Broad-index position vs its 200-day mean
    let dev = snapshot.index_deviation_pct;
    if dev >= 5.0 {
        score += 15.0;
        notes.push(format!("+ Index {dev:.1}% above 200-day mean"));
    } else if dev >= 0.0 {
        score += 8.0;
        notes.push(format!("+ Index {dev:.1}% above 200-day mean"));
    } else if dev > -5.0 {
        score -= 8.0;
        notes.push(format!("- Index {dev:.1}% below 200-day mean"));
    } else {
        score -= 20.0;
        notes.push(format!("- Index {dev:.1}% below 200-day mean"));
    }

    // Foreign-flow heuristic; stays neutral until a real source populates it.
    match snapshot.fii_net_flow {
        Some(flow) if flow > 0.0 => {
            score += 5.0;
            notes.push("+ FII net buying".to_string());
        }
        Some(flow) if flow < 0.0 => {
            score -= 5.0;
            notes.push("- FII net selling".to_string());
        }
        _ => {}
    }

    // Regime bonus/penalty
    let (regime_adj, regime_note) = match snapshot.regime {
        MarketRegime::Bull => (10.0, "+ Bull regime"),
        MarketRegime::Bear => (-20.0, "- Bear regime"),
        MarketRegime::HighVolatility => (-10.0, "- High-volatility regime"),
        MarketRegime::Sideways => (0.0, "Sideways regime"),
    };
    score += regime_adj;
    notes.push(regime_note.to_string());

    let confidence_penalty = if snapshot.regime == MarketRegime::HighVolatility {
        10.0
    } else if snapshot.vix >= config.vix_caution {
        5.0
    } else {
        0.0
    };

    MacroReport {
        score: score.clamp(0.0, 100.0),
        suppressed: false,
        confidence_penalty,
        regime: snapshot.regime,
        summary: notes.join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn snapshot(vix: f64, dev_pct: f64, regime: MarketRegime, suppressed: bool) -> MacroSnapshot {
        MacroSnapshot {
            date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            vix,
            index_price: 22_000.0 * (1.0 + dev_pct / 100.0),
            index_200d_mean: 22_000.0,
            index_deviation_pct: dev_pct,
            regime,
            new_buys_suppressed: suppressed,
            fii_net_flow: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn suppression_short_circuits() {
        let report = score(
            &snapshot(28.0, -6.0, MarketRegime::Bear, true),
            &MacroConfig::default(),
        );
        assert!(report.suppressed);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn calm_bull_market_scores_high() {
        let report = score(
            &snapshot(12.0, 6.0, MarketRegime::Bull, false),
            &MacroConfig::default(),
        );
        // 50 + 20 (VIX) + 15 (deviation) + 10 (bull) = 95
        assert!((report.score - 95.0).abs() < 1e-9);
        assert_eq!(report.confidence_penalty, 0.0);
    }

    #[test]
    fn stressed_market_scores_low_with_penalty() {
        let report = score(
            &snapshot(22.0, -3.0, MarketRegime::HighVolatility, false),
            &MacroConfig::default(),
        );
        // 50 - 15 (VIX) - 8 (deviation) - 10 (regime) = 17
        assert!((report.score - 17.0).abs() < 1e-9);
        assert!((report.confidence_penalty - 10.0).abs() < 1e-9);
    }

    #[test]
    fn fii_flow_neutral_when_absent() {
        let base = score(
            &snapshot(16.0, 1.0, MarketRegime::Sideways, false),
            &MacroConfig::default(),
        );
        let mut with_flow = snapshot(16.0, 1.0, MarketRegime::Sideways, false);
        with_flow.fii_net_flow = Some(1_500.0);
        let flowed = score(&with_flow, &MacroConfig::default());
        assert!((flowed.score - base.score - 5.0).abs() < 1e-9);
    }

    #[test]
    fn score_never_leaves_bounds() {
        let report = score(
            &snapshot(24.9, -20.0, MarketRegime::Bear, false),
            &MacroConfig::default(),
        );
        assert!((0.0..=100.0).contains(&report.score));
    }
}
