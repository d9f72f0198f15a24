use serde::{Deserialize, Serialize};

use agent_core::config::TechnicalConfig;
use agent_core::{StockSnapshot, MIN_HISTORY_BARS};

use crate::indicators::{macd, rsi, sma, trailing_high, trailing_low};

/// Typed result record of the technical scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalResult {
    pub close: f64,
    pub sma_short: f64,
    pub sma_mid: f64,
    pub sma_long: f64,
    pub deviation_from_long_ma_pct: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub volume: f64,
    pub avg_volume: f64,
    /// Lowest low of the trailing short window.
    pub support: f64,
    /// Highest high of the trailing short window.
    pub resistance: f64,
    pub golden_cross: bool,
    pub death_cross: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalReport {
    pub score: f64,
    pub summary: String,
    pub result: TechnicalResult,
}

/// Score a snapshot's price/volume structure on a 0–100 scale.
///
/// Returns `None` when the bar history is too short for the long moving
/// average (ingestion guarantees this never happens for cached snapshots).
pub fn analyze(snapshot: &StockSnapshot, config: &TechnicalConfig) -> Option<TechnicalReport> {
    if snapshot.bars.len() < MIN_HISTORY_BARS {
        return None;
    }

    let closes: Vec<f64> = snapshot.bars.iter().map(|b| b.close).collect();
    let lows: Vec<f64> = snapshot.bars.iter().map(|b| b.low).collect();
    let highs: Vec<f64> = snapshot.bars.iter().map(|b| b.high).collect();
    let volumes: Vec<f64> = snapshot.bars.iter().map(|b| b.volume).collect();

    let sma_long_series = sma(&closes, config.ma_long);
    let sma_mid_series = sma(&closes, config.ma_mid);
    let sma_short_series = sma(&closes, config.ma_short);
    let rsi_series = rsi(&closes, config.rsi_period);
    let macd_series = macd(&closes, 12, 26, 9);
    let volume_sma = sma(&volumes, config.volume_ma_period);

    let (sma_long, prev_long) = last_two(&sma_long_series)?;
    let (sma_mid, prev_mid) = last_two(&sma_mid_series)?;
    let sma_short = *sma_short_series.last()?;
    let rsi_now = *rsi_series.last()?;
    let (macd_now, prev_macd) = last_two(&macd_series.macd)?;
    let (macd_sig, prev_sig) = last_two(&macd_series.signal)?;
    let avg_volume = *volume_sma.last()?;

    let close = *closes.last()?;
    let volume = *volumes.last()?;
    let support = trailing_low(&lows, config.ma_short)?;
    let resistance = trailing_high(&highs, config.ma_short)?;

    let golden_cross = prev_mid < prev_long && sma_mid >= sma_long;
    let death_cross = prev_mid > prev_long && sma_mid <= sma_long;
    let deviation_pct = if sma_long > 0.0 {
        (close - sma_long) / sma_long * 100.0
    } else {
        0.0
    };

    let mut score: f64 = 50.0;
    let mut notes: Vec<String> = Vec::new();

    // Long-trend position
    if close > sma_long {
        if deviation_pct <= config.max_extension_above_long_ma_pct {
            score += 15.0;
            notes.push(format!("+ Above {}-DMA", config.ma_long));
        } else {
            score -= 10.0;
            notes.push(format!("- Overextended {:.1}% above {}-DMA", deviation_pct, config.ma_long));
        }
    } else {
        score -= 25.0;
        notes.push(format!("- Below {}-DMA", config.ma_long));
    }

    if close > sma_mid {
        score += 8.0;
        notes.push(format!("+ Above {}-DMA", config.ma_mid));
    }
    if close > sma_short {
        score += 5.0;
        notes.push(format!("+ Above {}-DMA", config.ma_short));
    }

    if golden_cross {
        score += 12.0;
        notes.push("+ Golden cross".to_string());
    }
    if death_cross {
        score -= 20.0;
        notes.push("- Death cross".to_string());
    }

    // RSI bands: overbought penalised, recovery off oversold rewarded most,
    // a collapsing RSI slightly penalised.
    if rsi_now > config.rsi_overbought {
        score -= 15.0;
        notes.push(format!("- RSI overbought ({rsi_now:.0})"));
    } else if rsi_now > config.rsi_oversold && rsi_now <= config.rsi_oversold + 10.0 {
        score += 8.0;
        notes.push(format!("+ RSI recovering ({rsi_now:.0})"));
    } else if rsi_now <= config.rsi_oversold {
        score -= 5.0;
        notes.push(format!("- RSI deeply oversold ({rsi_now:.0})"));
    } else {
        score += 5.0;
        notes.push(format!("+ RSI neutral ({rsi_now:.0})"));
    }

    if prev_macd <= prev_sig && macd_now > macd_sig {
        score += 10.0;
        notes.push("+ MACD bullish crossover".to_string());
    }

    if volume > avg_volume {
        score += 7.0;
        notes.push("+ Volume above average".to_string());
    } else {
        score -= 5.0;
        notes.push("- Volume below average".to_string());
    }

    Some(TechnicalReport {
        score: score.clamp(0.0, 100.0),
        summary: notes.join(", "),
        result: TechnicalResult {
            close,
            sma_short,
            sma_mid,
            sma_long,
            deviation_from_long_ma_pct: deviation_pct,
            rsi: rsi_now,
            macd: macd_now,
            macd_signal: macd_sig,
            volume,
            avg_volume,
            support,
            resistance,
            golden_cross,
            death_cross,
        },
    })
}

fn last_two(series: &[f64]) -> Option<(f64, f64)> {
    if series.len() < 2 {
        return None;
    }
    Some((series[series.len() - 1], series[series.len() - 2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{Bar, Exchange};
    use chrono::{Duration, Utc};

    fn snapshot_from_closes(closes: &[f64], volume: f64, last_volume: f64) -> StockSnapshot {
        let start = Utc::now() - Duration::days(closes.len() as i64);
        let bars: Vec<Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: start + Duration::days(i as i64),
                open: close * 0.995,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: if i == closes.len() - 1 { last_volume } else { volume },
            })
            .collect();
        let day = bars.last().unwrap().clone();
        StockSnapshot {
            symbol: "TESTCO".to_string(),
            exchange: Exchange::Nse,
            token: "1".to_string(),
            name: "TEST COMPANY".to_string(),
            last_price: day.close,
            day,
            avg_volume_20d: volume,
            avg_traded_value_20d: volume * closes.last().unwrap(),
            bars,
            fetched_at: Utc::now(),
        }
    }

    fn config() -> TechnicalConfig {
        TechnicalConfig::default()
    }

    #[test]
    fn too_few_bars_is_rejected() {
        let closes: Vec<f64> = (0..150).map(|i| 100.0 + i as f64 * 0.1).collect();
        let snap = snapshot_from_closes(&closes, 1_000_000.0, 1_000_000.0);
        assert!(analyze(&snap, &config()).is_none());
    }

    #[test]
    fn steady_uptrend_scores_above_neutral() {
        let closes: Vec<f64> = (0..260).map(|i| 100.0 + i as f64 * 0.2).collect();
        let snap = snapshot_from_closes(&closes, 1_000_000.0, 2_000_000.0);
        let report = analyze(&snap, &config()).unwrap();
        assert!(report.score > 50.0, "score {}", report.score);
        assert!(report.result.close > report.result.sma_long);
        assert!(report.result.support < report.result.close);
        assert!(report.result.resistance >= report.result.close);
    }

    #[test]
    fn downtrend_scores_below_neutral() {
        let closes: Vec<f64> = (0..260).map(|i| 300.0 - i as f64 * 0.5).collect();
        let snap = snapshot_from_closes(&closes, 1_000_000.0, 500_000.0);
        let report = analyze(&snap, &config()).unwrap();
        assert!(report.score < 50.0, "score {}", report.score);
        assert!(report.summary.contains("Below 200-DMA"));
    }

    #[test]
    fn score_stays_in_bounds() {
        // A violent crash drives every adjustment negative at once
        let mut closes: Vec<f64> = (0..240).map(|i| 100.0 + i as f64 * 0.4).collect();
        for i in 0..20 {
            closes.push(190.0 - i as f64 * 6.0);
        }
        let snap = snapshot_from_closes(&closes, 5_000_000.0, 100_000.0);
        let report = analyze(&snap, &config()).unwrap();
        assert!((0.0..=100.0).contains(&report.score));
    }

    #[test]
    fn support_is_trailing_window_low() {
        let mut closes: Vec<f64> = vec![100.0; 260];
        closes[250] = 90.0; // dip inside the 20-bar window
        let snap = snapshot_from_closes(&closes, 1_000_000.0, 1_000_000.0);
        let report = analyze(&snap, &config()).unwrap();
        assert!((report.result.support - 90.0 * 0.99).abs() < 1e-6);
    }
}
