//! Indicator kernels over daily close/volume series. All functions tolerate
//! short inputs by returning an empty vector.

/// Return val if it is finite, otherwise the fallback.
#[inline]
pub fn finite_or(val: f64, fallback: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        fallback
    }
}

/// Simple moving average; output[i] covers data[i..i+period].
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }
    let mut out = Vec::with_capacity(data.len() - period + 1);
    let mut window_sum: f64 = data[..period].iter().sum();
    out.push(finite_or(window_sum / period as f64, 0.0));
    for i in period..data.len() {
        window_sum += data[i] - data[i - period];
        out.push(finite_or(window_sum / period as f64, 0.0));
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period`
/// values; output length equals input length so MACD alignment stays simple.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }
    if data.len() < period {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        return vec![finite_or(avg, 0.0); data.len()];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = finite_or(data[..period].iter().sum::<f64>() / period as f64, 0.0);

    let mut out = vec![seed; period];
    for i in period..data.len() {
        let prev = out[i - 1];
        out.push(finite_or((data[i] - prev) * multiplier + prev, prev));
    }
    out
}

/// Wilder-smoothed RSI. Output starts after `period + 1` inputs.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);
    for w in data.windows(2) {
        let change = w[1] - w[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(gains.len() - period + 1);
    let rs_to_rsi = |gain: f64, loss: f64| {
        if loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        }
    };
    out.push(finite_or(rs_to_rsi(avg_gain, avg_loss), 50.0));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        out.push(finite_or(rs_to_rsi(avg_gain, avg_loss), 50.0));
    }
    out
}

pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
}

/// MACD(fast, slow) with an EMA signal line; both series aligned to the input
/// tail (last element corresponds to the latest close).
pub fn macd(data: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    if fast == 0 || slow == 0 || signal_period == 0 || slow <= fast || data.len() < slow {
        return MacdSeries {
            macd: vec![],
            signal: vec![],
        };
    }

    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&macd_line, signal_period);

    MacdSeries {
        macd: macd_line,
        signal: signal_line,
    }
}

/// Lowest low over the trailing `lookback` bars.
pub fn trailing_low(lows: &[f64], lookback: usize) -> Option<f64> {
    if lows.is_empty() || lookback == 0 {
        return None;
    }
    let start = lows.len().saturating_sub(lookback);
    lows[start..].iter().copied().reduce(f64::min)
}

/// Highest high over the trailing `lookback` bars.
pub fn trailing_high(highs: &[f64], lookback: usize) -> Option<f64> {
    if highs.is_empty() || lookback == 0 {
        return None;
    }
    let start = highs.len().saturating_sub(lookback);
    highs[start..].iter().copied().reduce(f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_basic() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(out.len(), 3);
        assert!((out[0] - 2.0).abs() < 1e-9);
        assert!((out[1] - 3.0).abs() < 1e-9);
        assert!((out[2] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn sma_short_input() {
        assert!(sma(&[1.0, 2.0], 5).is_empty());
        assert!(sma(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn ema_seeded_with_sma() {
        let out = ema(&[22.0, 24.0, 23.0, 25.0, 26.0], 3);
        assert_eq!(out.len(), 5);
        assert!((out[0] - 23.0).abs() < 1e-9);
        // Monotone rise once smoothing kicks in on an uptrend tail
        assert!(out[4] > out[3]);
    }

    #[test]
    fn rsi_bounded() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        for value in rsi(&closes, 14) {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn rsi_all_gains_saturates() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&closes, 14);
        assert!((out.last().unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn macd_turns_positive_in_uptrend() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.5).collect();
        let series = macd(&closes, 12, 26, 9);
        assert_eq!(series.macd.len(), closes.len());
        assert!(*series.macd.last().unwrap() > 0.0);
    }

    #[test]
    fn trailing_extremes() {
        let lows = [10.0, 8.0, 9.0, 7.5, 9.5];
        let highs = [11.0, 12.0, 10.5, 13.0, 12.5];
        assert_eq!(trailing_low(&lows, 3), Some(7.5));
        assert_eq!(trailing_high(&highs, 3), Some(13.0));
        // Lookback longer than the series falls back to the whole series
        assert_eq!(trailing_low(&lows, 50), Some(7.5));
    }
}
