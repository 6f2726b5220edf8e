use serde::{Deserialize, Serialize};
use ta::Next;
use ta::indicators::{BollingerBands, SimpleMovingAverage};

pub const RSI_PERIOD: usize = 14;
pub const BB_PERIOD: usize = 20;
pub const BB_STD_DEV: f64 = 2.0;
pub const TREND_LOOKBACK: usize = 5;
pub const NEUTRAL_RSI: f64 = 50.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BbStatus {
    AboveHigh,
    BelowLow,
    WithinRange,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    /// Only ever set by the thin-data fallback. `trend_of` cannot yield it.
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Technicals {
    pub rsi: f64,
    pub bb_status: BbStatus,
    pub trend: Trend,
}

/// Computes the indicator set from closes ordered oldest to newest.
pub fn calculate_technicals(closes: &[f64], current_price: f64) -> Technicals {
    Technicals {
        rsi: calculate_rsi(closes, RSI_PERIOD).unwrap_or(NEUTRAL_RSI),
        bb_status: bollinger_status(closes, current_price),
        trend: trend_of(closes),
    }
}

/// Wilder RSI: averages seeded with the mean of the first `period` changes,
/// then smoothed by `(prev * (period - 1) + x) / period`.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Option<f64> {
    // one extra close is needed to get `period` price changes
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = changes.split_at(period);

    let mut gain_seed = SimpleMovingAverage::new(period).ok()?;
    let mut loss_seed = SimpleMovingAverage::new(period).ok()?;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for &change in seed {
        avg_gain = gain_seed.next(change.max(0.0));
        avg_loss = loss_seed.next((-change).max(0.0));
    }

    let n = period as f64;
    for &change in rest {
        avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
    }

    let rsi = if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    Some(rsi).filter(|v| v.is_finite()).map(|v| v.clamp(0.0, 100.0))
}

pub fn bollinger_status(closes: &[f64], current_price: f64) -> BbStatus {
    if closes.len() < BB_PERIOD {
        return BbStatus::WithinRange;
    }
    let Ok(mut bands) = BollingerBands::new(BB_PERIOD, BB_STD_DEV) else {
        return BbStatus::WithinRange;
    };

    let mut last = None;
    for &price in closes {
        last = Some(bands.next(price));
    }

    match last {
        Some(band) if current_price > band.upper => BbStatus::AboveHigh,
        Some(band) if current_price < band.lower => BbStatus::BelowLow,
        _ => BbStatus::WithinRange,
    }
}

/// Two-state trend: latest close against the close `TREND_LOOKBACK - 1` periods before it.
pub fn trend_of(closes: &[f64]) -> Trend {
    if closes.len() < TREND_LOOKBACK {
        return Trend::Down;
    }
    let window = &closes[closes.len() - TREND_LOOKBACK..];
    if window[TREND_LOOKBACK - 1] > window[0] {
        Trend::Up
    } else {
        Trend::Down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| 2000.0 + 40.0 * ((i as f64) * 0.7).sin() + i as f64)
            .collect()
    }

    #[test]
    fn test_rsi_bounds() {
        for len in [30, 45, 50] {
            let closes = wave(len);
            let t = calculate_technicals(&closes, *closes.last().unwrap());
            assert!((0.0..=100.0).contains(&t.rsi), "rsi {} out of range", t.rsi);
            assert!(matches!(t.trend, Trend::Up | Trend::Down));
        }
    }

    #[test]
    fn test_rsi_monotonic_series() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let falling: Vec<f64> = rising.iter().rev().copied().collect();

        assert!(calculate_rsi(&rising, RSI_PERIOD).unwrap() > 70.0);
        assert!(calculate_rsi(&falling, RSI_PERIOD).unwrap() < 30.0);
    }

    // Wilder's worked example as published by StockCharts
    const WILDER_CLOSES: [f64; 33] = [
        44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03, 45.61, 46.28,
        46.28, 46.00, 46.03, 46.41, 46.22, 45.64, 46.21, 46.25, 45.71, 46.45, 45.78, 45.35, 44.03, 44.18,
        44.22, 44.57, 43.42, 42.66, 43.13,
    ];

    #[test]
    fn test_rsi_matches_wilder_reference() {
        let expected = [(15, 70.53), (16, 66.32), (20, 57.97), (26, 50.42), (27, 39.99), (33, 37.77)];
        for (len, rsi) in expected {
            let ours = calculate_rsi(&WILDER_CLOSES[..len], RSI_PERIOD).unwrap();
            assert!((ours - rsi).abs() < 0.1, "{} closes: {} vs {}", len, ours, rsi);
        }
    }

    #[test]
    fn test_rsi_defaults_to_neutral_on_short_input() {
        let closes = vec![10.0; RSI_PERIOD];
        assert_eq!(calculate_rsi(&closes, RSI_PERIOD), None);
        assert_eq!(calculate_technicals(&closes, 10.0).rsi, NEUTRAL_RSI);
    }

    #[test]
    fn test_bollinger_classification() {
        let closes = wave(50);
        assert_eq!(bollinger_status(&closes, 1_000_000.0), BbStatus::AboveHigh);
        assert_eq!(bollinger_status(&closes, 0.0), BbStatus::BelowLow);

        let mid: f64 = closes[closes.len() - BB_PERIOD..].iter().sum::<f64>() / BB_PERIOD as f64;
        assert_eq!(bollinger_status(&closes, mid), BbStatus::WithinRange);
    }

    #[test]
    fn test_bollinger_short_input_is_within_range() {
        let closes = vec![1.0; BB_PERIOD - 1];
        assert_eq!(bollinger_status(&closes, 500.0), BbStatus::WithinRange);
    }

    #[test]
    fn test_trend_compares_five_periods() {
        let mut closes = vec![100.0; 30];
        closes[25] = 90.0;
        closes[29] = 95.0;
        assert_eq!(trend_of(&closes), Trend::Up);

        closes[29] = 90.0;
        assert_eq!(trend_of(&closes), Trend::Down);
    }

    #[test]
    fn test_rsi_one_sided_moves() {
        let flat = vec![2000.0; 30];
        assert_eq!(calculate_rsi(&flat, RSI_PERIOD), Some(100.0));

        let mut dip = vec![2000.0; 30];
        dip[29] = 1990.0;
        assert_eq!(calculate_rsi(&dip, RSI_PERIOD), Some(0.0));
    }

    #[test]
    fn test_flat_series_never_sideways() {
        let closes = vec![2000.0; 30];
        let t = calculate_technicals(&closes, 2000.0);
        assert_eq!(t.trend, Trend::Down);
        assert_eq!(t.bb_status, BbStatus::WithinRange);
    }
}
