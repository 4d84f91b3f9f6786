//! Relative strength oscillator
//!
//! Wilder-style RSI over the closes of a bar window, using simple moving
//! averages of gains and losses across the trailing period.

use crate::market_data::BarWindow;
use statrs::statistics::Statistics;

pub const DEFAULT_RSI_PERIOD: usize = 14;

/// A stateless indicator computed over one bar window.
pub trait Indicator: Send + Sync {
    fn name(&self) -> &str;

    /// Minimum number of bars needed before `compute` returns a value.
    fn min_bars(&self) -> usize;

    fn compute(&self, window: &BarWindow) -> Option<f64>;
}

#[derive(Debug, Clone)]
pub struct RsiIndicator {
    period: usize,
}

impl RsiIndicator {
    pub fn new() -> Self {
        Self {
            period: DEFAULT_RSI_PERIOD,
        }
    }

    pub fn with_period(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Default for RsiIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicator for RsiIndicator {
    fn name(&self) -> &str {
        "RSI"
    }

    fn min_bars(&self) -> usize {
        self.period + 1
    }

    fn compute(&self, window: &BarWindow) -> Option<f64> {
        compute_oscillator(window, self.period)
    }
}

/// Calculate the oscillator for the most recent bar of `window`
///
/// # Arguments
/// * `window` - Bars for one instrument, oldest first
/// * `period` - Number of trailing close-to-close deltas to average
///
/// # Returns
/// * `Some(value)` in `[0, 100]`, or `None` when the window holds fewer
///   than `period + 1` bars
pub fn compute_oscillator(window: &BarWindow, period: usize) -> Option<f64> {
    oscillator_from_closes(&window.closes(), period)
}

pub fn oscillator_from_closes(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = closes[closes.len() - period - 1..]
        .windows(2)
        .map(|w| w[1] - w[0])
        .collect();

    let avg_gain = deltas.iter().map(|d| d.max(0.0)).mean();
    let avg_loss = deltas.iter().map(|d| (-d).max(0.0)).mean();

    // No losses means infinite relative strength.
    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let relative_strength = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + relative_strength))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{Bar, DataSource};
    use proptest::prelude::*;

    fn window_from_closes(closes: &[f64]) -> BarWindow {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(i as i64 * 60, c, c, c, c))
            .collect();
        BarWindow::from_bars("TEST", closes.len().max(1), DataSource::Live, bars)
    }

    #[test]
    fn test_short_window_is_undefined() {
        let closes: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        assert_eq!(compute_oscillator(&window_from_closes(&closes), 14), None);
        assert_eq!(compute_oscillator(&window_from_closes(&[]), 14), None);
    }

    #[test]
    fn test_rising_prices_saturate_high() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        let value = compute_oscillator(&window_from_closes(&closes), 14).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_falling_prices_saturate_low() {
        let closes: Vec<f64> = (0..30).map(|i| 200.0 - i as f64).collect();
        let value = compute_oscillator(&window_from_closes(&closes), 14).unwrap();
        assert!(value.abs() < 1e-9);
    }

    #[test]
    fn test_balanced_moves_sit_at_midpoint() {
        // Alternating +1 / -1 over an even period: equal average gain and loss.
        let closes: Vec<f64> = (0..15)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let value = compute_oscillator(&window_from_closes(&closes), 14).unwrap();
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_window_reads_fully_overbought() {
        // Zero gains and zero losses still count as "no losses".
        let closes = vec![1.0835; 20];
        let value = compute_oscillator(&window_from_closes(&closes), 14).unwrap();
        assert_eq!(value, 100.0);
    }

    #[test]
    fn test_only_trailing_period_is_used() {
        // A long decline followed by 14 rising deltas reads as fully overbought.
        let mut closes: Vec<f64> = (0..50).map(|i| 200.0 - i as f64).collect();
        let base = *closes.last().unwrap();
        closes.extend((1..=14).map(|i| base + i as f64));
        let value = compute_oscillator(&window_from_closes(&closes), 14).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_known_value() {
        // 10 gains of 1.0 and 4 losses of 0.5 over 14 deltas:
        // avg_gain = 10/14, avg_loss = 2/14, rs = 5, rsi = 100 - 100/6
        let mut closes = vec![100.0];
        for i in 0..14 {
            let last = *closes.last().unwrap();
            closes.push(if i < 10 { last + 1.0 } else { last - 0.5 });
        }
        let value = compute_oscillator(&window_from_closes(&closes), 14).unwrap();
        assert!((value - (100.0 - 100.0 / 6.0)).abs() < 1e-9);
    }

    #[test]
    fn test_indicator_trait_reports_warmup() {
        let indicator = RsiIndicator::with_period(5);
        assert_eq!(indicator.name(), "RSI");
        assert_eq!(indicator.min_bars(), 6);
        assert_eq!(RsiIndicator::new().period(), DEFAULT_RSI_PERIOD);
    }

    proptest! {
        #[test]
        fn prop_oscillator_stays_in_range(
            closes in prop::collection::vec(0.5f64..2.0, 15..120)
        ) {
            let value = oscillator_from_closes(&closes, 14).unwrap();
            prop_assert!((0.0..=100.0).contains(&value));
        }

        #[test]
        fn prop_short_series_is_undefined(
            closes in prop::collection::vec(0.5f64..2.0, 0..15)
        ) {
            prop_assert!(oscillator_from_closes(&closes, 14).is_none());
        }
    }
}
