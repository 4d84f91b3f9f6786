use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// One OHLC sample. `timestamp` is the bar open time in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub timestamp: i64,
}

impl Bar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            timestamp,
        }
    }

    /// `low <= open, close <= high`. Upstream data is not rejected when this
    /// fails, only reported.
    pub fn is_well_formed(&self) -> bool {
        self.low <= self.open.min(self.close) && self.open.max(self.close) <= self.high
    }
}

/// Where a window's bars came from. Synthetic windows only exist to keep the
/// indicator path running while the live feed is down and must never be
/// passed off as market data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    Live,
    Synthetic,
}

/// Bars for one instrument, oldest first, bounded by `capacity`.
#[derive(Debug, Clone)]
pub struct BarWindow {
    pub instrument: String,
    pub source: DataSource,
    capacity: usize,
    bars: VecDeque<Bar>,
}

impl BarWindow {
    pub fn new(instrument: impl Into<String>, capacity: usize, source: DataSource) -> Self {
        let capacity = capacity.max(1);
        Self {
            instrument: instrument.into(),
            source,
            capacity,
            bars: VecDeque::with_capacity(capacity),
        }
    }

    /// Builds a window from bars in any order. Bars are sorted by timestamp
    /// and only the most recent `capacity` are kept.
    pub fn from_bars(
        instrument: impl Into<String>,
        capacity: usize,
        source: DataSource,
        mut bars: Vec<Bar>,
    ) -> Self {
        bars.sort_by_key(|bar| bar.timestamp);
        let mut window = Self::new(instrument, capacity, source);
        for bar in bars {
            window.push(bar);
        }
        window
    }

    /// Appends a bar, evicting the oldest one when full.
    pub fn push(&mut self, bar: Bar) {
        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|bar| bar.close).collect()
    }

    pub fn is_synthetic(&self) -> bool {
        self.source == DataSource::Synthetic
    }
}

/// Random-walk placeholder bars for degraded mode.
pub struct SyntheticBars {
    rng: fastrand::Rng,
    start_price: f64,
    step: f64,
}

impl SyntheticBars {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
            start_price: 1.1,
            step: 0.0005,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            ..Self::new()
        }
    }

    /// Generates `count` consecutive bars ending at the current bar slot.
    pub fn window(&mut self, instrument: &str, timeframe_seconds: u64, count: usize) -> BarWindow {
        let timeframe = timeframe_seconds.max(1) as i64;
        let now = Utc::now().timestamp();
        let last_open = now - now.rem_euclid(timeframe);
        let first_open = last_open - timeframe * (count.saturating_sub(1) as i64);

        let mut window = BarWindow::new(instrument, count, DataSource::Synthetic);
        let mut price = self.start_price * (0.9 + 0.2 * self.rng.f64());
        for i in 0..count {
            let open = price;
            let close = (open + self.step * (self.rng.f64() * 2.0 - 1.0)).max(self.step);
            let wick = self.step * self.rng.f64();
            let high = open.max(close) + wick;
            let low = (open.min(close) - wick).max(0.0);
            window.push(Bar::new(first_open + timeframe * i as i64, open, high, low, close));
            price = close;
        }

        debug!(
            "Generated {} synthetic bars for {} ending at {}",
            window.len(),
            instrument,
            last_open
        );
        window
    }
}

impl Default for SyntheticBars {
    fn default() -> Self {
        Self::new()
    }
}
