//! Threshold policy turning an oscillator reading into a directional signal.

use crate::config::SignalConfig;
use crate::market_data::{BarWindow, DataSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Binary-option label shown to subscribers.
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Up => "CALL",
            Direction::Down => "PUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An actionable alert. Built once by the detector, consumed once by the
/// dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: String,
    pub direction: Direction,
    pub confidence: f64,
    pub indicator_value: f64,
    pub price: f64,
    pub produced_at: DateTime<Utc>,
    pub source: DataSource,
}

impl Signal {
    pub fn is_synthetic(&self) -> bool {
        self.source == DataSource::Synthetic
    }
}

#[derive(Debug, Clone)]
pub struct SignalDetector {
    oversold: f64,
    overbought: f64,
    max_confidence: f64,
    min_confidence: f64,
}

impl SignalDetector {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            oversold: config.oversold,
            overbought: config.overbought,
            max_confidence: config.max_confidence,
            min_confidence: config.min_confidence,
        }
    }

    /// Classify an oscillator reading.
    ///
    /// Below `oversold` is an Up signal with confidence
    /// `min(max_confidence, 100 - (oversold - value))`, above `overbought` a
    /// Down signal with `min(max_confidence, 100 - (value - overbought))`.
    /// Anything at or under `min_confidence` is dropped.
    pub fn classify(&self, instrument: &str, oscillator: f64, price: f64) -> Option<Signal> {
        let (direction, raw_confidence) = if oscillator < self.oversold {
            (Direction::Up, 100.0 - (self.oversold - oscillator))
        } else if oscillator > self.overbought {
            (Direction::Down, 100.0 - (oscillator - self.overbought))
        } else {
            return None;
        };

        let confidence = raw_confidence.min(self.max_confidence);
        if confidence <= self.min_confidence {
            return None;
        }

        Some(Signal {
            instrument: instrument.to_string(),
            direction,
            confidence,
            indicator_value: oscillator,
            price,
            produced_at: Utc::now(),
            source: DataSource::Live,
        })
    }

    /// Classify the reading for `window`, priced at its last close and tagged
    /// with the window's data source.
    pub fn detect(&self, window: &BarWindow, oscillator: f64) -> Option<Signal> {
        let price = window.last()?.close;
        self.classify(&window.instrument, oscillator, price)
            .map(|signal| Signal {
                source: window.source,
                ..signal
            })
    }
}

impl Default for SignalDetector {
    fn default() -> Self {
        Self::new(&SignalConfig::default())
    }
}
