//! Signal Generation Module
//!
//! Indicator computation and the threshold policy that turns a reading into
//! an alert. Both halves are pure: no shared state, no IO.

pub mod detector;
pub mod rsi;

pub use detector::{Direction, Signal, SignalDetector};
pub use rsi::{Indicator, RsiIndicator, compute_oscillator};
