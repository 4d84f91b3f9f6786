use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,
    /// Key of the `key:"value"` pair holding the session token in the
    /// credential blob.
    #[serde(default = "default_session_key")]
    pub session_key: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,
    #[serde(default = "default_fetch_catalog_on_connect")]
    pub fetch_catalog_on_connect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_instruments")]
    pub instruments: Vec<String>,
    #[serde(default = "default_timeframe_seconds")]
    pub timeframe_seconds: u64,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_instrument_pause_secs")]
    pub instrument_pause_secs: u64,
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_recovery_backoff_secs")]
    pub recovery_backoff_secs: u64,
    /// Substitute random-walk bars when live data is unavailable.
    #[serde(default = "default_synthetic_fallback")]
    pub synthetic_fallback: bool,
    /// Scan the catalog reported by the feed instead of `instruments` when
    /// the feed has provided one.
    #[serde(default)]
    pub use_feed_catalog: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_oversold")]
    pub oversold: f64,
    #[serde(default = "default_overbought")]
    pub overbought: f64,
    #[serde(default = "default_max_confidence")]
    pub max_confidence: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_telegram_api_url")]
    pub telegram_api_url: String,
    /// Subscribers registered at startup, before any front-end action.
    #[serde(default)]
    pub subscribers: Vec<i64>,
}

fn default_feed_url() -> String {
    "wss://api-eu.po.market/socket.io/?EIO=4&transport=websocket".to_string()
}

fn default_session_key() -> String {
    "session".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_keep_alive_interval_secs() -> u64 {
    20
}

fn default_fetch_catalog_on_connect() -> bool {
    true
}

fn default_instruments() -> Vec<String> {
    ["EURUSD_otc", "GBPUSD_otc", "USDJPY_otc", "BTCUSD_otc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timeframe_seconds() -> u64 {
    60
}

fn default_window_size() -> usize {
    100
}

fn default_instrument_pause_secs() -> u64 {
    2 // keeps upstream request rate low
}

fn default_cycle_interval_secs() -> u64 {
    60
}

fn default_recovery_backoff_secs() -> u64 {
    10
}

fn default_synthetic_fallback() -> bool {
    true
}

fn default_rsi_period() -> usize {
    14
}

fn default_oversold() -> f64 {
    30.0
}

fn default_overbought() -> f64 {
    70.0
}

fn default_max_confidence() -> f64 {
    85.0
}

fn default_min_confidence() -> f64 {
    60.0
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            session_key: default_session_key(),
            request_timeout_secs: default_request_timeout_secs(),
            keep_alive_interval_secs: default_keep_alive_interval_secs(),
            fetch_catalog_on_connect: default_fetch_catalog_on_connect(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            instruments: default_instruments(),
            timeframe_seconds: default_timeframe_seconds(),
            window_size: default_window_size(),
            instrument_pause_secs: default_instrument_pause_secs(),
            cycle_interval_secs: default_cycle_interval_secs(),
            recovery_backoff_secs: default_recovery_backoff_secs(),
            synthetic_fallback: default_synthetic_fallback(),
            use_feed_catalog: false,
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            oversold: default_oversold(),
            overbought: default_overbought(),
            max_confidence: default_max_confidence(),
            min_confidence: default_min_confidence(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            telegram_api_url: default_telegram_api_url(),
            subscribers: Vec::new(),
        }
    }
}

impl FeedConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs.max(1))
    }
}

impl ScanConfig {
    pub fn instrument_pause(&self) -> Duration {
        Duration::from_secs(self.instrument_pause_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn recovery_backoff(&self) -> Duration {
        Duration::from_secs(self.recovery_backoff_secs)
    }
}

impl ScannerConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_file("config.json")
    }

    /// Reads `path`, falling back to the built-in defaults when the file
    /// does not exist. A file that exists but does not parse is an error.
    pub fn load_from_file(path: &str) -> Result<Self> {
        let config = match fs::read_to_string(path) {
            Ok(config_str) => serde_json::from_str::<ScannerConfig>(&config_str)
                .with_context(|| format!("invalid configuration in {}", path))?,
            Err(e) => {
                warn!("Could not read {} ({}), using default configuration", path, e);
                Self::default()
            }
        };

        config.validate()?;
        info!(
            "Configuration: {} instruments, {}s bars, window {}, RSI period {}",
            config.scan.instruments.len(),
            config.scan.timeframe_seconds,
            config.scan.window_size,
            config.signal.rsi_period
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan.instruments.is_empty() && !self.scan.use_feed_catalog {
            return Err(anyhow::anyhow!("no instruments configured"));
        }
        if self.scan.timeframe_seconds == 0 {
            return Err(anyhow::anyhow!("timeframe_seconds must be positive"));
        }
        if self.signal.rsi_period == 0 {
            return Err(anyhow::anyhow!("rsi_period must be positive"));
        }
        if self.scan.window_size < self.signal.rsi_period + 1 {
            return Err(anyhow::anyhow!(
                "window_size {} cannot hold rsi_period {} + 1 bars",
                self.scan.window_size,
                self.signal.rsi_period
            ));
        }
        if self.signal.oversold >= self.signal.overbought {
            return Err(anyhow::anyhow!(
                "oversold ({}) must be below overbought ({})",
                self.signal.oversold,
                self.signal.overbought
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ScannerConfig::default();
        assert_eq!(config.scan.instruments.len(), 4);
        assert_eq!(config.scan.instruments[0], "EURUSD_otc");
        assert_eq!(config.scan.timeframe_seconds, 60);
        assert_eq!(config.scan.window_size, 100);
        assert_eq!(config.scan.instrument_pause(), Duration::from_secs(2));
        assert_eq!(config.scan.cycle_interval(), Duration::from_secs(60));
        assert_eq!(config.scan.recovery_backoff(), Duration::from_secs(10));
        assert_eq!(config.signal.rsi_period, 14);
        assert_eq!(config.feed.session_key, "session");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "scan": { "instruments": ["X"], "cycle_interval_secs": 5 } }"#;
        let config: ScannerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.scan.instruments, vec!["X".to_string()]);
        assert_eq!(config.scan.cycle_interval_secs, 5);
        assert_eq!(config.scan.window_size, 100);
        assert_eq!(config.signal.overbought, 70.0);
        assert!(config.notifier.subscribers.is_empty());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ScannerConfig::load_from_file("/nonexistent/rsi-scanner.json").unwrap();
        assert_eq!(config.scan.window_size, 100);
    }

    #[test]
    fn test_validation_rejects_small_window() {
        let mut config = ScannerConfig::default();
        config.scan.window_size = 10;
        assert!(config.validate().is_err());

        let mut config = ScannerConfig::default();
        config.signal.oversold = 80.0;
        assert!(config.validate().is_err());
    }
}
