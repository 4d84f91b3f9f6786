#![allow(dead_code)]

use async_trait::async_trait;
use rsi_scanner::config::ScannerConfig;
use rsi_scanner::connection::{FeedRequest, FeedTransport, MarketFeed};
use rsi_scanner::dispatcher::Dispatcher;
use rsi_scanner::error::{DeliveryError, FeedError};
use rsi_scanner::notifier::Notifier;
use rsi_scanner::scanner::ScanScheduler;
use rsi_scanner::subscribers::{SubscriberId, SubscriberRegistry};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

pub const CREDENTIALS: &str = r#"42["auth",{"session":"test-session","isDemo":1}]"#;

#[derive(Default)]
pub struct FeedScript {
    pub series: HashMap<String, Vec<f64>>,
    pub open_failures: VecDeque<FeedError>,
    pub panic_once_on: Option<String>,
    pub fail_requests: bool,
    pub requests: Vec<String>,
    pub opens: usize,
    pub pings: usize,
}

/// In-memory feed serving fixed close series per instrument.
pub struct FakeTransport {
    pub script: Arc<Mutex<FeedScript>>,
}

#[async_trait]
impl FeedTransport for FakeTransport {
    async fn open(&mut self, _session_token: &str) -> Result<(), FeedError> {
        let mut script = self.script.lock().unwrap();
        script.opens += 1;
        match script.open_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn request(&mut self, request: &FeedRequest) -> Result<String, FeedError> {
        let (payload, should_panic) = {
            let mut script = self.script.lock().unwrap();
            match request {
                FeedRequest::Assets => {
                    let mut names: Vec<&String> = script.series.keys().collect();
                    names.sort();
                    (Ok(json!(names).to_string()), false)
                }
                FeedRequest::Candles { asset, .. } => {
                    script.requests.push(asset.clone());
                    let should_panic = script.panic_once_on.as_deref() == Some(asset.as_str());
                    if should_panic {
                        script.panic_once_on = None;
                    }
                    let payload = if script.fail_requests {
                        Err(FeedError::Transport("connection reset".to_string()))
                    } else {
                        Ok(script
                            .series
                            .get(asset)
                            .map(|closes| candles_json(closes))
                            .unwrap_or_else(|| "<html>bad gateway</html>".to_string()))
                    };
                    (payload, should_panic)
                }
            }
        };
        if should_panic {
            panic!("injected fault while fetching");
        }
        payload
    }

    async fn ping(&mut self) -> Result<(), FeedError> {
        self.script.lock().unwrap().pings += 1;
        Ok(())
    }

    async fn close(&mut self) {}
}

pub fn candles_json(closes: &[f64]) -> String {
    let candles: Vec<serde_json::Value> = closes
        .iter()
        .enumerate()
        .map(|(i, c)| {
            json!({
                "time": 1_700_000_000i64 + i as i64 * 60,
                "open": c, "high": c + 0.0005, "low": c - 0.0005, "close": c
            })
        })
        .collect();
    json!({ "candles": candles }).to_string()
}

/// 100 closes oscillating around 1.10 whose last 15 values strictly fall.
pub fn falling_tail_series() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..85)
        .map(|i| if i % 2 == 0 { 1.1000 } else { 1.1010 })
        .collect();
    closes.extend((1..=15).map(|i| 1.1000 - i as f64 * 0.0010));
    closes
}

pub fn rising_series(len: usize) -> Vec<f64> {
    (0..len).map(|i| 1.0 + i as f64 * 0.001).collect()
}

pub fn flat_alternating_series(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| if i % 2 == 0 { 1.2 } else { 1.201 })
        .collect()
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(SubscriberId, String)>>,
    pub unreachable: HashSet<SubscriberId>,
}

impl RecordingNotifier {
    pub fn failing_for(ids: impl IntoIterator<Item = SubscriberId>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            unreachable: ids.into_iter().collect(),
        }
    }

    pub fn messages(&self) -> Vec<(SubscriberId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, subscriber: SubscriberId, text: &str) -> Result<(), DeliveryError> {
        if self.unreachable.contains(&subscriber) {
            return Err(DeliveryError {
                subscriber,
                reason: "chat not found".to_string(),
            });
        }
        self.sent.lock().unwrap().push((subscriber, text.to_string()));
        Ok(())
    }
}

pub fn test_config(instruments: &[&str]) -> ScannerConfig {
    let mut config = ScannerConfig::default();
    config.scan.instruments = instruments.iter().map(|s| s.to_string()).collect();
    config.feed.fetch_catalog_on_connect = false;
    config
}

pub struct Harness {
    pub scheduler: ScanScheduler,
    pub script: Arc<Mutex<FeedScript>>,
    pub registry: Arc<SubscriberRegistry>,
    pub notifier: Arc<RecordingNotifier>,
    pub feed: Arc<MarketFeed>,
}

pub fn harness(
    config: &ScannerConfig,
    script: FeedScript,
    notifier: RecordingNotifier,
    subscribers: &[SubscriberId],
    credentials: &str,
) -> Harness {
    let script = Arc::new(Mutex::new(script));
    let transport = FakeTransport {
        script: script.clone(),
    };
    let feed = Arc::new(MarketFeed::new(config.feed.clone(), Box::new(transport)));
    let registry = Arc::new(SubscriberRegistry::with_members(subscribers.iter().copied()));
    let notifier = Arc::new(notifier);
    let dispatcher = Dispatcher::new(registry.clone(), notifier.clone());
    let scheduler = ScanScheduler::new(config, feed.clone(), dispatcher, credentials);
    Harness {
        scheduler,
        script,
        registry,
        notifier,
        feed,
    }
}
