use crate::config::{ScanConfig, ScannerConfig};
use crate::connection::{ConnectionState, MarketFeed};
use crate::dispatcher::Dispatcher;
use crate::error::{FeedError, ScanError};
use crate::market_data::{BarWindow, SyntheticBars};
use crate::signals::{Indicator, RsiIndicator, SignalDetector};
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scanning,
}

/// Counters for one pass over the instrument list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub scanned: usize,
    pub live_windows: usize,
    pub synthetic_windows: usize,
    pub skipped: usize,
    pub signals: usize,
    pub delivered: usize,
    pub pruned: usize,
}

/// Each started loop gets a fresh generation. Only the owner of the current
/// generation may move the state back to `Idle`.
struct Control {
    state: SchedulerState,
    generation: u64,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Control {
    fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
            generation: 0,
            stop_tx: None,
            handle: None,
        }
    }

    fn begin(&mut self, stop_tx: watch::Sender<bool>) -> u64 {
        self.generation += 1;
        self.state = SchedulerState::Scanning;
        self.stop_tx = Some(stop_tx);
        self.generation
    }

    /// Marks the run `generation` as finished. A stale generation is ignored
    /// so a newer loop keeps its `Scanning` state.
    fn finish(&mut self, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        self.state = SchedulerState::Idle;
        self.stop_tx = None;
        true
    }
}

struct ScanContext {
    config: ScanConfig,
    feed: Arc<MarketFeed>,
    indicator: Box<dyn Indicator>,
    detector: SignalDetector,
    dispatcher: Dispatcher,
    credentials: String,
    synthetic: Mutex<SyntheticBars>,
    auth_rejected: AtomicBool,
    keep_alive_interval: Duration,
}

/// Drives the scan loop. At most one loop runs per scheduler: `start` while
/// scanning is a no-op, and `stop` only takes effect between feed calls.
pub struct ScanScheduler {
    ctx: Arc<ScanContext>,
    control: Arc<Mutex<Control>>,
}

impl ScanScheduler {
    pub fn new(
        config: &ScannerConfig,
        feed: Arc<MarketFeed>,
        dispatcher: Dispatcher,
        credentials: impl Into<String>,
    ) -> Self {
        let indicator = Box::new(RsiIndicator::with_period(config.signal.rsi_period));
        Self::with_indicator(config, feed, dispatcher, credentials, indicator)
    }

    pub fn with_indicator(
        config: &ScannerConfig,
        feed: Arc<MarketFeed>,
        dispatcher: Dispatcher,
        credentials: impl Into<String>,
        indicator: Box<dyn Indicator>,
    ) -> Self {
        Self {
            ctx: Arc::new(ScanContext {
                config: config.scan.clone(),
                feed,
                indicator,
                detector: SignalDetector::new(&config.signal),
                dispatcher,
                credentials: credentials.into(),
                synthetic: Mutex::new(SyntheticBars::new()),
                auth_rejected: AtomicBool::new(false),
                keep_alive_interval: config.feed.keep_alive_interval(),
            }),
            control: Arc::new(Mutex::new(Control::new())),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        self.control.lock().await.state
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.ctx.dispatcher
    }

    /// Starts the scan loop unless one is already running. Returns whether a
    /// new loop was started.
    pub async fn start(&self) -> bool {
        let mut control = self.control.lock().await;
        if control.state == SchedulerState::Scanning {
            debug!("Scan loop already running, start ignored");
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let generation = control.begin(stop_tx);
        let ctx = self.ctx.clone();
        let control_ref = self.control.clone();
        let handle = tokio::spawn(async move {
            ctx.run(stop_rx).await;
            control_ref.lock().await.finish(generation);
            info!("Scan loop stopped");
        });
        control.handle = Some(handle);
        true
    }

    /// Asks the loop to stop and waits for it to wind down. An in-flight feed
    /// request is allowed to finish or time out first.
    pub async fn stop(&self) {
        let (stop_tx, handle, generation) = {
            let mut control = self.control.lock().await;
            (control.stop_tx.take(), control.handle.take(), control.generation)
        };

        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(true);
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Scan loop task ended abnormally: {}", e);
            }
        }
        // Covers a task that died before reaching its own `finish`.
        self.control.lock().await.finish(generation);
    }

    /// Runs a single pass over the instruments without the cycle pause.
    pub async fn scan_once(&self) -> Result<ScanReport, ScanError> {
        let (_stop_tx, mut stop_rx) = watch::channel(false);
        self.ctx.scan_cycle(&mut stop_rx).await
    }
}

impl ScanContext {
    async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        info!("Scan loop started");

        if let Err(e) = self.feed.connect(&self.credentials).await {
            match e {
                FeedError::Auth(reason) => {
                    self.auth_rejected.store(true, Ordering::Release);
                    if !self.config.synthetic_fallback {
                        error!("Market feed rejected credentials ({}), not scanning", reason);
                        return;
                    }
                    warn!(
                        "Market feed rejected credentials ({}), scanning synthetic data only",
                        reason
                    );
                }
                other => warn!("Initial connect failed, will retry each cycle: {}", other),
            }
        }

        let keep_alive = if self.auth_rejected.load(Ordering::Acquire) {
            None
        } else {
            let ctx = self.clone();
            let stop = stop.clone();
            Some(tokio::spawn(async move { ctx.keep_alive_loop(stop).await }))
        };

        loop {
            if *stop.borrow() {
                break;
            }

            let outcome = AssertUnwindSafe(self.scan_cycle(&mut stop))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ScanError::Panicked(panic_message(panic))));

            let pause = match outcome {
                Ok(report) => {
                    info!(
                        "Cycle done: {} scanned ({} live, {} synthetic, {} skipped), {} signals, {} deliveries, {} pruned",
                        report.scanned,
                        report.live_windows,
                        report.synthetic_windows,
                        report.skipped,
                        report.signals,
                        report.delivered,
                        report.pruned
                    );
                    self.config.cycle_interval()
                }
                Err(e) => {
                    error!(
                        "Scan cycle failed: {}; retrying in {}s",
                        e, self.config.recovery_backoff_secs
                    );
                    self.config.recovery_backoff()
                }
            };

            if pause_or_stop(pause, &mut stop).await {
                break;
            }
        }

        if let Some(handle) = keep_alive {
            let _ = handle.await;
        }
        self.feed.disconnect().await;
    }

    async fn keep_alive_loop(&self, mut stop: watch::Receiver<bool>) {
        loop {
            if pause_or_stop(self.keep_alive_interval, &mut stop).await {
                break;
            }
            let state = self.feed.keep_alive().await;
            debug!("Keep-alive: feed {}", state);
        }
    }

    async fn scan_cycle(&self, stop: &mut watch::Receiver<bool>) -> Result<ScanReport, ScanError> {
        let live = self.ensure_connected().await?;
        let instruments = self.instruments().await;
        let mut report = ScanReport::default();

        for instrument in &instruments {
            if *stop.borrow() {
                break;
            }
            report.scanned += 1;

            match self.load_window(instrument, live).await {
                Some(window) => {
                    if window.is_synthetic() {
                        report.synthetic_windows += 1;
                    } else {
                        report.live_windows += 1;
                    }
                    self.evaluate(&window, &mut report).await?;
                }
                None => report.skipped += 1,
            }

            if pause_or_stop(self.config.instrument_pause(), stop).await {
                break;
            }
        }

        Ok(report)
    }

    /// Returns whether live data can be requested this cycle, reconnecting
    /// if the feed dropped. Without live data the cycle proceeds on
    /// synthetic bars when allowed, otherwise it fails.
    async fn ensure_connected(&self) -> Result<bool, ScanError> {
        if self.auth_rejected.load(Ordering::Acquire) {
            return self.offline("credentials rejected".to_string());
        }

        let state = self.feed.state().await;
        if state == ConnectionState::Connected {
            return Ok(true);
        }

        info!("Market feed {}, reconnecting", state);
        match self.feed.connect(&self.credentials).await {
            Ok(_) => Ok(true),
            Err(FeedError::Auth(reason)) => {
                self.auth_rejected.store(true, Ordering::Release);
                error!("Market feed rejected credentials, no further reconnects: {}", reason);
                self.offline(reason)
            }
            Err(e) => {
                if self.config.synthetic_fallback {
                    warn!("Reconnect failed, this cycle runs on synthetic data: {}", e);
                    Ok(false)
                } else {
                    Err(ScanError::FeedUnavailable(e))
                }
            }
        }
    }

    fn offline(&self, reason: String) -> Result<bool, ScanError> {
        if self.config.synthetic_fallback {
            Ok(false)
        } else {
            Err(ScanError::FeedUnavailable(FeedError::Auth(reason)))
        }
    }

    async fn instruments(&self) -> Vec<String> {
        if self.config.use_feed_catalog {
            let catalog = self.feed.catalog().await;
            if !catalog.is_empty() {
                return catalog;
            }
        }
        self.config.instruments.clone()
    }

    async fn load_window(&self, instrument: &str, live: bool) -> Option<BarWindow> {
        let failure = if live {
            match self
                .feed
                .fetch_bars(instrument, self.config.timeframe_seconds, self.config.window_size)
                .await
            {
                Ok(window) => return Some(window),
                Err(FeedError::Parse(reason)) => {
                    warn!("No usable bars for {} this cycle: {}", instrument, reason);
                    return None;
                }
                Err(e) => e.to_string(),
            }
        } else {
            "feed offline".to_string()
        };

        if !self.config.synthetic_fallback {
            warn!("Skipping {}: {}", instrument, failure);
            return None;
        }

        warn!("Using SYNTHETIC bars for {}: {}", instrument, failure);
        let window = self.synthetic.lock().await.window(
            instrument,
            self.config.timeframe_seconds,
            self.config.window_size,
        );
        Some(window)
    }

    async fn evaluate(&self, window: &BarWindow, report: &mut ScanReport) -> Result<(), ScanError> {
        let Some(value) = self.indicator.compute(window) else {
            debug!(
                "{} has {} bars, {} needs {}",
                window.instrument,
                window.len(),
                self.indicator.name(),
                self.indicator.min_bars()
            );
            return Ok(());
        };

        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(ScanError::InvalidIndicator {
                instrument: window.instrument.clone(),
                value,
            });
        }
        debug!("{} {} = {:.2}", window.instrument, self.indicator.name(), value);

        if let Some(signal) = self.detector.detect(window, value) {
            info!(
                "Signal {} {} ({:.0}%) {}={:.1} price={:.5}{}",
                signal.instrument,
                signal.direction,
                signal.confidence,
                self.indicator.name(),
                signal.indicator_value,
                signal.price,
                if signal.is_synthetic() { " [synthetic]" } else { "" }
            );
            let broadcast = self.dispatcher.broadcast(&signal).await;
            report.signals += 1;
            report.delivered += broadcast.delivered.len();
            report.pruned += broadcast.pruned.len();
        }
        Ok(())
    }
}

/// Sleeps for `duration` unless a stop is requested first. Returns `true`
/// when the caller should stop.
async fn pause_or_stop(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return true;
    }
    if duration.is_zero() {
        return false;
    }
    tokio::select! {
        _ = sleep(duration) => {}
        changed = stop.changed() => {
            if changed.is_err() {
                return true;
            }
        }
    }
    *stop.borrow()
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
