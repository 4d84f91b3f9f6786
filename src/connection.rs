use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::market_data::{Bar, BarWindow, DataSource};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use tokio::sync::Mutex;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Requests understood by the upstream data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FeedRequest {
    Candles {
        asset: String,
        period: u64,
        count: usize,
    },
    Assets,
}

/// Raw request/response channel to the data source. Implementations own the
/// socket; the feed owns the session lifecycle and payload parsing.
#[async_trait]
pub trait FeedTransport: Send {
    async fn open(&mut self, session_token: &str) -> Result<(), FeedError>;

    /// Sends `request` and returns the raw response payload.
    async fn request(&mut self, request: &FeedRequest) -> Result<String, FeedError>;

    async fn ping(&mut self) -> Result<(), FeedError>;

    async fn close(&mut self);
}

struct FeedSession {
    transport: Box<dyn FeedTransport>,
    state: ConnectionState,
    catalog: Vec<String>,
}

/// Connection to the market-data source.
///
/// All transport access goes through one async mutex, so a keep-alive ping
/// and a bar request never interleave on the socket. The feed does not retry
/// anything itself: failures are reported and the caller paces retries.
pub struct MarketFeed {
    config: FeedConfig,
    session: Mutex<FeedSession>,
}

impl MarketFeed {
    pub fn new(config: FeedConfig, transport: Box<dyn FeedTransport>) -> Self {
        Self {
            config,
            session: Mutex::new(FeedSession {
                transport,
                state: ConnectionState::Disconnected,
                catalog: Vec::new(),
            }),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.session.lock().await.state
    }

    pub async fn catalog(&self) -> Vec<String> {
        self.session.lock().await.catalog.clone()
    }

    /// Opens a session using the token embedded in `credentials`.
    ///
    /// A credential blob without a parseable token fails with `Auth` before
    /// any network traffic. On success the instrument catalog is fetched if
    /// configured; a catalog failure does not fail the connect.
    pub async fn connect(&self, credentials: &str) -> Result<ConnectionState, FeedError> {
        let token = extract_session_token(credentials, &self.config.session_key)?;

        let mut session = self.session.lock().await;
        if session.state != ConnectionState::Disconnected {
            session.transport.close().await;
        }
        session.state = ConnectionState::Connecting;
        info!("Connecting to market feed at {}", self.config.url);

        let opened = self
            .with_timeout("open", session.transport.open(&token))
            .await;
        if let Err(e) = opened {
            error!("Market feed handshake failed: {}", e);
            session.state = ConnectionState::Disconnected;
            return Err(match e {
                FeedError::Auth(_) => e,
                other => FeedError::Transport(other.to_string()),
            });
        }

        session.state = ConnectionState::Connected;
        info!("Connected to market feed");

        if self.config.fetch_catalog_on_connect {
            match self.request_catalog(&mut session).await {
                Ok(catalog) => {
                    info!("Loaded catalog of {} instruments", catalog.len());
                    session.catalog = catalog;
                }
                Err(e) => warn!("Catalog fetch after connect failed: {}", e),
            }
        }

        Ok(session.state)
    }

    /// Requests the most recent `count` bars of `instrument`.
    ///
    /// Returns whatever bars of the response could be parsed, provided there
    /// is at least one. A transport failure marks the connection degraded.
    pub async fn fetch_bars(
        &self,
        instrument: &str,
        timeframe_seconds: u64,
        count: usize,
    ) -> Result<BarWindow, FeedError> {
        let mut session = self.session.lock().await;
        if session.state != ConnectionState::Connected {
            return Err(FeedError::Transport(format!(
                "feed is {}, cannot request {}",
                session.state, instrument
            )));
        }

        let request = FeedRequest::Candles {
            asset: instrument.to_string(),
            period: timeframe_seconds,
            count,
        };
        let payload = match self
            .with_timeout("candles", session.transport.request(&request))
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                if matches!(e, FeedError::Transport(_)) {
                    warn!("Bar request for {} failed, feed degraded: {}", instrument, e);
                    session.state = ConnectionState::Degraded;
                }
                return Err(e);
            }
        };
        drop(session);

        let window = parse_candles(instrument, &payload, count)?;
        debug!(
            "Fetched {} live bars for {} (last close {:?})",
            window.len(),
            instrument,
            window.last().map(|b| b.close)
        );
        Ok(window)
    }

    /// Sends a liveness ping. Never fails: a failed ping only marks the
    /// connection degraded, a successful one on a degraded connection
    /// restores it.
    pub async fn keep_alive(&self) -> ConnectionState {
        let mut session = self.session.lock().await;
        let state = session.state;
        match state {
            ConnectionState::Disconnected | ConnectionState::Connecting => state,
            current => {
                match self.with_timeout("ping", session.transport.ping()).await {
                    Ok(()) => {
                        if current == ConnectionState::Degraded {
                            info!("Market feed answered keep-alive, connection restored");
                        }
                        session.state = ConnectionState::Connected;
                    }
                    Err(e) => {
                        if current == ConnectionState::Connected {
                            warn!("Keep-alive failed, feed degraded: {}", e);
                        }
                        session.state = ConnectionState::Degraded;
                    }
                }
                session.state
            }
        }
    }

    /// Re-reads the instrument catalog. Best-effort; the previous catalog is
    /// kept on failure.
    pub async fn refresh_catalog(&self) -> Result<Vec<String>, FeedError> {
        let mut session = self.session.lock().await;
        if session.state != ConnectionState::Connected {
            return Err(FeedError::Transport(format!(
                "feed is {}, cannot refresh catalog",
                session.state
            )));
        }
        let catalog = self.request_catalog(&mut session).await?;
        session.catalog = catalog.clone();
        Ok(catalog)
    }

    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if session.state != ConnectionState::Disconnected {
            session.transport.close().await;
            session.state = ConnectionState::Disconnected;
            info!("Disconnected from market feed");
        }
    }

    async fn request_catalog(&self, session: &mut FeedSession) -> Result<Vec<String>, FeedError> {
        let payload = self
            .with_timeout("assets", session.transport.request(&FeedRequest::Assets))
            .await?;
        parse_catalog(&payload)
    }

    async fn with_timeout<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, FeedError>>,
    ) -> Result<T, FeedError> {
        match timeout(self.config.request_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Transport(format!(
                "{} timed out after {}s",
                what, self.config.request_timeout_secs
            ))),
        }
    }
}

/// Pulls the value of `key:"value"` out of an opaque credential blob. Nothing
/// else about the blob is assumed; it need not be valid JSON.
pub fn extract_session_token(credentials: &str, key: &str) -> Result<String, FeedError> {
    let pattern = format!(r#""?{}"?\s*:\s*"([^"]*)""#, regex::escape(key));
    let re = Regex::new(&pattern).map_err(|e| FeedError::Auth(e.to_string()))?;

    let token = re
        .captures(credentials)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .ok_or_else(|| FeedError::Auth(format!("no {} token in credentials", key)))?;

    if token.is_empty() {
        return Err(FeedError::Auth(format!("empty {} token in credentials", key)));
    }
    Ok(token)
}

/// Parses a candle response into a live window of at most `count` bars.
///
/// Accepts a bare array or an object with a `candles` or `data` array. Each
/// entry is either an object (`time`/`timestamp`, `open`, `high`, `low`,
/// `close`) or an array `[time, open, high, low, close]`. Entries that do not
/// parse are skipped.
pub fn parse_candles(instrument: &str, payload: &str, count: usize) -> Result<BarWindow, FeedError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| FeedError::Parse(format!("{}: {}", instrument, e)))?;

    let entries = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("candles").or_else(|| map.get("data")) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(FeedError::Parse(format!(
                    "{}: response has no candle array",
                    instrument
                )));
            }
        },
        _ => {
            return Err(FeedError::Parse(format!(
                "{}: unexpected response shape",
                instrument
            )));
        }
    };

    let mut bars = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;
    for entry in entries {
        match parse_bar(entry) {
            Some(bar) => bars.push(bar),
            None => skipped += 1,
        }
    }

    if bars.is_empty() {
        return Err(FeedError::Parse(format!(
            "{}: none of {} candles could be parsed",
            instrument,
            entries.len()
        )));
    }
    if skipped > 0 {
        warn!(
            "Skipped {} malformed candles for {}, kept {}",
            skipped,
            instrument,
            bars.len()
        );
    }
    let ill_formed = bars.iter().filter(|b| !b.is_well_formed()).count();
    if ill_formed > 0 {
        debug!("{} bars for {} violate low <= open/close <= high", ill_formed, instrument);
    }

    Ok(BarWindow::from_bars(instrument, count, DataSource::Live, bars))
}

fn parse_bar(entry: &Value) -> Option<Bar> {
    let (timestamp, open, high, low, close) = match entry {
        Value::Object(map) => (
            map.get("time").or_else(|| map.get("timestamp"))?.as_f64()?,
            map.get("open")?.as_f64()?,
            map.get("high")?.as_f64()?,
            map.get("low")?.as_f64()?,
            map.get("close")?.as_f64()?,
        ),
        Value::Array(fields) if fields.len() >= 5 => (
            fields[0].as_f64()?,
            fields[1].as_f64()?,
            fields[2].as_f64()?,
            fields[3].as_f64()?,
            fields[4].as_f64()?,
        ),
        _ => return None,
    };
    Some(Bar::new(timestamp as i64, open, high, low, close))
}

/// Parses an instrument catalog: an array (or `{"assets": [...]}`) of names
/// or of objects carrying a `symbol`.
pub fn parse_catalog(payload: &str) -> Result<Vec<String>, FeedError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| FeedError::Parse(format!("catalog: {}", e)))?;

    let entries = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("assets") {
            Some(Value::Array(items)) => items,
            _ => return Err(FeedError::Parse("catalog: no assets array".to_string())),
        },
        _ => return Err(FeedError::Parse("catalog: unexpected shape".to_string())),
    };

    Ok(entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(name) => Some(name.clone()),
            Value::Object(map) => map.get("symbol")?.as_str().map(str::to_string),
            _ => None,
        })
        .collect())
}
