use thiserror::Error;

/// Failures reported by the market feed. The feed never retries on its own;
/// the scan scheduler decides what to do with each kind.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeedError {
    /// Credential blob could not yield a session token. Not retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connection or IO failure, including timeouts and "not connected".
    #[error("transport error: {0}")]
    Transport(String),

    /// Upstream payload could not be turned into a single bar.
    #[error("malformed payload: {0}")]
    Parse(String),
}

/// A single subscriber could not be reached.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("delivery to subscriber {subscriber} failed: {reason}")]
pub struct DeliveryError {
    pub subscriber: i64,
    pub reason: String,
}

/// Conditions that abort the current scan cycle. The scheduler logs them,
/// waits out the recovery backoff and starts the next cycle.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("market feed unavailable and synthetic fallback disabled: {0}")]
    FeedUnavailable(FeedError),

    #[error("indicator produced {value} for {instrument}")]
    InvalidIndicator { instrument: String, value: f64 },

    #[error("scan cycle panicked: {0}")]
    Panicked(String),
}
