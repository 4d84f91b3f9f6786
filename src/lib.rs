pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod market_data;
pub mod notifier;
pub mod scanner;
pub mod signals;
pub mod subscribers;
pub mod ws_transport;

pub use config::ScannerConfig;
pub use connection::{ConnectionState, FeedRequest, FeedTransport, MarketFeed};
pub use dispatcher::{BroadcastReport, Dispatcher};
pub use error::{DeliveryError, FeedError, ScanError};
pub use market_data::{Bar, BarWindow, DataSource};
pub use notifier::Notifier;
pub use scanner::{ScanReport, ScanScheduler, SchedulerState};
pub use subscribers::{SubscriberId, SubscriberRegistry};
