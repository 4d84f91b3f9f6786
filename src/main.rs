use anyhow::{Context, Result};
use log::{info, warn};
use rsi_scanner::config::ScannerConfig;
use rsi_scanner::connection::MarketFeed;
use rsi_scanner::dispatcher::Dispatcher;
use rsi_scanner::notifier::{LogNotifier, Notifier, TelegramNotifier};
use rsi_scanner::scanner::ScanScheduler;
use rsi_scanner::subscribers::SubscriberRegistry;
use rsi_scanner::ws_transport::WsTransport;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG not set
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info"); }
    }
    env_logger::init();
    info!("Starting RSI signal scanner");

    let args: Vec<String> = env::args().skip(1).collect();
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let config_file = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .map(String::as_str)
        .unwrap_or("config.json");

    info!("Loading configuration from: {}", config_file);
    let config = ScannerConfig::load_from_file(config_file)?;

    let credentials = env::var("POCKET_SSID").context("POCKET_SSID is not set")?;
    let notifier: Arc<dyn Notifier> = if dry_run {
        warn!("Dry run: signals are logged, not sent");
        Arc::new(LogNotifier)
    } else {
        let bot_token = env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN is not set")?;
        Arc::new(TelegramNotifier::new(&config.notifier.telegram_api_url, &bot_token)?)
    };

    let registry = Arc::new(SubscriberRegistry::with_members(
        config.notifier.subscribers.iter().copied(),
    ));
    if registry.is_empty().await {
        warn!("No subscribers configured; signals will be computed but not delivered");
    }

    let transport = WsTransport::new(config.feed.url.clone());
    let feed = Arc::new(MarketFeed::new(config.feed.clone(), Box::new(transport)));
    let dispatcher = Dispatcher::new(registry, notifier);
    let scheduler = ScanScheduler::new(&config, feed, dispatcher, credentials);

    scheduler.start().await;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for the current scan step to finish");
    scheduler.stop().await;

    Ok(())
}
