use anyhow::{Context, Result};
use rsi_scanner::config::ScannerConfig;
use rsi_scanner::connection::MarketFeed;
use rsi_scanner::signals::{Indicator, RsiIndicator, SignalDetector};
use rsi_scanner::ws_transport::WsTransport;
use std::env;

/// Connects once with the configured feed and prints the catalog and the
/// current oscillator reading of every configured instrument.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config_file = env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = ScannerConfig::load_from_file(&config_file)?;
    let credentials = env::var("POCKET_SSID").context("POCKET_SSID is not set")?;

    let feed = MarketFeed::new(
        config.feed.clone(),
        Box::new(WsTransport::new(config.feed.url.clone())),
    );
    let state = feed.connect(&credentials).await?;
    println!("Feed {}", state);

    let catalog = feed.catalog().await;
    println!("Catalog: {} instruments", catalog.len());
    for name in catalog.iter().take(20) {
        println!("  {}", name);
    }

    let indicator = RsiIndicator::with_period(config.signal.rsi_period);
    let detector = SignalDetector::new(&config.signal);
    for instrument in &config.scan.instruments {
        match feed
            .fetch_bars(instrument, config.scan.timeframe_seconds, config.scan.window_size)
            .await
        {
            Ok(window) => {
                let reading = indicator.compute(&window);
                let verdict = reading
                    .and_then(|value| detector.detect(&window, value))
                    .map(|s| format!("{} ({:.0}%)", s.direction, s.confidence))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}: {} bars, {} = {}, signal {}",
                    instrument,
                    window.len(),
                    indicator.name(),
                    reading.map(|v| format!("{:.1}", v)).unwrap_or_else(|| "n/a".to_string()),
                    verdict
                );
            }
            Err(e) => println!("{}: {}", instrument, e),
        }
    }

    feed.disconnect().await;
    Ok(())
}
