use crate::notifier::Notifier;
use crate::signals::Signal;
use crate::subscribers::{SubscriberId, SubscriberRegistry};
use log::{info, warn};
use std::sync::Arc;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastReport {
    pub delivered: Vec<SubscriberId>,
    pub pruned: Vec<SubscriberId>,
}

pub struct Dispatcher {
    registry: Arc<SubscriberRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriberRegistry>, notifier: Arc<dyn Notifier>) -> Self {
        Self { registry, notifier }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Sends `signal` to everyone subscribed at the time of the call.
    ///
    /// Subscribers that cannot be reached are removed from the registry;
    /// the rest still get the message.
    pub async fn broadcast(&self, signal: &Signal) -> BroadcastReport {
        let text = format_signal(signal);
        let mut recipients: Vec<SubscriberId> = self.registry.snapshot().await.into_iter().collect();
        recipients.sort_unstable();

        let mut report = BroadcastReport::default();
        for subscriber in recipients {
            match self.notifier.send(subscriber, &text).await {
                Ok(()) => report.delivered.push(subscriber),
                Err(e) => {
                    warn!("{}; removing subscriber", e);
                    self.registry.remove(subscriber).await;
                    report.pruned.push(subscriber);
                }
            }
        }

        info!(
            "Broadcast {} {} to {} subscribers ({} pruned)",
            signal.instrument,
            signal.direction,
            report.delivered.len(),
            report.pruned.len()
        );
        report
    }
}

/// Renders a signal for chat delivery. Signals computed from synthetic bars
/// are always marked as such.
pub fn format_signal(signal: &Signal) -> String {
    let mut text = String::new();
    if signal.is_synthetic() {
        text.push_str("[SIMULATED DATA] ");
    }
    text.push_str(&format!(
        "📊 {} {} ({:.0}%)\nRSI: {:.1} | Price: {:.5}\n{}",
        signal.instrument,
        signal.direction,
        signal.confidence,
        signal.indicator_value,
        signal.price,
        signal.produced_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    text
}
