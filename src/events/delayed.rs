//! Delayed notification scheduling.
//!
//! Every hand-off that starts a cooldown schedules a one-shot future event
//! publish so UIs refresh once the window elapses. Timers are fire-and-
//! forget: a timer firing after its visit has already moved on is expected
//! and harmless, so no cancellation handle is kept.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use super::{DelayedNotification, Event, EventSink};

/// Schedules one-shot future event publishes on the tokio timer
#[derive(Clone)]
pub struct DelayedNotifier {
    sink: Arc<dyn EventSink>,
}

impl DelayedNotifier {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Publish `event` on `topic` after `delay_seconds`.
    ///
    /// The event date is re-stamped at fire time. The spawned task is
    /// detached; nothing blocks on it and nothing cancels it.
    pub fn schedule(&self, topic: &str, durable: bool, event: Event, delay_seconds: i64) {
        let sink = Arc::clone(&self.sink);
        let topic = topic.to_string();
        let delay = Duration::from_secs(delay_seconds.max(0) as u64);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut event = event;
            event.event_date = Utc::now();
            debug!("⏰ Delayed event {} sent to {}", event.event_type, topic);
            sink.publish(&topic, durable, event).await;
        });
    }

    /// Schedule every pending notification of an outbox flush
    pub fn schedule_all(&self, notifications: Vec<DelayedNotification>) {
        for notification in notifications {
            self.schedule(
                &notification.topic,
                notification.durable,
                notification.event,
                notification.delay_seconds,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct CountingSink {
        count: Mutex<usize>,
    }

    #[async_trait]
    impl EventSink for CountingSink {
        async fn publish(&self, _topic: &str, _durable: bool, _event: Event) {
            *self.count.lock() += 1;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_fires_after_delay() {
        let sink = Arc::new(CountingSink {
            count: Mutex::new(0),
        });
        let notifier = DelayedNotifier::new(sink.clone());
        let event = Event::new("QUEUE_REFRESHED", HashMap::new(), serde_json::Value::Null);
        notifier.schedule("frontend", false, event, 30);

        tokio::task::yield_now().await; // let the spawned task register its timer at t=0
        tokio::time::advance(Duration::from_secs(29)).await;
        tokio::task::yield_now().await;
        assert_eq!(*sink.count.lock(), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(*sink.count.lock(), 1);
    }
}
