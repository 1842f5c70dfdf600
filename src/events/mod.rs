//! # Event Publication
//!
//! Outgoing bus events and the sink abstraction the engine publishes them
//! through. The transport itself is an external collaborator: the engine
//! only ever calls [`EventSink::publish`], fire-and-forget, on three topics:
//!
//! - `"frontend"` — UI refresh notifications
//! - `"stat"` — analytics feed
//! - `"*"` — business/system errors and broad lifecycle fan-out
//!
//! Mutations happen under a branch lock; events produced during the
//! critical section are accumulated in an [`Outbox`] and flushed only after
//! the guard is dropped, so the sink is never called while the lock is held.

pub mod delayed;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;
use crate::lifecycle::VisitEventKind;
use crate::model::Visit;

/// UI refresh topic
pub const TOPIC_FRONTEND: &str = "frontend";
/// Analytics topic
pub const TOPIC_STAT: &str = "stat";
/// Broadcast topic for errors and lifecycle fan-out
pub const TOPIC_ALL: &str = "*";

/// Delayed-notification reason: a returned visit's cooldown elapsed
pub const REASON_RETURN_DELAY_FINISHED: &str = "RETURN_TIME_DELAY_FINISHED";
/// Delayed-notification reason: a transferred visit's cooldown elapsed
pub const REASON_TRANSFER_DELAY_FINISHED: &str = "TRANSFER_TIME_DELAY_FINISHED";

/// Event payload published to the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub event_date: DateTime<Utc>,
    pub sender_service: String,
    pub params: HashMap<String, String>,
    pub body: Value,
}

impl Event {
    pub fn new(event_type: &str, params: HashMap<String, String>, body: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            event_date: Utc::now(),
            sender_service: String::new(),
            params,
            body,
        }
    }
}

/// At-least-once pub/sub sink the engine publishes into
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, durable: bool, event: Event);
}

/// Default sink that only logs; useful for tests and embedding
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, topic: &str, _durable: bool, event: Event) {
        debug!("📤 Event {} sent to {}", event.event_type, topic);
    }
}

/// One scheduled follow-up notification
#[derive(Debug, Clone)]
pub struct DelayedNotification {
    pub topic: String,
    pub durable: bool,
    pub event: Event,
    pub delay_seconds: i64,
}

/// Events accumulated during a branch-locked critical section.
///
/// Nothing leaves the process until the lock is released and the outbox is
/// flushed through the publisher.
#[derive(Debug, Default)]
pub struct Outbox {
    pub events: Vec<(String, bool, Event)>,
    pub delayed: Vec<DelayedNotification>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for one topic
    pub fn push(&mut self, topic: &str, durable: bool, event: Event) {
        self.events.push((topic.to_string(), durable, event));
    }

    /// Queue a `VISIT_<KIND>` lifecycle event, fanned out to `*` always,
    /// `stat` and `frontend` per the kind's routing flags.
    pub fn push_visit_event(
        &mut self,
        kind: VisitEventKind,
        params: HashMap<String, String>,
        visit: &Visit,
    ) {
        let event_type = format!("VISIT_{}", kind.as_str());
        let body = serde_json::to_value(visit).unwrap_or(Value::Null);
        let event = Event::new(&event_type, params, body);
        self.push(TOPIC_ALL, false, event.clone());
        if kind.is_stat_event() {
            self.push(TOPIC_STAT, false, event.clone());
        }
        if kind.is_frontend_event() {
            self.push(TOPIC_FRONTEND, false, event);
        }
    }

    /// Queue a delayed refresh notification
    pub fn push_delayed(
        &mut self,
        topic: &str,
        event_type: &str,
        reason: &str,
        params: HashMap<String, String>,
        delay_seconds: i64,
    ) {
        let mut params = params;
        params.insert("reason".to_string(), reason.to_string());
        self.delayed.push(DelayedNotification {
            topic: topic.to_string(),
            durable: false,
            event: Event::new(event_type, params, Value::Null),
            delay_seconds,
        });
    }
}

/// Stamps and publishes engine events through the configured sink
#[derive(Clone)]
pub struct EventPublisher {
    sink: Arc<dyn EventSink>,
    application_name: String,
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn EventSink>, application_name: &str) -> Self {
        Self {
            sink,
            application_name: application_name.to_string(),
        }
    }

    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink)
    }

    /// Publish one event to one topic
    pub async fn send(&self, topic: &str, durable: bool, mut event: Event) {
        event.sender_service = self.application_name.clone();
        self.sink.publish(topic, durable, event).await;
    }

    /// Publish a business error on the broadcast topic
    pub async fn business_error(&self, error: &EngineError) {
        let mut params = HashMap::new();
        params.insert("httpStatus".to_string(), error.http_status().to_string());
        let event = Event::new(
            "BUSINESS_ERROR",
            params,
            Value::String(error.to_string()),
        );
        self.send(TOPIC_ALL, false, event).await;
    }

    /// Flush every immediate event of an outbox; delayed notifications are
    /// handed to the notifier by the orchestrator.
    pub async fn flush(&self, outbox: &mut Outbox) {
        for (topic, durable, event) in outbox.events.drain(..) {
            self.send(&topic, durable, event).await;
        }
    }
}
