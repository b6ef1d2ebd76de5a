//! Change notifications: `<topic> <json>` frames pushed to subscribers.
//!
//! Publishing is best effort. A transport failure is logged and counted but
//! never turns a committed write into a failed request.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::{EVENTS_PUBLISHED_TOTAL, PUBLISH_FAILURES_TOTAL};
use crate::model::Id;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Fire-and-forget transport for one frame. Must not block the caller.
pub trait Publisher: Send + Sync {
    fn send(&self, topic: &str, frame: &str) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Site(Id),
    Device(Id),
    Sensor(Id),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Site(id) => write!(f, "site-{}", id),
            Topic::Device(id) => write!(f, "device-{}", id),
            Topic::Sensor(id) => write!(f, "sensor-{}", id),
        }
    }
}

/// The wire frame: topic, one space, then the JSON payload.
pub fn frame(topic: &str, payload: &Value) -> String {
    format!("{} {}", topic, payload)
}

#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn Publisher>,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn Publisher>) -> Self {
        Self { transport }
    }

    /// Sends `payload` once per topic. Failures are swallowed.
    pub fn publish(&self, topics: &[Topic], payload: &Value) {
        for topic in topics {
            let topic = topic.to_string();
            match self.transport.send(&topic, &frame(&topic, payload)) {
                Ok(()) => {
                    EVENTS_PUBLISHED_TOTAL.inc();
                    debug!("Published change on {}", topic);
                }
                Err(e) => {
                    PUBLISH_FAILURES_TOTAL.inc();
                    warn!("Dropped change notification on {}: {}", topic, e);
                }
            }
        }
    }
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher").finish_non_exhaustive()
    }
}

/// Logs frames and keeps nothing; stands in when no broker is configured.
#[derive(Debug, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn send(&self, topic: &str, frame: &str) -> Result<(), PublishError> {
        debug!("No broker configured, dropping frame for {}: {}", topic, frame);
        Ok(())
    }
}

/// Records every frame by topic, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    sent: Mutex<HashMap<String, Vec<String>>>,
    failing: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads received on `topic`, decoded from their frames, oldest first.
    pub fn messages(&self, topic: &str) -> Vec<Value> {
        let sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.get(topic)
            .map(|frames| {
                frames
                    .iter()
                    .filter_map(|frame| frame.split_once(' '))
                    .filter_map(|(_, json)| serde_json::from_str(json).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn frames(&self, topic: &str) -> Vec<String> {
        let sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.get(topic).cloned().unwrap_or_default()
    }

    pub fn clear(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Makes every subsequent send fail, simulating a dead broker.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Publisher for MemoryPublisher {
    fn send(&self, topic: &str, frame: &str) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("publisher is failing".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(frame.to_string());
        Ok(())
    }
}
