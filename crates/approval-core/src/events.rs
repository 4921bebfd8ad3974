//! Domain event envelope and the publishers that carry approval signals out of the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Represents a domain event in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub id: Uuid,
    /// Event type (e.g., "approval.stage_advanced")
    pub event_type: String,
    /// Timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
    /// Event payload
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create a new event with the given type and payload.
    pub fn new<T: Serialize>(event_type: impl Into<String>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            metadata: HashMap::new(),
        }
    }

    /// Override the occurrence time, e.g. with the time the underlying action was recorded.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check if the event matches a given type pattern (`*`, `prefix.*` or an exact type).
    pub fn matches(&self, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix(".*") {
            return self.event_type.starts_with(prefix);
        }
        self.event_type == pattern
    }
}

/// Errors raised by event publishers
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Publisher unavailable: {0}")]
    Unavailable(String),

    #[error("Event rejected: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sink for domain events. Delivery failures are reported to the caller, which decides
/// whether they matter; the approval engine only logs them.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<(), PublishError>;

    async fn publish_batch(&self, events: &[Event]) -> Result<(), PublishError> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    /// Short name used in logs
    fn name(&self) -> &str {
        "publisher"
    }
}

/// Publisher that writes every event to the tracing pipeline.
#[derive(Debug, Default, Clone)]
pub struct TracingEventPublisher;

impl TracingEventPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&event.payload)?;
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            timestamp = %event.timestamp,
            payload = %payload,
            "Domain event published"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Publisher that keeps events in memory. Used by tests and local tooling.
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }

    pub async fn events_matching(&self, pattern: &str) -> Vec<Event> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.matches(pattern))
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
