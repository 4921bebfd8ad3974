//! Outbound approval signals.
//!
//! The orchestrator emits signals after a transition is saved and the request
//! lock is released. Signals go into a bounded queue drained by
//! [`SignalDispatcher`], which fans them out to event publishers and in-process
//! subscribers. A full queue makes the emitter wait; a failing publisher is
//! logged and otherwise ignored.

use approval_core::events::{Event, EventPublisher};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::request::ApprovalStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// A stage closed and the next opened, or the request reached a terminal status
    StageAdvanced,
    /// The escalation monitor timed out a stage
    EscalationTriggered,
    /// A participant acted
    ActionRecorded,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StageAdvanced => "approval.stage_advanced",
            Self::EscalationTriggered => "approval.escalation_triggered",
            Self::ActionRecorded => "approval.action_recorded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalSignal {
    pub kind: SignalKind,
    pub request_id: String,
    pub document_id: String,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub stage_name: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl ApprovalSignal {
    pub fn new(
        kind: SignalKind,
        request_id: impl Into<String>,
        document_id: impl Into<String>,
        status: ApprovalStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            request_id: request_id.into(),
            document_id: document_id.into(),
            status,
            stage_name: None,
            actor_id: None,
            at,
        }
    }

    pub fn with_stage(mut self, stage_name: impl Into<String>) -> Self {
        self.stage_name = Some(stage_name.into());
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Wrap the signal in the shared domain event envelope
    pub fn to_event(&self) -> Event {
        Event::new(self.kind.as_str(), self)
            .at(self.at)
            .with_metadata("source", "approval-engine")
            .with_metadata("request_id", self.request_id.clone())
            .with_metadata("document_id", self.document_id.clone())
    }
}

/// Cloneable handle used by the orchestrator to emit signals
#[derive(Debug, Clone)]
pub struct SignalSender {
    queue: mpsc::Sender<ApprovalSignal>,
    subscribers: broadcast::Sender<ApprovalSignal>,
}

impl SignalSender {
    /// Queue a signal, waiting for room when the dispatcher is behind.
    ///
    /// A signal is only lost once the dispatcher has stopped.
    pub async fn emit(&self, signal: ApprovalSignal) {
        if let Err(mpsc::error::SendError(signal)) = self.queue.send(signal).await {
            debug!(
                request_id = %signal.request_id,
                kind = signal.kind.as_str(),
                "Signal dispatcher stopped, dropping signal"
            );
        }
    }

    /// Receive every signal the dispatcher forwards from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalSignal> {
        self.subscribers.subscribe()
    }
}

/// Drains the signal queue into publishers and subscribers
pub struct SignalDispatcher {
    receiver: mpsc::Receiver<ApprovalSignal>,
    subscribers: broadcast::Sender<ApprovalSignal>,
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl SignalDispatcher {
    /// Create a sender and its dispatcher over a queue of `buffer` signals
    pub fn channel(buffer: usize) -> (SignalSender, SignalDispatcher) {
        let buffer = buffer.max(1);
        let (queue, receiver) = mpsc::channel(buffer);
        let (subscribers, _) = broadcast::channel(buffer);

        let sender = SignalSender {
            queue,
            subscribers: subscribers.clone(),
        };
        let dispatcher = SignalDispatcher {
            receiver,
            subscribers,
            publishers: Vec::new(),
        };

        (sender, dispatcher)
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Run until every sender is dropped
    pub async fn run(mut self) {
        info!(publishers = self.publishers.len(), "Starting approval signal dispatcher");

        while let Some(signal) = self.receiver.recv().await {
            // no subscribers is not an error
            let _ = self.subscribers.send(signal.clone());

            let event = signal.to_event();
            for publisher in &self.publishers {
                if let Err(e) = publisher.publish(&event).await {
                    warn!(
                        publisher = publisher.name(),
                        request_id = %signal.request_id,
                        event_type = %event.event_type,
                        error = %e,
                        "Failed to publish approval signal"
                    );
                }
            }
        }

        info!("Approval signal dispatcher stopped");
    }
}
