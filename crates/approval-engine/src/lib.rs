//! Multi-stage approval orchestration engine
//!
//! Drives sign-off on business documents (sales orders, purchase requisitions,
//! discount exceptions) through one or more stages:
//! - Immutable, versioned workflow templates
//! - Value-tiered routing to the required approval depth
//! - AND / any-one / weighted voting / strict sequence stage logic
//! - Delegation recorded as append-only history
//! - SLA-driven escalation and request expiry
//! - Per-request serialized state transitions with post-commit signals

pub mod builders;
pub mod escalation;
pub mod evaluator;
pub mod locks;
pub mod orchestrator;
pub mod registry;
pub mod repository;
pub mod request;
pub mod router;
pub mod signals;
pub mod template;

pub use builders::TemplateBuilders;
pub use escalation::{EscalationMonitor, SweepReport};
pub use evaluator::{evaluate, StageEvaluation, StageVerdict};
pub use locks::RequestLocks;
pub use orchestrator::{ActionInput, ActionKind, ApprovalOrchestrator, TimeoutOutcome};
pub use registry::TemplateRegistry;
pub use repository::{
    InMemoryRequestRepository, InMemoryTemplateRepository, RequestRepository, TemplateRepository,
};
pub use request::{
    ActionStatus, ApprovalRequest, ApprovalStatus, DocumentRef, HistoryEntry, ParticipantAction,
    StageResult, StageStatus, VoteSummary,
};
pub use router::{ApproverRequirement, Tier, TieredRouter};
pub use signals::{ApprovalSignal, SignalDispatcher, SignalKind, SignalSender};
pub use template::{
    EscalationConfig, Participant, ParticipantType, Stage, StageLogic, TieBreak, VotingConfig,
    WorkflowTemplate, MAX_TIMEOUT_HOURS,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Approval request not found: {0}")]
    RequestNotFound(String),

    #[error("User {user_id} has no decision slot in the current stage of {request_id}")]
    NotAuthorized { request_id: String, user_id: String },

    #[error("User {user_id} already acted on the current stage of {request_id}")]
    AlreadyActed { request_id: String, user_id: String },

    #[error("User {user_id} acted out of turn; next in sequence is {expected}")]
    OutOfSequence { user_id: String, expected: String },

    #[error("Approval request is closed: {0}")]
    RequestClosed(String),

    #[error("Invalid delegate: {0}")]
    InvalidDelegate(String),

    #[error("Concurrent modification of approval request: {0}")]
    ConcurrentModification(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid routing configuration: {0}")]
    InvalidRouting(String),

    #[error("A comment is required to reject request {0}")]
    CommentRequired(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
