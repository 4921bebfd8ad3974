//! Approval request state: stage results and the participant actions recorded in them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::template::{Participant, Stage, StageLogic};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

impl ApprovalStatus {
    /// Terminal statuses admit no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Approved
                | ApprovalStatus::Rejected
                | ApprovalStatus::Cancelled
                | ApprovalStatus::Expired
        )
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::InProgress => "IN_PROGRESS",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Cancelled => "CANCELLED",
            ApprovalStatus::Expired => "EXPIRED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    InProgress,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    Abstained,
    Delegated,
    Skipped,
}

impl ActionStatus {
    /// Approved, rejected or abstained
    pub fn is_decision(&self) -> bool {
        matches!(
            self,
            ActionStatus::Approved | ActionStatus::Rejected | ActionStatus::Abstained
        )
    }

    /// Delegated and skipped slots no longer take part in evaluation
    pub fn is_retired(&self) -> bool {
        matches!(self, ActionStatus::Delegated | ActionStatus::Skipped)
    }
}

/// Opaque reference to the business document under approval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub title: String,
}

impl DocumentRef {
    pub fn new(id: impl Into<String>, number: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            number: number.into(),
            title: title.into(),
        }
    }
}

/// One decision slot within a stage result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantAction {
    pub participant_id: String,
    pub user_id: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub delegated_to: Option<String>,
    #[serde(default)]
    pub delegated_from: Option<String>,
    /// Turn order for sequential stages
    pub sequence: u32,
    pub weight: u32,
    pub required: bool,
    pub assigned_at: DateTime<Utc>,
    #[serde(default)]
    pub action_at: Option<DateTime<Utc>>,
}

impl ParticipantAction {
    pub fn pending(participant: &Participant, sequence: u32, now: DateTime<Utc>) -> Self {
        Self {
            participant_id: participant.id.clone(),
            user_id: participant.identifier.clone(),
            status: ActionStatus::Pending,
            comment: None,
            delegated_to: None,
            delegated_from: None,
            sequence,
            weight: participant.effective_weight(),
            required: participant.required,
            assigned_at: now,
            action_at: None,
        }
    }

    /// New pending slot for `user_id` that takes over this slot's turn, weight and obligation
    pub fn successor(&self, participant_id: String, user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            participant_id,
            user_id: user_id.into(),
            status: ActionStatus::Pending,
            comment: None,
            delegated_to: None,
            delegated_from: None,
            sequence: self.sequence,
            weight: self.weight,
            required: self.required,
            assigned_at: now,
            action_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ActionStatus::Pending
    }

    /// Time used to order history; unacted slots sort by when they were assigned
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.action_at.unwrap_or(self.assigned_at)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VoteSummary {
    pub approved: u32,
    pub rejected: u32,
    pub abstained: u32,
    pub pending: u32,
    pub approved_weight: u64,
    pub rejected_weight: u64,
    /// Approved share of the decided weight, for display only
    pub percent: f64,
}

/// Record of one stage ever opened on a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    pub stage_id: String,
    pub stage_name: String,
    pub logic: StageLogic,
    pub status: StageStatus,
    pub actions: Vec<ParticipantAction>,
    #[serde(default)]
    pub vote_summary: Option<VoteSummary>,
    pub started_at: DateTime<Utc>,
    /// Start of the current SLA window; reset when the stage is escalated
    pub clock_started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set once the SLA timeout has reassigned the stage
    #[serde(default)]
    pub escalated: bool,
    /// Set once a tied vote has been handed to the escalation target
    #[serde(default)]
    pub tie_escalated: bool,
}

impl StageResult {
    /// Materialize a stage with one pending slot per participant
    pub fn open(stage: &Stage, now: DateTime<Utc>) -> Self {
        let actions = stage
            .participants
            .iter()
            .enumerate()
            .map(|(i, p)| ParticipantAction::pending(p, i as u32, now))
            .collect();

        Self {
            stage_id: stage.id.clone(),
            stage_name: stage.name.clone(),
            logic: stage.logic,
            status: StageStatus::InProgress,
            actions,
            vote_summary: None,
            started_at: now,
            clock_started_at: now,
            completed_at: None,
            escalated: false,
            tie_escalated: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == StageStatus::InProgress
    }

    pub fn close(&mut self, status: StageStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
    }

    pub fn pending_actions(&self) -> impl Iterator<Item = &ParticipantAction> {
        self.actions.iter().filter(|a| a.is_pending())
    }

    pub fn has_pending(&self) -> bool {
        self.actions.iter().any(|a| a.is_pending())
    }

    /// Pending slot whose turn it is in a sequential stage
    pub fn next_in_turn(&self) -> Option<&ParticipantAction> {
        self.pending_actions().min_by_key(|a| a.sequence)
    }

    /// Whether `user_id` has a live slot (pending or decided) in this stage
    pub fn holds_slot(&self, user_id: &str) -> bool {
        self.actions
            .iter()
            .any(|a| a.user_id == user_id && !a.status.is_retired())
    }

    pub fn has_decided(&self, user_id: &str) -> bool {
        self.actions
            .iter()
            .any(|a| a.user_id == user_id && a.status.is_decision())
    }

    /// Whether `user_id` may decide right now
    pub fn can_act(&self, user_id: &str) -> bool {
        match self.logic {
            StageLogic::Sequential => self.next_in_turn().map(|a| a.user_id == user_id).unwrap_or(false),
            _ => self.pending_actions().any(|a| a.user_id == user_id),
        }
    }
}

/// A document's journey through a workflow template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub template_id: String,
    pub document: DocumentRef,
    pub requested_by: String,
    #[serde(default)]
    pub summary: String,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub current_stage_id: Option<String>,
    pub stage_results: Vec<StageResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every saved transition
    pub version: u64,
}

impl ApprovalRequest {
    pub fn new(
        template_id: impl Into<String>,
        document: DocumentRef,
        requested_by: impl Into<String>,
        summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("apr_{}", uuid::Uuid::new_v4().to_string().replace('-', "")),
            template_id: template_id.into(),
            document,
            requested_by: requested_by.into(),
            summary: summary.into(),
            status: ApprovalStatus::Pending,
            current_stage_id: None,
            stage_results: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            expires_at: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The open stage result of an in-flight request
    pub fn current_stage(&self) -> Option<&StageResult> {
        let stage_id = self.current_stage_id.as_deref()?;
        self.stage_results
            .iter()
            .rev()
            .find(|r| r.stage_id == stage_id && r.is_open())
    }

    pub fn current_stage_mut(&mut self) -> Option<&mut StageResult> {
        let stage_id = self.current_stage_id.clone()?;
        self.stage_results
            .iter_mut()
            .rev()
            .find(|r| r.stage_id == stage_id && r.is_open())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }

    /// Move the request to a terminal status
    pub fn finish(&mut self, status: ApprovalStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
    }

    /// Every participant action across all stages, ordered by time
    pub fn history(&self) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self
            .stage_results
            .iter()
            .flat_map(|result| {
                result.actions.iter().map(move |action| HistoryEntry {
                    stage_id: result.stage_id.clone(),
                    stage_name: result.stage_name.clone(),
                    action: action.clone(),
                })
            })
            .collect();

        // stable: slots recorded at the same instant keep their recording order
        entries.sort_by_key(|e| e.action.effective_time());
        entries
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub stage_id: String,
    pub stage_name: String,
    pub action: ParticipantAction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Participant;
    use chrono::Duration;

    fn sequential_stage() -> Stage {
        Stage::new("Sign-off", 1, StageLogic::Sequential)
            .with_participant(Participant::user("alice", "Alice"))
            .with_participant(Participant::user("bob", "Bob").with_weight(3))
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(!ApprovalStatus::InProgress.is_terminal());
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::Cancelled.is_terminal());
        assert!(ApprovalStatus::Expired.is_terminal());
    }

    #[test]
    fn test_open_stage_materializes_pending_slots() {
        let now = Utc::now();
        let result = StageResult::open(&sequential_stage(), now);

        assert_eq!(result.actions.len(), 2);
        assert!(result.actions.iter().all(|a| a.is_pending()));
        assert_eq!(result.actions[1].weight, 3);
        assert_eq!(result.actions[1].sequence, 1);
        assert_eq!(result.clock_started_at, now);
    }

    #[test]
    fn test_sequential_turn() {
        let now = Utc::now();
        let mut result = StageResult::open(&sequential_stage(), now);

        assert!(result.can_act("alice"));
        assert!(!result.can_act("bob"));

        result.actions[0].status = ActionStatus::Approved;
        assert!(result.can_act("bob"));
        assert!(!result.can_act("alice"));
    }

    #[test]
    fn test_successor_inherits_slot() {
        let now = Utc::now();
        let result = StageResult::open(&sequential_stage(), now);
        let delegate = result.actions[1].successor("p-carol".into(), "carol", now);

        assert_eq!(delegate.sequence, 1);
        assert_eq!(delegate.weight, 3);
        assert!(delegate.required);
        assert!(delegate.is_pending());
    }

    #[test]
    fn test_history_ordering() {
        let start = Utc::now();
        let mut request = ApprovalRequest::new(
            "tmpl_1",
            DocumentRef::new("SO-1", "SO-0001", "Order"),
            "requester",
            "",
            start,
        );
        let mut result = StageResult::open(&sequential_stage(), start);
        result.actions[1].status = ActionStatus::Approved;
        result.actions[1].action_at = Some(start + Duration::minutes(5));
        result.actions[0].status = ActionStatus::Approved;
        result.actions[0].action_at = Some(start + Duration::minutes(10));
        request.stage_results.push(result);

        let history = request.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action.user_id, "bob");
        assert_eq!(history[1].action.user_id, "alice");
        assert_eq!(history[0].stage_name, "Sign-off");
    }

    #[test]
    fn test_current_stage_lookup() {
        let now = Utc::now();
        let mut request = ApprovalRequest::new("tmpl_1", DocumentRef::new("D", "", ""), "req", "", now);
        assert!(request.current_stage().is_none());

        let result = StageResult::open(&sequential_stage(), now);
        request.current_stage_id = Some(result.stage_id.clone());
        request.stage_results.push(result);
        assert!(request.current_stage().is_some());

        if let Some(stage) = request.current_stage_mut() {
            stage.close(StageStatus::Approved, now);
        }
        assert!(request.current_stage().is_none());
    }

    #[test]
    fn test_request_expiry_check() {
        let now = Utc::now();
        let mut request = ApprovalRequest::new("tmpl_1", DocumentRef::new("D", "", ""), "req", "", now);
        assert!(!request.is_expired_at(now + Duration::days(365)));

        request.expires_at = Some(now + Duration::hours(1));
        assert!(!request.is_expired_at(now));
        assert!(request.is_expired_at(now + Duration::hours(1)));
    }
}
