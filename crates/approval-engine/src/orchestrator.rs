//! Request orchestrator: the approval state machine
//!
//! Every mutation of a request runs as one read-evaluate-write under the
//! request's lock, against a private copy that is only stored if the whole
//! transition succeeds. Signals describing the transition are emitted after
//! the copy is saved.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::escalation::{timeout_action, TimeoutAction};
use crate::evaluator::{evaluate, StageVerdict};
use crate::locks::RequestLocks;
use crate::registry::TemplateRegistry;
use crate::repository::RequestRepository;
use crate::request::{
    ActionStatus, ApprovalRequest, ApprovalStatus, DocumentRef, HistoryEntry, ParticipantAction,
    StageResult, StageStatus,
};
use crate::signals::{ApprovalSignal, SignalKind, SignalSender};
use crate::template::{Participant, Stage, StageLogic, WorkflowTemplate};
use crate::{Result, WorkflowError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Approve,
    Reject,
    Abstain,
    Delegate,
}

/// A participant's submission against the current stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionInput {
    pub action: ActionKind,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub delegate_to: Option<String>,
}

impl ActionInput {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            comment: None,
            delegate_to: None,
        }
    }

    pub fn approve() -> Self {
        Self::new(ActionKind::Approve)
    }

    pub fn reject() -> Self {
        Self::new(ActionKind::Reject)
    }

    pub fn abstain() -> Self {
        Self::new(ActionKind::Abstain)
    }

    pub fn delegate(to: impl Into<String>) -> Self {
        Self {
            delegate_to: Some(to.into()),
            ..Self::new(ActionKind::Delegate)
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// What a timeout check did to a request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutOutcome {
    /// Nothing was due
    NotDue,
    /// The request outlived its overall timeout
    Expired,
    /// Pending participants were approved on their behalf
    AutoApproved,
    /// Pending slots were reassigned to the escalation target
    Escalated,
    /// The stage timed out but defines no escalation
    Unconfigured,
}

/// Result of applying a transition to a request copy
struct Transition<T> {
    value: T,
    changed: bool,
    signals: Vec<ApprovalSignal>,
}

impl<T> Transition<T> {
    fn unchanged(value: T) -> Self {
        Self {
            value,
            changed: false,
            signals: Vec::new(),
        }
    }

    fn changed(value: T, signals: Vec<ApprovalSignal>) -> Self {
        Self {
            value,
            changed: true,
            signals,
        }
    }
}

pub struct ApprovalOrchestrator {
    registry: Arc<TemplateRegistry>,
    requests: Arc<dyn RequestRepository>,
    locks: RequestLocks,
    signals: SignalSender,
    max_save_retries: u32,
}

impl ApprovalOrchestrator {
    pub fn new(
        registry: Arc<TemplateRegistry>,
        requests: Arc<dyn RequestRepository>,
        signals: SignalSender,
    ) -> Self {
        Self {
            registry,
            requests,
            locks: RequestLocks::new(),
            signals,
            max_save_retries: 3,
        }
    }

    pub fn with_max_save_retries(mut self, retries: u32) -> Self {
        self.max_save_retries = retries;
        self
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Create a request from a template and open its first stage
    pub async fn initiate(
        &self,
        template_id: &str,
        document: DocumentRef,
        requested_by: &str,
        summary: &str,
    ) -> Result<ApprovalRequest> {
        let template = self.registry.get(template_id).await?;
        let first = template.first_stage().ok_or_else(|| {
            WorkflowError::InvalidTemplate(format!("Template {} has no stages", template.id))
        })?;

        let now = Utc::now();
        let mut request = ApprovalRequest::new(&template.id, document, requested_by, summary, now);
        request.expires_at = match template.timeout_hours {
            Some(hours) => {
                let expires_at = now
                    .checked_add_signed(Duration::hours(i64::from(hours)))
                    .ok_or_else(|| {
                        WorkflowError::InvalidTemplate(format!(
                            "Template {} timeout of {} hours is out of range",
                            template.id, hours
                        ))
                    })?;
                Some(expires_at)
            }
            None => None,
        };
        open_stage(&mut request, first, now);
        request.status = ApprovalStatus::InProgress;

        self.requests.create(&request).await?;

        info!(
            request_id = %request.id,
            template_id = %template.id,
            document_id = %request.document.id,
            requested_by = %request.requested_by,
            stage = %first.name,
            "Approval request initiated"
        );

        Ok(request)
    }

    /// Record a participant decision or delegation on the current stage
    pub async fn act(&self, request_id: &str, user_id: &str, input: ActionInput) -> Result<ApprovalRequest> {
        let now = Utc::now();
        let (request, ()) = self
            .transact(request_id, now, |template, request| {
                apply_action(template, request, user_id, &input, now)
            })
            .await?;

        info!(
            request_id = %request.id,
            user_id = %user_id,
            action = ?input.action,
            status = %request.status,
            "Participant action recorded"
        );

        Ok(request)
    }

    /// Administrative override: close a non-terminal request as cancelled
    pub async fn cancel(&self, request_id: &str, cancelled_by: &str, reason: Option<&str>) -> Result<ApprovalRequest> {
        let now = Utc::now();
        let (request, ()) = self
            .transact(request_id, now, |_template, request| {
                if request.is_terminal() {
                    return Err(WorkflowError::RequestClosed(request.id.clone()));
                }

                let stage_name = request.current_stage_mut().map(|result| {
                    result.close(StageStatus::Cancelled, now);
                    result.stage_name.clone()
                });
                request.finish(ApprovalStatus::Cancelled, now);

                let mut signal = signal_for(request, SignalKind::StageAdvanced, now).with_actor(cancelled_by);
                if let Some(stage_name) = stage_name {
                    signal = signal.with_stage(stage_name);
                }
                Ok(Transition::changed((), vec![signal]))
            })
            .await?;

        info!(
            request_id = %request.id,
            cancelled_by = %cancelled_by,
            reason = reason.unwrap_or(""),
            "Approval request cancelled"
        );

        Ok(request)
    }

    /// Apply SLA timeouts to one request as of `now`
    pub async fn apply_timeouts(&self, request_id: &str, now: DateTime<Utc>) -> Result<TimeoutOutcome> {
        let (request, outcome) = self
            .transact(request_id, now, |template, request| apply_timeout(template, request, now))
            .await?;

        match outcome {
            TimeoutOutcome::Expired => {
                warn!(request_id = %request.id, expires_at = ?request.expires_at, "Approval request expired")
            }
            TimeoutOutcome::AutoApproved | TimeoutOutcome::Escalated => info!(
                request_id = %request.id,
                outcome = ?outcome,
                status = %request.status,
                "Stage timeout applied"
            ),
            TimeoutOutcome::Unconfigured => debug!(
                request_id = %request.id,
                "Stage timed out without an escalation path"
            ),
            TimeoutOutcome::NotDue => {}
        }

        Ok(outcome)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn get(&self, request_id: &str) -> Result<ApprovalRequest> {
        self.requests
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| WorkflowError::RequestNotFound(request_id.to_string()))
    }

    /// Requests the user can act on right now
    pub async fn pending_for_user(&self, user_id: &str) -> Result<Vec<ApprovalRequest>> {
        let candidates = self.requests.find_pending_for_user(user_id).await?;
        Ok(candidates
            .into_iter()
            .filter(|r| r.current_stage().map(|s| s.can_act(user_id)).unwrap_or(false))
            .collect())
    }

    pub async fn by_document(&self, document_id: &str) -> Result<Vec<ApprovalRequest>> {
        self.requests.find_by_document(document_id).await
    }

    /// Participant actions across all stages, ordered by time
    pub async fn history(&self, request_id: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self.get(request_id).await?.history())
    }

    pub async fn in_progress(&self) -> Result<Vec<ApprovalRequest>> {
        self.requests.find_in_progress().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalSignal> {
        self.signals.subscribe()
    }

    // ── Transition plumbing ──────────────────────────────────────────

    /// Commit one transition, then queue its signals once the request lock is free.
    async fn transact<T, F>(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
        apply: F,
    ) -> Result<(ApprovalRequest, T)>
    where
        T: Send,
        F: FnMut(&WorkflowTemplate, &mut ApprovalRequest) -> Result<Transition<T>> + Send,
    {
        let (request, value, signals) = self.commit(request_id, now, apply).await?;
        for signal in signals {
            self.signals.emit(signal).await;
        }
        Ok((request, value))
    }

    /// Run `apply` against a fresh copy of the request under its lock and store
    /// the result. Retries on a stale version up to `max_save_retries` times.
    async fn commit<T, F>(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
        mut apply: F,
    ) -> Result<(ApprovalRequest, T, Vec<ApprovalSignal>)>
    where
        T: Send,
        F: FnMut(&WorkflowTemplate, &mut ApprovalRequest) -> Result<Transition<T>> + Send,
    {
        let lock = self.locks.acquire(request_id);
        let _guard = lock.lock().await;

        let mut attempts = 0;
        loop {
            let current = self.get(request_id).await?;
            let template = self.registry.get(&current.template_id).await?;

            let mut next = current.clone();
            let transition = apply(&template, &mut next)?;
            if !transition.changed {
                return Ok((current, transition.value, Vec::new()));
            }

            next.version = current.version + 1;
            next.updated_at = now;

            match self.requests.save(&next, current.version).await {
                Ok(()) => {
                    if next.is_terminal() {
                        self.locks.release(request_id);
                    }
                    return Ok((next, transition.value, transition.signals));
                }
                Err(WorkflowError::ConcurrentModification(_)) if attempts < self.max_save_retries => {
                    attempts += 1;
                    warn!(
                        request_id = %request_id,
                        attempt = attempts,
                        "Approval request changed concurrently, retrying transition"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Transitions (pure over the request copy) ─────────────────────────

fn apply_action(
    template: &WorkflowTemplate,
    request: &mut ApprovalRequest,
    user_id: &str,
    input: &ActionInput,
    now: DateTime<Utc>,
) -> Result<Transition<()>> {
    if request.is_terminal() {
        return Err(WorkflowError::RequestClosed(request.id.clone()));
    }

    let index = current_index(request).ok_or_else(|| WorkflowError::RequestClosed(request.id.clone()))?;
    let stage = stage_definition(template, &request.stage_results[index])?;
    let slot = locate_slot(request, index, user_id)?;

    if input.action == ActionKind::Delegate {
        return delegate(template, request, index, slot, user_id, input, now);
    }

    let result = &request.stage_results[index];
    if result.logic == StageLogic::Sequential {
        if let Some(next) = result.next_in_turn() {
            if next.user_id != user_id {
                return Err(WorkflowError::OutOfSequence {
                    user_id: user_id.to_string(),
                    expected: next.user_id.clone(),
                });
            }
        }
    }

    let comment = input
        .comment
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    if input.action == ActionKind::Reject && template.require_comment_on_reject && comment.is_none() {
        return Err(WorkflowError::CommentRequired(request.id.clone()));
    }

    let status = match input.action {
        ActionKind::Approve => ActionStatus::Approved,
        ActionKind::Reject => ActionStatus::Rejected,
        _ => ActionStatus::Abstained,
    };

    let result = &mut request.stage_results[index];
    let action = &mut result.actions[slot];
    action.status = status;
    action.comment = comment;
    action.action_at = Some(now);
    let stage_name = result.stage_name.clone();

    let evaluation = evaluate(result, stage);
    result.vote_summary = Some(evaluation.votes);

    let mut signals = Vec::new();
    settle_stage(template, request, index, stage, evaluation.verdict, now, &mut signals);

    let recorded = signal_for(request, SignalKind::ActionRecorded, now)
        .with_stage(stage_name)
        .with_actor(user_id);
    signals.insert(0, recorded);

    Ok(Transition::changed((), signals))
}

fn delegate(
    template: &WorkflowTemplate,
    request: &mut ApprovalRequest,
    index: usize,
    slot: usize,
    user_id: &str,
    input: &ActionInput,
    now: DateTime<Utc>,
) -> Result<Transition<()>> {
    if !template.allow_delegation {
        return Err(WorkflowError::InvalidDelegate(format!(
            "Template {} does not allow delegation",
            template.id
        )));
    }

    let to = input
        .delegate_to
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| WorkflowError::InvalidDelegate("No delegate given".into()))?;

    if to == user_id {
        return Err(WorkflowError::InvalidDelegate(format!("{} cannot delegate to themself", user_id)));
    }

    let result = &mut request.stage_results[index];
    if result.holds_slot(to) {
        return Err(WorkflowError::InvalidDelegate(format!(
            "{} already holds a decision slot in stage '{}'",
            to, result.stage_name
        )));
    }

    let original = &mut result.actions[slot];
    original.status = ActionStatus::Delegated;
    original.delegated_to = Some(to.to_string());
    original.comment = input.comment.clone();
    original.action_at = Some(now);

    let mut successor = original.successor(format!("{}>{}", original.participant_id, to), to, now);
    successor.delegated_from = Some(user_id.to_string());
    result.actions.push(successor);

    let stage_name = result.stage_name.clone();
    debug!(
        request_id = %request.id,
        from = %user_id,
        to = %to,
        stage = %stage_name,
        "Decision slot delegated"
    );

    let signal = signal_for(request, SignalKind::ActionRecorded, now)
        .with_stage(stage_name)
        .with_actor(user_id);
    Ok(Transition::changed((), vec![signal]))
}

fn apply_timeout(
    template: &WorkflowTemplate,
    request: &mut ApprovalRequest,
    now: DateTime<Utc>,
) -> Result<Transition<TimeoutOutcome>> {
    if request.status != ApprovalStatus::InProgress {
        return Ok(Transition::unchanged(TimeoutOutcome::NotDue));
    }

    if request.is_expired_at(now) {
        let stage_name = request.current_stage_mut().map(|result| {
            result.close(StageStatus::Expired, now);
            result.stage_name.clone()
        });
        request.finish(ApprovalStatus::Expired, now);

        let mut signal = signal_for(request, SignalKind::StageAdvanced, now);
        if let Some(stage_name) = stage_name {
            signal = signal.with_stage(stage_name);
        }
        return Ok(Transition::changed(TimeoutOutcome::Expired, vec![signal]));
    }

    let Some(index) = current_index(request) else {
        return Ok(Transition::unchanged(TimeoutOutcome::NotDue));
    };
    let stage = stage_definition(template, &request.stage_results[index])?;

    let action = match timeout_action(stage, &request.stage_results[index], now) {
        Some(action) => action,
        None => return Ok(Transition::unchanged(TimeoutOutcome::NotDue)),
    };

    let mut signals = Vec::new();
    let outcome = match action {
        TimeoutAction::Unconfigured => return Ok(Transition::unchanged(TimeoutOutcome::Unconfigured)),
        TimeoutAction::AutoApprove => {
            let result = &mut request.stage_results[index];
            for pending in result.actions.iter_mut().filter(|a| a.is_pending()) {
                pending.status = ActionStatus::Approved;
                pending.comment = Some("Approved automatically on stage timeout".to_string());
                pending.action_at = Some(now);
            }
            let evaluation = evaluate(result, stage);
            result.vote_summary = Some(evaluation.votes);
            let stage_name = result.stage_name.clone();

            settle_stage(template, request, index, stage, evaluation.verdict, now, &mut signals);
            signals.insert(
                0,
                signal_for(request, SignalKind::EscalationTriggered, now).with_stage(stage_name),
            );
            TimeoutOutcome::AutoApproved
        }
        TimeoutAction::Reassign(target) => {
            let result = &mut request.stage_results[index];
            if result.has_decided(&target) {
                warn!(
                    request_id = %request.id,
                    stage = %result.stage_name,
                    target = %target,
                    "Escalation target already decided in this stage, leaving stage as is"
                );
                return Ok(Transition::unchanged(TimeoutOutcome::Unconfigured));
            }
            reassign(result, &target, now);
            result.escalated = true;
            let stage_name = result.stage_name.clone();
            signals.push(
                signal_for(request, SignalKind::EscalationTriggered, now)
                    .with_stage(stage_name)
                    .with_actor(target),
            );
            TimeoutOutcome::Escalated
        }
    };

    Ok(Transition::changed(outcome, signals))
}

/// Act on an evaluated stage: advance, finalize, reject or escalate a tie
fn settle_stage(
    template: &WorkflowTemplate,
    request: &mut ApprovalRequest,
    index: usize,
    stage: &Stage,
    verdict: StageVerdict,
    now: DateTime<Utc>,
    signals: &mut Vec<ApprovalSignal>,
) {
    match verdict {
        StageVerdict::Open => {}
        StageVerdict::Approved => {
            request.stage_results[index].close(StageStatus::Approved, now);

            match template.next_stage(stage.sequence) {
                Some(next) => {
                    open_stage(request, next, now);
                    info!(
                        request_id = %request.id,
                        completed = %stage.name,
                        next = %next.name,
                        "Stage approved, next stage opened"
                    );
                    signals.push(signal_for(request, SignalKind::StageAdvanced, now).with_stage(next.name.clone()));
                }
                None => {
                    request.finish(ApprovalStatus::Approved, now);
                    info!(request_id = %request.id, "Approval request approved");
                    signals.push(signal_for(request, SignalKind::StageAdvanced, now).with_stage(stage.name.clone()));
                }
            }
        }
        StageVerdict::Rejected => reject(request, index, stage, now, signals),
        StageVerdict::Escalate => {
            let result = &mut request.stage_results[index];
            if result.has_pending() {
                return;
            }

            let target = stage.escalation.as_ref().and_then(|e| e.escalate_to.clone());
            match target {
                Some(target) if !result.tie_escalated && !result.has_decided(&target) => {
                    reassign(result, &target, now);
                    result.tie_escalated = true;
                    info!(
                        request_id = %request.id,
                        stage = %stage.name,
                        target = %target,
                        "Tied vote escalated"
                    );
                    signals.push(
                        signal_for(request, SignalKind::EscalationTriggered, now)
                            .with_stage(stage.name.clone())
                            .with_actor(target),
                    );
                }
                _ => reject(request, index, stage, now, signals),
            }
        }
    }
}

fn reject(
    request: &mut ApprovalRequest,
    index: usize,
    stage: &Stage,
    now: DateTime<Utc>,
    signals: &mut Vec<ApprovalSignal>,
) {
    request.stage_results[index].close(StageStatus::Rejected, now);
    request.finish(ApprovalStatus::Rejected, now);
    warn!(request_id = %request.id, stage = %stage.name, "Approval request rejected");
    signals.push(signal_for(request, SignalKind::StageAdvanced, now).with_stage(stage.name.clone()));
}

/// Skip every pending slot and hand the stage to `target` with a fresh SLA window
fn reassign(result: &mut StageResult, target: &str, now: DateTime<Utc>) {
    let template_slot = result.next_in_turn().cloned();
    for pending in result.actions.iter_mut().filter(|a| a.is_pending()) {
        pending.status = ActionStatus::Skipped;
        pending.action_at = Some(now);
    }

    let participant_id = format!("escalation>{}", target);
    let action = match template_slot {
        Some(slot) => slot.successor(participant_id, target, now),
        None => {
            let sequence = result.actions.iter().map(|a| a.sequence + 1).max().unwrap_or(0);
            let participant = Participant::user(target, target).with_id(participant_id);
            ParticipantAction::pending(&participant, sequence, now)
        }
    };
    result.actions.push(action);
    result.clock_started_at = now;
}

fn open_stage(request: &mut ApprovalRequest, stage: &Stage, now: DateTime<Utc>) {
    request.current_stage_id = Some(stage.id.clone());
    request.stage_results.push(StageResult::open(stage, now));
}

fn current_index(request: &ApprovalRequest) -> Option<usize> {
    let stage_id = request.current_stage_id.as_deref()?;
    request
        .stage_results
        .iter()
        .rposition(|r| r.stage_id == stage_id && r.is_open())
}

fn stage_definition<'a>(template: &'a WorkflowTemplate, result: &StageResult) -> Result<&'a Stage> {
    template.stage(&result.stage_id).ok_or_else(|| {
        WorkflowError::InvalidTemplate(format!(
            "Template {} has no stage {}",
            template.id, result.stage_id
        ))
    })
}

/// Index of the user's pending slot in the current stage, or the reason there is none
fn locate_slot(request: &ApprovalRequest, index: usize, user_id: &str) -> Result<usize> {
    let result = &request.stage_results[index];
    if let Some(slot) = result
        .actions
        .iter()
        .position(|a| a.user_id == user_id && a.is_pending())
    {
        return Ok(slot);
    }

    if result
        .actions
        .iter()
        .any(|a| a.user_id == user_id && a.status != ActionStatus::Skipped)
    {
        return Err(WorkflowError::AlreadyActed {
            request_id: request.id.clone(),
            user_id: user_id.to_string(),
        });
    }

    // a slot left pending in a stage that has already closed
    if request
        .stage_results
        .iter()
        .any(|r| !r.is_open() && r.actions.iter().any(|a| a.user_id == user_id && a.is_pending()))
    {
        return Err(WorkflowError::RequestClosed(request.id.clone()));
    }

    Err(WorkflowError::NotAuthorized {
        request_id: request.id.clone(),
        user_id: user_id.to_string(),
    })
}

fn signal_for(request: &ApprovalRequest, kind: SignalKind, now: DateTime<Utc>) -> ApprovalSignal {
    ApprovalSignal::new(kind, &request.id, &request.document.id, request.status, now)
}
