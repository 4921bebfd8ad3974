//! End-to-end approval lifecycles through the public engine API.

use approval_core::events::InMemoryEventPublisher;
use approval_engine::{
    ActionInput, ActionStatus, ApprovalOrchestrator, ApprovalStatus, DocumentRef, EscalationConfig,
    EscalationMonitor, InMemoryRequestRepository, InMemoryTemplateRepository, Participant,
    SignalDispatcher, SignalKind, Stage, StageLogic, StageStatus, TemplateBuilders,
    TemplateRegistry, TemplateRepository, TieBreak, TimeoutOutcome, VotingConfig, WorkflowError,
    WorkflowTemplate, MAX_TIMEOUT_HOURS,
};
use chrono::Duration;
use std::sync::Arc;

struct Engine {
    orchestrator: Arc<ApprovalOrchestrator>,
    publisher: Arc<InMemoryEventPublisher>,
}

impl Engine {
    fn new() -> Self {
        Self::with_templates(Arc::new(InMemoryTemplateRepository::new()))
    }

    fn with_templates(templates: Arc<InMemoryTemplateRepository>) -> Self {
        let registry = Arc::new(TemplateRegistry::new(templates));
        let publisher = Arc::new(InMemoryEventPublisher::new());
        let (signals, dispatcher) = SignalDispatcher::channel(256);
        tokio::spawn(dispatcher.with_publisher(publisher.clone()).run());

        let orchestrator = Arc::new(ApprovalOrchestrator::new(
            registry,
            Arc::new(InMemoryRequestRepository::new()),
            signals,
        ));

        Self {
            orchestrator,
            publisher,
        }
    }

    async fn register(&self, template: WorkflowTemplate) -> String {
        self.orchestrator
            .registry()
            .register(template)
            .await
            .expect("Failed to register template")
            .id
    }

    async fn start(&self, template_id: &str, document_id: &str) -> String {
        self.orchestrator
            .initiate(
                template_id,
                DocumentRef::new(document_id, document_id, "Test document"),
                "requester",
                "Needs sign-off",
            )
            .await
            .expect("Failed to initiate request")
            .id
    }

    async fn approve(&self, request_id: &str, user: &str) -> approval_engine::ApprovalRequest {
        self.orchestrator
            .act(request_id, user, ActionInput::approve())
            .await
            .expect("Approve failed")
    }
}

fn single_stage(logic: StageLogic, users: &[&str]) -> Stage {
    let mut stage = Stage::new("Review", 1, logic);
    for user in users {
        stage = stage.with_participant(Participant::user(*user, *user));
    }
    stage
}

fn template(stage: Stage) -> WorkflowTemplate {
    WorkflowTemplate::new("Test Template", "sales_order").with_stage(stage)
}

fn status_of(request: &approval_engine::ApprovalRequest, user: &str) -> Option<ActionStatus> {
    request.stage_results.last().and_then(|r| {
        r.actions
            .iter()
            .rev()
            .find(|a| a.user_id == user)
            .map(|a| a.status)
    })
}

// ==================== Stage Logic Tests ====================

#[tokio::test]
async fn test_and_stage_rejects_on_first_rejection() {
    let engine = Engine::new();
    let template_id = engine
        .register(template(single_stage(StageLogic::And, &["a", "b", "c"])))
        .await;
    let request_id = engine.start(&template_id, "SO-1").await;

    let request = engine
        .orchestrator
        .act(&request_id, "a", ActionInput::reject().with_comment("Price too low"))
        .await
        .unwrap();

    assert_eq!(request.status, ApprovalStatus::Rejected);
    assert!(request.completed_at.is_some());
    assert_eq!(request.stage_results[0].status, StageStatus::Rejected);
    assert_eq!(status_of(&request, "b"), Some(ActionStatus::Pending));
    assert_eq!(status_of(&request, "c"), Some(ActionStatus::Pending));
}

#[tokio::test]
async fn test_or_stage_approves_on_first_approval() {
    let engine = Engine::new();
    let template_id = engine
        .register(template(single_stage(StageLogic::Or, &["a", "b", "c", "d", "e"])))
        .await;
    let request_id = engine.start(&template_id, "SO-2").await;

    engine
        .orchestrator
        .act(&request_id, "a", ActionInput::reject())
        .await
        .unwrap();
    let request = engine.approve(&request_id, "b").await;

    assert_eq!(request.status, ApprovalStatus::Approved);
    let pending = request.stage_results[0]
        .actions
        .iter()
        .filter(|a| a.status == ActionStatus::Pending)
        .count();
    assert_eq!(pending, 3);
}

#[tokio::test]
async fn test_voting_stage_thresholds() {
    let engine = Engine::new();
    let voting = single_stage(StageLogic::Voting, &["a", "b", "c"]).with_voting(VotingConfig::new(2, 66));
    let template_id = engine.register(template(voting)).await;

    // 2 of 3 approve with one still pending: 66.7% >= 66%
    let request_id = engine.start(&template_id, "SO-3").await;
    engine.approve(&request_id, "a").await;
    let request = engine.approve(&request_id, "b").await;
    assert_eq!(request.status, ApprovalStatus::Approved);
    let votes = request.stage_results[0].vote_summary.clone().unwrap();
    assert_eq!((votes.approved, votes.rejected, votes.pending), (2, 0, 1));

    // 1 approve and 1 reject meets quorum at 50%
    let request_id = engine.start(&template_id, "SO-4").await;
    engine.approve(&request_id, "a").await;
    let request = engine
        .orchestrator
        .act(&request_id, "b", ActionInput::reject())
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Rejected);
}

// ==================== Delegation Tests ====================

#[tokio::test]
async fn test_delegation_transfers_slot() {
    let engine = Engine::new();
    let template_id = engine
        .register(template(single_stage(StageLogic::And, &["a", "c", "d"])))
        .await;
    let request_id = engine.start(&template_id, "SO-5").await;

    let request = engine
        .orchestrator
        .act(&request_id, "a", ActionInput::delegate("b").with_comment("On leave"))
        .await
        .unwrap();
    assert_eq!(request.stage_results[0].actions.len(), 4);
    assert_eq!(status_of(&request, "a"), Some(ActionStatus::Delegated));
    assert_eq!(status_of(&request, "b"), Some(ActionStatus::Pending));

    engine.approve(&request_id, "c").await;
    let request = engine.approve(&request_id, "d").await;
    assert_eq!(request.status, ApprovalStatus::InProgress);

    assert!(matches!(
        engine.orchestrator.act(&request_id, "a", ActionInput::approve()).await,
        Err(WorkflowError::AlreadyActed { .. })
    ));

    let request = engine.approve(&request_id, "b").await;
    assert_eq!(request.status, ApprovalStatus::Approved);

    let votes = request.stage_results[0].vote_summary.clone().unwrap();
    assert_eq!(votes.approved, 3);
    assert_eq!(votes.pending, 0);

    let delegated = &request.stage_results[0].actions[0];
    assert_eq!(delegated.delegated_to.as_deref(), Some("b"));
    assert_eq!(delegated.comment.as_deref(), Some("On leave"));
}

#[tokio::test]
async fn test_delegation_to_decided_voter_is_refused() {
    let engine = Engine::new();
    let voting = single_stage(StageLogic::Voting, &["a", "b", "c"]).with_voting(VotingConfig::new(3, 60));
    let template_id = engine.register(template(voting)).await;
    let request_id = engine.start(&template_id, "SO-10").await;

    engine.approve(&request_id, "a").await;
    assert!(matches!(
        engine.orchestrator.act(&request_id, "b", ActionInput::delegate("a")).await,
        Err(WorkflowError::InvalidDelegate(_))
    ));

    engine
        .orchestrator
        .act(&request_id, "c", ActionInput::reject())
        .await
        .unwrap();
    let request = engine
        .orchestrator
        .act(&request_id, "b", ActionInput::reject())
        .await
        .unwrap();

    assert_eq!(request.status, ApprovalStatus::Rejected);
    let slots_for_a = request.stage_results[0]
        .actions
        .iter()
        .filter(|action| action.user_id == "a")
        .count();
    assert_eq!(slots_for_a, 1);
    let votes = request.stage_results[0].vote_summary.clone().unwrap();
    assert_eq!((votes.approved, votes.rejected), (1, 2));
}

#[tokio::test]
async fn test_delegation_to_pending_participant_is_refused() {
    let engine = Engine::new();
    let template_id = engine
        .register(template(single_stage(StageLogic::And, &["a", "b"])))
        .await;
    let request_id = engine.start(&template_id, "SO-11").await;

    assert!(matches!(
        engine.orchestrator.act(&request_id, "a", ActionInput::delegate("b")).await,
        Err(WorkflowError::InvalidDelegate(_))
    ));
    engine.approve(&request_id, "a").await;
    assert!(matches!(
        engine.orchestrator.act(&request_id, "b", ActionInput::delegate("a")).await,
        Err(WorkflowError::InvalidDelegate(_))
    ));

    let request = engine.orchestrator.get(&request_id).await.unwrap();
    assert_eq!(request.version, 1);
    assert_eq!(status_of(&request, "b"), Some(ActionStatus::Pending));
}

// ==================== Idempotence Tests ====================

#[tokio::test]
async fn test_repeated_approval_is_rejected() {
    let engine = Engine::new();
    let template_id = engine
        .register(template(single_stage(StageLogic::And, &["a", "b"])))
        .await;
    let request_id = engine.start(&template_id, "SO-6").await;

    let first = engine.approve(&request_id, "a").await;
    let second = engine
        .orchestrator
        .act(&request_id, "a", ActionInput::approve())
        .await;

    assert!(matches!(second, Err(WorkflowError::AlreadyActed { .. })));
    let stored = engine.orchestrator.get(&request_id).await.unwrap();
    assert_eq!(stored.stage_results, first.stage_results);
    assert_eq!(stored.version, first.version);
}

#[tokio::test]
async fn test_unknown_request_and_participant() {
    let engine = Engine::new();
    let template_id = engine
        .register(template(single_stage(StageLogic::And, &["a"])))
        .await;
    let request_id = engine.start(&template_id, "SO-7").await;

    assert!(matches!(
        engine.orchestrator.act("apr_missing", "a", ActionInput::approve()).await,
        Err(WorkflowError::RequestNotFound(_))
    ));
    assert!(matches!(
        engine.orchestrator.act(&request_id, "z", ActionInput::approve()).await,
        Err(WorkflowError::NotAuthorized { .. })
    ));
}

// ==================== Escalation Tests ====================

#[tokio::test]
async fn test_escalation_reassigns_after_timeout() {
    let engine = Engine::new();
    let stage = single_stage(StageLogic::And, &["a", "b"])
        .with_timeout_hours(1)
        .with_escalation(EscalationConfig::reassign(1, "director"));
    let template_id = engine.register(template(stage)).await;
    let request_id = engine.start(&template_id, "SO-8").await;
    engine.approve(&request_id, "a").await;

    let monitor = EscalationMonitor::new(engine.orchestrator.clone());
    let created_at = engine.orchestrator.get(&request_id).await.unwrap().created_at;
    let sweep_time = created_at + Duration::minutes(61);

    let report = monitor.sweep_at(sweep_time).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.escalated, 1);

    let request = engine.orchestrator.get(&request_id).await.unwrap();
    let stage = &request.stage_results[0];
    assert_eq!(stage.actions.len(), 3);
    assert_eq!(status_of(&request, "a"), Some(ActionStatus::Approved));
    assert_eq!(status_of(&request, "b"), Some(ActionStatus::Skipped));
    assert_eq!(status_of(&request, "director"), Some(ActionStatus::Pending));
    assert_eq!(stage.clock_started_at, sweep_time);
    assert!(stage.escalated);

    // a second sweep does not escalate the same stage again
    let report = monitor.sweep_at(sweep_time + Duration::hours(3)).await.unwrap();
    assert_eq!(report.escalated, 0);
    assert_eq!(engine.orchestrator.get(&request_id).await.unwrap().stage_results[0].actions.len(), 3);

    assert!(matches!(
        engine.orchestrator.act(&request_id, "b", ActionInput::approve()).await,
        Err(WorkflowError::NotAuthorized { .. })
    ));
    let request = engine.approve(&request_id, "director").await;
    assert_eq!(request.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn test_escalation_target_who_already_decided_keeps_stage() {
    let engine = Engine::new();
    let stage = single_stage(StageLogic::And, &["a", "b"])
        .with_timeout_hours(1)
        .with_escalation(EscalationConfig::reassign(1, "a"));
    let template_id = engine.register(template(stage)).await;
    let request_id = engine.start(&template_id, "SO-12").await;
    engine.approve(&request_id, "a").await;

    let created_at = engine.orchestrator.get(&request_id).await.unwrap().created_at;
    let outcome = engine
        .orchestrator
        .apply_timeouts(&request_id, created_at + Duration::minutes(61))
        .await
        .unwrap();
    assert_eq!(outcome, TimeoutOutcome::Unconfigured);

    let monitor = EscalationMonitor::new(engine.orchestrator.clone());
    let report = monitor.sweep_at(created_at + Duration::minutes(61)).await.unwrap();
    assert_eq!(report.escalated, 0);

    let request = engine.orchestrator.get(&request_id).await.unwrap();
    let stage = &request.stage_results[0];
    assert_eq!(stage.actions.len(), 2);
    assert!(!stage.escalated);
    assert_eq!(status_of(&request, "b"), Some(ActionStatus::Pending));

    let request = engine.approve(&request_id, "b").await;
    assert_eq!(request.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn test_tie_break_keeps_stage_timeout() {
    let engine = Engine::new();
    let stage = single_stage(StageLogic::Voting, &["a", "b"])
        .with_voting(VotingConfig::new(2, 50).with_tie_break(TieBreak::Escalate))
        .with_timeout_hours(1)
        .with_escalation(EscalationConfig::reassign(1, "chair"));
    let template_id = engine.register(template(stage)).await;
    let request_id = engine.start(&template_id, "SO-13").await;

    engine.approve(&request_id, "a").await;
    let tied = engine
        .orchestrator
        .act(&request_id, "b", ActionInput::reject())
        .await
        .unwrap();
    let stage = &tied.stage_results[0];
    assert!(stage.tie_escalated);
    assert!(!stage.escalated);
    assert_eq!(status_of(&tied, "chair"), Some(ActionStatus::Pending));

    // the chair sits on the tie past the SLA
    let monitor = EscalationMonitor::new(engine.orchestrator.clone());
    let sweep_time = stage.clock_started_at + Duration::minutes(61);
    let report = monitor.sweep_at(sweep_time).await.unwrap();
    assert_eq!(report.escalated, 1);

    let request = engine.orchestrator.get(&request_id).await.unwrap();
    let stage = &request.stage_results[0];
    assert!(stage.escalated);
    assert_eq!(stage.clock_started_at, sweep_time);
    let live_chair_slots = stage
        .actions
        .iter()
        .filter(|action| action.user_id == "chair" && action.is_pending())
        .count();
    assert_eq!(live_chair_slots, 1);

    let request = engine.approve(&request_id, "chair").await;
    assert_eq!(request.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn test_request_expiry() {
    let engine = Engine::new();
    let template_id = engine
        .register(template(single_stage(StageLogic::And, &["a"])).with_timeout_hours(24))
        .await;
    let request_id = engine.start(&template_id, "SO-9").await;
    let created_at = engine.orchestrator.get(&request_id).await.unwrap().created_at;

    let monitor = EscalationMonitor::new(engine.orchestrator.clone());
    let report = monitor.sweep_at(created_at + Duration::hours(25)).await.unwrap();
    assert_eq!(report.expired, 1);

    let request = engine.orchestrator.get(&request_id).await.unwrap();
    assert_eq!(request.status, ApprovalStatus::Expired);
    assert_eq!(request.stage_results[0].status, StageStatus::Expired);

    assert!(matches!(
        engine.orchestrator.act(&request_id, "a", ActionInput::approve()).await,
        Err(WorkflowError::RequestClosed(_))
    ));
    assert_eq!(monitor.sweep_at(created_at + Duration::hours(26)).await.unwrap().examined, 0);
}

// ==================== Template Bound Tests ====================

#[tokio::test]
async fn test_timeout_beyond_limit_is_refused() {
    let engine = Engine::new();

    let result = engine
        .orchestrator
        .registry()
        .register(template(single_stage(StageLogic::And, &["a"])).with_timeout_hours(u32::MAX))
        .await;
    assert!(matches!(result, Err(WorkflowError::InvalidTemplate(_))));

    let result = engine
        .orchestrator
        .registry()
        .register(template(single_stage(StageLogic::And, &["a"]).with_timeout_hours(MAX_TIMEOUT_HOURS + 1)))
        .await;
    assert!(matches!(result, Err(WorkflowError::InvalidTemplate(_))));

    let template_id = engine
        .register(template(single_stage(StageLogic::And, &["a"])).with_timeout_hours(MAX_TIMEOUT_HOURS))
        .await;
    let request_id = engine.start(&template_id, "SO-14").await;
    assert!(engine.orchestrator.get(&request_id).await.unwrap().expires_at.is_some());
}

#[tokio::test]
async fn test_stored_template_with_unbounded_timeout_fails_cleanly() {
    let templates = Arc::new(InMemoryTemplateRepository::new());
    let engine = Engine::with_templates(templates.clone());

    // stored without going through registration checks
    let stored = template(single_stage(StageLogic::And, &["a"])).with_timeout_hours(u32::MAX);
    templates.insert(&stored).await.unwrap();

    let result = engine
        .orchestrator
        .initiate(&stored.id, DocumentRef::new("SO-15", "SO-15", "Test document"), "requester", "")
        .await;
    assert!(matches!(result, Err(WorkflowError::InvalidTemplate(_))));
    assert!(engine.orchestrator.by_document("SO-15").await.unwrap().is_empty());
}

// ==================== End-to-End Tests ====================

#[tokio::test]
async fn test_three_stage_sales_order() {
    let engine = Engine::new();
    let template_id = engine
        .register(TemplateBuilders::sales_order_approval(
            &["m1", "m2"],
            &["c1", "c2", "c3"],
            &["f1", "f2"],
        ))
        .await;
    let request_id = engine.start(&template_id, "SO-10").await;

    engine.approve(&request_id, "m1").await;
    let request = engine.approve(&request_id, "m2").await;
    assert_eq!(request.stage_results.len(), 2);
    assert_eq!(request.current_stage().map(|s| s.stage_name.as_str()), Some("Pricing Committee"));

    engine.approve(&request_id, "c1").await;
    let request = engine.approve(&request_id, "c2").await;
    assert_eq!(request.stage_results.len(), 3);
    assert_eq!(request.stage_results[1].status, StageStatus::Approved);

    let request = engine.approve(&request_id, "f1").await;
    assert_eq!(request.status, ApprovalStatus::Approved);
    assert_eq!(request.stage_results.len(), 3);
    assert!(request
        .stage_results
        .iter()
        .all(|r| r.status == StageStatus::Approved));

    for pair in request.stage_results.windows(2) {
        let completed = pair[0].completed_at.unwrap();
        assert!(pair[0].started_at <= completed);
        assert!(completed <= pair[1].started_at);
    }

    let history = engine.orchestrator.history(&request_id).await.unwrap();
    assert_eq!(history.len(), 7);
    assert!(history
        .windows(2)
        .all(|w| w[0].action.effective_time() <= w[1].action.effective_time()));
}

#[tokio::test]
async fn test_queries() {
    let engine = Engine::new();
    let template_id = engine
        .register(template(single_stage(StageLogic::Or, &["a", "b"])))
        .await;
    let first = engine.start(&template_id, "PO-1").await;
    let second = engine.start(&template_id, "PO-1").await;
    engine.start(&template_id, "PO-2").await;

    assert_eq!(engine.orchestrator.by_document("PO-1").await.unwrap().len(), 2);
    assert_eq!(engine.orchestrator.pending_for_user("a").await.unwrap().len(), 3);

    engine.approve(&first, "a").await;
    engine.orchestrator.cancel(&second, "admin", None).await.unwrap();

    assert_eq!(engine.orchestrator.pending_for_user("a").await.unwrap().len(), 1);
    assert!(matches!(
        engine.orchestrator.history("apr_missing").await,
        Err(WorkflowError::RequestNotFound(_))
    ));
}

// ==================== Signal Tests ====================

#[tokio::test]
async fn test_signals_follow_transitions() {
    let engine = Engine::new();
    let template_id = engine
        .register(
            WorkflowTemplate::new("Two stages", "sales_order")
                .with_stage(single_stage(StageLogic::And, &["a"]))
                .with_stage(
                    Stage::new("Finance", 2, StageLogic::Or)
                        .with_participant(Participant::user("f", "Finance")),
                ),
        )
        .await;
    let request_id = engine.start(&template_id, "SO-11").await;
    let mut signals = engine.orchestrator.subscribe();

    engine.approve(&request_id, "a").await;

    let recorded = signals.recv().await.unwrap();
    assert_eq!(recorded.kind, SignalKind::ActionRecorded);
    assert_eq!(recorded.actor_id.as_deref(), Some("a"));
    assert_eq!(recorded.document_id, "SO-11");

    let advanced = signals.recv().await.unwrap();
    assert_eq!(advanced.kind, SignalKind::StageAdvanced);
    assert_eq!(advanced.stage_name.as_deref(), Some("Finance"));
    assert_eq!(advanced.status, ApprovalStatus::InProgress);

    engine.approve(&request_id, "f").await;
    signals.recv().await.unwrap();
    let finished = signals.recv().await.unwrap();
    assert_eq!(finished.kind, SignalKind::StageAdvanced);
    assert_eq!(finished.status, ApprovalStatus::Approved);

    // the dispatcher publishes after fanning out to subscribers
    let mut events = Vec::new();
    for _ in 0..50 {
        events = engine.publisher.events_matching("approval.*").await;
        if events.len() == 4 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(events.len(), 4);
}
