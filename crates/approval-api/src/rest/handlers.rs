//! HTTP request handlers

use crate::{error::ApiError, AppState, Result};
use approval_engine::{
    ActionInput, ApprovalRequest, ApproverRequirement, DocumentRef, EscalationConfig,
    HistoryEntry, Participant, ParticipantType, Stage, StageLogic, Tier, VotingConfig,
    WorkflowTemplate,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

type SharedState = State<Arc<AppState>>;

// ==================== Request/Response Types ====================

#[derive(Debug, Deserialize)]
pub struct ParticipantRequest {
    #[serde(default = "default_participant_type")]
    pub participant_type: ParticipantType,
    pub identifier: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub weight: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StageRequest {
    pub name: String,
    pub sequence: u32,
    pub logic: StageLogic,
    pub participants: Vec<ParticipantRequest>,
    #[serde(default)]
    pub voting: Option<VotingConfig>,
    #[serde(default)]
    pub timeout_hours: Option<u32>,
    #[serde(default)]
    pub escalation: Option<EscalationConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub document_type: String,
    pub stages: Vec<StageRequest>,
    #[serde(default)]
    pub timeout_hours: Option<u32>,
    #[serde(default = "default_true")]
    pub allow_delegation: bool,
    #[serde(default)]
    pub require_comment_on_reject: bool,
}

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub template_id: String,
    pub document: DocumentRef,
    pub requested_by: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub user_id: String,
    #[serde(flatten)]
    pub input: ActionInput,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub cancelled_by: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TierQuery {
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct ApproverQuery {
    pub discount_percent: f64,
    pub margin_percent: f64,
    pub amount: f64,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub request_id: String,
    pub entries: Vec<HistoryEntry>,
}

fn default_participant_type() -> ParticipantType {
    ParticipantType::User
}

fn default_true() -> bool {
    true
}

impl TemplateRequest {
    fn into_template(self) -> WorkflowTemplate {
        let mut template = WorkflowTemplate::new(self.name, self.document_type)
            .with_description(self.description)
            .with_delegation(self.allow_delegation)
            .with_comment_on_reject(self.require_comment_on_reject);
        template.timeout_hours = self.timeout_hours;

        for stage in self.stages {
            template = template.with_stage(stage.into_stage());
        }
        template
    }
}

impl StageRequest {
    fn into_stage(self) -> Stage {
        let participants = self
            .participants
            .into_iter()
            .map(ParticipantRequest::into_participant)
            .collect();

        let mut stage = Stage::new(self.name, self.sequence, self.logic).with_participants(participants);
        stage.voting = self.voting;
        stage.timeout_hours = self.timeout_hours;
        stage.escalation = self.escalation;
        stage
    }
}

impl ParticipantRequest {
    fn into_participant(self) -> Participant {
        let display_name = self.display_name.unwrap_or_else(|| self.identifier.clone());
        let mut participant = Participant::new(self.participant_type, self.identifier, display_name);
        participant.required = self.required;
        participant.weight = self.weight;
        participant
    }
}

// ==================== Health Handlers ====================

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ==================== Template Handlers ====================

pub async fn create_template(
    State(state): SharedState,
    Json(body): Json<TemplateRequest>,
) -> Result<(StatusCode, Json<WorkflowTemplate>)> {
    let template = state.registry().register(body.into_template()).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn get_template(
    State(state): SharedState,
    Path(id): Path<String>,
) -> Result<Json<WorkflowTemplate>> {
    Ok(Json(state.registry().get(&id).await?))
}

pub async fn revise_template(
    State(state): SharedState,
    Path(id): Path<String>,
    Json(body): Json<TemplateRequest>,
) -> Result<(StatusCode, Json<WorkflowTemplate>)> {
    let template = state.registry().revise(&id, body.into_template()).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn list_templates(State(state): SharedState) -> Result<Json<Vec<WorkflowTemplate>>> {
    Ok(Json(state.registry().list().await?))
}

// ==================== Request Handlers ====================

pub async fn initiate_request(
    State(state): SharedState,
    Json(body): Json<InitiateRequest>,
) -> Result<(StatusCode, Json<ApprovalRequest>)> {
    if body.document.id.trim().is_empty() {
        return Err(ApiError::BadRequest("document.id must not be empty".into()));
    }

    let request = state
        .orchestrator
        .initiate(&body.template_id, body.document, &body.requested_by, &body.summary)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn get_request(
    State(state): SharedState,
    Path(id): Path<String>,
) -> Result<Json<ApprovalRequest>> {
    Ok(Json(state.orchestrator.get(&id).await?))
}

pub async fn record_action(
    State(state): SharedState,
    Path(id): Path<String>,
    Json(body): Json<ActionRequest>,
) -> Result<Json<ApprovalRequest>> {
    if body.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".into()));
    }

    let request = state.orchestrator.act(&id, &body.user_id, body.input).await?;
    Ok(Json(request))
}

pub async fn cancel_request(
    State(state): SharedState,
    Path(id): Path<String>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<ApprovalRequest>> {
    let request = state
        .orchestrator
        .cancel(&id, &body.cancelled_by, body.reason.as_deref())
        .await?;
    info!(request_id = %id, cancelled_by = %body.cancelled_by, "Cancellation accepted via API");
    Ok(Json(request))
}

pub async fn get_history(
    State(state): SharedState,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>> {
    let entries = state.orchestrator.history(&id).await?;
    Ok(Json(HistoryResponse {
        request_id: id,
        entries,
    }))
}

pub async fn pending_for_user(
    State(state): SharedState,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ApprovalRequest>>> {
    Ok(Json(state.orchestrator.pending_for_user(&user_id).await?))
}

pub async fn requests_for_document(
    State(state): SharedState,
    Path(document_id): Path<String>,
) -> Result<Json<Vec<ApprovalRequest>>> {
    Ok(Json(state.orchestrator.by_document(&document_id).await?))
}

// ==================== Routing Handlers ====================

pub async fn resolve_tier(State(state): SharedState, Json(query): Json<TierQuery>) -> Json<Tier> {
    Json(state.router.resolve_tier(query.amount).clone())
}

pub async fn determine_approvers(
    State(state): SharedState,
    Json(query): Json<ApproverQuery>,
) -> Json<ApproverRequirement> {
    Json(
        state
            .router
            .determine_approvers(query.discount_percent, query.margin_percent, query.amount),
    )
}
