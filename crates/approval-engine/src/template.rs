//! Workflow template definitions: stages, participants and their combination rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{Result, WorkflowError};

/// Longest timeout or escalation delay a template may declare, ten years in hours
pub const MAX_TIMEOUT_HOURS: u32 = 24 * 365 * 10;

fn check_hours(hours: u32, what: &str) -> Result<()> {
    if hours == 0 {
        return Err(WorkflowError::InvalidTemplate(format!("{} must be positive", what)));
    }
    if hours > MAX_TIMEOUT_HOURS {
        return Err(WorkflowError::InvalidTemplate(format!(
            "{} of {} hours exceeds the {} hour limit",
            what, hours, MAX_TIMEOUT_HOURS
        )));
    }
    Ok(())
}

/// Rule combining a stage's participant decisions into a stage outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageLogic {
    /// Every participant must approve; one rejection closes the stage
    And,
    /// The first approval closes the stage
    Or,
    /// Weighted vote against a quorum and threshold
    Voting,
    /// Same completion test as `And`, participants act strictly in order
    Sequential,
}

impl std::fmt::Display for StageLogic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageLogic::And => "AND",
            StageLogic::Or => "OR",
            StageLogic::Voting => "VOTING",
            StageLogic::Sequential => "SEQUENTIAL",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantType {
    User,
    Role,
    Department,
    Dynamic,
}

/// A named actor entitled to one decision slot within a stage.
///
/// `identifier` is the principal id presented when acting. Role, department and
/// dynamic participants are resolved to that id upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub id: String,
    pub participant_type: ParticipantType,
    pub identifier: String,
    pub display_name: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub weight: Option<u32>,
}

fn default_required() -> bool {
    true
}

impl Participant {
    pub fn new(
        participant_type: ParticipantType,
        identifier: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            id: format!("p-{}", identifier),
            participant_type,
            identifier,
            display_name: display_name.into(),
            required: true,
            weight: None,
        }
    }

    pub fn user(identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::new(ParticipantType::User, identifier, display_name)
    }

    pub fn role(identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self::new(ParticipantType::Role, identifier, display_name)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Mark the participant as optional (may abstain without blocking the stage)
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn effective_weight(&self) -> u32 {
        self.weight.unwrap_or(1)
    }
}

/// Resolution applied when a vote lands exactly on the threshold
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    Approve,
    Reject,
    Escalate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VotingConfig {
    pub minimum_votes: u32,
    pub approval_threshold_percent: u32,
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl VotingConfig {
    pub fn new(minimum_votes: u32, approval_threshold_percent: u32) -> Self {
        Self {
            minimum_votes,
            approval_threshold_percent,
            tie_break: TieBreak::default(),
        }
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }
}

/// What happens when a stage outlives its SLA
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationConfig {
    pub after_hours: u32,
    #[serde(default)]
    pub escalate_to: Option<String>,
    #[serde(default = "default_notify_original")]
    pub notify_original: bool,
    #[serde(default)]
    pub auto_approve_on_timeout: bool,
}

fn default_notify_original() -> bool {
    true
}

impl EscalationConfig {
    /// Reassign the stage's pending slots to `target` after `after_hours`
    pub fn reassign(after_hours: u32, target: impl Into<String>) -> Self {
        Self {
            after_hours,
            escalate_to: Some(target.into()),
            notify_original: true,
            auto_approve_on_timeout: false,
        }
    }

    /// Treat the timeout as an implicit yes from every pending participant
    pub fn auto_approve(after_hours: u32) -> Self {
        Self {
            after_hours,
            escalate_to: None,
            notify_original: true,
            auto_approve_on_timeout: true,
        }
    }
}

/// One sequential phase of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub sequence: u32,
    pub logic: StageLogic,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub voting: Option<VotingConfig>,
    #[serde(default)]
    pub timeout_hours: Option<u32>,
    #[serde(default)]
    pub escalation: Option<EscalationConfig>,
}

impl Stage {
    pub fn new(name: impl Into<String>, sequence: u32, logic: StageLogic) -> Self {
        Self {
            id: format!("stage-{}", sequence),
            name: name.into(),
            sequence,
            logic,
            participants: Vec::new(),
            voting: None,
            timeout_hours: None,
            escalation: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_participant(mut self, participant: Participant) -> Self {
        self.participants.push(participant);
        self
    }

    pub fn with_participants(mut self, participants: Vec<Participant>) -> Self {
        self.participants.extend(participants);
        self
    }

    pub fn with_voting(mut self, voting: VotingConfig) -> Self {
        self.voting = Some(voting);
        self
    }

    pub fn with_timeout_hours(mut self, hours: u32) -> Self {
        self.timeout_hours = Some(hours);
        self
    }

    pub fn with_escalation(mut self, escalation: EscalationConfig) -> Self {
        self.escalation = Some(escalation);
        self
    }

    /// Hours after which the stage times out. An explicit stage timeout wins over
    /// the escalation's own `after_hours`.
    pub fn effective_timeout_hours(&self) -> Option<u32> {
        self.timeout_hours
            .or_else(|| self.escalation.as_ref().map(|e| e.after_hours))
    }

    fn validate(&self) -> Result<()> {
        if self.participants.is_empty() {
            return Err(WorkflowError::InvalidTemplate(format!(
                "Stage '{}' has no participants",
                self.name
            )));
        }

        let mut identifiers = HashSet::new();
        let mut ids = HashSet::new();
        for participant in &self.participants {
            if !identifiers.insert(participant.identifier.as_str())
                || !ids.insert(participant.id.as_str())
            {
                return Err(WorkflowError::InvalidTemplate(format!(
                    "Stage '{}' lists participant '{}' more than once",
                    self.name, participant.identifier
                )));
            }
            if participant.weight == Some(0) {
                return Err(WorkflowError::InvalidTemplate(format!(
                    "Participant '{}' has zero voting weight",
                    participant.identifier
                )));
            }
        }

        if self.logic == StageLogic::Voting {
            let voting = self.voting.as_ref().ok_or_else(|| {
                WorkflowError::InvalidTemplate(format!(
                    "Voting stage '{}' has no voting configuration",
                    self.name
                ))
            })?;
            if voting.minimum_votes == 0 || voting.minimum_votes as usize > self.participants.len() {
                return Err(WorkflowError::InvalidTemplate(format!(
                    "Voting stage '{}' needs between 1 and {} minimum votes",
                    self.name,
                    self.participants.len()
                )));
            }
            if !(1..=100).contains(&voting.approval_threshold_percent) {
                return Err(WorkflowError::InvalidTemplate(format!(
                    "Voting stage '{}' threshold must be within 1..=100",
                    self.name
                )));
            }
        }

        if let Some(hours) = self.timeout_hours {
            check_hours(hours, &format!("Stage '{}' timeout", self.name))?;
        }

        if let Some(escalation) = &self.escalation {
            check_hours(escalation.after_hours, &format!("Stage '{}' escalation delay", self.name))?;
            if !escalation.auto_approve_on_timeout && escalation.escalate_to.is_none() {
                return Err(WorkflowError::InvalidTemplate(format!(
                    "Stage '{}' escalates by reassignment but names no target",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

/// Reusable, immutable approval workflow definition.
///
/// Revisions share a `family` and carry an increasing `version`; a request always
/// resolves the exact template id it was created from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub family: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub document_type: String,
    pub version: u32,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub timeout_hours: Option<u32>,
    #[serde(default = "default_allow_delegation")]
    pub allow_delegation: bool,
    #[serde(default)]
    pub require_comment_on_reject: bool,
    pub created_at: DateTime<Utc>,
}

fn default_allow_delegation() -> bool {
    true
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, document_type: impl Into<String>) -> Self {
        let id = generate_template_id();
        Self {
            family: id.clone(),
            id,
            name: name.into(),
            description: String::new(),
            document_type: document_type.into(),
            version: 1,
            stages: Vec::new(),
            timeout_hours: None,
            allow_delegation: true,
            require_comment_on_reject: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_timeout_hours(mut self, hours: u32) -> Self {
        self.timeout_hours = Some(hours);
        self
    }

    pub fn with_delegation(mut self, allow: bool) -> Self {
        self.allow_delegation = allow;
        self
    }

    pub fn with_comment_on_reject(mut self, required: bool) -> Self {
        self.require_comment_on_reject = required;
        self
    }

    /// Check structural soundness before the template is stored
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::InvalidTemplate("Template name is empty".into()));
        }
        if self.document_type.trim().is_empty() {
            return Err(WorkflowError::InvalidTemplate(format!(
                "Template '{}' has no document type",
                self.name
            )));
        }
        if self.stages.is_empty() {
            return Err(WorkflowError::InvalidTemplate(format!(
                "Template '{}' has no stages",
                self.name
            )));
        }
        if let Some(hours) = self.timeout_hours {
            check_hours(hours, &format!("Template '{}' timeout", self.name))?;
        }

        let mut sequences = HashSet::new();
        let mut ids = HashSet::new();
        for stage in &self.stages {
            if !sequences.insert(stage.sequence) {
                return Err(WorkflowError::InvalidTemplate(format!(
                    "Duplicate stage sequence {} in template '{}'",
                    stage.sequence, self.name
                )));
            }
            if !ids.insert(stage.id.as_str()) {
                return Err(WorkflowError::InvalidTemplate(format!(
                    "Duplicate stage id '{}' in template '{}'",
                    stage.id, self.name
                )));
            }
            stage.validate()?;
        }

        Ok(())
    }

    /// Stage with the lowest sequence
    pub fn first_stage(&self) -> Option<&Stage> {
        self.stages.iter().min_by_key(|s| s.sequence)
    }

    /// Stage following `sequence`, if any
    pub fn next_stage(&self, sequence: u32) -> Option<&Stage> {
        self.stages
            .iter()
            .filter(|s| s.sequence > sequence)
            .min_by_key(|s| s.sequence)
    }

    pub fn stage(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }
}

pub(crate) fn generate_template_id() -> String {
    format!("tmpl_{}", uuid::Uuid::new_v4().to_string().replace('-', ""))
}
