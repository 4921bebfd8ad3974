//! Pre-built templates for the ERP documents that route through approval

use crate::router::ApproverRequirement;
use crate::template::{
    EscalationConfig, Participant, Stage, StageLogic, VotingConfig, WorkflowTemplate,
};

/// Template builders for common approval flows
pub struct TemplateBuilders;

impl TemplateBuilders {
    /// One-stage template over the given approver ids
    pub fn single_stage(
        name: &str,
        document_type: &str,
        logic: StageLogic,
        approvers: &[&str],
    ) -> WorkflowTemplate {
        let mut stage = Stage::new(name, 1, logic).with_participants(users(approvers));
        if logic == StageLogic::Voting {
            let quorum = (approvers.len() as u32 / 2 + 1).min(approvers.len() as u32);
            stage = stage.with_voting(VotingConfig::new(quorum, 51));
        }

        WorkflowTemplate::new(name, document_type).with_stage(stage)
    }

    /// Sales order flow: manager review (all), pricing committee vote, finance sign-off (any one)
    pub fn sales_order_approval(
        managers: &[&str],
        committee: &[&str],
        finance: &[&str],
    ) -> WorkflowTemplate {
        WorkflowTemplate::new("Sales Order Approval", "sales_order")
            .with_description("Manager review, pricing committee vote and finance sign-off")
            .with_timeout_hours(168)
            .with_stage(
                Stage::new("Sales Manager Review", 1, StageLogic::And)
                    .with_participants(users(managers))
                    .with_timeout_hours(24),
            )
            .with_stage(
                Stage::new("Pricing Committee", 2, StageLogic::Voting)
                    .with_participants(users(committee))
                    .with_voting(VotingConfig::new(2.min(committee.len() as u32), 66))
                    .with_timeout_hours(48),
            )
            .with_stage(
                Stage::new("Finance Sign-off", 3, StageLogic::Or)
                    .with_participants(users(finance))
                    .with_timeout_hours(24),
            )
    }

    /// Purchase requisition flow with one stage per required role, lowest level first.
    ///
    /// Each stage runs on the tier SLA and escalates to the next role when it lapses.
    pub fn purchase_requisition_approval(requirement: &ApproverRequirement) -> WorkflowTemplate {
        Self::for_requirement(
            "Purchase Requisition Approval",
            "purchase_requisition",
            requirement,
        )
    }

    /// Discount exception flow: the triggered roles sign in strict order and
    /// rejections must carry a comment.
    pub fn discount_exception_approval(requirement: &ApproverRequirement) -> WorkflowTemplate {
        let participants = requirement
            .roles
            .iter()
            .map(|role| Participant::role(role.as_str(), display_name(role)))
            .collect();

        WorkflowTemplate::new("Discount Exception Approval", "discount_exception")
            .with_description(requirement.reasons.join("; "))
            .with_comment_on_reject(true)
            .with_delegation(false)
            .with_stage(
                Stage::new("Discount Sign-off", 1, StageLogic::Sequential)
                    .with_participants(participants)
                    .with_timeout_hours(requirement.sla_hours.max(1)),
            )
    }

    /// One any-one stage per role in `requirement`
    pub fn for_requirement(
        name: &str,
        document_type: &str,
        requirement: &ApproverRequirement,
    ) -> WorkflowTemplate {
        let sla = requirement.sla_hours.max(1);
        let mut template = WorkflowTemplate::new(name, document_type)
            .with_description(requirement.reasons.join("; "))
            .with_timeout_hours(sla * (requirement.roles.len() as u32 + 1));

        for (i, role) in requirement.roles.iter().enumerate() {
            let mut stage = Stage::new(display_name(role), i as u32 + 1, StageLogic::Or)
                .with_participant(Participant::role(role.as_str(), display_name(role)))
                .with_timeout_hours(sla);

            if let Some(next) = requirement.roles.get(i + 1) {
                stage = stage.with_escalation(EscalationConfig::reassign(sla, next.as_str()));
            }
            template = template.with_stage(stage);
        }

        template
    }
}

fn users(ids: &[&str]) -> Vec<Participant> {
    ids.iter().map(|id| Participant::user(*id, *id)).collect()
}

/// "finance_manager" -> "Finance Manager"
fn display_name(role: &str) -> String {
    role.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
