//! Stage evaluation: combines a stage's participant actions into a stage outcome.
//!
//! Pure functions only. Delegated and skipped slots are retired history and take
//! no part in any rule.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::request::{ActionStatus, ParticipantAction, StageResult, VoteSummary};
use crate::template::{Stage, StageLogic, TieBreak, VotingConfig};

/// Outcome of evaluating a stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageVerdict {
    /// Not terminal yet
    Open,
    Approved,
    Rejected,
    /// Vote tied exactly on the threshold with an escalating tie-break
    Escalate,
}

impl StageVerdict {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageVerdict::Approved | StageVerdict::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageEvaluation {
    pub verdict: StageVerdict,
    pub votes: VoteSummary,
}

/// Decide whether `result` is terminal under the logic it was opened with
pub fn evaluate(result: &StageResult, stage: &Stage) -> StageEvaluation {
    let live: Vec<&ParticipantAction> = result
        .actions
        .iter()
        .filter(|a| !a.status.is_retired())
        .collect();
    let votes = tally(&live);

    let verdict = match result.logic {
        StageLogic::And | StageLogic::Sequential => unanimous(&live),
        StageLogic::Or => any_one(&live),
        StageLogic::Voting => {
            let fallback = VotingConfig::new(1, 50);
            weighted_vote(&votes, stage.voting.as_ref().unwrap_or(&fallback))
        }
    };

    StageEvaluation { verdict, votes }
}

fn tally(live: &[&ParticipantAction]) -> VoteSummary {
    let mut votes = VoteSummary::default();
    for action in live {
        match action.status {
            ActionStatus::Approved => {
                votes.approved += 1;
                votes.approved_weight += u64::from(action.weight);
            }
            ActionStatus::Rejected => {
                votes.rejected += 1;
                votes.rejected_weight += u64::from(action.weight);
            }
            ActionStatus::Abstained => votes.abstained += 1,
            ActionStatus::Pending => votes.pending += 1,
            ActionStatus::Delegated | ActionStatus::Skipped => {}
        }
    }

    let decided_weight = votes.approved_weight + votes.rejected_weight;
    if decided_weight > 0 {
        votes.percent = votes.approved_weight as f64 * 100.0 / decided_weight as f64;
    }
    votes
}

fn unanimous(live: &[&ParticipantAction]) -> StageVerdict {
    // a rejection closes the stage without waiting for the rest
    if live.iter().any(|a| a.status == ActionStatus::Rejected) {
        return StageVerdict::Rejected;
    }
    if live
        .iter()
        .any(|a| a.required && a.status == ActionStatus::Abstained)
    {
        return StageVerdict::Rejected;
    }
    if live.iter().any(|a| a.is_pending()) {
        return StageVerdict::Open;
    }
    if live.iter().any(|a| a.status == ActionStatus::Approved) {
        StageVerdict::Approved
    } else {
        StageVerdict::Rejected
    }
}

fn any_one(live: &[&ParticipantAction]) -> StageVerdict {
    if live.iter().any(|a| a.status == ActionStatus::Approved) {
        StageVerdict::Approved
    } else if live.iter().any(|a| a.is_pending()) {
        StageVerdict::Open
    } else {
        StageVerdict::Rejected
    }
}

fn weighted_vote(votes: &VoteSummary, config: &VotingConfig) -> StageVerdict {
    let decided = votes.approved + votes.rejected;
    if decided < config.minimum_votes {
        return if votes.pending > 0 {
            StageVerdict::Open
        } else {
            // quorum can no longer be reached
            StageVerdict::Rejected
        };
    }

    // integer comparison keeps boundary results exact
    let approved = votes.approved_weight * 100;
    let required = u64::from(config.approval_threshold_percent)
        * (votes.approved_weight + votes.rejected_weight);

    match approved.cmp(&required) {
        Ordering::Greater => StageVerdict::Approved,
        Ordering::Less => StageVerdict::Rejected,
        Ordering::Equal => match config.tie_break {
            TieBreak::Approve => StageVerdict::Approved,
            TieBreak::Reject => StageVerdict::Rejected,
            TieBreak::Escalate => StageVerdict::Escalate,
        },
    }
}
