//! Escalation monitor: background sweep applying SLA timeouts to in-flight requests
//!
//! Timeout detection is a pure decision ([`timeout_action`]); the orchestrator
//! applies it under the same per-request lock as participant actions.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use crate::orchestrator::{ApprovalOrchestrator, TimeoutOutcome};
use crate::request::StageResult;
use crate::template::{EscalationConfig, Stage};
use crate::Result;

/// What a timed-out stage calls for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutAction {
    AutoApprove,
    Reassign(String),
    Unconfigured,
}

/// Decide whether the open stage `result` has outlived its SLA as of `now`.
///
/// A stage escalates by reassignment once; after that only request expiry applies.
pub fn timeout_action(stage: &Stage, result: &StageResult, now: DateTime<Utc>) -> Option<TimeoutAction> {
    let hours = stage.effective_timeout_hours()?;
    if result.escalated || !result.is_open() {
        return None;
    }
    if now - result.clock_started_at <= Duration::hours(i64::from(hours)) {
        return None;
    }

    Some(match &stage.escalation {
        Some(escalation) if escalation.auto_approve_on_timeout => TimeoutAction::AutoApprove,
        Some(EscalationConfig {
            escalate_to: Some(target),
            ..
        }) => TimeoutAction::Reassign(target.clone()),
        _ => TimeoutAction::Unconfigured,
    })
}

/// Counts from one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub escalated: usize,
    pub auto_approved: usize,
    pub expired: usize,
    pub failed: usize,
}

pub struct EscalationMonitor {
    orchestrator: Arc<ApprovalOrchestrator>,
    sweep_interval: std::time::Duration,
    running: Arc<RwLock<bool>>,
}

impl EscalationMonitor {
    pub fn new(orchestrator: Arc<ApprovalOrchestrator>) -> Self {
        Self {
            orchestrator,
            sweep_interval: std::time::Duration::from_secs(300),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.sweep_interval = interval.max(std::time::Duration::from_secs(1));
        self
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Run the sweep loop until [`stop`](Self::stop) is called
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Escalation monitor already running");
                return;
            }
            *running = true;
        }

        info!(
            sweep_interval_secs = self.sweep_interval.as_secs(),
            "Starting escalation monitor"
        );

        let start = Instant::now() + self.sweep_interval;
        let mut interval = interval_at(start, self.sweep_interval);

        loop {
            interval.tick().await;

            if !*self.running.read().await {
                break;
            }

            match self.sweep_at(Utc::now()).await {
                Ok(report) => debug!(
                    examined = report.examined,
                    escalated = report.escalated,
                    auto_approved = report.auto_approved,
                    expired = report.expired,
                    failed = report.failed,
                    "Escalation sweep finished"
                ),
                Err(e) => error!(error = %e, "Escalation sweep could not list requests"),
            }
        }

        info!("Escalation monitor stopped");
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Stopping escalation monitor");
    }

    /// Apply timeouts to every in-flight request as of `now`.
    ///
    /// A request that fails is logged and counted; the sweep carries on.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let requests = self.orchestrator.in_progress().await?;
        let mut report = SweepReport {
            examined: requests.len(),
            ..SweepReport::default()
        };

        for request in requests {
            match self.orchestrator.apply_timeouts(&request.id, now).await {
                Ok(TimeoutOutcome::Escalated) => report.escalated += 1,
                Ok(TimeoutOutcome::AutoApproved) => report.auto_approved += 1,
                Ok(TimeoutOutcome::Expired) => report.expired += 1,
                Ok(TimeoutOutcome::NotDue) | Ok(TimeoutOutcome::Unconfigured) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(
                        request_id = %request.id,
                        error = %e,
                        "Failed to apply timeout to approval request"
                    );
                }
            }
        }

        Ok(report)
    }
}
