//! Single-sweep orchestration: expand, scan, aggregate.
//!
//! A controller is consumed by [`SweepController::execute`], so its worker
//! pool can never be shared with another sweep.

use crate::aggregate::{aggregate, SweepReport, SweepTiming};
use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::expand::{check, SweepSpec};
use crate::pool::{run_all, PoolOptions, SweepOutcome};
use crate::probe::Probe;
use crate::target::{ErrorReason, ProbeResult, ProbeStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle: `Created → Expanding → Scanning → Aggregating → Done`.
/// `Cancelled` is reachable from `Expanding` and `Scanning`. A rejected
/// request goes straight from `Created` to `Failed`; a scheduler fault ends
/// in `Failed` as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepState {
    Created,
    Expanding,
    Scanning,
    Aggregating,
    Done,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub state: SweepState,
    pub completed: usize,
    pub total: usize,
}

pub struct SweepController {
    config: SweepConfig,
    probe: Arc<dyn Probe>,
    cancel: CancellationToken,
    progress: watch::Sender<Progress>,
}

impl SweepController {
    pub fn new(config: SweepConfig, probe: Arc<dyn Probe>) -> Self {
        let (progress, _) = watch::channel(Progress { state: SweepState::Created, completed: 0, total: 0 });
        SweepController { config, probe, cancel: CancellationToken::new(), progress }
    }

    /// Tie the sweep to an externally owned token, e.g. one fired on Ctrl-C.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cancelling this token aborts the sweep; a partial report is still produced.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn state(&self) -> SweepState {
        self.progress.borrow().state
    }

    fn set_state(&self, state: SweepState) {
        self.progress.send_modify(|p| p.state = state);
    }

    pub async fn execute(self, spec: &SweepSpec) -> Result<SweepReport, SweepError> {
        if let Err(e) = self.config.validate() {
            self.set_state(SweepState::Failed);
            return Err(e.into());
        }

        let checked = match check(spec, &self.config) {
            Ok(checked) => checked,
            Err(e) => {
                warn!(error = %e, "rejected sweep specification");
                self.set_state(SweepState::Failed);
                return Err(e.into());
            }
        };
        self.set_state(SweepState::Expanding);
        let plan = checked.into_plan();
        let total = plan.targets.len();
        self.progress.send_modify(|p| p.total = total);

        if self.cancel.is_cancelled() {
            self.set_state(SweepState::Cancelled);
            let results = plan
                .targets
                .iter()
                .map(|t| ProbeResult::new(*t, ProbeStatus::error(ErrorReason::Cancelled), Duration::ZERO))
                .collect();
            let timing = SweepTiming { started_at: OffsetDateTime::now_utc(), duration: Duration::ZERO };
            let report = aggregate(&plan, results, SweepOutcome::Cancelled, timing);
            return Err(SweepError::Cancelled(Box::new(report)));
        }

        let opts = PoolOptions::from(&self.config);
        info!(
            probe = self.probe.name(),
            targets = total,
            concurrency = opts.concurrency,
            timeout_ms = opts.per_probe_timeout.as_millis() as u64,
            deadline_ms = opts.global_deadline.as_millis() as u64,
            "starting sweep"
        );
        self.set_state(SweepState::Scanning);
        let progress = &self.progress;
        let run = run_all(
            plan.targets.clone(),
            Arc::clone(&self.probe),
            &opts,
            self.cancel.clone(),
            &mut |n| progress.send_modify(|p| p.completed = n),
        )
        .await;

        self.set_state(SweepState::Aggregating);
        let timing = SweepTiming { started_at: run.started_at, duration: run.elapsed };
        let report = aggregate(&plan, run.results, run.outcome, timing);
        info!(summary = %report.summary(), abandoned = run.abandoned, "sweep finished");

        if let Some(message) = run.fault {
            self.set_state(SweepState::Failed);
            return Err(SweepError::Internal { message, partial: Some(Box::new(report)) });
        }
        match run.outcome {
            SweepOutcome::Complete => {
                self.set_state(SweepState::Done);
                Ok(report)
            }
            SweepOutcome::DeadlineExceeded => {
                warn!(resolved = report.resolved_count(), total, "sweep deadline exceeded");
                self.set_state(SweepState::Cancelled);
                Err(SweepError::DeadlineExceeded(Box::new(report)))
            }
            SweepOutcome::Cancelled => {
                warn!(resolved = report.resolved_count(), total, "sweep cancelled");
                self.set_state(SweepState::Cancelled);
                Err(SweepError::Cancelled(Box::new(report)))
            }
        }
    }
}
