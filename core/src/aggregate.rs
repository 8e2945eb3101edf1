//! Deterministic merge of probe results into a sweep report.

use crate::expand::{SweepPlan, SweepSpec};
use crate::pool::SweepOutcome;
use crate::target::{ErrorReason, ProbeResult, ProbeStatus, Target};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetError {
    pub target: Target,
    pub reason: ErrorReason,
}

/// Wall-clock bounds of a sweep, as measured by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepTiming {
    pub started_at: OffsetDateTime,
    pub duration: Duration,
}

/// Final, read-only artifact of a sweep. Target lists follow expansion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub spec: SweepSpec,
    pub outcome: SweepOutcome,
    pub total_targets: usize,
    pub open_count: usize,
    pub duration_ms: u64,
    pub started_at: String,
    pub ended_at: String,
    /// Open ports or live hosts.
    pub reachable: Vec<Target>,
    /// Refused, unreachable and timed-out targets.
    pub unreachable: Vec<Target>,
    pub errors: Vec<TargetError>,
    pub results: Vec<ProbeResult>,
}

impl SweepReport {
    pub fn is_partial(&self) -> bool {
        self.outcome != SweepOutcome::Complete
    }

    /// Targets that got a real answer (anything but a deadline/cancel marker).
    pub fn resolved_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| {
                !matches!(
                    &r.status,
                    ProbeStatus::Error { reason: ErrorReason::DeadlineExceeded | ErrorReason::Cancelled }
                )
            })
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} reachable, {} unreachable, {} errors of {} targets in {} ms ({:?})",
            self.reachable.len(),
            self.unreachable.len(),
            self.errors.len(),
            self.total_targets,
            self.duration_ms,
            self.outcome
        )
    }
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| String::new())
}

/// Build the report. Pure: the output depends only on the plan, the multiset
/// of results, the outcome and the timing, never on result arrival order.
pub fn aggregate(plan: &SweepPlan, mut results: Vec<ProbeResult>, outcome: SweepOutcome, timing: SweepTiming) -> SweepReport {
    let position: HashMap<Target, usize> = plan.targets.iter().enumerate().map(|(i, t)| (*t, i)).collect();
    let rank = |r: &ProbeResult| position.get(&r.target).copied().unwrap_or(usize::MAX);
    results.sort_by(|a, b| {
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.target.cmp(&b.target))
            .then_with(|| a.status.cmp(&b.status))
            .then_with(|| a.latency.cmp(&b.latency))
    });

    let mut reachable = Vec::new();
    let mut unreachable = Vec::new();
    let mut errors = Vec::new();
    for r in &results {
        match &r.status {
            ProbeStatus::Open => reachable.push(r.target),
            ProbeStatus::Closed | ProbeStatus::TimedOut => unreachable.push(r.target),
            ProbeStatus::Error { reason } => errors.push(TargetError { target: r.target, reason: reason.clone() }),
        }
    }

    SweepReport {
        spec: plan.spec.clone(),
        outcome,
        total_targets: plan.targets.len(),
        open_count: reachable.len(),
        duration_ms: timing.duration.as_millis() as u64,
        started_at: rfc3339(timing.started_at),
        ended_at: rfc3339(timing.started_at + timing.duration),
        reachable,
        unreachable,
        errors,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SweepConfig;
    use crate::expand::{expand, PortsSpec};

    fn plan() -> SweepPlan {
        let spec = SweepSpec::PortScan { host: "10.0.0.1".parse().unwrap(), ports: PortsSpec::List(vec![443, 22, 80]) };
        expand(&spec, &SweepConfig::default()).unwrap()
    }

    fn timing() -> SweepTiming {
        SweepTiming { started_at: OffsetDateTime::UNIX_EPOCH, duration: Duration::from_millis(1500) }
    }

    fn results(p: &SweepPlan) -> Vec<ProbeResult> {
        vec![
            ProbeResult::new(p.targets[0], ProbeStatus::Open, Duration::from_millis(3)),
            ProbeResult::new(p.targets[1], ProbeStatus::TimedOut, Duration::from_millis(100)),
            ProbeResult::new(p.targets[2], ProbeStatus::error(ErrorReason::Transport("reset".into())), Duration::from_millis(1)),
        ]
    }

    #[test]
    fn arrival_order_does_not_change_the_report() {
        let p = plan();
        let forward = results(&p);
        let mut backward = forward.clone();
        backward.reverse();
        let a = serde_json::to_string(&aggregate(&p, forward, SweepOutcome::Complete, timing())).unwrap();
        let b = serde_json::to_string(&aggregate(&p, backward, SweepOutcome::Complete, timing())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn results_are_partitioned_in_plan_order() {
        let p = plan();
        let mut rs = results(&p);
        rs.rotate_left(1);
        let r = aggregate(&p, rs, SweepOutcome::Complete, timing());
        assert_eq!(r.total_targets, 3);
        assert_eq!(r.reachable, vec![p.targets[0]]);
        assert_eq!(r.unreachable, vec![p.targets[1]]);
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.errors[0].target, p.targets[2]);
        let order: Vec<Target> = r.results.iter().map(|x| x.target).collect();
        assert_eq!(order, p.targets);
        assert_eq!(r.duration_ms, 1500);
        assert_eq!(r.started_at, "1970-01-01T00:00:00Z");
        assert!(r.ended_at.starts_with("1970-01-01T00:00:01"));
    }

    #[test]
    fn serialized_shape() {
        let p = plan();
        let r = aggregate(&p, results(&p), SweepOutcome::DeadlineExceeded, timing());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["spec"]["kind"], "port_scan");
        assert_eq!(v["outcome"], "deadline_exceeded");
        assert_eq!(v["reachable"][0], "10.0.0.1:443");
        assert_eq!(v["errors"][0]["reason"], "transport error: reset");
        assert_eq!(v["results"][1]["status"], "timed_out");
        assert_eq!(v["results"][1]["latency_ms"], 100);
        assert!(r.is_partial());
        assert_eq!(r.resolved_count(), 3);
    }
}
