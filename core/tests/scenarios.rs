use async_trait::async_trait;
use netsweep_core::{
    ErrorReason, Overrides, PortsSpec, Probe, ProbeResult, ProbeStatus, SweepConfig, SweepController, SweepError,
    SweepOutcome, SweepSpec, Target, ValidationError,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mock probe: per-target latency and verdict, with in-flight instrumentation.
struct Scripted {
    latency: fn(&Target) -> Duration,
    verdict: fn(&Target) -> ProbeStatus,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
}

impl Scripted {
    fn new(latency: fn(&Target) -> Duration, verdict: fn(&Target) -> ProbeStatus) -> Arc<Self> {
        Arc::new(Scripted {
            latency,
            verdict,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
        })
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Probe for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(&self, target: Target, _timeout: Duration) -> ProbeResult {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        // decremented on every exit path, including cancellation
        let _guard = InFlight(&self.in_flight);
        let d = (self.latency)(&target);
        tokio::time::sleep(d).await;
        ProbeResult::new(target, (self.verdict)(&target), d)
    }
}

fn config(concurrency: usize, timeout_ms: u64, deadline_ms: u64) -> SweepConfig {
    SweepConfig::default().with_overrides(Overrides {
        timeout_ms: Some(timeout_ms),
        concurrency: Some(concurrency),
        deadline_ms: Some(deadline_ms),
    })
}

fn port_scan(ports: Vec<i64>) -> SweepSpec {
    SweepSpec::PortScan { host: "192.0.2.10".parse().unwrap(), ports: PortsSpec::List(ports) }
}

#[tokio::test(start_paused = true)]
async fn scenario_a_slash30_sweep() {
    let probe = Scripted::new(
        |_| Duration::from_millis(5),
        |t| if t.to_string() == "192.168.1.1" { ProbeStatus::Open } else { ProbeStatus::Closed },
    );
    let ctl = SweepController::new(SweepConfig::default(), probe.clone());
    let report = ctl.execute(&SweepSpec::HostSweep { targets: "192.168.1.0/30".into() }).await.unwrap();

    assert_eq!(report.total_targets, 2);
    assert_eq!(probe.started.load(Ordering::SeqCst), 2);
    let reachable: Vec<String> = report.reachable.iter().map(|t| t.to_string()).collect();
    let unreachable: Vec<String> = report.unreachable.iter().map(|t| t.to_string()).collect();
    assert_eq!(reachable, vec!["192.168.1.1"]);
    assert_eq!(unreachable, vec!["192.168.1.2"]);
    assert!(report.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn scenario_b_hanging_port_times_out() {
    let probe = Scripted::new(
        |t| if t.port() == Some(80) { Duration::from_secs(3600) } else { Duration::from_millis(10) },
        |_| ProbeStatus::Open,
    );
    let ctl = SweepController::new(config(2, 100, 30_000), probe);
    let report = ctl.execute(&port_scan(vec![22, 80, 443])).await.unwrap();

    let statuses: Vec<(u16, &str)> = report.results.iter().map(|r| (r.target.port().unwrap(), r.status.label())).collect();
    assert_eq!(statuses, vec![(22, "open"), (80, "timed_out"), (443, "open")]);
    assert_eq!(report.unreachable.len(), 1);
    // bounded by the 100ms probe timeout, not by the hour-long hang
    assert!(report.duration_ms >= 100 && report.duration_ms < 200, "took {} ms", report.duration_ms);
}

#[tokio::test]
async fn scenario_c_oversized_request_is_rejected_up_front() {
    let probe = Scripted::new(|_| Duration::ZERO, |_| ProbeStatus::Open);
    let ctl = SweepController::new(SweepConfig::default(), probe.clone());
    let err = ctl.execute(&SweepSpec::HostSweep { targets: "10.0.0.1-10.0.1.44".into() }).await.unwrap_err();

    assert!(matches!(err, SweepError::Validation(ValidationError::TooManyHosts { requested: 300, max: 255 })));
    assert_eq!(probe.started.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_global_deadline_returns_partial_report() {
    let probe = Scripted::new(|_| Duration::from_millis(200), |_| ProbeStatus::Open);
    let ctl = SweepController::new(config(5, 1000, 50), probe.clone());
    let err = ctl.execute(&SweepSpec::HostSweep { targets: "10.0.0.1-10.0.0.100".into() }).await.unwrap_err();

    let report = match err {
        SweepError::DeadlineExceeded(r) => r,
        other => panic!("expected deadline, got {:?}", other),
    };
    assert_eq!(report.outcome, SweepOutcome::DeadlineExceeded);
    assert_eq!(report.total_targets, 100);
    assert_eq!(report.results.len(), 100);
    assert!(report.duration_ms < 100, "took {} ms", report.duration_ms);
    assert_eq!(probe.started.load(Ordering::SeqCst), 5);
    assert_eq!(probe.in_flight.load(Ordering::SeqCst), 0, "cancelled probes released their slot");
    assert_eq!(report.errors.len(), 100);
    assert!(report.errors.iter().all(|e| e.reason == ErrorReason::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_holds_under_load() {
    let probe = Scripted::new(
        |t| Duration::from_millis(1 + (t.port().unwrap_or(0) as u64 * 7919) % 23),
        |t| if t.port().unwrap_or(0) % 3 == 0 { ProbeStatus::Open } else { ProbeStatus::Closed },
    );
    let ctl = SweepController::new(config(8, 1000, 60_000), probe.clone());
    let report = ctl.execute(&port_scan((1..=400).collect())).await.unwrap();

    assert_eq!(report.results.len(), 400);
    let unique: HashSet<Target> = report.results.iter().map(|r| r.target).collect();
    assert_eq!(unique.len(), 400);
    assert_eq!(probe.peak.load(Ordering::SeqCst), 8);
    assert_eq!(report.reachable.len(), 133);
    assert_eq!(report.reachable.len() + report.unreachable.len(), 400);
}

#[tokio::test(start_paused = true)]
async fn every_target_gets_a_result_when_cancelled_mid_sweep() {
    let probe = Scripted::new(|_| Duration::from_millis(30), |_| ProbeStatus::Closed);
    let ctl = SweepController::new(config(4, 1000, 60_000), probe);
    let cancel = ctl.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
    });
    let err = ctl.execute(&port_scan((1000..1050).collect())).await.unwrap_err();
    let report = err.into_partial_report().unwrap();

    assert_eq!(report.results.len(), 50);
    // two full windows of four finish before the cancel at 70ms
    assert_eq!(report.unreachable.len(), 8);
    assert!(report.errors.iter().all(|e| e.reason == ErrorReason::Cancelled));
    assert_eq!(report.errors.len(), 42);
}
