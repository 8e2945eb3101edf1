//! Bounded sliding-window worker pool.
//!
//! At most `concurrency` probes are in flight at any instant: each launch
//! holds one permit of a semaphore sized to the limit, and the permit is
//! released only after the probe's result is recorded. As soon as any probe
//! finishes the next queued target is admitted, so a few slow targets never
//! hold back the rest of the queue.
//!
//! Three things stop admission early: the global deadline, caller
//! cancellation, or an internal fault. All of them take the same path:
//! in-flight probes are told to stop, given `grace` to unwind, then aborted;
//! every target still without a result is recorded with an explicit error
//! reason. The returned result list always has one entry per target.

use crate::config::SweepConfig;
use crate::probe::Probe;
use crate::ratelimiter::RateLimiter;
use crate::target::{ErrorReason, ProbeResult, ProbeStatus, Target};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub concurrency: usize,
    pub per_probe_timeout: Duration,
    pub global_deadline: Duration,
    pub grace: Duration,
    pub qps: Option<u32>,
}

impl From<&SweepConfig> for PoolOptions {
    fn from(cfg: &SweepConfig) -> Self {
        PoolOptions {
            concurrency: cfg.effective_concurrency(),
            per_probe_timeout: cfg.per_probe_timeout(),
            global_deadline: cfg.global_deadline(),
            grace: cfg.grace(),
            qps: cfg.qps(),
        }
    }
}

/// How a sweep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepOutcome {
    Complete,
    DeadlineExceeded,
    Cancelled,
}

/// Everything the pool hands back after draining.
#[derive(Debug)]
pub struct PoolRun {
    /// One result per target, in the order they were recorded.
    pub results: Vec<ProbeResult>,
    pub outcome: SweepOutcome,
    pub started_at: OffsetDateTime,
    pub elapsed: Duration,
    /// Probes that ignored the stop signal past the grace period.
    pub abandoned: usize,
    /// Set when the scheduler itself failed mid-sweep.
    pub fault: Option<String>,
}

/// Set-once result slots keyed by target position. The only state shared
/// between probe tasks.
struct ResultTable {
    inner: Mutex<Slots>,
}

struct Slots {
    slots: Vec<Option<ProbeResult>>,
    arrivals: Vec<usize>,
}

impl ResultTable {
    fn new(n: usize) -> Self {
        ResultTable { inner: Mutex::new(Slots { slots: vec![None; n], arrivals: Vec::with_capacity(n) }) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        // A panicking writer cannot leave a slot half-written, so a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a result unless the slot is already filled. Returns whether it was stored.
    fn record(&self, idx: usize, result: ProbeResult) -> bool {
        let mut g = self.lock();
        match g.slots.get(idx) {
            Some(None) => {
                g.slots[idx] = Some(result);
                g.arrivals.push(idx);
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        self.lock().arrivals.len()
    }

    /// Fill every empty slot with `reason` and take the results in arrival order.
    /// Later writes are rejected since every slot is then occupied.
    fn finish(&self, targets: &[Target], reason: Option<ErrorReason>) -> Vec<ProbeResult> {
        let mut g = self.lock();
        if let Some(reason) = reason {
            for (idx, target) in targets.iter().enumerate() {
                if g.slots[idx].is_none() {
                    g.slots[idx] = Some(ProbeResult::new(*target, ProbeStatus::error(reason.clone()), Duration::ZERO));
                    g.arrivals.push(idx);
                }
            }
        }
        let order = g.arrivals.clone();
        order.into_iter().filter_map(|idx| g.slots[idx].clone()).collect()
    }
}

enum Stop {
    Drained,
    Deadline,
    Cancelled,
    Fault(String),
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

async fn admit(
    sem: &Arc<Semaphore>,
    pacer: &mut Option<RateLimiter>,
) -> Result<OwnedSemaphorePermit, tokio::sync::AcquireError> {
    let permit = sem.clone().acquire_owned().await?;
    if let Some(p) = pacer.as_mut() {
        p.acquire().await;
    }
    Ok(permit)
}

/// Probe every target with bounded concurrency. `progress` is called with the
/// number of recorded results each time a probe completes.
pub async fn run_all(
    targets: Vec<Target>,
    probe: Arc<dyn Probe>,
    opts: &PoolOptions,
    cancel: CancellationToken,
    progress: &mut (dyn FnMut(usize) + Send),
) -> PoolRun {
    let started_at = OffsetDateTime::now_utc();
    let start = Instant::now();
    let deadline = sleep_until(start + opts.global_deadline);
    tokio::pin!(deadline);

    let targets: Arc<[Target]> = targets.into();
    let table = Arc::new(ResultTable::new(targets.len()));
    let sem = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let stop_probes = cancel.child_token();
    let mut queue: VecDeque<usize> = (0..targets.len()).collect();
    let mut inflight = JoinSet::new();

    let admission = async {
        let mut pacer = opts.qps.map(RateLimiter::new);
        loop {
            if queue.is_empty() && inflight.is_empty() {
                break Stop::Drained;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Stop::Cancelled,
                _ = &mut deadline => break Stop::Deadline,
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = joined {
                        // catch_unwind inside the task makes this unreachable short of an abort
                        warn!(error = %e, "probe task ended abnormally");
                    }
                    progress(table.len());
                }
                permit = admit(&sem, &mut pacer), if !queue.is_empty() => {
                    let permit = match permit {
                        Ok(p) => p,
                        Err(e) => break Stop::Fault(format!("concurrency limiter unavailable: {}", e)),
                    };
                    let Some(idx) = queue.pop_front() else { continue };
                    let target = targets[idx];
                    let probe = Arc::clone(&probe);
                    let table = Arc::clone(&table);
                    let stop_probes = stop_probes.clone();
                    let per_probe = opts.per_probe_timeout;
                    debug!(%target, in_flight = inflight.len() + 1, queued = queue.len(), "admitting probe");
                    inflight.spawn(async move {
                        let _permit = permit;
                        let began = Instant::now();
                        let work = AssertUnwindSafe(timeout(per_probe, probe.run(target, per_probe))).catch_unwind();
                        let mut result = tokio::select! {
                            biased;
                            // the scheduler marks the slot; dropping `work` here releases the probe's socket
                            _ = stop_probes.cancelled() => return,
                            r = work => match r {
                                Ok(Ok(res)) => res,
                                Ok(Err(_)) => ProbeResult::new(target, ProbeStatus::TimedOut, began.elapsed()),
                                Err(_) => ProbeResult::new(target, ProbeStatus::error(ErrorReason::Panicked), began.elapsed()),
                            },
                        };
                        result.target = target;
                        debug!(%target, status = result.status.label(), latency_ms = result.latency.as_millis() as u64, "probe finished");
                        table.record(idx, result);
                    });
                }
            }
        }
    };
    // A fault in the loop itself must not lose what was already recorded.
    let stop = match AssertUnwindSafe(admission).catch_unwind().await {
        Ok(stop) => stop,
        Err(panic) => Stop::Fault(format!("admission loop panicked: {}", panic_message(&*panic))),
    };
    if let Stop::Fault(msg) = &stop {
        warn!(error = %msg, recorded = table.len(), "scheduler fault, salvaging recorded results");
    }

    let (outcome, reason, fault) = match stop {
        Stop::Drained => (SweepOutcome::Complete, None, None),
        Stop::Deadline => (SweepOutcome::DeadlineExceeded, Some(ErrorReason::DeadlineExceeded), None),
        Stop::Cancelled => (SweepOutcome::Cancelled, Some(ErrorReason::Cancelled), None),
        Stop::Fault(msg) => (SweepOutcome::Cancelled, Some(ErrorReason::Cancelled), Some(msg)),
    };

    let mut abandoned = 0;
    if outcome != SweepOutcome::Complete {
        stop_probes.cancel();
        let drained = timeout(opts.grace, async {
            while inflight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            abandoned = inflight.len();
            warn!(abandoned, grace_ms = opts.grace.as_millis() as u64, "probes ignored stop signal; abandoning");
            inflight.abort_all();
        }
    }

    let results = table.finish(&targets, reason);
    progress(results.len());
    PoolRun { results, outcome, started_at, elapsed: start.elapsed(), abandoned, fault }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};

    /// Sleeps for a per-host delay, then reports open.
    struct Delayed(HashMap<Target, Duration>);

    #[async_trait]
    impl Probe for Delayed {
        fn name(&self) -> &'static str { "delayed" }
        async fn run(&self, target: Target, _timeout: Duration) -> ProbeResult {
            let d = self.0.get(&target).copied().unwrap_or_default();
            tokio::time::sleep(d).await;
            ProbeResult::new(target, ProbeStatus::Open, d)
        }
    }

    fn host(n: u8) -> Target {
        Target::Host(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)))
    }

    fn opts(concurrency: usize, per_probe_ms: u64, deadline_ms: u64) -> PoolOptions {
        PoolOptions {
            concurrency,
            per_probe_timeout: Duration::from_millis(per_probe_ms),
            global_deadline: Duration::from_millis(deadline_ms),
            grace: Duration::from_millis(10),
            qps: None,
        }
    }

    async fn run(targets: Vec<Target>, probe: impl Probe + 'static, o: PoolOptions) -> PoolRun {
        run_all(targets, Arc::new(probe), &o, CancellationToken::new(), &mut |_| {}).await
    }

    #[tokio::test(start_paused = true)]
    async fn admits_next_target_as_soon_as_a_slot_frees() {
        let delays = HashMap::from([
            (host(1), Duration::from_millis(100)),
            (host(2), Duration::from_millis(300)),
            (host(3), Duration::from_millis(100)),
        ]);
        let r = run(vec![host(1), host(2), host(3)], Delayed(delays), opts(2, 1000, 10_000)).await;
        assert_eq!(r.outcome, SweepOutcome::Complete);
        // host 3 starts at 100ms alongside the slow host 2, so the sweep ends with host 2
        assert_eq!(r.elapsed, Duration::from_millis(300));
        let order: Vec<Target> = r.results.iter().map(|x| x.target).collect();
        assert_eq!(order, vec![host(1), host(3), host(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_is_cut_at_per_probe_timeout() {
        let delays = HashMap::from([(host(1), Duration::from_secs(60))]);
        let r = run(vec![host(1), host(2)], Delayed(delays), opts(2, 100, 10_000)).await;
        let slow = r.results.iter().find(|x| x.target == host(1)).unwrap();
        assert_eq!(slow.status, ProbeStatus::TimedOut);
        assert_eq!(r.elapsed, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_marks_every_unfinished_target() {
        let delays: HashMap<_, _> = (1..=20).map(|n| (host(n), Duration::from_millis(40 * n as u64))).collect();
        let targets: Vec<_> = (1..=20).map(host).collect();
        let r = run(targets, Delayed(delays), opts(4, 10_000, 100)).await;
        assert_eq!(r.outcome, SweepOutcome::DeadlineExceeded);
        assert_eq!(r.results.len(), 20);
        let open = r.results.iter().filter(|x| x.status.is_open()).count();
        // hosts 1 and 2 finish at 40ms and 80ms; nothing else beats 100ms
        assert_eq!(open, 2);
        assert!(r
            .results
            .iter()
            .filter(|x| !x.status.is_open())
            .all(|x| x.status == ProbeStatus::error(ErrorReason::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancellation_stops_admission() {
        let delays: HashMap<_, _> = (1..=10).map(|n| (host(n), Duration::from_millis(100))).collect();
        let targets: Vec<_> = (1..=10).map(host).collect();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });
        let mut seen = Vec::new();
        let r = run_all(targets, Arc::new(Delayed(delays)), &opts(2, 1000, 10_000), cancel, &mut |n| seen.push(n)).await;
        assert_eq!(r.outcome, SweepOutcome::Cancelled);
        assert_eq!(r.results.len(), 10);
        assert_eq!(r.results.iter().filter(|x| x.status.is_open()).count(), 2);
        assert_eq!(r.results.iter().filter(|x| x.status == ProbeStatus::error(ErrorReason::Cancelled)).count(), 8);
        assert_eq!(seen.last(), Some(&10));
    }

    struct Panicky;

    #[async_trait]
    impl Probe for Panicky {
        fn name(&self) -> &'static str { "panicky" }
        async fn run(&self, target: Target, _timeout: Duration) -> ProbeResult {
            if target == host(2) {
                panic!("probe bug");
            }
            ProbeResult::new(target, ProbeStatus::Closed, Duration::ZERO)
        }
    }

    #[tokio::test]
    async fn panicking_probe_is_contained_to_its_target() {
        let r = run(vec![host(1), host(2), host(3)], Panicky, opts(3, 1000, 10_000)).await;
        assert_eq!(r.outcome, SweepOutcome::Complete);
        assert_eq!(r.results.len(), 3);
        let bad = r.results.iter().find(|x| x.target == host(2)).unwrap();
        assert_eq!(bad.status, ProbeStatus::error(ErrorReason::Panicked));
    }

    /// Blocks its worker thread, so it cannot observe the stop signal.
    struct Blocking;

    #[async_trait]
    impl Probe for Blocking {
        fn name(&self) -> &'static str { "blocking" }
        async fn run(&self, target: Target, _timeout: Duration) -> ProbeResult {
            std::thread::sleep(Duration::from_millis(300));
            ProbeResult::new(target, ProbeStatus::Open, Duration::ZERO)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stuck_probes_are_abandoned_after_grace() {
        let mut o = opts(1, 1000, 20);
        o.grace = Duration::from_millis(20);
        let r = run(vec![host(1)], Blocking, o).await;
        assert_eq!(r.outcome, SweepOutcome::DeadlineExceeded);
        assert_eq!(r.abandoned, 1);
        assert!(r.elapsed < Duration::from_millis(250));
        assert_eq!(r.results[0].status, ProbeStatus::error(ErrorReason::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn paced_launches_are_spread_out() {
        let mut o = opts(5, 1000, 10_000);
        o.qps = Some(10);
        let r = run((1..=5).map(host).collect(), Delayed(HashMap::new()), o).await;
        assert_eq!(r.outcome, SweepOutcome::Complete);
        // launches at 0, 100, 200, 300 and 400ms
        assert_eq!(r.elapsed, Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn extreme_launch_rate_does_not_stall() {
        let mut o = opts(2, 1000, 10_000);
        o.qps = Some(u32::MAX);
        let r = run((1..=4).map(host).collect(), Delayed(HashMap::new()), o).await;
        assert_eq!(r.outcome, SweepOutcome::Complete);
        assert!(r.fault.is_none());
        assert!(r.results.iter().all(|x| x.status.is_open()));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_fault_keeps_recorded_results() {
        let delays: HashMap<_, _> = (1..=4).map(|n| (host(n), Duration::from_millis(100 * n as u64))).collect();
        let targets: Vec<_> = (1..=4).map(host).collect();
        let mut calls = 0;
        let r = run_all(targets, Arc::new(Delayed(delays)), &opts(1, 1000, 10_000), CancellationToken::new(), &mut |_| {
            calls += 1;
            if calls == 1 {
                panic!("progress sink failed");
            }
        })
        .await;
        assert_eq!(r.outcome, SweepOutcome::Cancelled);
        assert!(r.fault.as_deref().unwrap().contains("progress sink failed"));
        assert_eq!(r.results.len(), 4);
        let first = r.results.iter().find(|x| x.target == host(1)).unwrap();
        assert_eq!(first.status, ProbeStatus::Open);
        assert!(r
            .results
            .iter()
            .filter(|x| x.target != host(1))
            .all(|x| x.status == ProbeStatus::error(ErrorReason::Cancelled)));
    }

    #[test]
    fn table_is_set_once() {
        let t = ResultTable::new(1);
        assert!(t.record(0, ProbeResult::new(host(1), ProbeStatus::Open, Duration::ZERO)));
        assert!(!t.record(0, ProbeResult::new(host(1), ProbeStatus::Closed, Duration::ZERO)));
        assert!(!t.record(5, ProbeResult::new(host(1), ProbeStatus::Closed, Duration::ZERO)));
        let out = t.finish(&[host(1)], Some(ErrorReason::Cancelled));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].status, ProbeStatus::Open);
    }
}
