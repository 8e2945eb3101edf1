//! Host liveness probes: an unprivileged TCP sweep and a system-ping echo.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use netsweep_core::{ErrorReason, Probe, ProbeResult, ProbeStatus, Target, ValidationError};
use port_scan::connect_once;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{timeout, Instant};
use tracing::debug;

/// Ports tried by the TCP liveness check when none are configured.
pub const DEFAULT_LIVENESS_PORTS: &[u16] = &[80, 443, 22];

/// Upper bound on ports raced per host, so sockets in flight stay within
/// `concurrency × MAX_LIVENESS_PORTS`.
pub const MAX_LIVENESS_PORTS: usize = 16;

fn host_of(target: Target, probe: &str) -> Result<IpAddr, ProbeResult> {
    match target {
        Target::Host(ip) => Ok(ip),
        Target::Port(_) => {
            let status = ProbeStatus::error(ErrorReason::Unsupported(format!("{} probes bare hosts", probe)));
            Err(ProbeResult::new(target, status, Duration::ZERO))
        }
    }
}

/// TCP-based liveness: connect to a few ports at once. Any handshake or
/// reset proves the host is up; the first such answer wins and the other
/// attempts are dropped. Each host costs up to `ports.len()` sockets while
/// its probe is in flight, never more than [`MAX_LIVENESS_PORTS`].
#[derive(Debug, Clone)]
pub struct TcpLivenessProbe {
    ports: Vec<u16>,
}

impl Default for TcpLivenessProbe {
    fn default() -> Self {
        TcpLivenessProbe { ports: DEFAULT_LIVENESS_PORTS.to_vec() }
    }
}

impl TcpLivenessProbe {
    pub fn new(ports: Vec<u16>) -> Result<Self, ValidationError> {
        if ports.len() > MAX_LIVENESS_PORTS {
            return Err(ValidationError::TooManyPorts { requested: ports.len() as u128, max: MAX_LIVENESS_PORTS });
        }
        Ok(if ports.is_empty() { Self::default() } else { TcpLivenessProbe { ports } })
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

/// Fold per-port connect outcomes into a host verdict.
fn host_verdict(attempts: &[ProbeStatus]) -> ProbeStatus {
    if attempts.iter().any(|s| matches!(s, ProbeStatus::Open | ProbeStatus::Closed)) {
        return ProbeStatus::Open;
    }
    if attempts.iter().any(|s| matches!(s, ProbeStatus::Error { reason: ErrorReason::HostUnreachable })) {
        return ProbeStatus::Closed;
    }
    if attempts.iter().all(|s| matches!(s, ProbeStatus::TimedOut)) {
        return ProbeStatus::TimedOut;
    }
    attempts
        .iter()
        .find(|s| matches!(s, ProbeStatus::Error { .. }))
        .cloned()
        .unwrap_or(ProbeStatus::TimedOut)
}

#[async_trait]
impl Probe for TcpLivenessProbe {
    fn name(&self) -> &'static str {
        "tcp-liveness"
    }

    async fn run(&self, target: Target, budget: Duration) -> ProbeResult {
        let ip = match host_of(target, self.name()) {
            Ok(ip) => ip,
            Err(unsupported) => return unsupported,
        };
        let began = Instant::now();
        let mut attempts: FuturesUnordered<_> =
            self.ports.iter().map(|&p| connect_once(SocketAddr::new(ip, p), budget)).collect();
        let mut seen = Vec::with_capacity(self.ports.len());
        while let Some(status) = attempts.next().await {
            if matches!(status, ProbeStatus::Open | ProbeStatus::Closed) {
                debug!(%ip, "host answered");
                return ProbeResult::new(target, ProbeStatus::Open, began.elapsed());
            }
            seen.push(status);
        }
        ProbeResult::new(target, host_verdict(&seen), began.elapsed())
    }
}

/// ICMP echo through the system `ping` utility, which carries the privileges
/// raw sockets need. One echo request per host; the child is killed if the
/// probe is dropped.
#[derive(Debug, Clone)]
pub struct PingProbe {
    program: String,
}

impl Default for PingProbe {
    fn default() -> Self {
        PingProbe { program: "ping".into() }
    }
}

impl PingProbe {
    pub fn with_program(program: impl Into<String>) -> Self {
        PingProbe { program: program.into() }
    }
}

fn ping_args(ip: IpAddr, budget: Duration) -> Vec<String> {
    // -W takes whole seconds; round up so the child never gives up early
    let wait = budget.as_millis().div_ceil(1000).max(1);
    let mut args = vec!["-n".to_string(), "-c".into(), "1".into(), "-W".into(), wait.to_string()];
    if ip.is_ipv6() {
        args.push("-6".into());
    }
    args.push(ip.to_string());
    args
}

#[async_trait]
impl Probe for PingProbe {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn run(&self, target: Target, budget: Duration) -> ProbeResult {
        let ip = match host_of(target, self.name()) {
            Ok(ip) => ip,
            Err(unsupported) => return unsupported,
        };
        let began = Instant::now();
        let child = Command::new(&self.program)
            .args(ping_args(ip, budget))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        let status = match timeout(budget, child).await {
            Ok(Ok(exit)) if exit.success() => ProbeStatus::Open,
            // ping exits 1 when no reply arrived before -W
            Ok(Ok(exit)) if exit.code() == Some(1) => ProbeStatus::TimedOut,
            Ok(Ok(exit)) => ProbeStatus::error(ErrorReason::Transport(format!("{} exited with {}", self.program, exit))),
            Ok(Err(e)) => ProbeStatus::error(ErrorReason::Transport(format!("failed to spawn {}: {}", self.program, e))),
            Err(_) => ProbeStatus::TimedOut,
        };
        ProbeResult::new(target, status, began.elapsed())
    }
}
