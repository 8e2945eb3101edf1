//! TCP connect probe with timeouts and transient-error retries.

use async_trait::async_trait;
use netsweep_core::{ErrorReason, Probe, ProbeResult, ProbeStatus, Target};
use rand::{thread_rng, Rng};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::trace;

/// Return the first N ports from a curated list of commonly-used ports.
pub fn top_ports(n: usize) -> Vec<u16> {
    const CURATED: &[u16] = &[
        21, 22, 23, 25, 53, 80, 110, 123, 135, 139, 143, 389, 443, 445, 465, 500, 587, 636, 993,
        995, 1080, 1194, 1352, 1433, 1521, 1723, 2049, 2375, 2376, 3000, 3128, 3268, 3306, 3389,
        4444, 4500, 5000, 5060, 5432, 5601, 5671, 5672, 5900, 5985, 5986, 6379, 7001, 7002, 8000,
        8080, 8081, 8200, 8443, 8500, 8530, 8888, 9000, 9092, 9200, 9300, 9418, 9999, 10000,
        11211, 15672, 27017,
    ];
    let take = n.min(CURATED.len());
    CURATED[..take].to_vec()
}

/// Map a connect failure onto a probe status. Refusal means the host answered
/// with a reset, so the port is closed rather than in error.
pub fn classify_connect_error(e: &io::Error) -> ProbeStatus {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ProbeStatus::Closed,
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
            ProbeStatus::error(ErrorReason::HostUnreachable)
        }
        io::ErrorKind::TimedOut => ProbeStatus::TimedOut,
        _ => ProbeStatus::error(ErrorReason::Transport(e.to_string())),
    }
}

/// One connect attempt bounded by `budget`. The stream, if any, is dropped
/// before returning, closing the socket.
pub async fn connect_once(addr: SocketAddr, budget: Duration) -> ProbeStatus {
    match timeout(budget, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => ProbeStatus::Open,
        Ok(Err(e)) => classify_connect_error(&e),
        Err(_) => ProbeStatus::TimedOut,
    }
}

/// Resolve a hostname to its first address. IP literals are returned as-is.
pub async fn resolve_first(host: &str) -> io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0u16)).await?;
    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host)))
}

/// Port-connect probe: open on handshake, closed on refusal, timed out on silence.
#[derive(Debug, Clone, Default)]
pub struct TcpConnectProbe {
    /// Extra attempts after a transport error (never after refusal or timeout).
    pub retries: u32,
    pub retry_delay: Duration,
}

impl TcpConnectProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retries(retries: u32, retry_delay: Duration) -> Self {
        TcpConnectProbe { retries, retry_delay }
    }
}

/// Exponential backoff with up to 25% jitter.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let base = base.as_millis() as u64;
    let exp = base.saturating_mul(1u64 << attempt.min(6)); // cap growth
    let jitter = thread_rng().gen_range(0..(exp / 4 + 1));
    Duration::from_millis(exp + jitter)
}

#[async_trait]
impl Probe for TcpConnectProbe {
    fn name(&self) -> &'static str {
        "tcp-connect"
    }

    async fn run(&self, target: Target, budget: Duration) -> ProbeResult {
        let Target::Port(addr) = target else {
            let status = ProbeStatus::error(ErrorReason::Unsupported("tcp-connect needs host:port".into()));
            return ProbeResult::new(target, status, Duration::ZERO);
        };
        let began = Instant::now();
        let deadline = began + budget;
        let mut attempt = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ProbeResult::new(target, ProbeStatus::TimedOut, began.elapsed());
            }
            let status = connect_once(addr, remaining).await;
            let transient = matches!(status, ProbeStatus::Error { reason: ErrorReason::Transport(_) });
            if !transient || attempt >= self.retries {
                return ProbeResult::new(target, status, began.elapsed());
            }
            attempt += 1;
            let wait = backoff(self.retry_delay, attempt);
            if Instant::now() + wait >= deadline {
                return ProbeResult::new(target, status, began.elapsed());
            }
            trace!(%addr, attempt, wait_ms = wait.as_millis() as u64, "retrying connect");
            sleep(wait).await;
        }
    }
}
