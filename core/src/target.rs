//! Probe targets and per-target outcomes.

use serde::{Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// A single thing to probe: a bare host for liveness sweeps, or a host/port
/// pair for connect scans. Identity is the value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Host(IpAddr),
    Port(SocketAddr),
}

impl Target {
    pub fn ip(&self) -> IpAddr {
        match self {
            Target::Host(ip) => *ip,
            Target::Port(sa) => sa.ip(),
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Target::Host(_) => None,
            Target::Port(sa) => Some(sa.port()),
        }
    }
}

impl From<IpAddr> for Target {
    fn from(ip: IpAddr) -> Self {
        Target::Host(ip)
    }
}

impl From<SocketAddr> for Target {
    fn from(sa: SocketAddr) -> Self {
        Target::Port(sa)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Host(ip) => write!(f, "{}", ip),
            Target::Port(sa) => write!(f, "{}", sa),
        }
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// Why a target ended in the error state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorReason {
    /// The sweep's global deadline expired before this probe finished.
    DeadlineExceeded,
    /// The caller aborted the sweep before this probe finished.
    Cancelled,
    /// The network reported no route to the host.
    HostUnreachable,
    /// Any other socket or transport failure.
    Transport(String),
    /// The probe cannot handle this kind of target.
    Unsupported(String),
    /// The probe task panicked; contained to this target.
    Panicked,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::DeadlineExceeded => f.write_str("deadline exceeded"),
            ErrorReason::Cancelled => f.write_str("cancelled"),
            ErrorReason::HostUnreachable => f.write_str("host unreachable"),
            ErrorReason::Transport(msg) => write!(f, "transport error: {}", msg),
            ErrorReason::Unsupported(msg) => write!(f, "unsupported target: {}", msg),
            ErrorReason::Panicked => f.write_str("probe panicked"),
        }
    }
}

impl Serialize for ErrorReason {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// Outcome of one probe. For host targets `Open` means the host answered
/// (reachable) and `Closed` means it explicitly did not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeStatus {
    Open,
    Closed,
    /// No answer within the per-probe timeout. Reported alongside closed
    /// targets but kept distinct for diagnostics.
    TimedOut,
    Error { reason: ErrorReason },
}

impl ProbeStatus {
    pub fn error(reason: ErrorReason) -> Self {
        ProbeStatus::Error { reason }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ProbeStatus::Open)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProbeStatus::Open => "open",
            ProbeStatus::Closed => "closed",
            ProbeStatus::TimedOut => "timed_out",
            ProbeStatus::Error { .. } => "error",
        }
    }
}

/// Result of probing a single target. Produced exactly once per target per sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProbeResult {
    pub target: Target,
    #[serde(flatten)]
    pub status: ProbeStatus,
    #[serde(rename = "latency_ms", serialize_with = "as_millis")]
    pub latency: Duration,
}

impl ProbeResult {
    pub fn new(target: Target, status: ProbeStatus, latency: Duration) -> Self {
        ProbeResult { target, status, latency }
    }
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_render_as_addresses() {
        let host = Target::Host("10.0.0.1".parse().unwrap());
        let v6 = Target::Port("[::1]:443".parse().unwrap());
        assert_eq!(host.to_string(), "10.0.0.1");
        assert_eq!(v6.to_string(), "[::1]:443");
        assert_eq!(v6.port(), Some(443));
        assert_eq!(host.port(), None);
    }

    #[test]
    fn error_reason_wording() {
        assert_eq!(ErrorReason::DeadlineExceeded.to_string(), "deadline exceeded");
        assert_eq!(ErrorReason::Transport("reset".into()).to_string(), "transport error: reset");
        assert!(ProbeStatus::Open.is_open());
        assert!(!ProbeStatus::TimedOut.is_open());
        assert_eq!(ProbeStatus::error(ErrorReason::Cancelled).label(), "error");
    }
}
