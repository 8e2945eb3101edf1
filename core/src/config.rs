//! Tunables for a single sweep.

use crate::error::ValidationError;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 50;
pub const MAX_CONCURRENCY: usize = 500;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_DEADLINE_MS: u64 = 30_000;
pub const DEFAULT_GRACE_MS: u64 = 250;
pub const DEFAULT_MAX_HOSTS: usize = 255;
pub const DEFAULT_MAX_PORTS: usize = 1000;
/// Launch pacing above this rate is indistinguishable from no pacing.
pub const MAX_QPS: u32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Probes allowed in flight at once.
    pub concurrency: usize,
    /// Hard cap; larger `concurrency` values are clamped down to it.
    pub max_concurrency: usize,
    pub per_probe_timeout_ms: u64,
    pub global_deadline_ms: u64,
    /// How long in-flight probes get to wind down after a stop before they are abandoned.
    pub grace_ms: u64,
    pub max_hosts: usize,
    pub max_ports: usize,
    /// Optional cap on probe launches per second; 0 disables pacing.
    pub qps: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            concurrency: DEFAULT_CONCURRENCY,
            max_concurrency: MAX_CONCURRENCY,
            per_probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            global_deadline_ms: DEFAULT_DEADLINE_MS,
            grace_ms: DEFAULT_GRACE_MS,
            max_hosts: DEFAULT_MAX_HOSTS,
            max_ports: DEFAULT_MAX_PORTS,
            qps: 0,
        }
    }
}

/// Per-request knobs layered over a base config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub deadline_ms: Option<u64>,
}

impl SweepConfig {
    pub fn with_overrides(&self, o: Overrides) -> SweepConfig {
        let mut cfg = self.clone();
        if let Some(t) = o.timeout_ms { cfg.per_probe_timeout_ms = t; }
        if let Some(c) = o.concurrency { cfg.concurrency = c; }
        if let Some(d) = o.deadline_ms { cfg.global_deadline_ms = d; }
        cfg
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.concurrency == 0 {
            return Err(ValidationError::InvalidConfig("concurrency must be > 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ValidationError::InvalidConfig("max_concurrency must be > 0".into()));
        }
        if self.per_probe_timeout_ms == 0 {
            return Err(ValidationError::InvalidConfig("per-probe timeout must be > 0".into()));
        }
        if self.global_deadline_ms == 0 {
            return Err(ValidationError::InvalidConfig("global deadline must be > 0".into()));
        }
        if self.qps > MAX_QPS {
            return Err(ValidationError::InvalidConfig(format!("qps must be <= {} (0 disables pacing)", MAX_QPS)));
        }
        if self.max_hosts == 0 || self.max_ports == 0 {
            return Err(ValidationError::InvalidConfig("target limits must be > 0".into()));
        }
        Ok(())
    }

    /// Concurrency actually granted, after the hard cap.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.min(self.max_concurrency).max(1)
    }

    pub fn per_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.per_probe_timeout_ms)
    }

    pub fn global_deadline(&self) -> Duration {
        Duration::from_millis(self.global_deadline_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn qps(&self) -> Option<u32> {
        if self.qps == 0 { None } else { Some(self.qps) }
    }
}
