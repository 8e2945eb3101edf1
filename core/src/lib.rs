//! Core engine for bounded-concurrency network sweeps: target expansion, the
//! probe abstraction, the worker pool, result aggregation and the per-sweep
//! controller that ties them together.

pub mod aggregate;
pub mod config;
pub mod controller;
pub mod error;
pub mod expand;
pub mod pool;
pub mod probe;
pub mod ratelimiter;
pub mod target;

pub use aggregate::{aggregate, SweepReport, SweepTiming, TargetError};
pub use config::{Overrides, SweepConfig};
pub use controller::{Progress, SweepController, SweepState};
pub use error::{SweepError, ValidationError};
pub use expand::{check, expand, CheckedSpec, PortsSpec, SweepPlan, SweepSpec, DEFAULT_PORTS};
pub use pool::{run_all, PoolOptions, PoolRun, SweepOutcome};
pub use probe::Probe;
pub use target::{ErrorReason, ProbeResult, ProbeStatus, Target};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
