use crate::target::{ProbeResult, Target};
use async_trait::async_trait;
use std::time::Duration;

/// One bounded reachability or connectivity check.
///
/// Implementations never fail past this boundary: every fault becomes a
/// [`ProbeStatus`](crate::ProbeStatus) on the returned result. They must also
/// own their sockets for the duration of `run` only, so that dropping the
/// future (timeout, deadline, cancellation) releases everything it acquired.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, target: Target, timeout: Duration) -> ProbeResult;
}
