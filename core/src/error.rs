use crate::aggregate::SweepReport;
use thiserror::Error;

/// A sweep request that cannot be run as given. Raised before any probing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("empty target specification")]
    Empty,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid CIDR block: {0}")]
    InvalidCidr(String),
    #[error("invalid address range: {0}")]
    InvalidRange(String),
    #[error("address family mismatch in range: {0}")]
    FamilyMismatch(String),
    #[error("range end precedes start: {0}")]
    RangeReversed(String),
    #[error("invalid port: {0} (must be 1-65535)")]
    InvalidPort(String),
    #[error("too many hosts requested: {requested} (limit {max})")]
    TooManyHosts { requested: u128, max: usize },
    #[error("too many ports requested: {requested} (limit {max})")]
    TooManyPorts { requested: u128, max: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Sweep-level failure. Everything except `Validation` carries whatever was
/// collected before the sweep stopped.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("sweep deadline exceeded ({} of {} targets resolved)", .0.resolved_count(), .0.total_targets)]
    DeadlineExceeded(Box<SweepReport>),
    #[error("sweep cancelled ({} of {} targets resolved)", .0.resolved_count(), .0.total_targets)]
    Cancelled(Box<SweepReport>),
    #[error("internal scheduler error: {message}")]
    Internal {
        message: String,
        partial: Option<Box<SweepReport>>,
    },
}

impl SweepError {
    /// The best-effort report salvaged from a sweep that did not complete.
    pub fn partial_report(&self) -> Option<&SweepReport> {
        match self {
            SweepError::Validation(_) => None,
            SweepError::DeadlineExceeded(r) | SweepError::Cancelled(r) => Some(r),
            SweepError::Internal { partial, .. } => partial.as_deref(),
        }
    }

    pub fn into_partial_report(self) -> Option<SweepReport> {
        match self {
            SweepError::Validation(_) => None,
            SweepError::DeadlineExceeded(r) | SweepError::Cancelled(r) => Some(*r),
            SweepError::Internal { partial, .. } => partial.map(|r| *r),
        }
    }
}
