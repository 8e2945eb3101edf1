//! Typed request layer over the sweep engine.
//!
//! Requests arrive as JSON bodies, run through a fresh [`SweepController`]
//! each, and come back as an HTTP-style status plus a JSON body.

use clap::ValueEnum;
use host_discovery::{PingProbe, TcpLivenessProbe, MAX_LIVENESS_PORTS};
use netsweep_core::expand::expand_ports;
use netsweep_core::{
    Overrides, PortsSpec, Probe, SweepConfig, SweepController, SweepError, SweepReport, SweepSpec, ValidationError,
};
use port_scan::{resolve_first, TcpConnectProbe};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LivenessMethod {
    /// TCP connect to a few ports; unprivileged.
    #[default]
    Tcp,
    /// One ICMP echo through the system ping utility.
    Ping,
}

impl LivenessMethod {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(LivenessMethod::Tcp),
            "ping" => Some(LivenessMethod::Ping),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostSweepRequest {
    pub targets_spec: String,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub method: LivenessMethod,
    /// Ports for the TCP liveness check; absent means 80, 443 and 22.
    pub liveness_ports: Option<PortsSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortScanRequest {
    /// IP literal or hostname; hostnames resolve to their first address.
    pub host: String,
    #[serde(default)]
    pub ports_spec: PortsSpec,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn error(status: u16, message: impl Into<String>) -> Self {
        ApiResponse { status, body: json!({ "error": message.into() }) }
    }
}

/// Shared engine settings for every request: the base config plus the
/// port-probe retry policy. Sweeps observe `cancel` through child tokens.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    pub base: SweepConfig,
    pub retries: u32,
    pub retry_delay: Duration,
    pub cancel: CancellationToken,
}

impl Engine {
    pub fn new(base: SweepConfig) -> Self {
        Engine { base, ..Default::default() }
    }

    pub async fn host_sweep(&self, req: &HostSweepRequest) -> Result<SweepReport, SweepError> {
        let cfg = self.base.with_overrides(Overrides {
            timeout_ms: req.timeout_ms,
            concurrency: req.concurrency,
            deadline_ms: req.deadline_ms,
        });
        let probe: Arc<dyn Probe> = match req.method {
            LivenessMethod::Tcp => {
                let ports = match &req.liveness_ports {
                    Some(spec) => expand_ports(spec, cfg.max_ports.min(MAX_LIVENESS_PORTS))?,
                    None => Vec::new(),
                };
                Arc::new(TcpLivenessProbe::new(ports)?)
            }
            LivenessMethod::Ping => Arc::new(PingProbe::default()),
        };
        let spec = SweepSpec::HostSweep { targets: req.targets_spec.clone() };
        self.run(cfg, probe, &spec).await
    }

    pub async fn port_scan(&self, req: &PortScanRequest) -> Result<SweepReport, SweepError> {
        let cfg = self.base.with_overrides(Overrides {
            timeout_ms: req.timeout_ms,
            concurrency: req.concurrency,
            deadline_ms: req.deadline_ms,
        });
        let name = req.host.trim();
        if name.is_empty() {
            return Err(ValidationError::Empty.into());
        }
        let host = resolve_first(name)
            .await
            .map_err(|e| ValidationError::InvalidAddress(format!("{} ({})", name, e)))?;
        let probe = Arc::new(TcpConnectProbe::with_retries(self.retries, self.retry_delay));
        let spec = SweepSpec::PortScan { host, ports: req.ports_spec.clone() };
        self.run(cfg, probe, &spec).await
    }

    async fn run(&self, cfg: SweepConfig, probe: Arc<dyn Probe>, spec: &SweepSpec) -> Result<SweepReport, SweepError> {
        SweepController::new(cfg, probe).with_cancel(self.cancel.child_token()).execute(spec).await
    }
}

/// Map a sweep result onto a response. Deadline and cancellation still
/// answer 200; the report's `outcome` says it is partial.
pub fn respond(result: Result<SweepReport, SweepError>) -> ApiResponse {
    match result {
        Ok(report) => report_response(&report),
        Err(SweepError::Validation(e)) => ApiResponse::error(400, e.to_string()),
        Err(e @ SweepError::Internal { .. }) => {
            let message = e.to_string();
            let partial = e.into_partial_report().and_then(|r| serde_json::to_value(r).ok());
            let mut body = json!({ "error": message });
            if let Some(p) = partial {
                body["partial_report"] = p;
            }
            ApiResponse { status: 500, body }
        }
        Err(e) => match e.into_partial_report() {
            Some(report) => report_response(&report),
            None => ApiResponse::error(500, "sweep stopped without a report"),
        },
    }
}

fn report_response(report: &SweepReport) -> ApiResponse {
    match serde_json::to_value(report) {
        Ok(body) => ApiResponse { status: 200, body },
        Err(e) => ApiResponse::error(500, format!("failed to encode report: {}", e)),
    }
}

/// One line per sweep under the `audit` target.
pub fn audit(action: &str, input: &str, summary: &str) {
    info!(target: "audit", module = "scan", action, input, summary, "sweep recorded");
}

/// Dispatch a JSON body to an endpoint (`host-sweep` or `port-scan`, with or
/// without a `scan/` prefix).
pub async fn handle(engine: &Engine, endpoint: &str, body: &str) -> ApiResponse {
    match endpoint.trim_start_matches('/').trim_start_matches("scan/") {
        "host-sweep" => {
            let req: HostSweepRequest = match serde_json::from_str(body) {
                Ok(r) => r,
                Err(e) => return ApiResponse::error(400, format!("malformed request body: {}", e)),
            };
            let result = engine.host_sweep(&req).await;
            audit("host_sweep", &req.targets_spec, &outcome_summary(&result));
            respond(result)
        }
        "port-scan" => {
            let req: PortScanRequest = match serde_json::from_str(body) {
                Ok(r) => r,
                Err(e) => return ApiResponse::error(400, format!("malformed request body: {}", e)),
            };
            let result = engine.port_scan(&req).await;
            audit("port_scan", &req.host, &outcome_summary(&result));
            respond(result)
        }
        other => ApiResponse::error(404, format!("unknown endpoint: {}", other)),
    }
}

pub fn outcome_summary(result: &Result<SweepReport, SweepError>) -> String {
    match result {
        Ok(report) => report.summary(),
        Err(e) => match e.partial_report() {
            Some(report) => report.summary(),
            None => e.to_string(),
        },
    }
}
