use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use netsweep_core::expand::expand_ports;
use netsweep_core::{PortsSpec, SweepError, SweepReport};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod output;

use api::{Engine, HostSweepRequest, LivenessMethod, PortScanRequest};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "netsweep", version, about = "Bounded-concurrency host sweeps and TCP port scans")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./netsweep.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log verbosity on stderr (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Find live hosts in a list of addresses, CIDR blocks and A-B ranges
    Sweep {
        /// e.g. 192.168.1.0/24 or 10.0.0.1-10.0.0.40,10.0.1.7
        targets: String,
        /// Liveness method
        #[arg(long, value_enum)]
        method: Option<LivenessMethod>,
        /// Ports for the tcp method (default: 80,443,22)
        #[arg(long)]
        liveness_ports: Option<String>,
        /// Timeout per host in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Max concurrent probes
        #[arg(long)]
        concurrency: Option<usize>,
        /// Wall-clock budget for the whole sweep in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
        /// Cap on probe launches per second; 0 disables pacing
        #[arg(long)]
        qps: Option<u32>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        /// Output file (overwrites)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Write CSV to --out instead of text/json
        #[arg(long, default_value_t = false)]
        csv: bool,
    },
    /// TCP connect scan of one host
    Scan {
        /// Target host or IP
        host: String,
        /// Ports: comma/range list (e.g., 22,80,443 or 1-1024,8080). Default: common ports.
        #[arg(long)]
        ports: Option<String>,
        /// Select top N common ports (conflicts with --ports)
        #[arg(long, conflicts_with = "ports")]
        top: Option<usize>,
        /// Timeout per port in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Max concurrent connections
        #[arg(long)]
        concurrency: Option<usize>,
        /// Wall-clock budget for the whole scan in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
        /// Cap on connection attempts per second; 0 disables pacing
        #[arg(long)]
        qps: Option<u32>,
        /// Retries per port on transport errors
        #[arg(long)]
        retries: Option<u32>,
        /// Base delay between retries in milliseconds
        #[arg(long)]
        retry_delay_ms: Option<u64>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        /// Output file (overwrites)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Write CSV to --out instead of text/json
        #[arg(long, default_value_t = false)]
        csv: bool,
    },
    /// Run a JSON request (host-sweep or port-scan) and print {status, body}
    Request {
        endpoint: String,
        /// Request body file; stdin when omitted
        #[arg(long, value_name = "FILE")]
        body: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn format_or(flag: Option<OutputFormat>, file: Option<&String>) -> OutputFormat {
    flag.or_else(|| file.and_then(|f| OutputFormat::from_name(f))).unwrap_or_default()
}

/// Print what the sweep produced. Partial reports are printed too; the exit
/// code tells them apart.
fn finish(
    result: Result<SweepReport, SweepError>,
    format: OutputFormat,
    out: Option<PathBuf>,
    csv: bool,
) -> Result<ExitCode> {
    match result {
        Ok(report) => {
            output::emit(&report, format, out.as_deref(), csv)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(SweepError::Validation(e)) => Err(e.into()),
        Err(e) => {
            let message = e.to_string();
            let internal = matches!(e, SweepError::Internal { .. });
            if let Some(report) = e.into_partial_report() {
                output::emit(&report, format, out.as_deref(), csv)?;
            }
            if internal {
                return Err(anyhow!(message));
            }
            warn!("{}", message);
            Ok(ExitCode::from(2))
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let loaded_cfg = config::load_config(cli.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    let mut engine = Engine::new(loaded_cfg.base());
    let cancel = engine.cancel.clone();
    rt.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping sweep");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Version => {
            println!("netsweep {}", env!("CARGO_PKG_VERSION"));
            println!("netsweep-core {}", netsweep_core::version());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Sweep { targets, mut method, mut liveness_ports, mut timeout_ms, mut concurrency, mut deadline_ms, mut qps, format, out, csv } => {
            let section = loaded_cfg.sweep.clone().unwrap_or_default();
            if method.is_none() {
                method = match section.method.as_deref() {
                    Some(m) => Some(LivenessMethod::from_name(m).ok_or_else(|| anyhow!("unknown liveness method in config: {}", m))?),
                    None => None,
                };
            }
            if liveness_ports.is_none() { liveness_ports = section.liveness_ports.clone(); }
            if timeout_ms.is_none() { timeout_ms = section.timeout_ms; }
            if concurrency.is_none() { concurrency = section.concurrency; }
            if deadline_ms.is_none() { deadline_ms = section.deadline_ms; }
            if qps.is_none() { qps = section.qps; }
            if let Some(q) = qps { engine.base.qps = q; }
            let format = format_or(format, section.format.as_ref());

            let req = HostSweepRequest {
                targets_spec: targets,
                timeout_ms,
                concurrency,
                deadline_ms,
                method: method.unwrap_or_default(),
                liveness_ports: liveness_ports.map(PortsSpec::Text),
            };
            let result = rt.block_on(engine.host_sweep(&req));
            api::audit("host_sweep", &req.targets_spec, &api::outcome_summary(&result));
            finish(result, format, out, csv)
        }
        Commands::Scan { host, mut ports, mut top, mut timeout_ms, mut concurrency, mut deadline_ms, mut qps, mut retries, mut retry_delay_ms, format, out, csv } => {
            let section = loaded_cfg.scan.clone().unwrap_or_default();
            if ports.is_none() && top.is_none() {
                ports = section.ports.clone();
                top = section.top;
            }
            if timeout_ms.is_none() { timeout_ms = section.timeout_ms; }
            if concurrency.is_none() { concurrency = section.concurrency; }
            if deadline_ms.is_none() { deadline_ms = section.deadline_ms; }
            if qps.is_none() { qps = section.qps; }
            if retries.is_none() { retries = section.retries; }
            if retry_delay_ms.is_none() { retry_delay_ms = section.retry_delay_ms; }
            if let Some(q) = qps { engine.base.qps = q; }
            engine.retries = retries.unwrap_or(0);
            engine.retry_delay = Duration::from_millis(retry_delay_ms.unwrap_or(50));
            let format = format_or(format, section.format.as_ref());

            let ports_spec = match (ports, top) {
                (Some(spec), _) => PortsSpec::Text(spec),
                (None, Some(n)) => {
                    if n == 0 { return Err(anyhow!("--top must be > 0")); }
                    PortsSpec::List(port_scan::top_ports(n).into_iter().map(i64::from).collect())
                }
                (None, None) => PortsSpec::default(),
            };
            // fail fast on a bad list before resolving the host
            expand_ports(&ports_spec, engine.base.max_ports)?;

            let req = PortScanRequest { host, ports_spec, timeout_ms, concurrency, deadline_ms };
            let result = rt.block_on(engine.port_scan(&req));
            api::audit("port_scan", &req.host, &api::outcome_summary(&result));
            finish(result, format, out, csv)
        }
        Commands::Request { endpoint, body } => {
            let text = match body {
                Some(path) => std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut s = String::new();
                    std::io::stdin().read_to_string(&mut s)?;
                    s
                }
            };
            let resp = rt.block_on(api::handle(&engine, &endpoint, &text));
            println!("{}", serde_json::to_string(&resp)?);
            Ok(if resp.status == 200 { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
    }
}
