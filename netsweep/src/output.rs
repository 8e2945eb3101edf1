use anyhow::{anyhow, Result};
use clap::ValueEnum;
use netsweep_core::{ProbeStatus, SweepReport, SweepSpec};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Jsonl,
}

impl OutputFormat {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "text" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            "jsonl" => Some(OutputFormat::Jsonl),
            _ => None,
        }
    }
}

fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    items.into_iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}

fn render_text(report: &SweepReport) -> String {
    let mut lines = Vec::new();
    match &report.spec {
        SweepSpec::HostSweep { targets } => {
            lines.push(format!("{}: live hosts ({} of {}):", targets, report.reachable.len(), report.total_targets));
            lines.extend(report.reachable.iter().map(|t| t.to_string()));
        }
        SweepSpec::PortScan { host, .. } => {
            let open: Vec<u16> = report.reachable.iter().filter_map(|t| t.port()).collect();
            if open.is_empty() {
                lines.push(format!("{}: no open ports found ({} scanned)", host, report.total_targets));
            } else {
                lines.push(format!("{}: open ports [{}] ({} scanned)", host, join(open), report.total_targets));
            }
        }
    }
    for e in &report.errors {
        lines.push(format!("  {} error: {}", e.target, e.reason));
    }
    if report.is_partial() {
        lines.push(format!(
            "(incomplete: {} of {} targets resolved, took {} ms)",
            report.resolved_count(),
            report.total_targets,
            report.duration_ms
        ));
    } else {
        lines.push(format!("(took {} ms)", report.duration_ms));
    }
    lines.join("\n")
}

pub fn render(report: &SweepReport, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => render_text(report),
        OutputFormat::Json => serde_json::to_string(report)?,
        OutputFormat::Jsonl => {
            let lines: Result<Vec<String>, _> = report.results.iter().map(serde_json::to_string).collect();
            lines?.join("\n")
        }
    })
}

/// One row per target, in report order.
pub fn write_csv<W: Write>(report: &SweepReport, w: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(["target", "status", "reason", "latency_ms", "started_at", "ended_at"])?;
    for r in &report.results {
        let reason = match &r.status {
            ProbeStatus::Error { reason } => reason.to_string(),
            _ => String::new(),
        };
        wtr.write_record([
            r.target.to_string(),
            r.status.label().to_string(),
            reason,
            r.latency.as_millis().to_string(),
            report.started_at.clone(),
            report.ended_at.clone(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Print or write the report. `csv` needs `out`.
pub fn emit(report: &SweepReport, format: OutputFormat, out: Option<&Path>, csv: bool) -> Result<()> {
    if csv {
        let path = out.ok_or_else(|| anyhow!("--csv requires --out <file>"))?;
        return write_csv(report, std::fs::File::create(path)?);
    }
    let text = render(report, format)?;
    match out {
        Some(path) => {
            let file = OpenOptions::new().create(true).truncate(true).write(true).open(path)?;
            let mut w = BufWriter::new(file);
            writeln!(w, "{}", text)?;
            w.flush()?;
        }
        None => println!("{}", text),
    }
    Ok(())
}
