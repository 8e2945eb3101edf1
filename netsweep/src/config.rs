use anyhow::{Context, Result};
use netsweep_core::SweepConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Deserialize, Clone)]
pub struct SweepSection {
    pub method: Option<String>,
    pub liveness_ports: Option<String>,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub deadline_ms: Option<u64>,
    pub qps: Option<u32>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ScanSection {
    pub ports: Option<String>,
    pub top: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub deadline_ms: Option<u64>,
    pub qps: Option<u32>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    /// Engine-wide limits and defaults; unset keys keep the built-in values.
    pub defaults: Option<SweepConfig>,
    pub sweep: Option<SweepSection>,
    pub scan: Option<ScanSection>,
}

impl Config {
    pub fn base(&self) -> SweepConfig {
        self.defaults.clone().unwrap_or_default()
    }
}

/// Load the YAML config. An explicit path must exist and parse; without one,
/// `./netsweep.yaml` is used when present.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("netsweep.yaml");
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}
