//! Target expansion: turn a sweep specification into a bounded, ordered,
//! de-duplicated list of targets.
//!
//! Every input goes through the same three stages: syntax (split the text into
//! items without materializing anything), cardinality (sum the item sizes and
//! compare against the configured ceiling), then semantic checks. Only a
//! [`CheckedSpec`] is ever materialized, so oversized or malformed requests
//! are rejected before any address list is built.

use crate::config::SweepConfig;
use crate::error::ValidationError;
use crate::target::Target;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Commonly probed ports used when a port scan names none.
pub const DEFAULT_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 139, 143, 443, 445, 1433, 3306, 3389, 5900, 8080,
];

/// What the caller asked to sweep. Validated once, by [`expand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SweepSpec {
    /// Liveness sweep. `targets` is a comma-separated list of addresses,
    /// CIDR blocks and `A-B` ranges.
    HostSweep { targets: String },
    /// Connect scan of one host.
    PortScan {
        host: IpAddr,
        #[serde(default)]
        ports: PortsSpec,
    },
}

/// Ports as the caller gave them: a JSON list of numbers, or text such as
/// `"22,80,8000-8010"`. Empty means the default list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortsSpec {
    List(Vec<i64>),
    Text(String),
}

impl Default for PortsSpec {
    fn default() -> Self {
        PortsSpec::List(Vec::new())
    }
}

/// A validated specification together with its canonical target order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPlan {
    pub spec: SweepSpec,
    pub targets: Vec<Target>,
}

/// A specification that passed every check. Turning it into a plan cannot fail.
#[derive(Debug, Clone)]
pub struct CheckedSpec {
    spec: SweepSpec,
    items: CheckedItems,
}

#[derive(Debug, Clone)]
enum CheckedItems {
    Hosts(Vec<HostItem>),
    Ports { host: IpAddr, segments: Vec<Segment> },
}

/// Run the syntax, cardinality and semantic checks without materializing
/// any target.
pub fn check(spec: &SweepSpec, cfg: &SweepConfig) -> Result<CheckedSpec, ValidationError> {
    let items = match spec {
        SweepSpec::HostSweep { targets } => CheckedItems::Hosts(check_hosts(targets, cfg.max_hosts)?),
        SweepSpec::PortScan { host, ports } => {
            CheckedItems::Ports { host: *host, segments: check_ports(ports, cfg.max_ports)? }
        }
    };
    Ok(CheckedSpec { spec: spec.clone(), items })
}

impl CheckedSpec {
    pub fn into_plan(self) -> SweepPlan {
        let targets = match self.items {
            CheckedItems::Hosts(items) => materialize_hosts(items).into_iter().map(Target::Host).collect(),
            CheckedItems::Ports { host, segments } => materialize_ports(segments)
                .into_iter()
                .map(|p| Target::Port(SocketAddr::new(host, p)))
                .collect(),
        };
        SweepPlan { spec: self.spec, targets }
    }
}

pub fn expand(spec: &SweepSpec, cfg: &SweepConfig) -> Result<SweepPlan, ValidationError> {
    Ok(check(spec, cfg)?.into_plan())
}

#[derive(Debug, Clone, Copy)]
enum HostItem {
    Single(IpAddr),
    Block(IpNet),
    Range(IpAddr, IpAddr),
}

fn parse_addr(s: &str) -> Result<IpAddr, ValidationError> {
    s.trim().parse().map_err(|_| ValidationError::InvalidAddress(s.trim().to_string()))
}

fn parse_host_items(text: &str) -> Result<Vec<HostItem>, ValidationError> {
    let mut items = Vec::new();
    for part in text.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let item = if part.contains('/') {
            let net: IpNet = part.parse().map_err(|_| ValidationError::InvalidCidr(part.to_string()))?;
            // Host bits are masked rather than rejected: 192.168.1.7/30 means 192.168.1.4/30.
            HostItem::Block(net.trunc())
        } else if let Some((a, b)) = part.split_once('-') {
            let start = parse_addr(a).map_err(|_| ValidationError::InvalidRange(part.to_string()))?;
            let end = parse_addr(b).map_err(|_| ValidationError::InvalidRange(part.to_string()))?;
            HostItem::Range(start, end)
        } else {
            HostItem::Single(parse_addr(part)?)
        };
        items.push(item);
    }
    if items.is_empty() {
        return Err(ValidationError::Empty);
    }
    Ok(items)
}

fn addr_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Usable host bounds of a block. IPv4 blocks larger than /31 lose their
/// network and broadcast addresses; /31 and /32 keep every address.
fn block_bounds(net: &IpNet) -> (u128, u128) {
    let lo = addr_to_u128(net.network());
    let hi = addr_to_u128(net.broadcast());
    match net {
        IpNet::V4(v4) if v4.prefix_len() < 31 => (lo + 1, hi - 1),
        _ => (lo, hi),
    }
}

fn item_size(item: &HostItem) -> u128 {
    match item {
        HostItem::Single(_) => 1,
        HostItem::Block(net) => {
            let (lo, hi) = block_bounds(net);
            (hi - lo).saturating_add(1)
        }
        // Malformed ranges count as empty here and are rejected after the ceiling check.
        HostItem::Range(a, b) => match (a, b) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                let (lo, hi) = (addr_to_u128(*a), addr_to_u128(*b));
                if hi < lo { 0 } else { (hi - lo).saturating_add(1) }
            }
            _ => 0,
        },
    }
}

fn push_span(out: &mut BTreeSet<IpAddr>, v6: bool, lo: u128, hi: u128) {
    for n in lo..=hi {
        let ip = if v6 {
            IpAddr::V6(Ipv6Addr::from(n))
        } else {
            IpAddr::V4(Ipv4Addr::from(n as u32))
        };
        out.insert(ip);
    }
}

fn check_hosts(text: &str, max_hosts: usize) -> Result<Vec<HostItem>, ValidationError> {
    let items = parse_host_items(text)?;

    let requested = items.iter().fold(0u128, |acc, it| acc.saturating_add(item_size(it)));
    if requested > max_hosts as u128 {
        return Err(ValidationError::TooManyHosts { requested, max: max_hosts });
    }

    for item in &items {
        if let HostItem::Range(a, b) = *item {
            let label = format!("{}-{}", a, b);
            if a.is_ipv4() != b.is_ipv4() {
                return Err(ValidationError::FamilyMismatch(label));
            }
            if b < a {
                return Err(ValidationError::RangeReversed(label));
            }
        }
    }
    Ok(items)
}

fn materialize_hosts(items: Vec<HostItem>) -> Vec<IpAddr> {
    let mut hosts = BTreeSet::new();
    for item in items {
        match item {
            HostItem::Single(ip) => {
                hosts.insert(ip);
            }
            HostItem::Block(net) => {
                let (lo, hi) = block_bounds(&net);
                push_span(&mut hosts, matches!(net, IpNet::V6(_)), lo, hi);
            }
            HostItem::Range(a, b) => push_span(&mut hosts, a.is_ipv6(), addr_to_u128(a), addr_to_u128(b)),
        }
    }
    hosts.into_iter().collect()
}

/// Expand a host list into ascending, unique addresses.
pub fn expand_hosts(text: &str, max_hosts: usize) -> Result<Vec<IpAddr>, ValidationError> {
    check_hosts(text, max_hosts).map(materialize_hosts)
}

/// Inclusive port segment, unchecked until after the ceiling test.
type Segment = (i64, i64);

fn parse_port_segments(spec: &PortsSpec) -> Result<Vec<Segment>, ValidationError> {
    match spec {
        PortsSpec::List(list) => Ok(list.iter().map(|&p| (p, p)).collect()),
        PortsSpec::Text(text) => {
            let mut segs = Vec::new();
            for part in text.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
                let bad = || ValidationError::InvalidPort(part.to_string());
                if let Some((a, b)) = part.split_once('-') {
                    let s: i64 = a.trim().parse().map_err(|_| bad())?;
                    let e: i64 = b.trim().parse().map_err(|_| bad())?;
                    if e < s {
                        return Err(ValidationError::RangeReversed(part.to_string()));
                    }
                    segs.push((s, e));
                } else {
                    let p: i64 = part.parse().map_err(|_| bad())?;
                    segs.push((p, p));
                }
            }
            Ok(segs)
        }
    }
}

fn check_ports(spec: &PortsSpec, max_ports: usize) -> Result<Vec<Segment>, ValidationError> {
    let segs = parse_port_segments(spec)?;

    let requested = segs.iter().fold(0u128, |acc, (s, e)| acc.saturating_add((*e as i128 - *s as i128) as u128 + 1));
    if requested > max_ports as u128 {
        return Err(ValidationError::TooManyPorts { requested, max: max_ports });
    }
    for &(s, e) in &segs {
        for p in [s, e] {
            if !(1..=65535).contains(&p) {
                return Err(ValidationError::InvalidPort(p.to_string()));
            }
        }
    }
    Ok(segs)
}

fn materialize_ports(segs: Vec<Segment>) -> Vec<u16> {
    if segs.is_empty() {
        return DEFAULT_PORTS.to_vec();
    }
    let mut seen = HashSet::new();
    let mut ports = Vec::new();
    for (s, e) in segs {
        for p in s..=e {
            let p = p as u16;
            if seen.insert(p) {
                ports.push(p);
            }
        }
    }
    ports
}

/// Expand ports in caller order, dropping repeats after their first occurrence.
/// An empty request yields [`DEFAULT_PORTS`].
pub fn expand_ports(spec: &PortsSpec, max_ports: usize) -> Result<Vec<u16>, ValidationError> {
    check_ports(spec, max_ports).map(materialize_ports)
}
