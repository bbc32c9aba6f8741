/// Declarative topology model: segments, hosts, access rules and probe scenarios
use crate::config::types::{NetsegError, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Name of the shared router isolation context unless the topology overrides it
pub const DEFAULT_ROUTER_CONTEXT: &str = "router";

/// A logical network zone (department) with its own routed subnet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    /// Segment identity, e.g. "HR"
    pub name: String,
    /// Routing identifier; link endpoint names are keyed by it
    pub vlan: u16,
    /// Routed subnet in canonical form (host bits zero)
    pub subnet: Ipv4Network,
    /// Gateway address owned by the router inside `subnet`
    pub gateway: Ipv4Addr,
    /// Explicit bridge name; derived from `vlan` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<String>,
}

impl Segment {
    /// Gateway address with the segment prefix length, as assigned on the router
    pub fn gateway_cidr(&self) -> Result<Ipv4Network> {
        Ipv4Network::new(self.gateway, self.subnet.prefix()).map_err(|e| {
            NetsegError::Config(format!("invalid gateway for segment '{}': {}", self.name, e))
        })
    }
}

/// An endpoint living in its own isolation context, attached to one segment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    /// Name of the owning segment
    pub segment: String,
    /// Interface address with prefix, e.g. 192.168.1.10/24
    pub address: Ipv4Network,
}

impl Host {
    pub fn ip(&self) -> Ipv4Addr {
        self.address.ip()
    }
}

/// Directional allow rule between segments. A missing destination means any.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessRule {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

/// Expected outcome of a reachability probe
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    Allow,
    Deny,
}

impl Expectation {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Expectation::Allow
        } else {
            Expectation::Deny
        }
    }

    pub fn is_allow(self) -> bool {
        self == Expectation::Allow
    }
}

/// One probe of the connectivity matrix
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectivityScenario {
    /// Host whose context originates the probe
    pub source: String,
    pub destination: Ipv4Addr,
    /// Human name of whatever owns `destination`
    pub destination_label: String,
    pub expected: Expectation,
    pub description: String,
}

/// Bounds for reachability probes
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Echo requests per probe
    #[serde(default = "default_probe_count")]
    pub count: u32,
    /// Upper bound for the whole probe
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_probe_count() -> u32 {
    2
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            count: default_probe_count(),
            timeout_secs: default_probe_timeout_secs(),
        }
    }
}

fn default_router_context() -> String {
    DEFAULT_ROUTER_CONTEXT.to_string()
}

/// Full topology. Vector order is declaration order and drives every phase.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    /// Name of the router isolation context
    #[serde(default = "default_router_context")]
    pub router: String,
    pub segments: Vec<Segment>,
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub rules: Vec<AccessRule>,
    #[serde(default)]
    pub scenarios: Vec<ConnectivityScenario>,
    #[serde(default)]
    pub probe: ProbeSettings,
}

impl Topology {
    /// Parse a topology from its JSON representation (no validation)
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a topology file (no validation)
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            NetsegError::Config(format!("cannot read topology {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Segment that owns `host`
    pub fn segment_of(&self, host: &Host) -> Option<&Segment> {
        self.segment(&host.segment)
    }

    /// Hosts of a segment, in declaration order
    pub fn hosts_in<'a>(&'a self, segment: &'a str) -> impl Iterator<Item = &'a Host> + 'a {
        self.hosts.iter().filter(move |h| h.segment == segment)
    }

    /// Segment whose subnet contains `address`
    pub fn segment_containing(&self, address: Ipv4Addr) -> Option<&Segment> {
        self.segments.iter().find(|s| s.subnet.contains(address))
    }

    /// Isolation contexts this topology creates: every host plus the router
    pub fn context_names(&self) -> Vec<&str> {
        self.hosts
            .iter()
            .map(|h| h.name.as_str())
            .chain(std::iter::once(self.router.as_str()))
            .collect()
    }
}
