//! Network operation seam.
//!
//! Orchestration code talks to the host through three narrow traits so it can
//! run against the real `ip`/`iptables` adapter or an in-memory fake:
//! - [`NetworkOps`]: checked mutations used by setup
//! - [`Teardown`]: best-effort removals used by cleanup, never fail
//! - [`Inspect`]: read-only queries and reachability probes

use crate::config::topology::ProbeSettings;
use crate::config::types::Result;
use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

/// Which network stack an operation targets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope<'a> {
    /// The initial (host) namespace
    Root,
    /// A named isolation context
    Context(&'a str),
}

impl fmt::Display for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Root => write!(f, "root"),
            Scope::Context(name) => write!(f, "{}", name),
        }
    }
}

/// Packet filter table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterTable {
    Filter,
    Nat,
}

impl FilterTable {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterTable::Filter => "filter",
            FilterTable::Nat => "nat",
        }
    }
}

/// Default verdict of a chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ChainPolicy {
    Accept,
    Drop,
}

impl ChainPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ChainPolicy::Accept => "ACCEPT",
            ChainPolicy::Drop => "DROP",
        }
    }
}

/// One accept rule of the router's forwarding chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FilterRule {
    /// Return traffic of flows already admitted
    AcceptEstablished,
    /// New flows from `source`, to `destination` or anywhere
    Accept {
        source: Ipv4Network,
        destination: Option<Ipv4Network>,
    },
}

impl FilterRule {
    /// Whether a new flow from `source` to `destination` is admitted by this rule
    pub fn admits_new(&self, source: Ipv4Addr, destination: Ipv4Addr) -> bool {
        match self {
            FilterRule::AcceptEstablished => false,
            FilterRule::Accept {
                source: src,
                destination: dst,
            } => src.contains(source) && dst.map_or(true, |d| d.contains(destination)),
        }
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterRule::AcceptEstablished => write!(f, "ACCEPT ctstate ESTABLISHED,RELATED"),
            FilterRule::Accept {
                source,
                destination: Some(destination),
            } => write!(f, "ACCEPT {} -> {}", source, destination),
            FilterRule::Accept {
                source,
                destination: None,
            } => write!(f, "ACCEPT {} -> any", source),
        }
    }
}

/// Outcome of a best-effort removal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// Nothing to remove
    Absent,
    Failed(String),
}

/// Result of a bounded reachability probe
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeResult {
    pub reachable: bool,
    pub timed_out: bool,
    /// Probe output kept for diagnostics
    pub detail: String,
}

impl ProbeResult {
    pub fn reachable(detail: impl Into<String>) -> Self {
        Self {
            reachable: true,
            timed_out: false,
            detail: detail.into(),
        }
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self {
            reachable: false,
            timed_out: false,
            detail: detail.into(),
        }
    }
}

/// Checked mutations. Every error aborts the calling step.
pub trait NetworkOps {
    fn create_context(&self, name: &str) -> Result<()>;
    fn create_bridge(&self, name: &str) -> Result<()>;
    /// Create a veth pair `first` <-> `peer` in the root namespace
    fn create_link_pair(&self, first: &str, peer: &str) -> Result<()>;
    fn move_to_context(&self, link: &str, context: &str) -> Result<()>;
    fn attach_to_bridge(&self, link: &str, bridge: &str) -> Result<()>;
    fn add_address(&self, scope: Scope<'_>, link: &str, address: Ipv4Network) -> Result<()>;
    fn set_link_up(&self, scope: Scope<'_>, link: &str) -> Result<()>;
    fn add_default_route(&self, context: &str, gateway: Ipv4Addr) -> Result<()>;
    fn enable_forwarding(&self, scope: Scope<'_>) -> Result<()>;
    fn flush_rules(&self, context: &str, table: FilterTable) -> Result<()>;
    fn set_forward_policy(&self, context: &str, policy: ChainPolicy) -> Result<()>;
    fn append_forward_rule(&self, context: &str, rule: &FilterRule) -> Result<()>;
}

/// Best-effort removals. Absence of the resource is not a failure.
pub trait Teardown {
    fn delete_context(&self, name: &str) -> Removal;
    /// Delete a link in the root namespace (its veth peer goes with it)
    fn delete_link(&self, name: &str) -> Removal;
    fn delete_user_chains(&self, context: &str) -> Removal;
}

/// Read-only queries. `None` means the state could not be read.
pub trait Inspect {
    fn context_names(&self) -> Option<Vec<String>>;
    fn bridge_names(&self) -> Option<Vec<String>>;
    fn show_addresses(&self, context: &str) -> Option<String>;
    fn show_forward_rules(&self, context: &str) -> Option<String>;
    fn show_routes(&self, context: &str) -> Option<String>;
    /// Bounded reachability probe from inside `context`
    fn probe(&self, context: &str, destination: Ipv4Addr, settings: &ProbeSettings) -> ProbeResult;
}

/// Everything a full setup/test/cleanup run needs
pub trait NetworkBackend: NetworkOps + Teardown + Inspect {}

impl<T: NetworkOps + Teardown + Inspect> NetworkBackend for T {}
