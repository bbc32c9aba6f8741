/// Post-setup verification
///
/// Read-only dump of live state for comparison against the topology. A read
/// that fails (context missing, tool absent) is reported as unavailable and
/// never aborts verification.
use crate::config::topology::Topology;
use crate::kernel::naming;
use crate::kernel::ops::Inspect;
use log::{info, warn};
use serde::Serialize;
use std::fmt;

/// Snapshot of what the host reports
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerificationReport {
    pub contexts: Option<Vec<String>>,
    pub bridges: Option<Vec<String>>,
    pub router_addresses: Option<String>,
    pub router_rules: Option<String>,
    /// (host, routes) in declaration order
    pub host_routes: Vec<(String, Option<String>)>,
}

impl VerificationReport {
    /// Contexts and bridges the topology expects but the host did not list
    pub fn missing_resources(&self, topology: &Topology) -> Vec<String> {
        let mut missing = Vec::new();

        let contexts = self.contexts.as_deref().unwrap_or_default();
        for context in topology.context_names() {
            if !contexts.iter().any(|c| c == context) {
                missing.push(format!("context {}", context));
            }
        }

        let bridges = self.bridges.as_deref().unwrap_or_default();
        for segment in &topology.segments {
            let bridge = naming::segment_names(segment).bridge;
            if !bridges.iter().any(|b| *b == bridge) {
                missing.push(format!("bridge {}", bridge));
            }
        }

        missing
    }
}

fn section(f: &mut fmt::Formatter<'_>, title: &str, body: Option<&str>) -> fmt::Result {
    writeln!(f, "{}:", title)?;
    match body {
        Some(text) if !text.trim().is_empty() => writeln!(f, "{}", text.trim_end()),
        Some(_) => writeln!(f, "  (empty)"),
        None => writeln!(f, "  (unavailable)"),
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let contexts = self.contexts.as_ref().map(|c| c.join("\n"));
        let bridges = self.bridges.as_ref().map(|b| b.join("\n"));

        section(f, "Namespaces", contexts.as_deref())?;
        section(f, "Bridges", bridges.as_deref())?;
        section(f, "Router interfaces", self.router_addresses.as_deref())?;
        section(f, "Firewall rules", self.router_rules.as_deref())?;
        for (host, routes) in &self.host_routes {
            section(f, &format!("{} routes", host), routes.as_deref())?;
        }
        Ok(())
    }
}

/// Collects a `VerificationReport`
pub struct Verifier<'a, N: ?Sized> {
    topology: &'a Topology,
    network: &'a N,
}

impl<'a, N: Inspect + ?Sized> Verifier<'a, N> {
    pub fn new(topology: &'a Topology, network: &'a N) -> Self {
        Self { topology, network }
    }

    pub fn verify(&self) -> VerificationReport {
        info!("Verifying setup");
        let router = self.topology.router.as_str();

        let report = VerificationReport {
            contexts: self.network.context_names(),
            bridges: self.network.bridge_names(),
            router_addresses: self.network.show_addresses(router),
            router_rules: self.network.show_forward_rules(router),
            host_routes: self
                .topology
                .hosts
                .iter()
                .map(|host| (host.name.clone(), self.network.show_routes(&host.name)))
                .collect(),
        };

        for missing in report.missing_resources(self.topology) {
            warn!("Verification: {} not found", missing);
        }

        report
    }
}
