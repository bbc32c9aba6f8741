/// Topology teardown
///
/// Removes everything setup may have created, in reverse dependency order.
/// Idempotent and tolerant: an absent resource is not a failure, and a
/// failed removal never stops the remaining ones.
use crate::config::topology::Topology;
use crate::kernel::naming;
use crate::kernel::ops::{Removal, Teardown};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;

/// Resource types that need cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Context,
    Bridge,
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalStatus {
    Removed,
    Absent,
    Failed,
}

/// One attempted removal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupEntry {
    pub resource_type: ResourceType,
    pub identifier: String,
    pub status: RemovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Every removal attempted, in order
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub entries: Vec<CleanupEntry>,
}

impl CleanupReport {
    fn count(&self, status: RemovalStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn removed(&self) -> usize {
        self.count(RemovalStatus::Removed)
    }

    pub fn absent(&self) -> usize {
        self.count(RemovalStatus::Absent)
    }

    pub fn failed(&self) -> usize {
        self.count(RemovalStatus::Failed)
    }

    /// No removal failed for a reason other than absence
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.entries.iter().filter(|e| e.status == RemovalStatus::Failed) {
            writeln!(
                f,
                "  FAILED {:?} {}: {}",
                entry.resource_type,
                entry.identifier,
                entry.reason.as_deref().unwrap_or("unknown")
            )?;
        }
        writeln!(
            f,
            "Removed: {} | Already absent: {} | Failed: {}",
            self.removed(),
            self.absent(),
            self.failed()
        )
    }
}

pub struct Cleanup<'a, N: ?Sized> {
    topology: &'a Topology,
    network: &'a N,
}

impl<'a, N: Teardown + ?Sized> Cleanup<'a, N> {
    pub fn new(topology: &'a Topology, network: &'a N) -> Self {
        Self { topology, network }
    }

    /// Remove host contexts, the router context, bridges, then any link
    /// ends left in the root namespace by a partial setup
    pub fn run(&self) -> CleanupReport {
        info!("Cleaning up network");
        let mut report = CleanupReport::default();

        let hosts: Vec<_> = self.topology.hosts.iter().map(naming::host_names).collect();
        let segments: Vec<_> = self
            .topology
            .segments
            .iter()
            .map(naming::segment_names)
            .collect();

        for host in &hosts {
            let outcome = self.network.delete_context(&host.context);
            self.record(&mut report, ResourceType::Context, &host.context, outcome);
        }

        let router = &self.topology.router;
        let outcome = self.network.delete_context(router);
        self.record(&mut report, ResourceType::Context, router, outcome);

        for segment in &segments {
            let outcome = self.network.delete_link(&segment.bridge);
            self.record(&mut report, ResourceType::Bridge, &segment.bridge, outcome);
        }

        let lingering = segments
            .iter()
            .flat_map(|s| [&s.router_end, &s.segment_end])
            .chain(hosts.iter().flat_map(|h| [&h.host_end, &h.bridge_end]));
        for link in lingering {
            let outcome = self.network.delete_link(link);
            self.record(&mut report, ResourceType::Link, link, outcome);
        }

        info!(
            "Cleanup complete: {} removed, {} absent, {} failed",
            report.removed(),
            report.absent(),
            report.failed()
        );
        report
    }

    fn record(
        &self,
        report: &mut CleanupReport,
        resource_type: ResourceType,
        identifier: &str,
        outcome: Removal,
    ) {
        let (status, reason) = match outcome {
            Removal::Removed => {
                debug!("Removed {:?} {}", resource_type, identifier);
                (RemovalStatus::Removed, None)
            }
            Removal::Absent => {
                debug!("{:?} {} already absent", resource_type, identifier);
                (RemovalStatus::Absent, None)
            }
            Removal::Failed(reason) => {
                warn!("Failed to remove {:?} {}: {}", resource_type, identifier, reason);
                (RemovalStatus::Failed, Some(reason))
            }
        };
        report.entries.push(CleanupEntry {
            resource_type,
            identifier: identifier.to_string(),
            status,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::department_topology;
    use crate::kernel::ops::NetworkOps;
    use crate::provision::Provisioner;
    use crate::testing::FakeNetwork;

    #[test]
    fn test_cleanup_pristine_state() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        let report = Cleanup::new(&topology, &net).run();
        assert_eq!(report.removed(), 0);
        assert_eq!(report.failed(), 0);
        // 7 contexts + 3 bridges + 6 segment link ends + 12 host link ends
        assert_eq!(report.absent(), 28);
        assert!(report.is_clean());
    }

    #[test]
    fn test_cleanup_after_full_setup() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        Provisioner::new(&topology, &net).setup().unwrap();
        net.clear_journal();

        let report = Cleanup::new(&topology, &net).run();
        assert!(report.is_clean());
        assert_eq!(report.removed(), 10);
        assert!(net.is_pristine());

        let journal = net.journal();
        assert_eq!(journal[0], "delete_context hr1");
        assert_eq!(journal[6], "delete_context router");
        assert_eq!(journal[7], "delete_link br1");
    }

    #[test]
    fn test_cleanup_removes_lingering_links() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        // setup interrupted before the router end moved
        net.create_link_pair("vr10", "vbr10").unwrap();
        let report = Cleanup::new(&topology, &net).run();
        let removed: Vec<&str> = report
            .entries
            .iter()
            .filter(|e| e.status == RemovalStatus::Removed)
            .map(|e| e.identifier.as_str())
            .collect();
        assert_eq!(removed, vec!["vr10"]);
        assert!(net.is_pristine());
    }

    #[test]
    fn test_cleanup_continues_past_failure() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        Provisioner::new(&topology, &net).setup().unwrap();
        net.fail_on("delete_context router");

        let report = Cleanup::new(&topology, &net).run();
        assert_eq!(report.failed(), 1);
        assert!(!report.is_clean());
        assert!(!net.has_context("hr1"));
        assert!(net.link("br3").is_none());
        assert!(net.has_context("router"));
        assert!(report.to_string().contains("FAILED Context router: injected failure"));
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        Provisioner::new(&topology, &net).setup().unwrap();
        Cleanup::new(&topology, &net).run();
        let second = Cleanup::new(&topology, &net).run();
        assert_eq!(second.removed(), 0);
        assert!(second.is_clean());
    }
}
