/// Topology provisioning
///
/// Builds the live topology in dependency order:
/// bridges -> router context -> router uplinks -> hosts -> forwarding ->
/// policy -> verification.
///
/// Failures are contained per entity: a segment or host whose step fails is
/// abandoned and recorded, siblings continue. Only the router context and
/// global forwarding/policy steps abort the whole setup. A router context
/// left over from an earlier run is reused and reported as a conflict.
use crate::config::topology::{Host, Segment, Topology};
use crate::config::types::{NetsegError, Result};
use crate::kernel::naming;
use crate::kernel::ops::{NetworkBackend, Scope};
use crate::provision::policy::PolicyEngine;
use crate::provision::verifier::{VerificationReport, Verifier};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Router,
    Segment,
    Host,
}

/// A segment or host that could not be fully provisioned
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub kind: EntityKind,
    pub name: String,
    /// Step that failed, e.g. "create veth pair"
    pub step: String,
    pub reason: String,
}

impl fmt::Display for EntityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EntityKind::Router => "router",
            EntityKind::Segment => "segment",
            EntityKind::Host => "host",
        };
        write!(f, "{} '{}' failed at '{}': {}", kind, self.name, self.step, self.reason)
    }
}

/// Outcome of `Provisioner::setup`
#[derive(Clone, Debug, Default, Serialize)]
pub struct ProvisionReport {
    /// Segments whose bridge and router uplink are in place
    pub segments_ready: Vec<String>,
    pub hosts_ready: Vec<String>,
    pub failures: Vec<EntityFailure>,
    pub rules_applied: usize,
    pub verification: Option<VerificationReport>,
}

impl ProvisionReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, kind: EntityKind, name: &str, failure: StepFailure) {
        let failure = EntityFailure {
            kind,
            name: name.to_string(),
            step: failure.step.to_string(),
            reason: failure.reason,
        };
        error!("{}", failure);
        self.failures.push(failure);
    }
}

impl fmt::Display for ProvisionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Segments ready: {} | Hosts ready: {} | Firewall rules: {}",
            self.segments_ready.len(),
            self.hosts_ready.len(),
            self.rules_applied
        )?;
        for failure in &self.failures {
            writeln!(f, "  FAILED {}", failure)?;
        }
        Ok(())
    }
}

/// A failed step inside one entity's sequence
struct StepFailure {
    step: &'static str,
    reason: String,
}

trait StepResult<T> {
    fn step(self, label: &'static str) -> std::result::Result<T, StepFailure>;
}

impl<T> StepResult<T> for Result<T> {
    fn step(self, label: &'static str) -> std::result::Result<T, StepFailure> {
        self.map_err(|e| StepFailure {
            step: label,
            reason: e.to_string(),
        })
    }
}

/// Realizes a topology against a network backend
pub struct Provisioner<'a, N: ?Sized> {
    topology: &'a Topology,
    network: &'a N,
}

impl<'a, N: NetworkBackend + ?Sized> Provisioner<'a, N> {
    pub fn new(topology: &'a Topology, network: &'a N) -> Self {
        Self { topology, network }
    }

    /// Provision everything; entity failures are recorded in the report
    pub fn setup(&self) -> Result<ProvisionReport> {
        let topology = self.topology;
        info!(
            "Setting up network: {} segments, {} hosts, router '{}'",
            topology.segments.len(),
            topology.hosts.len(),
            topology.router
        );

        let mut report = ProvisionReport::default();

        let mut bridged: HashSet<&str> = HashSet::new();
        for segment in &topology.segments {
            match self.create_bridge(segment) {
                Ok(()) => {
                    bridged.insert(segment.name.as_str());
                }
                Err(failure) => report.record(EntityKind::Segment, &segment.name, failure),
            }
        }

        match self.network.create_context(&topology.router) {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                warn!("Router context '{}' already exists, reusing it", topology.router);
                report.record(
                    EntityKind::Router,
                    &topology.router,
                    StepFailure {
                        step: "create context",
                        reason: e.to_string(),
                    },
                );
            }
            Err(e) => {
                return Err(NetsegError::Setup(format!(
                    "router context '{}' could not be created: {}",
                    topology.router, e
                )))
            }
        }

        for segment in &topology.segments {
            if !bridged.contains(segment.name.as_str()) {
                continue;
            }
            match self.connect_segment(segment) {
                Ok(()) => report.segments_ready.push(segment.name.clone()),
                Err(failure) => report.record(EntityKind::Segment, &segment.name, failure),
            }
        }

        for host in &topology.hosts {
            let segment = match topology.segment_of(host) {
                Some(segment) if bridged.contains(segment.name.as_str()) => segment,
                Some(segment) => {
                    report.record(
                        EntityKind::Host,
                        &host.name,
                        StepFailure {
                            step: "resolve segment",
                            reason: format!("bridge of segment '{}' is unavailable", segment.name),
                        },
                    );
                    continue;
                }
                None => {
                    report.record(
                        EntityKind::Host,
                        &host.name,
                        StepFailure {
                            step: "resolve segment",
                            reason: format!("unknown segment '{}'", host.segment),
                        },
                    );
                    continue;
                }
            };
            match self.attach_host(host, segment) {
                Ok(()) => report.hosts_ready.push(host.name.clone()),
                Err(failure) => report.record(EntityKind::Host, &host.name, failure),
            }
        }

        info!("Enabling IPv4 forwarding");
        self.network.enable_forwarding(Scope::Root)?;
        self.network
            .enable_forwarding(Scope::Context(&topology.router))?;

        report.rules_applied = PolicyEngine::new(topology, self.network).apply()?;
        report.verification = Some(Verifier::new(topology, self.network).verify());

        Ok(report)
    }

    fn create_bridge(&self, segment: &Segment) -> std::result::Result<(), StepFailure> {
        let bridge = naming::segment_names(segment).bridge;
        self.network.create_bridge(&bridge).step("create bridge")?;
        self.network
            .set_link_up(Scope::Root, &bridge)
            .step("activate bridge")
    }

    /// veth from the router context into the segment bridge, gateway on the router end
    fn connect_segment(&self, segment: &Segment) -> std::result::Result<(), StepFailure> {
        let names = naming::segment_names(segment);
        let router = self.topology.router.as_str();
        let gateway = segment.gateway_cidr().step("resolve gateway")?;

        self.network
            .create_link_pair(&names.router_end, &names.segment_end)
            .step("create veth pair")?;
        self.network
            .move_to_context(&names.router_end, router)
            .step("move router end")?;
        self.network
            .attach_to_bridge(&names.segment_end, &names.bridge)
            .step("attach to bridge")?;
        self.network
            .add_address(Scope::Context(router), &names.router_end, gateway)
            .step("assign gateway")?;
        self.network
            .set_link_up(Scope::Context(router), &names.router_end)
            .step("activate router end")?;
        self.network
            .set_link_up(Scope::Root, &names.segment_end)
            .step("activate bridge end")
    }

    fn attach_host(&self, host: &Host, segment: &Segment) -> std::result::Result<(), StepFailure> {
        let names = naming::host_names(host);
        let bridge = naming::segment_names(segment).bridge;
        let context = Scope::Context(&names.context);

        self.network
            .create_context(&names.context)
            .step("create context")?;
        self.network
            .create_link_pair(&names.host_end, &names.bridge_end)
            .step("create veth pair")?;
        self.network
            .move_to_context(&names.host_end, &names.context)
            .step("move host end")?;
        self.network
            .attach_to_bridge(&names.bridge_end, &bridge)
            .step("attach to bridge")?;
        self.network
            .add_address(context, &names.host_end, host.address)
            .step("assign address")?;
        self.network
            .set_link_up(context, &names.host_end)
            .step("activate host end")?;
        self.network
            .set_link_up(context, "lo")
            .step("activate loopback")?;
        self.network
            .add_default_route(&names.context, segment.gateway)
            .step("add default route")?;
        self.network
            .set_link_up(Scope::Root, &names.bridge_end)
            .step("activate bridge end")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::department_topology;
    use crate::kernel::ops::{ChainPolicy, NetworkOps};
    use crate::testing::FakeNetwork;

    #[test]
    fn test_full_setup() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        let report = Provisioner::new(&topology, &net).setup().unwrap();

        assert!(report.is_complete());
        assert_eq!(report.segments_ready, vec!["HR", "IT", "Finance"]);
        assert_eq!(report.hosts_ready.len(), 6);
        assert_eq!(report.rules_applied, 5);
        let verification = report.verification.unwrap();
        assert!(verification.missing_resources(&topology).is_empty());

        assert!(net.forwarding_enabled(Scope::Root));
        assert!(net.forwarding_enabled(Scope::Context("router")));
        assert_eq!(net.forward_policy("router"), Some(ChainPolicy::Drop));
        assert_eq!(net.default_route("fin2"), Some("192.168.3.1".parse().unwrap()));
    }

    #[test]
    fn test_bridges_precede_router_and_hosts() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        Provisioner::new(&topology, &net).setup().unwrap();

        let journal = net.journal();
        assert_eq!(
            &journal[..7],
            &[
                "create_bridge br1",
                "set_link_up root br1",
                "create_bridge br2",
                "set_link_up root br2",
                "create_bridge br3",
                "set_link_up root br3",
                "create_context router",
            ]
        );
        let position = |entry: &str| journal.iter().position(|j| j == entry).unwrap();
        assert!(position("add_address router vr30 192.168.3.1/24") < position("create_context hr1"));
        assert!(position("add_default_route fin2 192.168.3.1") < position("enable_forwarding root"));
        assert!(position("enable_forwarding router") < position("flush_rules router filter"));
    }

    #[test]
    fn test_host_failure_is_contained() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        net.fail_on("create_link_pair v-hr2");
        let report = Provisioner::new(&topology, &net).setup().unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, EntityKind::Host);
        assert_eq!(report.failures[0].name, "hr2");
        assert_eq!(report.failures[0].step, "create veth pair");
        assert_eq!(report.hosts_ready.len(), 5);
        assert_eq!(report.rules_applied, 5);
    }

    #[test]
    fn test_bridge_failure_skips_segment_hosts() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        net.fail_on("create_bridge br2");
        let report = Provisioner::new(&topology, &net).setup().unwrap();

        assert_eq!(report.segments_ready, vec!["HR", "Finance"]);
        let failed: Vec<&str> = report.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, vec!["IT", "it1", "it2"]);
        assert_eq!(report.failures[1].step, "resolve segment");
        assert!(!net.journal().iter().any(|j| j.contains("vr20") || j.contains("it1")));
        assert!(net.has_context("fin1"));
    }

    #[test]
    fn test_uplink_failure_keeps_hosts() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        net.fail_on("move_to_context vr10");
        let report = Provisioner::new(&topology, &net).setup().unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, EntityKind::Segment);
        assert_eq!(report.failures[0].step, "move router end");
        // bridge exists, so hosts still attach at layer 2
        assert!(report.hosts_ready.contains(&"hr1".to_string()));
    }

    #[test]
    fn test_router_failure_is_fatal() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        net.fail_on("create_context router");
        let result = Provisioner::new(&topology, &net).setup();
        assert!(matches!(result, Err(NetsegError::Setup(_))));
        assert!(!net.journal().iter().any(|j| j.starts_with("create_context hr1")));
    }

    #[test]
    fn test_forwarding_failure_is_fatal() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        net.fail_on("enable_forwarding router");
        let result = Provisioner::new(&topology, &net).setup();
        assert!(matches!(result, Err(NetsegError::CommandFailed { .. })));
        assert!(net.forward_rules("router").is_empty());
    }

    #[test]
    fn test_rerun_over_existing_state_reports_conflicts() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        net.create_bridge("br1").unwrap();
        let report = Provisioner::new(&topology, &net).setup().unwrap();
        assert_eq!(report.failures[0].name, "HR");
        assert_eq!(report.failures[0].step, "create bridge");
    }

    #[test]
    fn test_existing_router_is_reused() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        net.create_context("router").unwrap();
        let report = Provisioner::new(&topology, &net).setup().unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, EntityKind::Router);
        assert_eq!(report.failures[0].step, "create context");
        assert_eq!(report.segments_ready.len(), 3);
        assert_eq!(report.hosts_ready.len(), 6);
        assert_eq!(net.forward_rules("router").len(), 5);
    }

    #[test]
    fn test_rerun_after_forwarding_failure_completes_policy() {
        let topology = department_topology().unwrap();
        let net = FakeNetwork::new();
        net.fail_on("enable_forwarding router");
        assert!(Provisioner::new(&topology, &net).setup().is_err());
        assert!(net.forward_rules("router").is_empty());

        net.clear_failures();
        let report = Provisioner::new(&topology, &net).setup().unwrap();
        assert!(report.failures.iter().any(|f| f.kind == EntityKind::Router));
        assert!(net.forwarding_enabled(Scope::Context("router")));
        assert_eq!(net.forward_policy("router"), Some(ChainPolicy::Drop));
        assert_eq!(net.forward_rules("router").len(), 5);
        assert!(report.verification.is_some());
    }
}
