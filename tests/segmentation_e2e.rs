//! End-to-end tests over the in-memory network
//!
//! Drive setup, connectivity tests and cleanup through the public API the
//! CLI uses, with `FakeNetwork` standing in for the kernel.

use netseg::config::presets::department_topology;
use netseg::config::topology::{Expectation, Topology};
use netseg::config::{load_topology, TopologySource};
use netseg::provision::{EntityKind, Provisioner};
use netseg::safety::Cleanup;
use netseg::testing::FakeNetwork;
use netseg::verdict::{policy_matrix, ConnectivityHarness, Verdict};
use netseg::NetsegError;
use std::io::Write;

const TWO_LABS: &str = r#"{
  "router": "core",
  "segments": [
    { "name": "lab-a", "vlan": 100, "subnet": "10.10.0.0/24", "gateway": "10.10.0.1" },
    { "name": "lab-b", "vlan": 200, "subnet": "10.20.0.0/24", "gateway": "10.20.0.1" }
  ],
  "hosts": [
    { "name": "a1", "segment": "lab-a", "address": "10.10.0.5/24" },
    { "name": "a2", "segment": "lab-a", "address": "10.10.0.6/24" },
    { "name": "b1", "segment": "lab-b", "address": "10.20.0.5/24" }
  ],
  "scenarios": [
    { "source": "a1", "destination": "10.20.0.5", "destination_label": "b1", "expected": "deny", "description": "no rules, default deny" },
    { "source": "b1", "destination": "10.10.0.5", "destination_label": "a1", "expected": "deny", "description": "no rules, default deny back" },
    { "source": "a1", "destination": "10.10.0.6", "destination_label": "a2", "expected": "allow", "description": "same lab" }
  ]
}"#;

fn provisioned(topology: &Topology) -> FakeNetwork {
    let net = FakeNetwork::new();
    let report = Provisioner::new(topology, &net).setup().unwrap();
    assert!(report.is_complete(), "setup failed: {}", report);
    net
}

#[test]
fn test_department_scenarios_match_policy() {
    let topology = department_topology().unwrap();
    let net = provisioned(&topology);

    let report = ConnectivityHarness::new(&topology, &net).run().unwrap();
    let verdicts: Vec<(&str, &str, Verdict)> = report
        .results
        .iter()
        .map(|r| (r.source.as_str(), r.destination_label.as_str(), r.verdict))
        .collect();

    assert_eq!(
        verdicts,
        vec![
            ("hr1", "fin1", Verdict::SuccessAllowed),
            ("fin1", "hr1", Verdict::SuccessAllowed),
            ("fin1", "it1", Verdict::SuccessBlocked),
            ("it1", "hr1", Verdict::SuccessAllowed),
            ("it1", "fin1", Verdict::SuccessAllowed),
            ("hr1", "it1", Verdict::SuccessAllowed),
            ("fin1", "fin2", Verdict::SuccessAllowed),
        ]
    );
    assert!(report.all_passed());
}

#[test]
fn test_policy_matrix_passes_on_provisioned_network() {
    let topology = department_topology().unwrap();
    let net = provisioned(&topology);

    let matrix = policy_matrix(&topology).unwrap();
    let report = ConnectivityHarness::new(&topology, &net)
        .run_scenarios(&matrix)
        .unwrap();
    assert_eq!(report.passed, matrix.len());
}

#[test]
fn test_missing_rule_is_detected_as_unexpected_block() {
    let mut topology = department_topology().unwrap();
    // IT -> any removed: IT can no longer initiate
    topology.rules.remove(0);
    let net = provisioned(&topology);

    let report = ConnectivityHarness::new(&topology, &net).run().unwrap();
    let it_to_hr = report
        .results
        .iter()
        .find(|r| r.source == "it1" && r.destination_label == "hr1")
        .unwrap();
    assert_eq!(it_to_hr.verdict, Verdict::UnexpectedlyBlocked);
    // HR -> IT replies still return through the established rule
    let hr_to_it = report
        .results
        .iter()
        .find(|r| r.source == "hr1" && r.destination_label == "it1")
        .unwrap();
    assert_eq!(hr_to_it.verdict, Verdict::SuccessAllowed);
    assert_eq!(report.failed, 2);
}

#[test]
fn test_extra_rule_is_detected_as_unexpected_allow() {
    let mut topology = department_topology().unwrap();
    topology.rules.push(netseg::config::topology::AccessRule {
        source: "Finance".into(),
        destination: None,
    });
    let net = provisioned(&topology);

    let report = ConnectivityHarness::new(&topology, &net).run().unwrap();
    let fin_to_it = report
        .results
        .iter()
        .find(|r| r.source == "fin1" && r.destination_label == "it1")
        .unwrap();
    assert_eq!(fin_to_it.verdict, Verdict::UnexpectedlyAllowed);
}

#[test]
fn test_file_topology_defaults_to_deny() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(TWO_LABS.as_bytes()).unwrap();
    let topology = load_topology(TopologySource::File(file.path())).unwrap();
    assert_eq!(topology.router, "core");

    let net = provisioned(&topology);
    assert!(net.link("br100").is_some());
    assert!(net.link("vr200").unwrap().context.as_deref() == Some("core"));

    let report = ConnectivityHarness::new(&topology, &net).run().unwrap();
    assert!(report.all_passed(), "{}", report);
    assert_eq!(
        report.results.iter().map(|r| r.expected).collect::<Vec<_>>(),
        vec![Expectation::Deny, Expectation::Deny, Expectation::Allow]
    );
}

#[test]
fn test_cleanup_then_test_reports_not_provisioned() {
    let topology = department_topology().unwrap();
    let net = provisioned(&topology);

    let cleanup = Cleanup::new(&topology, &net).run();
    assert!(cleanup.is_clean());
    assert!(net.is_pristine());

    let result = ConnectivityHarness::new(&topology, &net).run();
    assert!(matches!(result, Err(NetsegError::NotProvisioned(_))));
}

#[test]
fn test_partial_setup_then_cleanup_restores_pristine_state() {
    let topology = department_topology().unwrap();
    let net = FakeNetwork::new();
    net.fail_on("attach_to_bridge vb-fin1");
    net.fail_on("move_to_context vr20");

    let report = Provisioner::new(&topology, &net).setup().unwrap();
    assert_eq!(report.failures.len(), 2);
    // fin1's bridge-side end stays behind in the root namespace
    assert!(net.link("vb-fin1").is_some());

    net.clear_failures();
    let cleanup = Cleanup::new(&topology, &net).run();
    assert!(cleanup.is_clean());
    assert!(net.is_pristine());
}

#[test]
fn test_failed_host_is_unreachable_but_siblings_work() {
    let topology = department_topology().unwrap();
    let net = FakeNetwork::new();
    net.fail_on("add_default_route hr2");
    let report = Provisioner::new(&topology, &net).setup().unwrap();
    assert_eq!(report.failures[0].name, "hr2");

    let results = ConnectivityHarness::new(&topology, &net).run().unwrap();
    assert!(results.all_passed());
}

#[test]
fn test_rerun_setup_without_cleanup_reports_conflicts() {
    let topology = department_topology().unwrap();
    let net = provisioned(&topology);

    let second = Provisioner::new(&topology, &net).setup().unwrap();
    assert!(!second.is_complete());
    let conflicted: Vec<(EntityKind, &str)> = second
        .failures
        .iter()
        .map(|f| (f.kind, f.name.as_str()))
        .collect();
    assert!(conflicted.contains(&(EntityKind::Router, "router")));
    assert!(conflicted.contains(&(EntityKind::Segment, "HR")));
    assert_eq!(second.rules_applied, 5);
    assert_eq!(net.forward_rules("router").len(), 5);

    let report = ConnectivityHarness::new(&topology, &net).run().unwrap();
    assert!(report.all_passed());
}

#[test]
fn test_rerun_after_interrupted_setup_restores_policy() {
    let topology = department_topology().unwrap();
    let net = FakeNetwork::new();
    net.fail_on("enable_forwarding router");
    assert!(Provisioner::new(&topology, &net).setup().is_err());

    net.clear_failures();
    let report = Provisioner::new(&topology, &net).setup().unwrap();
    assert!(report.verification.is_some());
    assert_eq!(net.forward_rules("router").len(), 5);

    let results = ConnectivityHarness::new(&topology, &net).run().unwrap();
    assert!(results.all_passed(), "{}", results);
}
