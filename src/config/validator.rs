// Topology validation
// Runs once at startup and fails fast, listing every violated invariant at once.

use crate::config::topology::Topology;
use crate::config::types::{NetsegError, Result};
use crate::kernel::naming::{self, check_context_name, check_interface_name};
use std::collections::{HashMap, HashSet};

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a topology; returns `NetsegError::Validation` when any error was found
pub fn validate_topology(topology: &Topology) -> Result<ValidationResult> {
    let result = check_topology(topology);
    if !result.is_valid() {
        return Err(NetsegError::Validation(result.errors));
    }
    Ok(result)
}

/// Collect every error and warning without failing
pub fn check_topology(topology: &Topology) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_segments(topology, &mut result);
    validate_hosts(topology, &mut result);
    validate_rules(topology, &mut result);
    validate_scenarios(topology, &mut result);
    validate_names(topology, &mut result);
    validate_probe(topology, &mut result);

    result
}

fn validate_segments(topology: &Topology, result: &mut ValidationResult) {
    if topology.segments.is_empty() {
        result.add_error("topology declares no segments".to_string());
    }

    let mut names = HashSet::new();
    let mut vlans = HashSet::new();

    for segment in &topology.segments {
        if !names.insert(segment.name.as_str()) {
            result.add_error(format!("duplicate segment name '{}'", segment.name));
        }
        if !(1..=4094).contains(&segment.vlan) {
            result.add_error(format!(
                "segment '{}': vlan {} outside 1..=4094",
                segment.name, segment.vlan
            ));
        }
        if !vlans.insert(segment.vlan) {
            result.add_error(format!(
                "segment '{}': vlan {} already used",
                segment.name, segment.vlan
            ));
        }

        let subnet = segment.subnet;
        if subnet.ip() != subnet.network() {
            result.add_error(format!(
                "segment '{}': subnet {} has host bits set (use {}/{})",
                segment.name,
                subnet,
                subnet.network(),
                subnet.prefix()
            ));
        }
        if subnet.prefix() > 30 {
            result.add_error(format!(
                "segment '{}': subnet {} leaves no room for gateway and hosts",
                segment.name, subnet
            ));
        }
        if !subnet.contains(segment.gateway) {
            result.add_error(format!(
                "segment '{}': gateway {} is outside subnet {}",
                segment.name, segment.gateway, subnet
            ));
        } else if segment.gateway == subnet.network() || segment.gateway == subnet.broadcast() {
            result.add_error(format!(
                "segment '{}': gateway {} is the network or broadcast address",
                segment.name, segment.gateway
            ));
        }

        if topology.hosts_in(&segment.name).next().is_none() {
            result.add_warning(format!("segment '{}' has no hosts", segment.name));
        }
    }

    for (i, a) in topology.segments.iter().enumerate() {
        for b in topology.segments.iter().skip(i + 1) {
            if a.subnet.contains(b.subnet.network()) || b.subnet.contains(a.subnet.network()) {
                result.add_error(format!(
                    "segments '{}' ({}) and '{}' ({}) overlap",
                    a.name, a.subnet, b.name, b.subnet
                ));
            }
        }
    }
}

fn validate_hosts(topology: &Topology, result: &mut ValidationResult) {
    let mut names = HashSet::new();
    let mut addresses = HashMap::new();

    for host in &topology.hosts {
        if !names.insert(host.name.as_str()) {
            result.add_error(format!("duplicate host name '{}'", host.name));
        }
        if host.name == topology.router {
            result.add_error(format!(
                "host '{}' clashes with the router context name",
                host.name
            ));
        }
        if let Some(previous) = addresses.insert(host.ip(), host.name.as_str()) {
            result.add_error(format!(
                "hosts '{}' and '{}' share address {}",
                previous,
                host.name,
                host.ip()
            ));
        }

        let Some(segment) = topology.segment_of(host) else {
            result.add_error(format!(
                "host '{}' references unknown segment '{}'",
                host.name, host.segment
            ));
            continue;
        };

        let ip = host.ip();
        if !segment.subnet.contains(ip) {
            result.add_error(format!(
                "host '{}': address {} is outside segment '{}' subnet {}",
                host.name, ip, segment.name, segment.subnet
            ));
        } else if ip == segment.gateway {
            result.add_error(format!(
                "host '{}': address {} is the gateway of segment '{}'",
                host.name, ip, segment.name
            ));
        } else if ip == segment.subnet.network() || ip == segment.subnet.broadcast() {
            result.add_error(format!(
                "host '{}': address {} is the network or broadcast address",
                host.name, ip
            ));
        }
        if host.address.prefix() != segment.subnet.prefix() {
            result.add_error(format!(
                "host '{}': prefix /{} differs from segment '{}' prefix /{}",
                host.name,
                host.address.prefix(),
                segment.name,
                segment.subnet.prefix()
            ));
        }
    }
}

fn validate_rules(topology: &Topology, result: &mut ValidationResult) {
    let mut seen = HashSet::new();

    for rule in &topology.rules {
        let label = match &rule.destination {
            Some(destination) => format!("{} -> {}", rule.source, destination),
            None => format!("{} -> any", rule.source),
        };

        if topology.segment(&rule.source).is_none() {
            result.add_error(format!(
                "access rule '{}': unknown source segment '{}'",
                label, rule.source
            ));
        }
        if let Some(destination) = &rule.destination {
            if topology.segment(destination).is_none() {
                result.add_error(format!(
                    "access rule '{}': unknown destination segment '{}'",
                    label, destination
                ));
            }
            if destination == &rule.source {
                result.add_error(format!(
                    "access rule '{}': intra-segment traffic never crosses the router",
                    label
                ));
            }
        }
        if !seen.insert((rule.source.as_str(), rule.destination.as_deref())) {
            result.add_error(format!("duplicate access rule '{}'", label));
        }
    }

    for rule in &topology.rules {
        if rule.destination.is_some()
            && topology
                .rules
                .iter()
                .any(|r| r.source == rule.source && r.destination.is_none())
        {
            result.add_warning(format!(
                "access rule '{} -> {}' is covered by '{} -> any'",
                rule.source,
                rule.destination.as_deref().unwrap_or_default(),
                rule.source
            ));
        }
    }
}

fn validate_scenarios(topology: &Topology, result: &mut ValidationResult) {
    for (index, scenario) in topology.scenarios.iter().enumerate() {
        if topology.host(&scenario.source).is_none() {
            result.add_error(format!(
                "scenario {} ('{}'): unknown source host '{}'",
                index + 1,
                scenario.description,
                scenario.source
            ));
        }
        if topology.segment_containing(scenario.destination).is_none() {
            result.add_warning(format!(
                "scenario {} ('{}'): destination {} is outside every segment",
                index + 1,
                scenario.description,
                scenario.destination
            ));
        }
    }
}

/// Every derived OS identifier must be valid and unique across the topology
fn validate_names(topology: &Topology, result: &mut ValidationResult) {
    let mut interfaces: HashMap<String, String> = HashMap::new();
    let mut claim = |name: String, owner: String, result: &mut ValidationResult| {
        if let Err(e) = check_interface_name(&name) {
            result.add_error(format!("{}: {}", owner, e));
        }
        if let Some(previous) = interfaces.insert(name.clone(), owner.clone()) {
            result.add_error(format!(
                "{} and {} both derive interface name '{}'",
                previous, owner, name
            ));
        }
    };

    for segment in &topology.segments {
        let names = naming::segment_names(segment);
        let owner = format!("segment '{}'", segment.name);
        claim(names.bridge, owner.clone(), result);
        claim(names.router_end, owner.clone(), result);
        claim(names.segment_end, owner, result);
    }
    for host in &topology.hosts {
        let names = naming::host_names(host);
        let owner = format!("host '{}'", host.name);
        claim(names.host_end, owner.clone(), result);
        claim(names.bridge_end, owner, result);
    }

    for context in topology.context_names() {
        if let Err(e) = check_context_name(context) {
            result.add_error(e);
        }
    }
}

fn validate_probe(topology: &Topology, result: &mut ValidationResult) {
    if topology.probe.count == 0 {
        result.add_error("probe.count cannot be zero".to_string());
    }
    if topology.probe.timeout_secs == 0 {
        result.add_error("probe.timeout_secs cannot be zero".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::department_topology;
    use crate::config::topology::AccessRule;

    fn errors_of(topology: &Topology) -> Vec<String> {
        check_topology(topology).errors
    }

    #[test]
    fn test_department_preset_is_valid() {
        let topology = department_topology().unwrap();
        let result = validate_topology(&topology).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_gateway_outside_subnet() {
        let mut topology = department_topology().unwrap();
        topology.segments[0].gateway = "192.168.9.1".parse().unwrap();
        assert!(errors_of(&topology)
            .iter()
            .any(|e| e.contains("gateway 192.168.9.1 is outside subnet")));
    }

    #[test]
    fn test_host_on_gateway_address() {
        let mut topology = department_topology().unwrap();
        topology.hosts[0].address = "192.168.1.1/24".parse().unwrap();
        assert!(errors_of(&topology)
            .iter()
            .any(|e| e.contains("is the gateway of segment 'HR'")));
    }

    #[test]
    fn test_host_outside_segment() {
        let mut topology = department_topology().unwrap();
        topology.hosts[0].address = "192.168.2.50/24".parse().unwrap();
        assert!(errors_of(&topology)
            .iter()
            .any(|e| e.contains("outside segment 'HR'")));
    }

    #[test]
    fn test_unknown_segment_reference() {
        let mut topology = department_topology().unwrap();
        topology.hosts[0].segment = "Legal".to_string();
        assert!(errors_of(&topology)
            .iter()
            .any(|e| e.contains("unknown segment 'Legal'")));
    }

    #[test]
    fn test_duplicate_bridge_rejected() {
        let mut topology = department_topology().unwrap();
        topology.segments[1].bridge = Some("br1".to_string());
        assert!(errors_of(&topology)
            .iter()
            .any(|e| e.contains("derive interface name 'br1'")));
    }

    #[test]
    fn test_overlapping_subnets_rejected() {
        let mut topology = department_topology().unwrap();
        topology.segments[1].subnet = "192.168.0.0/16".parse().unwrap();
        topology.segments[1].gateway = "192.168.2.1".parse().unwrap();
        assert!(errors_of(&topology).iter().any(|e| e.contains("overlap")));
    }

    #[test]
    fn test_host_named_router_rejected() {
        let mut topology = department_topology().unwrap();
        topology.hosts[0].name = "router".to_string();
        assert!(errors_of(&topology)
            .iter()
            .any(|e| e.contains("clashes with the router context")));
    }

    #[test]
    fn test_rule_with_unknown_segment() {
        let mut topology = department_topology().unwrap();
        topology.rules.push(AccessRule {
            source: "Legal".to_string(),
            destination: None,
        });
        assert!(validate_topology(&topology).is_err());
    }

    #[test]
    fn test_redundant_rule_is_a_warning() {
        let mut topology = department_topology().unwrap();
        topology.rules.push(AccessRule {
            source: "IT".to_string(),
            destination: Some("HR".to_string()),
        });
        let result = validate_topology(&topology).unwrap();
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("covered by 'IT -> any'")));
    }

    #[test]
    fn test_scenario_with_unknown_source() {
        let mut topology = department_topology().unwrap();
        topology.scenarios[0].source = "ghost".to_string();
        assert!(errors_of(&topology)
            .iter()
            .any(|e| e.contains("unknown source host 'ghost'")));
    }

    #[test]
    fn test_all_errors_reported_together() {
        let mut topology = department_topology().unwrap();
        topology.segments[0].vlan = 20;
        topology.probe.count = 0;
        match validate_topology(&topology) {
            Err(NetsegError::Validation(errors)) => assert!(errors.len() >= 2),
            other => panic!("unexpected {:?}", other.map(|r| r.errors)),
        }
    }
}
