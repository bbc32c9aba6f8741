/// Inter-segment access policy
///
/// Turns the topology's allow-list into the router's FORWARD chain:
/// default DROP, established/related accepted first, then one accept per
/// allow rule in declaration order.
use crate::config::topology::Topology;
use crate::config::types::{NetsegError, Result};
use crate::kernel::ops::{ChainPolicy, FilterRule, FilterTable, NetworkOps, Removal, Teardown};
use log::{info, warn};
use std::fmt;

/// Resolved policy: segment-level allow pairs and the concrete rule chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyPlan {
    allowed: Vec<(String, Option<String>)>,
    rules: Vec<FilterRule>,
}

impl PolicyPlan {
    /// Resolve every access rule's segments to subnets
    pub fn from_topology(topology: &Topology) -> Result<Self> {
        let mut allowed = Vec::with_capacity(topology.rules.len());
        let mut rules = Vec::with_capacity(topology.rules.len() + 1);
        rules.push(FilterRule::AcceptEstablished);

        for rule in &topology.rules {
            let source = topology.segment(&rule.source).ok_or_else(|| {
                NetsegError::Config(format!(
                    "access rule references unknown source segment '{}'",
                    rule.source
                ))
            })?;
            let destination = match &rule.destination {
                Some(name) => Some(topology.segment(name).ok_or_else(|| {
                    NetsegError::Config(format!(
                        "access rule references unknown destination segment '{}'",
                        name
                    ))
                })?),
                None => None,
            };

            rules.push(FilterRule::Accept {
                source: source.subnet,
                destination: destination.map(|d| d.subnet),
            });
            allowed.push((source.name.clone(), destination.map(|d| d.name.clone())));
        }

        Ok(Self { allowed, rules })
    }

    /// FORWARD chain contents, established/related first
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Whether new traffic from `source` segment to `destination` segment is admitted.
    /// Intra-segment traffic is bridged and never reaches the router.
    pub fn permits(&self, source: &str, destination: &str) -> bool {
        source == destination
            || self.allowed.iter().any(|(src, dst)| {
                src == source && dst.as_deref().map_or(true, |d| d == destination)
            })
    }
}

impl fmt::Display for PolicyPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FORWARD policy {}", ChainPolicy::Drop.as_str())?;
        for (index, rule) in self.rules.iter().enumerate() {
            writeln!(f, "  {:>2}. {}", index + 1, rule)?;
        }
        Ok(())
    }
}

/// Applies a `PolicyPlan` inside the router context
pub struct PolicyEngine<'a, N: ?Sized> {
    topology: &'a Topology,
    network: &'a N,
}

impl<'a, N> PolicyEngine<'a, N>
where
    N: NetworkOps + Teardown + ?Sized,
{
    pub fn new(topology: &'a Topology, network: &'a N) -> Self {
        Self { topology, network }
    }

    /// Replace the router's filter state with the planned chain.
    /// Returns the number of rules appended.
    pub fn apply(&self) -> Result<usize> {
        let plan = PolicyPlan::from_topology(self.topology)?;
        let router = self.topology.router.as_str();
        info!("Applying firewall rules in '{}'", router);

        self.network.flush_rules(router, FilterTable::Filter)?;
        self.network.flush_rules(router, FilterTable::Nat)?;
        if let Removal::Failed(reason) = self.network.delete_user_chains(router) {
            warn!("Could not delete user chains in '{}': {}", router, reason);
        }
        self.network.set_forward_policy(router, ChainPolicy::Drop)?;

        for rule in plan.rules() {
            info!("  FORWARD {}", rule);
            self.network.append_forward_rule(router, rule)?;
        }

        Ok(plan.rules().len())
    }
}
