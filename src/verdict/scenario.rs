/// Scenario results and derived scenario sets
use crate::config::topology::{ConnectivityScenario, Expectation, Topology};
use crate::config::types::Result;
use crate::provision::policy::PolicyPlan;
use crate::verdict::verdict::Verdict;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

/// One evaluated scenario
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScenarioResult {
    pub source: String,
    pub destination: Ipv4Addr,
    pub destination_label: String,
    pub description: String,
    pub expected: Expectation,
    pub verdict: Verdict,
    /// Probe output or the reason the scenario was invalid
    pub detail: String,
}

impl ScenarioResult {
    pub fn new(scenario: &ConnectivityScenario, verdict: Verdict, detail: String) -> Self {
        Self {
            source: scenario.source.clone(),
            destination: scenario.destination,
            destination_label: scenario.destination_label.clone(),
            description: scenario.description.clone(),
            expected: scenario.expected,
            verdict,
            detail,
        }
    }
}

impl fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({}): {} [{}]",
            self.source, self.destination_label, self.destination, self.verdict, self.description
        )?;
        if self.verdict == Verdict::Invalid {
            write!(f, " - {}", self.detail)?;
        }
        Ok(())
    }
}

/// Summary of a harness run
#[derive(Clone, Debug, Default, Serialize)]
pub struct ScenarioReport {
    pub results: Vec<ScenarioResult>,
    pub passed: usize,
    pub failed: usize,
    pub invalid: usize,
}

impl ScenarioReport {
    pub fn push(&mut self, result: ScenarioResult) {
        match result.verdict {
            Verdict::Invalid => self.invalid += 1,
            v if v.is_success() => self.passed += 1,
            _ => self.failed += 1,
        }
        self.results.push(result);
    }

    /// Every scenario ran and matched the policy
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.invalid == 0
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "{}", result)?;
        }
        writeln!(
            f,
            "Passed: {} | Failed: {} | Invalid: {}",
            self.passed, self.failed, self.invalid
        )
    }
}

/// Full segment-level matrix: the first host of every segment probes the
/// first host of every other segment, plus one intra-segment probe for each
/// segment with at least two hosts. Expectations come from the policy plan.
pub fn policy_matrix(topology: &Topology) -> Result<Vec<ConnectivityScenario>> {
    let plan = PolicyPlan::from_topology(topology)?;
    let mut scenarios = Vec::new();

    for source_segment in &topology.segments {
        let Some(source) = topology.hosts_in(&source_segment.name).next() else {
            continue;
        };
        for destination_segment in &topology.segments {
            let mut targets = topology.hosts_in(&destination_segment.name);
            let target = if destination_segment.name == source_segment.name {
                targets.nth(1)
            } else {
                targets.next()
            };
            let Some(target) = target else {
                continue;
            };

            let allowed = plan.permits(&source_segment.name, &destination_segment.name);
            scenarios.push(ConnectivityScenario {
                source: source.name.clone(),
                destination: target.ip(),
                destination_label: target.name.clone(),
                expected: Expectation::from_allowed(allowed),
                description: format!(
                    "{} -> {} {}",
                    source_segment.name,
                    destination_segment.name,
                    if allowed { "allowed" } else { "denied" }
                ),
            });
        }
    }

    Ok(scenarios)
}
