/// Connectivity test harness
///
/// Probes each scenario from its source host's context and classifies the
/// observation against the expected policy. Read-only: never mutates state.
use crate::config::topology::{ConnectivityScenario, Topology};
use crate::config::types::{NetsegError, Result};
use crate::kernel::naming;
use crate::kernel::ops::Inspect;
use crate::verdict::scenario::{ScenarioReport, ScenarioResult};
use crate::verdict::verdict::{Verdict, VerdictClassifier};
use log::{debug, info, warn};

pub struct ConnectivityHarness<'a, N: ?Sized> {
    topology: &'a Topology,
    network: &'a N,
}

impl<'a, N: Inspect + ?Sized> ConnectivityHarness<'a, N> {
    pub fn new(topology: &'a Topology, network: &'a N) -> Self {
        Self { topology, network }
    }

    /// Run the topology's declared scenarios
    pub fn run(&self) -> Result<ScenarioReport> {
        self.run_scenarios(&self.topology.scenarios)
    }

    /// Run an explicit scenario set. Fails with `NotProvisioned` before
    /// probing anything if a source context is missing.
    pub fn run_scenarios(&self, scenarios: &[ConnectivityScenario]) -> Result<ScenarioReport> {
        self.check_provisioned(scenarios)?;
        info!("Running {} connectivity scenarios", scenarios.len());

        let mut report = ScenarioReport::default();
        for scenario in scenarios {
            let result = self.evaluate(scenario);
            if result.verdict.is_success() {
                info!("{}", result);
            } else {
                warn!("{}", result);
            }
            report.push(result);
        }
        Ok(report)
    }

    fn check_provisioned(&self, scenarios: &[ConnectivityScenario]) -> Result<()> {
        let listed = self.network.context_names().unwrap_or_default();
        let mut missing: Vec<String> = Vec::new();
        for scenario in scenarios {
            let Some(host) = self.topology.host(&scenario.source) else {
                continue;
            };
            let context = naming::host_names(host).context;
            if !listed.contains(&context) && !missing.contains(&context) {
                missing.push(context);
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(NetsegError::NotProvisioned(missing))
        }
    }

    fn evaluate(&self, scenario: &ConnectivityScenario) -> ScenarioResult {
        let Some(host) = self.topology.host(&scenario.source) else {
            return ScenarioResult::new(
                scenario,
                Verdict::Invalid,
                format!("unknown source host '{}'", scenario.source),
            );
        };

        let context = naming::host_names(host).context;
        let probe = self
            .network
            .probe(&context, scenario.destination, &self.topology.probe);
        debug!("probe {} -> {}: {}", context, scenario.destination, probe.detail);

        let verdict = VerdictClassifier::classify(scenario.expected, &probe);
        ScenarioResult::new(scenario, verdict, probe.detail)
    }
}
