/// Scenario verdict classification
///
/// Verdicts are a pure function of (expected outcome, observed probe).
use crate::config::topology::Expectation;
use crate::kernel::ops::ProbeResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one connectivity scenario
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "SUCCESS-allowed")]
    SuccessAllowed,
    #[serde(rename = "SUCCESS-blocked")]
    SuccessBlocked,
    #[serde(rename = "FAILED-unexpectedly-blocked")]
    UnexpectedlyBlocked,
    #[serde(rename = "FAILED-unexpectedly-allowed")]
    UnexpectedlyAllowed,
    /// Scenario could not be run (e.g. unknown source host)
    #[serde(rename = "INVALID")]
    Invalid,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::SuccessAllowed => "SUCCESS-allowed",
            Verdict::SuccessBlocked => "SUCCESS-blocked",
            Verdict::UnexpectedlyBlocked => "FAILED-unexpectedly-blocked",
            Verdict::UnexpectedlyAllowed => "FAILED-unexpectedly-allowed",
            Verdict::Invalid => "INVALID",
        }
    }

    /// Observed behavior matched the policy
    pub fn is_success(self) -> bool {
        matches!(self, Verdict::SuccessAllowed | Verdict::SuccessBlocked)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict classifier - pure function over expectation and probe evidence
pub struct VerdictClassifier;

impl VerdictClassifier {
    /// A timed-out probe counts as unreachable
    pub fn classify(expected: Expectation, probe: &ProbeResult) -> Verdict {
        let reached = probe.reachable && !probe.timed_out;
        match (expected, reached) {
            (Expectation::Allow, true) => Verdict::SuccessAllowed,
            (Expectation::Allow, false) => Verdict::UnexpectedlyBlocked,
            (Expectation::Deny, false) => Verdict::SuccessBlocked,
            (Expectation::Deny, true) => Verdict::UnexpectedlyAllowed,
        }
    }
}
