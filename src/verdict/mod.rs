//! Connectivity verdicts
//!
//! Probes the provisioned topology and classifies each observation against
//! the intended policy.

pub mod harness;
pub mod scenario;
pub mod verdict;

pub use harness::ConnectivityHarness;
pub use scenario::{policy_matrix, ScenarioReport, ScenarioResult};
pub use verdict::{Verdict, VerdictClassifier};
