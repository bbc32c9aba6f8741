//! Provisioning
//!
//! Setup orchestration, router policy and post-setup verification.

pub mod policy;
pub mod provisioner;
pub mod verifier;

pub use policy::{PolicyEngine, PolicyPlan};
pub use provisioner::{EntityFailure, EntityKind, ProvisionReport, Provisioner};
pub use verifier::{VerificationReport, Verifier};
