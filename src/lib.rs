//! netseg: department network segmentation on a single Linux host
//!
//! Builds an isolated multi-segment network out of network namespaces, veth
//! pairs and bridges, routes between segments through one router namespace
//! whose FORWARD chain enforces an allow-list, probes the result against the
//! intended policy, and tears it all down again.
//!
//! # Architecture
//!
//! ## Configuration ([`config`])
//! - [`config::topology`]: Immutable topology model (segments, hosts, rules, scenarios)
//! - [`config::presets`]: Built-in department topology
//! - [`config::validator`]: Structural and addressing invariants
//! - [`config::types`]: Error and result types
//!
//! ## Command Execution ([`exec`])
//! - [`exec::executor`]: Strict, best-effort and query execution of host commands
//!
//! ## Network Primitives ([`kernel`])
//! - [`kernel::naming`]: Deterministic interface and context names
//! - [`kernel::ops`]: `NetworkOps` / `Teardown` / `Inspect` seam
//! - [`kernel::iproute`]: `ip`, `iptables`, `sysctl` and `ping` adapter
//!
//! ## Provisioning ([`provision`])
//! - [`provision::provisioner`]: Ordered setup with per-entity failure containment
//! - [`provision::policy`]: Router FORWARD chain from the allow-list
//! - [`provision::verifier`]: Post-setup state dump
//!
//! ## Verdicts ([`verdict`])
//! - [`verdict::harness`]: Connectivity probes per scenario
//! - [`verdict::verdict`]: Expected-vs-observed classification
//! - [`verdict::scenario`]: Reports and the derived policy matrix
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::cleanup`]: Idempotent reverse-order teardown
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::fake`]: In-memory network backend

// Configuration
pub mod config;

// Command Execution
pub mod exec;

// Network Primitives
pub mod kernel;

// Provisioning
pub mod provision;

// Evidence & Verdict
pub mod verdict;

// Safety & Cleanup
pub mod safety;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the netseg binary
pub mod cli;

pub use config::types::{NetsegError, Result};
