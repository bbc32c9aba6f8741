//! Testing infrastructure
//!
//! In-memory network backend for exercising setup, tests and cleanup
//! without root or a real kernel.

pub mod fake;

pub use fake::{FakeLink, FakeNetwork, LinkKind};
