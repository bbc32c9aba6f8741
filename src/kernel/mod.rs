//! Thin wrappers around Linux networking primitives.
//!
//! Dependency direction: naming -> ops -> iproute

pub mod iproute;
pub mod naming;
pub mod ops;
