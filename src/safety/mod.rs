//! Safety and cleanup
//!
//! Returns the host to its pre-setup state through idempotent teardown.

pub mod cleanup;

pub use cleanup::{Cleanup, CleanupReport};
