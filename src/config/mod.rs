//! Configuration
//!
//! Topology model, built-in presets, validation and shared error types.

pub mod presets;
pub mod topology;
pub mod types;
pub mod validator;

use crate::config::topology::Topology;
use crate::config::types::{NetsegError, Result};
use std::path::Path;

/// Where the topology of this invocation comes from
#[derive(Clone, Debug)]
pub enum TopologySource<'a> {
    File(&'a Path),
    Preset(&'a str),
}

/// Load and validate the topology once at startup.
/// Validation warnings are logged; any error aborts before touching the host.
pub fn load_topology(source: TopologySource<'_>) -> Result<Topology> {
    let topology = match source {
        TopologySource::File(path) => {
            log::info!("Loading topology from {}", path.display());
            Topology::load(path)?
        }
        TopologySource::Preset(name) => {
            log::info!("Using built-in topology preset '{}'", name);
            presets::by_name(name).ok_or_else(|| {
                NetsegError::Config(format!("unknown topology preset '{}'", name))
            })??
        }
    };

    let validation = validator::validate_topology(&topology)?;
    for warning in validation.warnings {
        log::warn!("Topology warning: {}", warning);
    }

    Ok(topology)
}
