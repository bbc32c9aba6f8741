/// Built-in topologies
///
/// The department preset is the reference segmentation lab: HR, IT and
/// Finance behind one router, IT allowed everywhere, HR and Finance allowed
/// to each other, HR allowed into IT, everything else dropped.
use crate::config::topology::Topology;
use crate::config::types::Result;

const DEPARTMENTS_JSON: &str = include_str!("departments.json");

/// Identifier accepted wherever a preset name is expected
pub const DEPARTMENTS: &str = "departments";

/// Three-department lab topology with the reference probe scenarios
pub fn department_topology() -> Result<Topology> {
    Topology::from_json_str(DEPARTMENTS_JSON)
}

/// Look up a preset by name
pub fn by_name(name: &str) -> Option<Result<Topology>> {
    match name {
        DEPARTMENTS => Some(department_topology()),
        _ => None,
    }
}
