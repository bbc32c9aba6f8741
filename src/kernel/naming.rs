/// Resource naming
///
/// Derives every OS identifier (bridges, veth endpoints, namespaces) from the
/// topology. Pure and deterministic: the same entity always maps to the same
/// names, so cleanup and verification rebuild intent from the model alone.
///
/// Prefix scheme:
/// - segment: `br{vlan}` bridge, `vr{vlan}` router end, `vbr{vlan}` bridge end
/// - host:    `v-{host}` host end, `vb-{host}` bridge end
///
/// Segment names only ever hold digits after their prefix while host names
/// carry `-` right after theirs, so the two families never meet.
use crate::config::topology::{Host, Segment};
use sha2::{Digest, Sha256};

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL)
pub const MAX_IFNAME_LEN: usize = libc::IFNAMSIZ - 1;

/// Hex digits appended when an identity has to be shortened
const HASH_SUFFIX_LEN: usize = 6;

const BRIDGE_PREFIX: &str = "br";
const ROUTER_END_PREFIX: &str = "vr";
const SEGMENT_END_PREFIX: &str = "vbr";
const HOST_END_PREFIX: &str = "v-";
const HOST_BRIDGE_END_PREFIX: &str = "vb-";

/// OS names owned by one segment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentNames {
    pub bridge: String,
    /// veth end living in the router context, carries the gateway address
    pub router_end: String,
    /// veth end enslaved to the segment bridge
    pub segment_end: String,
}

/// OS names owned by one host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostNames {
    /// Network namespace of the host
    pub context: String,
    /// veth end inside the host context
    pub host_end: String,
    /// veth end enslaved to the segment bridge
    pub bridge_end: String,
}

pub fn segment_names(segment: &Segment) -> SegmentNames {
    let vlan = segment.vlan.to_string();
    SegmentNames {
        bridge: segment
            .bridge
            .clone()
            .unwrap_or_else(|| interface_name(BRIDGE_PREFIX, &vlan)),
        router_end: interface_name(ROUTER_END_PREFIX, &vlan),
        segment_end: interface_name(SEGMENT_END_PREFIX, &vlan),
    }
}

pub fn host_names(host: &Host) -> HostNames {
    HostNames {
        context: host.name.clone(),
        host_end: interface_name(HOST_END_PREFIX, &host.name),
        bridge_end: interface_name(HOST_BRIDGE_END_PREFIX, &host.name),
    }
}

/// `prefix + identity`, shortened with a digest suffix when it would not fit
pub fn interface_name(prefix: &str, identity: &str) -> String {
    if prefix.len() + identity.len() <= MAX_IFNAME_LEN {
        return format!("{}{}", prefix, identity);
    }

    let budget = MAX_IFNAME_LEN.saturating_sub(prefix.len() + HASH_SUFFIX_LEN);
    let mut stem = String::with_capacity(budget);
    for ch in identity.chars() {
        if stem.len() + ch.len_utf8() > budget {
            break;
        }
        stem.push(ch);
    }

    let digest = Sha256::digest(identity.as_bytes());
    let suffix: String = digest
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
        .chars()
        .take(HASH_SUFFIX_LEN)
        .collect();

    format!("{}{}{}", prefix, stem, suffix)
}

/// Check a name against the kernel's interface naming rules
pub fn check_interface_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("interface name is empty".to_string());
    }
    if name.len() > MAX_IFNAME_LEN {
        return Err(format!(
            "interface name '{}' exceeds {} bytes",
            name, MAX_IFNAME_LEN
        ));
    }
    if name == "." || name == ".." {
        return Err(format!("interface name '{}' is reserved", name));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(format!(
            "interface name '{}' contains '/', ':' or whitespace",
            name
        ));
    }
    Ok(())
}

/// Check a namespace name; it becomes a file under /run/netns
pub fn check_context_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("namespace name is empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("namespace name '{}' is reserved", name));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(format!(
            "namespace name '{}' may only contain ASCII letters, digits, '_', '-' and '.'",
            name
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn segment(vlan: u16, bridge: Option<&str>) -> Segment {
        Segment {
            name: format!("S{}", vlan),
            vlan,
            subnet: "10.0.0.0/24".parse().unwrap(),
            gateway: "10.0.0.1".parse().unwrap(),
            bridge: bridge.map(str::to_string),
        }
    }

    fn host(name: &str) -> Host {
        Host {
            name: name.to_string(),
            segment: "S10".to_string(),
            address: "10.0.0.10/24".parse().unwrap(),
        }
    }

    #[test]
    fn test_segment_names_follow_vlan() {
        let names = segment_names(&segment(20, None));
        assert_eq!(names.bridge, "br20");
        assert_eq!(names.router_end, "vr20");
        assert_eq!(names.segment_end, "vbr20");
    }

    #[test]
    fn test_explicit_bridge_wins() {
        assert_eq!(segment_names(&segment(10, Some("br1"))).bridge, "br1");
    }

    #[test]
    fn test_host_names() {
        let names = host_names(&host("hr1"));
        assert_eq!(names.context, "hr1");
        assert_eq!(names.host_end, "v-hr1");
        assert_eq!(names.bridge_end, "vb-hr1");
    }

    #[test]
    fn test_derivation_is_stable() {
        let h = host("finance-workstation-42");
        assert_eq!(host_names(&h), host_names(&h));
        let s = segment(4094, None);
        assert_eq!(segment_names(&s), segment_names(&s));
    }

    #[test]
    fn test_host_named_like_segment_end_does_not_collide() {
        // "vb" + "r10" would equal "vbr10" without the separator.
        let host = host_names(&host("r10"));
        let seg = segment_names(&segment(10, None));
        assert_ne!(host.bridge_end, seg.segment_end);
        assert_ne!(host.host_end, seg.router_end);
    }

    #[test]
    fn test_long_identity_is_shortened_with_digest() {
        let name = interface_name(HOST_BRIDGE_END_PREFIX, "accounting-workstation-01");
        assert_eq!(name.len(), MAX_IFNAME_LEN);
        assert!(name.starts_with("vb-accoun"));
        assert!(check_interface_name(&name).is_ok());
    }

    #[test]
    fn test_shortened_names_with_shared_stem_differ() {
        let a = interface_name(HOST_END_PREFIX, "workstation-finance-01");
        let b = interface_name(HOST_END_PREFIX, "workstation-finance-02");
        assert_ne!(a, b);
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_names_are_pairwise_distinct_across_entities() {
        let hosts = ["hr1", "hr2", "it1", "it2", "fin1", "fin2", "r10", "r20"];
        let mut seen = HashSet::new();
        for vlan in [10u16, 20, 30] {
            let n = segment_names(&segment(vlan, None));
            for name in [n.bridge, n.router_end, n.segment_end] {
                assert!(seen.insert(name.clone()), "duplicate {}", name);
            }
        }
        for h in hosts {
            let n = host_names(&host(h));
            for name in [n.host_end, n.bridge_end] {
                assert!(seen.insert(name.clone()), "duplicate {}", name);
            }
        }
    }

    #[test]
    fn test_check_interface_name_rejects_bad_names() {
        assert!(check_interface_name("").is_err());
        assert!(check_interface_name("a/b").is_err());
        assert!(check_interface_name("has space").is_err());
        assert!(check_interface_name("..").is_err());
        assert!(check_interface_name("sixteen-chars-xx").is_err());
        assert!(check_interface_name("br1").is_ok());
    }

    #[test]
    fn test_check_context_name() {
        assert!(check_context_name("hr1").is_ok());
        assert!(check_context_name("router").is_ok());
        assert!(check_context_name("../etc").is_err());
        assert!(check_context_name("").is_err());
    }
}
