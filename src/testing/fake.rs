/// In-memory network backend
///
/// Models namespaces, veth pairs, bridges, addresses, default routes,
/// forwarding switches and the FORWARD chain closely enough to answer
/// reachability probes the way the kernel would for this topology shape.
/// Every mutating or teardown call is journaled; calls can be made to fail
/// by journal prefix to exercise partial-failure paths without root.
use crate::config::topology::ProbeSettings;
use crate::config::types::{NetsegError, Result};
use crate::kernel::ops::{
    ChainPolicy, FilterRule, FilterTable, Inspect, NetworkOps, ProbeResult, Removal, Scope,
    Teardown,
};
use ipnetwork::Ipv4Network;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

const ROOT: &str = "root";
const LOOPBACK: &str = "lo";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Veth,
    Bridge,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeLink {
    pub kind: LinkKind,
    pub peer: Option<String>,
    /// None = root namespace
    pub context: Option<String>,
    pub master: Option<String>,
    pub up: bool,
    pub addresses: Vec<Ipv4Network>,
}

impl FakeLink {
    fn new(kind: LinkKind, peer: Option<String>) -> Self {
        Self {
            kind,
            peer,
            context: None,
            master: None,
            up: false,
            addresses: Vec::new(),
        }
    }

    fn scope(&self) -> &str {
        self.context.as_deref().unwrap_or(ROOT)
    }
}

#[derive(Clone, Debug)]
struct Firewall {
    policy: ChainPolicy,
    rules: Vec<FilterRule>,
}

impl Default for Firewall {
    fn default() -> Self {
        Self {
            policy: ChainPolicy::Accept,
            rules: Vec::new(),
        }
    }
}

impl Firewall {
    fn admits_new(&self, source: Ipv4Addr, destination: Ipv4Addr) -> bool {
        self.rules.iter().any(|r| r.admits_new(source, destination))
            || self.policy == ChainPolicy::Accept
    }

    fn admits_reply(&self, source: Ipv4Addr, destination: Ipv4Addr) -> bool {
        self.rules.contains(&FilterRule::AcceptEstablished) || self.admits_new(source, destination)
    }
}

#[derive(Default)]
struct FakeState {
    contexts: Vec<String>,
    links: BTreeMap<String, FakeLink>,
    routes: BTreeMap<String, Ipv4Addr>,
    forwarding: BTreeSet<String>,
    firewalls: BTreeMap<String, Firewall>,
    journal: Vec<String>,
    probes: Vec<String>,
    failures: Vec<String>,
}

type Step = std::result::Result<(), String>;

impl FakeState {
    fn has_context(&self, name: &str) -> bool {
        self.contexts.iter().any(|c| c == name)
    }

    fn require_context(&self, name: &str) -> Step {
        if name == ROOT || self.has_context(name) {
            Ok(())
        } else {
            Err(format!("Cannot open network namespace \"{}\": No such file or directory", name))
        }
    }

    fn link_in(&mut self, scope: &str, name: &str) -> std::result::Result<&mut FakeLink, String> {
        match self.links.get_mut(name) {
            Some(link) if link.scope() == scope => Ok(link),
            _ => Err(format!("Cannot find device \"{}\"", name)),
        }
    }

    fn remove_link(&mut self, name: &str) {
        if let Some(link) = self.links.remove(name) {
            if let Some(peer) = link.peer {
                self.links.remove(&peer);
            }
            if link.kind == LinkKind::Bridge {
                for member in self.links.values_mut() {
                    if member.master.as_deref() == Some(name) {
                        member.master = None;
                    }
                }
            }
        }
    }

    /// Bridge a veth end reaches through its peer, if the whole path is up
    fn bridge_of(&self, name: &str) -> std::result::Result<String, String> {
        let link = self
            .links
            .get(name)
            .ok_or_else(|| format!("{} vanished", name))?;
        let peer_name = link
            .peer
            .as_deref()
            .ok_or_else(|| format!("{} has no peer", name))?;
        let peer = self
            .links
            .get(peer_name)
            .ok_or_else(|| format!("peer {} missing", peer_name))?;
        if !peer.up {
            return Err(format!("{} is down", peer_name));
        }
        let bridge_name = peer
            .master
            .as_deref()
            .ok_or_else(|| format!("{} is not attached to a bridge", peer_name))?;
        match self.links.get(bridge_name) {
            Some(bridge) if bridge.up => Ok(bridge_name.to_string()),
            _ => Err(format!("bridge {} is down", bridge_name)),
        }
    }

    /// (context, link name) owning `address`
    fn owner_of(&self, address: Ipv4Addr) -> std::result::Result<(String, String), String> {
        self.links
            .iter()
            .find(|(_, link)| link.up && link.addresses.iter().any(|a| a.ip() == address))
            .and_then(|(name, link)| link.context.clone().map(|ctx| (ctx, name.clone())))
            .ok_or_else(|| format!("Destination Host Unreachable ({})", address))
    }

    fn reach(&self, source: &str, destination: Ipv4Addr) -> Step {
        if !self.has_context(source) {
            return Err(format!("Cannot open network namespace \"{}\"", source));
        }

        let (source_link, source_address) = self
            .links
            .iter()
            .find(|(_, l)| l.context.as_deref() == Some(source) && l.up && !l.addresses.is_empty())
            .map(|(name, l)| (name.clone(), l.addresses[0]))
            .ok_or_else(|| "Network is unreachable".to_string())?;
        let source_bridge = self.bridge_of(&source_link)?;

        if source_address.contains(destination) {
            let (_, dest_link) = self.owner_of(destination)?;
            if self.bridge_of(&dest_link)? != source_bridge {
                return Err("no layer-2 path".to_string());
            }
            return Ok(());
        }

        let gateway = self
            .routes
            .get(source)
            .ok_or_else(|| "Network is unreachable".to_string())?;
        let (router, gateway_link) = self.owner_of(*gateway)?;
        if self.bridge_of(&gateway_link)? != source_bridge {
            return Err(format!("gateway {} not on segment", gateway));
        }
        if !self.forwarding.contains(ROOT) || !self.forwarding.contains(&router) {
            return Err("forwarding disabled".to_string());
        }

        let (egress_link, egress_address) = self
            .links
            .iter()
            .filter(|(_, l)| l.context.as_deref() == Some(router.as_str()) && l.up)
            .find_map(|(name, l)| {
                l.addresses
                    .iter()
                    .find(|a| a.contains(destination))
                    .map(|a| (name.clone(), a.ip()))
            })
            .ok_or_else(|| "No route to host".to_string())?;
        let (dest_context, dest_link) = self.owner_of(destination)?;
        if self.bridge_of(&egress_link)? != self.bridge_of(&dest_link)? {
            return Err("no layer-2 path behind router".to_string());
        }
        if self.routes.get(&dest_context) != Some(&egress_address) {
            return Err("no return route".to_string());
        }

        let firewall = self.firewalls.get(&router).cloned().unwrap_or_default();
        let source_ip = source_address.ip();
        if !firewall.admits_new(source_ip, destination) {
            return Err("dropped by FORWARD chain".to_string());
        }
        if !firewall.admits_reply(destination, source_ip) {
            return Err("reply dropped by FORWARD chain".to_string());
        }
        Ok(())
    }
}

/// Recording, failure-injectable stand-in for the host network
#[derive(Default)]
pub struct FakeNetwork {
    state: RefCell<FakeState>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation whose journal entry starts with `prefix`
    pub fn fail_on(&self, prefix: &str) {
        self.state.borrow_mut().failures.push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.borrow_mut().failures.clear();
    }

    /// Mutations and removals in call order, e.g. "create_bridge br1"
    pub fn journal(&self) -> Vec<String> {
        self.state.borrow().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state.borrow_mut().journal.clear();
    }

    /// Probes issued, as "context -> address"
    pub fn probes(&self) -> Vec<String> {
        self.state.borrow().probes.clone()
    }

    pub fn has_context(&self, name: &str) -> bool {
        self.state.borrow().has_context(name)
    }

    pub fn link(&self, name: &str) -> Option<FakeLink> {
        self.state.borrow().links.get(name).cloned()
    }

    pub fn default_route(&self, context: &str) -> Option<Ipv4Addr> {
        self.state.borrow().routes.get(context).copied()
    }

    pub fn forwarding_enabled(&self, scope: Scope<'_>) -> bool {
        self.state.borrow().forwarding.contains(&scope.to_string())
    }

    pub fn forward_policy(&self, context: &str) -> Option<ChainPolicy> {
        self.state.borrow().firewalls.get(context).map(|f| f.policy)
    }

    pub fn forward_rules(&self, context: &str) -> Vec<FilterRule> {
        self.state
            .borrow()
            .firewalls
            .get(context)
            .map(|f| f.rules.clone())
            .unwrap_or_default()
    }

    /// No contexts and no links left
    pub fn is_pristine(&self) -> bool {
        let state = self.state.borrow();
        state.contexts.is_empty() && state.links.is_empty()
    }

    fn apply(&self, entry: String, op: impl FnOnce(&mut FakeState) -> Step) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.journal.push(entry.clone());
        let injected = state.failures.iter().any(|f| entry.starts_with(f.as_str()));
        let outcome = if injected {
            Err("injected failure".to_string())
        } else {
            op(&mut *state)
        };
        outcome.map_err(|stderr| NetsegError::CommandFailed {
            command: entry,
            exit_code: Some(2),
            stderr,
        })
    }

    fn remove(&self, entry: String, op: impl FnOnce(&mut FakeState) -> bool) -> Removal {
        let mut state = self.state.borrow_mut();
        state.journal.push(entry.clone());
        if state.failures.iter().any(|f| entry.starts_with(f.as_str())) {
            return Removal::Failed("injected failure".to_string());
        }
        if op(&mut *state) {
            Removal::Removed
        } else {
            Removal::Absent
        }
    }
}

impl NetworkOps for FakeNetwork {
    fn create_context(&self, name: &str) -> Result<()> {
        self.apply(format!("create_context {}", name), |s| {
            if s.has_context(name) {
                return Err(format!("Cannot create namespace file \"/run/netns/{}\": File exists", name));
            }
            s.contexts.push(name.to_string());
            Ok(())
        })
    }

    fn create_bridge(&self, name: &str) -> Result<()> {
        self.apply(format!("create_bridge {}", name), |s| {
            if s.links.contains_key(name) {
                return Err("RTNETLINK answers: File exists".to_string());
            }
            s.links.insert(name.to_string(), FakeLink::new(LinkKind::Bridge, None));
            Ok(())
        })
    }

    fn create_link_pair(&self, first: &str, peer: &str) -> Result<()> {
        self.apply(format!("create_link_pair {} {}", first, peer), |s| {
            if s.links.contains_key(first) || s.links.contains_key(peer) {
                return Err("RTNETLINK answers: File exists".to_string());
            }
            s.links.insert(
                first.to_string(),
                FakeLink::new(LinkKind::Veth, Some(peer.to_string())),
            );
            s.links.insert(
                peer.to_string(),
                FakeLink::new(LinkKind::Veth, Some(first.to_string())),
            );
            Ok(())
        })
    }

    fn move_to_context(&self, link: &str, context: &str) -> Result<()> {
        self.apply(format!("move_to_context {} {}", link, context), |s| {
            s.require_context(context)?;
            let link = s.link_in(ROOT, link)?;
            link.context = Some(context.to_string());
            link.up = false;
            Ok(())
        })
    }

    fn attach_to_bridge(&self, link: &str, bridge: &str) -> Result<()> {
        self.apply(format!("attach_to_bridge {} {}", link, bridge), |s| {
            match s.links.get(bridge) {
                Some(b) if b.kind == LinkKind::Bridge => {}
                _ => return Err(format!("Cannot find device \"{}\"", bridge)),
            }
            s.link_in(ROOT, link)?.master = Some(bridge.to_string());
            Ok(())
        })
    }

    fn add_address(&self, scope: Scope<'_>, link: &str, address: Ipv4Network) -> Result<()> {
        let scope = scope.to_string();
        self.apply(format!("add_address {} {} {}", scope, link, address), |s| {
            s.require_context(&scope)?;
            let link = s.link_in(&scope, link)?;
            if link.addresses.contains(&address) {
                return Err("RTNETLINK answers: File exists".to_string());
            }
            link.addresses.push(address);
            Ok(())
        })
    }

    fn set_link_up(&self, scope: Scope<'_>, link: &str) -> Result<()> {
        let scope = scope.to_string();
        self.apply(format!("set_link_up {} {}", scope, link), |s| {
            s.require_context(&scope)?;
            if link == LOOPBACK {
                return Ok(());
            }
            s.link_in(&scope, link)?.up = true;
            Ok(())
        })
    }

    fn add_default_route(&self, context: &str, gateway: Ipv4Addr) -> Result<()> {
        self.apply(format!("add_default_route {} {}", context, gateway), |s| {
            s.require_context(context)?;
            let on_link = s.links.values().any(|l| {
                l.context.as_deref() == Some(context) && l.addresses.iter().any(|a| a.contains(gateway))
            });
            if !on_link {
                return Err("Error: Nexthop has invalid gateway.".to_string());
            }
            if s.routes.contains_key(context) {
                return Err("RTNETLINK answers: File exists".to_string());
            }
            s.routes.insert(context.to_string(), gateway);
            Ok(())
        })
    }

    fn enable_forwarding(&self, scope: Scope<'_>) -> Result<()> {
        let scope = scope.to_string();
        self.apply(format!("enable_forwarding {}", scope), |s| {
            s.require_context(&scope)?;
            s.forwarding.insert(scope.clone());
            Ok(())
        })
    }

    fn flush_rules(&self, context: &str, table: FilterTable) -> Result<()> {
        self.apply(format!("flush_rules {} {}", context, table.as_str()), |s| {
            s.require_context(context)?;
            if table == FilterTable::Filter {
                s.firewalls.entry(context.to_string()).or_default().rules.clear();
            }
            Ok(())
        })
    }

    fn set_forward_policy(&self, context: &str, policy: ChainPolicy) -> Result<()> {
        self.apply(
            format!("set_forward_policy {} {}", context, policy.as_str()),
            |s| {
                s.require_context(context)?;
                s.firewalls.entry(context.to_string()).or_default().policy = policy;
                Ok(())
            },
        )
    }

    fn append_forward_rule(&self, context: &str, rule: &FilterRule) -> Result<()> {
        self.apply(format!("append_forward_rule {} {}", context, rule), |s| {
            s.require_context(context)?;
            s.firewalls
                .entry(context.to_string())
                .or_default()
                .rules
                .push(rule.clone());
            Ok(())
        })
    }
}

impl Teardown for FakeNetwork {
    fn delete_context(&self, name: &str) -> Removal {
        self.remove(format!("delete_context {}", name), |s| {
            if !s.has_context(name) {
                return false;
            }
            s.contexts.retain(|c| c != name);
            let inside: Vec<String> = s
                .links
                .iter()
                .filter(|(_, l)| l.context.as_deref() == Some(name))
                .map(|(n, _)| n.clone())
                .collect();
            for link in inside {
                s.remove_link(&link);
            }
            s.routes.remove(name);
            s.forwarding.remove(name);
            s.firewalls.remove(name);
            true
        })
    }

    fn delete_link(&self, name: &str) -> Removal {
        self.remove(format!("delete_link {}", name), |s| {
            if s.link_in(ROOT, name).is_err() {
                return false;
            }
            s.remove_link(name);
            true
        })
    }

    fn delete_user_chains(&self, context: &str) -> Removal {
        self.remove(format!("delete_user_chains {}", context), |s| s.has_context(context))
    }
}

impl Inspect for FakeNetwork {
    fn context_names(&self) -> Option<Vec<String>> {
        Some(self.state.borrow().contexts.clone())
    }

    fn bridge_names(&self) -> Option<Vec<String>> {
        Some(
            self.state
                .borrow()
                .links
                .iter()
                .filter(|(_, l)| l.kind == LinkKind::Bridge)
                .map(|(n, _)| n.clone())
                .collect(),
        )
    }

    fn show_addresses(&self, context: &str) -> Option<String> {
        let state = self.state.borrow();
        if !state.has_context(context) {
            return None;
        }
        let mut lines = vec!["lo: 127.0.0.1/8".to_string()];
        for (name, link) in &state.links {
            if link.context.as_deref() == Some(context) {
                for address in &link.addresses {
                    lines.push(format!("{}: {}", name, address));
                }
            }
        }
        Some(lines.join("\n"))
    }

    fn show_forward_rules(&self, context: &str) -> Option<String> {
        let state = self.state.borrow();
        if !state.has_context(context) {
            return None;
        }
        let firewall = state.firewalls.get(context).cloned().unwrap_or_default();
        let mut lines = vec![format!(
            "Chain FORWARD (policy {})",
            firewall.policy.as_str()
        )];
        lines.extend(firewall.rules.iter().map(|r| r.to_string()));
        Some(lines.join("\n"))
    }

    fn show_routes(&self, context: &str) -> Option<String> {
        let state = self.state.borrow();
        if !state.has_context(context) {
            return None;
        }
        let mut lines = Vec::new();
        if let Some(gateway) = state.routes.get(context) {
            lines.push(format!("default via {}", gateway));
        }
        for (name, link) in &state.links {
            if link.context.as_deref() == Some(context) {
                for address in &link.addresses {
                    lines.push(format!("{} dev {}", address.network(), name));
                }
            }
        }
        Some(lines.join("\n"))
    }

    fn probe(&self, context: &str, destination: Ipv4Addr, settings: &ProbeSettings) -> ProbeResult {
        let outcome = {
            let mut state = self.state.borrow_mut();
            state.probes.push(format!("{} -> {}", context, destination));
            state.reach(context, destination)
        };
        match outcome {
            Ok(()) => ProbeResult::reachable(format!(
                "{count} packets transmitted, {count} received, 0% packet loss",
                count = settings.count
            )),
            Err(reason) => ProbeResult::unreachable(reason),
        }
    }
}
