/// Host adapter over iproute2, sysctl, iptables and ping
///
/// Each trait method maps to exactly one command. Anything scoped to an
/// isolation context is wrapped in `ip netns exec <context>`.
use crate::config::topology::ProbeSettings;
use crate::config::types::Result;
use crate::exec::executor::{CommandExecutor, CommandOutput, HostCommand};
use crate::kernel::ops::{
    ChainPolicy, FilterRule, FilterTable, Inspect, NetworkOps, ProbeResult, Removal, Scope,
    Teardown,
};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use std::time::Duration;

/// stderr fragments that mean "the thing is already gone"
const ABSENT_MARKERS: &[&str] = &[
    "Cannot find device",
    "No such file or directory",
    "does not exist",
    "Cannot open network namespace",
];

/// Seconds `ping` waits for each reply
const PING_REPLY_WAIT_SECS: u64 = 1;

/// Time past the ping deadline before the executor kills it
const KILL_GRACE: Duration = Duration::from_secs(1);

/// `NetworkBackend` implementation that drives the real host
pub struct IpRouteBackend {
    executor: CommandExecutor,
}

impl IpRouteBackend {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    fn ip<I, S>(args: I) -> HostCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        HostCommand::new("ip").args(args)
    }

    fn strict(&self, command: HostCommand) -> Result<()> {
        self.executor.run_strict(&command).map(|_| ())
    }

    fn removal(&self, command: HostCommand) -> Removal {
        classify_removal(&self.executor.run_best_effort(&command))
    }

    fn read(&self, command: HostCommand) -> Option<String> {
        let output = self.executor.query(&command);
        output.succeeded.then_some(output.stdout)
    }
}

/// Run `program args` in `scope`
pub fn scoped(scope: Scope<'_>, program: &str, args: &[&str]) -> HostCommand {
    match scope {
        Scope::Root => HostCommand::new(program).args(args.iter().copied()),
        Scope::Context(context) => HostCommand::new("ip")
            .args(["netns", "exec", context, program])
            .args(args.iter().copied()),
    }
}

/// iptables match/target arguments for a forwarding rule
pub fn rule_arguments(rule: &FilterRule) -> Vec<String> {
    match rule {
        FilterRule::AcceptEstablished => [
            "-m",
            "conntrack",
            "--ctstate",
            "ESTABLISHED,RELATED",
            "-j",
            "ACCEPT",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        FilterRule::Accept {
            source,
            destination,
        } => {
            let mut args = vec!["-s".to_string(), source.to_string()];
            if let Some(destination) = destination {
                args.push("-d".to_string());
                args.push(destination.to_string());
            }
            args.push("-j".to_string());
            args.push("ACCEPT".to_string());
            args
        }
    }
}

pub fn classify_removal(output: &CommandOutput) -> Removal {
    if output.succeeded {
        return Removal::Removed;
    }
    let stderr = output.stderr.trim();
    if ABSENT_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        Removal::Absent
    } else {
        Removal::Failed(stderr.to_string())
    }
}

/// `ping` from inside `context`. ping stops itself at the probe deadline
/// (`-w`); the executor bound only catches a ping that hangs past it.
pub fn probe_command(context: &str, destination: Ipv4Addr, settings: &ProbeSettings) -> HostCommand {
    let deadline = settings.timeout().max(Duration::from_secs(1));
    let count = settings.count.to_string();
    let wait = PING_REPLY_WAIT_SECS.to_string();
    let deadline_secs = deadline.as_secs().to_string();
    let destination = destination.to_string();
    scoped(
        Scope::Context(context),
        "ping",
        &["-c", &count, "-W", &wait, "-w", &deadline_secs, &destination],
    )
    .with_timeout(deadline + KILL_GRACE)
}

/// Names from `ip netns list` ("hr1 (id: 3)" -> "hr1")
pub fn parse_context_names(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Names from `ip link show` ("5: br1: <BROADCAST,...>" -> "br1")
pub fn parse_link_names(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter(|line| line.chars().next().map_or(false, |c| c.is_ascii_digit()))
        .filter_map(|line| line.split(':').nth(1))
        .map(|name| name.trim())
        // veth ends print as "vb-hr1@if12"
        .map(|name| name.split('@').next().unwrap_or(name).to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

impl NetworkOps for IpRouteBackend {
    fn create_context(&self, name: &str) -> Result<()> {
        self.strict(Self::ip(["netns", "add", name]))
    }

    fn create_bridge(&self, name: &str) -> Result<()> {
        self.strict(Self::ip(["link", "add", "name", name, "type", "bridge"]))
    }

    fn create_link_pair(&self, first: &str, peer: &str) -> Result<()> {
        self.strict(Self::ip([
            "link", "add", first, "type", "veth", "peer", "name", peer,
        ]))
    }

    fn move_to_context(&self, link: &str, context: &str) -> Result<()> {
        self.strict(Self::ip(["link", "set", link, "netns", context]))
    }

    fn attach_to_bridge(&self, link: &str, bridge: &str) -> Result<()> {
        self.strict(Self::ip(["link", "set", link, "master", bridge]))
    }

    fn add_address(&self, scope: Scope<'_>, link: &str, address: Ipv4Network) -> Result<()> {
        let address = address.to_string();
        self.strict(scoped(scope, "ip", &["addr", "add", &address, "dev", link]))
    }

    fn set_link_up(&self, scope: Scope<'_>, link: &str) -> Result<()> {
        self.strict(scoped(scope, "ip", &["link", "set", link, "up"]))
    }

    fn add_default_route(&self, context: &str, gateway: Ipv4Addr) -> Result<()> {
        let gateway = gateway.to_string();
        self.strict(scoped(
            Scope::Context(context),
            "ip",
            &["route", "add", "default", "via", &gateway],
        ))
    }

    fn enable_forwarding(&self, scope: Scope<'_>) -> Result<()> {
        self.strict(scoped(scope, "sysctl", &["-w", "net.ipv4.ip_forward=1"]))
    }

    fn flush_rules(&self, context: &str, table: FilterTable) -> Result<()> {
        self.strict(scoped(
            Scope::Context(context),
            "iptables",
            &["-t", table.as_str(), "-F"],
        ))
    }

    fn set_forward_policy(&self, context: &str, policy: ChainPolicy) -> Result<()> {
        self.strict(scoped(
            Scope::Context(context),
            "iptables",
            &["-P", "FORWARD", policy.as_str()],
        ))
    }

    fn append_forward_rule(&self, context: &str, rule: &FilterRule) -> Result<()> {
        let args = rule_arguments(rule);
        let mut full: Vec<&str> = vec!["-A", "FORWARD"];
        full.extend(args.iter().map(String::as_str));
        self.strict(scoped(Scope::Context(context), "iptables", &full))
    }
}

impl Teardown for IpRouteBackend {
    fn delete_context(&self, name: &str) -> Removal {
        self.removal(Self::ip(["netns", "del", name]))
    }

    fn delete_link(&self, name: &str) -> Removal {
        self.removal(Self::ip(["link", "del", name]))
    }

    fn delete_user_chains(&self, context: &str) -> Removal {
        self.removal(scoped(Scope::Context(context), "iptables", &["-X"]))
    }
}

impl Inspect for IpRouteBackend {
    fn context_names(&self) -> Option<Vec<String>> {
        self.read(Self::ip(["netns", "list"]))
            .map(|listing| parse_context_names(&listing))
    }

    fn bridge_names(&self) -> Option<Vec<String>> {
        self.read(Self::ip(["link", "show", "type", "bridge"]))
            .map(|listing| parse_link_names(&listing))
    }

    fn show_addresses(&self, context: &str) -> Option<String> {
        self.read(scoped(Scope::Context(context), "ip", &["addr", "show"]))
    }

    fn show_forward_rules(&self, context: &str) -> Option<String> {
        self.read(scoped(
            Scope::Context(context),
            "iptables",
            &["-L", "FORWARD", "-v", "-n"],
        ))
    }

    fn show_routes(&self, context: &str) -> Option<String> {
        self.read(scoped(Scope::Context(context), "ip", &["route"]))
    }

    fn probe(&self, context: &str, destination: Ipv4Addr, settings: &ProbeSettings) -> ProbeResult {
        let command = probe_command(context, destination, settings);
        let output = self.executor.query(&command);
        let detail = if output.stdout.trim().is_empty() {
            output.stderr.trim().to_string()
        } else {
            output.stdout.trim().to_string()
        };
        ProbeResult {
            reachable: output.succeeded,
            timed_out: output.timed_out,
            detail,
        }
    }
}
