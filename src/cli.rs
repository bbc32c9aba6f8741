use crate::config::presets::DEPARTMENTS;
use crate::config::topology::{ConnectivityScenario, Topology};
use crate::config::types::NetsegError;
use crate::config::{load_topology, TopologySource};
use crate::exec::CommandExecutor;
use crate::kernel::iproute::IpRouteBackend;
use crate::kernel::naming;
use crate::provision::{PolicyPlan, Provisioner};
use crate::safety::Cleanup;
use crate::verdict::{policy_matrix, ConnectivityHarness};
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::warn;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Segmented department network on Linux namespaces", long_about = None)]
struct Cli {
    /// Topology file (JSON); overrides --preset
    #[arg(long, global = true, value_name = "FILE")]
    topology: Option<PathBuf>,
    /// Built-in topology to use when no file is given
    #[arg(long, global = true, default_value = DEPARTMENTS)]
    preset: String,
    /// Log commands instead of executing them
    #[arg(long, global = true)]
    dry_run: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create segments, router, hosts and firewall policy
    Setup,
    /// Probe connectivity and compare against the policy
    Test {
        /// Probe the full segment matrix instead of the declared scenarios
        #[arg(long)]
        matrix: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove everything setup may have created
    Cleanup,
    /// Print the resolved topology, interface names and firewall chain
    Plan,
}

/// Outcome of one phase, mapped to the process exit code
enum PhaseStatus {
    Ok,
    Degraded,
}

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let source = match &cli.topology {
        Some(path) => TopologySource::File(path),
        None => TopologySource::Preset(&cli.preset),
    };
    let topology = match load_topology(source) {
        Ok(topology) => topology,
        Err(e) => exit_with(e),
    };

    if !cli.dry_run && !matches!(cli.command, Commands::Plan) && !nix::unistd::geteuid().is_root() {
        warn!("netseg is not running as root; namespace, link and iptables operations will likely fail");
    }

    let executor = if cli.dry_run {
        CommandExecutor::dry_run()
    } else {
        CommandExecutor::system()
    };
    let network = IpRouteBackend::new(executor);

    let status = match cli.command {
        Commands::Setup => setup(&topology, &network),
        Commands::Test { matrix, json } => test(&topology, &network, matrix, json, cli.dry_run),
        Commands::Cleanup => cleanup(&topology, &network),
        Commands::Plan => plan(&topology),
    };

    match status {
        Ok(PhaseStatus::Ok) => Ok(()),
        Ok(PhaseStatus::Degraded) => std::process::exit(1),
        Err(e) => exit_with(e),
    }
}

fn exit_with(error: NetsegError) -> ! {
    eprintln!("Error: {}", error);
    std::process::exit(error.exit_code());
}

fn setup(topology: &Topology, network: &IpRouteBackend) -> crate::config::types::Result<PhaseStatus> {
    let report = Provisioner::new(topology, network).setup()?;
    if let Some(verification) = &report.verification {
        println!("{}", verification);
    }
    print!("{}", report);
    if report.is_complete() {
        println!("Network setup complete");
        Ok(PhaseStatus::Ok)
    } else {
        println!("Network setup incomplete: {} entities failed", report.failures.len());
        Ok(PhaseStatus::Degraded)
    }
}

fn test(
    topology: &Topology,
    network: &IpRouteBackend,
    matrix: bool,
    json: bool,
    dry_run: bool,
) -> crate::config::types::Result<PhaseStatus> {
    let scenarios = if matrix {
        policy_matrix(topology)?
    } else {
        topology.scenarios.clone()
    };

    // nothing is listed in dry-run mode, so the provisioning check cannot pass
    if dry_run {
        print_scenarios(&scenarios);
        return Ok(PhaseStatus::Ok);
    }

    let report = ConnectivityHarness::new(topology, network).run_scenarios(&scenarios)?;
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report);
    }
    Ok(if report.all_passed() {
        PhaseStatus::Ok
    } else {
        PhaseStatus::Degraded
    })
}

fn print_scenarios(scenarios: &[ConnectivityScenario]) {
    for scenario in scenarios {
        println!(
            "{} -> {} ({}): expect {:?} [{}]",
            scenario.source,
            scenario.destination_label,
            scenario.destination,
            scenario.expected,
            scenario.description
        );
    }
}

fn cleanup(topology: &Topology, network: &IpRouteBackend) -> crate::config::types::Result<PhaseStatus> {
    let report = Cleanup::new(topology, network).run();
    print!("{}", report);
    Ok(if report.is_clean() {
        PhaseStatus::Ok
    } else {
        PhaseStatus::Degraded
    })
}

fn plan(topology: &Topology) -> crate::config::types::Result<PhaseStatus> {
    println!("Router context: {}", topology.router);
    for segment in &topology.segments {
        let names = naming::segment_names(segment);
        println!(
            "Segment {} (VLAN {}, {}, gateway {}): bridge {}, uplink {} <-> {}",
            segment.name,
            segment.vlan,
            segment.subnet,
            segment.gateway,
            names.bridge,
            names.router_end,
            names.segment_end
        );
        for host in topology.hosts_in(&segment.name) {
            let names = naming::host_names(host);
            println!(
                "  Host {} ({}): context {}, link {} <-> {}",
                host.name, host.address, names.context, names.host_end, names.bridge_end
            );
        }
    }
    print!("{}", PolicyPlan::from_topology(topology)?);
    Ok(PhaseStatus::Ok)
}
