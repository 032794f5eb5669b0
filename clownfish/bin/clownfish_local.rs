//! `clownfish_local`: the Local Lookup Utility (spec.md §4.6). An offline
//! resolver over the same `Topology` the daemon builds, plus thin
//! start/stop wrappers around the systemd units a service's instances
//! would run under — useful on a host that cannot reach a running
//! `clownfishd` (e.g. during first boot). Mirrors `pylcommon.cmd_general`'s
//! `-c`/`-d` option shape, the way `clownfish/src/main.rs` does for the
//! daemon.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, LevelFilter};

use clownfish::logging;
use clownfish_api::config::ConfigFile;
use clownfish_api::error::ClownfishError;

#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Path to the Clownfish configuration file.
    #[arg(short = 'c', long, default_value = "/etc/clownfish/clownfish.yaml")]
    config: PathBuf,

    /// Parent directory under which a timestamped workspace is created.
    #[arg(short = 'd', long, default_value = "/var/log/clownfish_local")]
    logdir: PathBuf,

    /// Logging verbosity [error, warn, info, debug, trace].
    #[arg(short = 'v', long, default_value = "info")]
    verbosity: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve `(service-name, hostname)` to `(device, mount-point)`.
    Locate {
        service_name: String,
        /// Defaults to the local hostname.
        hostname: Option<String>,
    },
    /// Start the systemd unit backing every instance of the given services.
    Start { service_names: Vec<String> },
    /// Stop the systemd unit backing every instance of the given services.
    Stop { service_names: Vec<String> },
}

fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|n| n.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn run(args: &Args) -> Result<String, ClownfishError> {
    let config_file = ConfigFile::load(&args.config).map_err(ClownfishError::new)?;
    let topology = config_file.build().map_err(ClownfishError::new)?;

    match &args.command {
        Command::Locate { service_name, hostname } => {
            let hostname = hostname.clone().unwrap_or_else(local_hostname);
            let (device, mount_point) = topology.locate(service_name, &hostname).map_err(ClownfishError::new)?;
            Ok(format!("{device} {}\n", mount_point.display()))
        }
        Command::Start { service_names } => Ok(unit_command(&topology, service_names, "start")),
        Command::Stop { service_names } => Ok(unit_command(&topology, service_names, "stop")),
    }
}

/// Prints the `systemctl <verb> <unit>` invocation an operator would run
/// locally for every instance of the named services on this host (spec.md
/// §4.6 "offline resolver"); actually invoking `systemctl` is the
/// out-of-scope remote-shell executor's job everywhere else in this crate,
/// but this utility runs with no daemon and no `RemoteExec` to hand work
/// to, so it only plans the command for the operator to run or pipe into
/// a shell.
fn unit_command(topology: &clownfish_api::topology::Topology, service_names: &[String], verb: &str) -> String {
    let hostname = local_hostname();
    let mut out = String::new();
    for service_name in service_names {
        let Some(service) = topology.service(service_name) else {
            out.push_str(&format!("{service_name}: no such service\n"));
            continue;
        };
        let mine = service
            .instances
            .iter()
            .any(|inst| topology.hosts[inst.host].hostname == hostname);
        if !mine {
            out.push_str(&format!("{service_name}: no instance on this host\n"));
            continue;
        }
        out.push_str(&format!("systemctl {verb} clownfish-{service_name}.service\n"));
    }
    out
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(match args.verbosity {
        LevelFilter::Off => log::Level::Error,
        LevelFilter::Error => log::Level::Error,
        LevelFilter::Warn => log::Level::Warn,
        LevelFilter::Info => log::Level::Info,
        LevelFilter::Debug => log::Level::Debug,
        LevelFilter::Trace => log::Level::Trace,
    });

    match run(&args) {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("clownfish_local failed: {e:?}");
            ExitCode::FAILURE
        }
    }
}

