//! `clownfishd`: the long-lived management daemon (spec.md §2 "Control
//! flow"). Thin over the `clownfish` library, the way the teacher's
//! `src/main.rs` stays thin over `trident::start_provisioning_network`/
//! `trident::serve` and lets `crates/trident_cli` own argument parsing.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, LevelFilter};

use clownfish::logging;
use clownfish::remote_exec::RemoteExec;
use clownfish::server::proto::session_service_server::SessionServiceServer;
use clownfish::server::ClownfishServer;
use clownfish::workspace;
use clownfish::Instance;
use clownfish_api::config::ConfigFile;
use clownfish_api::constants::{DEFAULT_SERVER_PORT, REPAIR_WORKER_COUNT};

/// Daemon CLI surface (spec.md §6): config path, log parent, listen port,
/// and logging verbosity.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Path to the Clownfish configuration file.
    #[arg(short = 'c', long, default_value = "/etc/clownfish/clownfish.yaml")]
    config: PathBuf,

    /// Parent directory under which a timestamped workspace is created.
    #[arg(short = 'd', long, default_value = "/var/log/clownfish")]
    logdir: PathBuf,

    /// Port the Session Protocol Server listens on.
    #[arg(short = 'p', long, default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Logging verbosity [error, warn, info, debug, trace].
    #[arg(short = 'v', long, default_value = "info")]
    verbosity: LevelFilter,
}

fn run(args: Args) -> Result<(), clownfish_api::error::ClownfishError> {
    use clownfish_api::error::{InternalError, ReportError};

    let workspace = workspace::new_workspace(&args.logdir).structured(InternalError::Invariant(
        "failed to create workspace directory".to_string(),
    ))?;
    let _lock = workspace::ConfigLock::acquire(&args.config)?;
    workspace::save_config_copy(&workspace, &args.config)?;

    info!(
        "starting clownfishd using config [{}], logging to [{}]",
        args.config.display(),
        workspace.display()
    );

    let config_file = ConfigFile::load(&args.config).map_err(clownfish_api::error::ClownfishError::new)?;
    let topology = config_file.build().map_err(clownfish_api::error::ClownfishError::new)?;

    let remote: Arc<dyn RemoteExec> = Arc::new(ssh_remote_exec::SshRemoteExec);
    let instance = Instance::new(topology, remote, workspace, REPAIR_WORKER_COUNT);
    instance.set_config_path(args.config.clone());

    let engine_handles = instance.spawn_engine_threads();

    let tonic_runtime = tokio::runtime::Runtime::new()
        .structured(InternalError::Invariant("failed to start tokio runtime".to_string()))?;

    let server = ClownfishServer::new(instance.clone());
    let addr = format!("0.0.0.0:{}", args.port)
        .parse()
        .structured(InternalError::Invariant("invalid listen address".to_string()))?;

    tonic_runtime.block_on(async move {
        tokio::spawn(server.clone().run_reaper());
        info!("session protocol server listening on {addr}");
        if let Err(e) = tonic::transport::Server::builder()
            .add_service(SessionServiceServer::new(server))
            .serve(addr)
            .await
        {
            error!("session protocol server exited: {e}");
        }
    });

    instance.shutdown();
    for handle in engine_handles {
        let _ = handle.join();
    }
    Ok(())
}

/// Out-of-scope collaborator wired in at the binary boundary (spec.md §1
/// "the actual remote-shell executor"): a thin SSH-backed `RemoteExec`.
/// Kept in its own module since the library core only ever depends on the
/// `RemoteExec` trait.
mod ssh_remote_exec {
    use anyhow::{Context, Result};
    use duct::cmd;

    use clownfish::remote_exec::{RemoteExec, RemoteOutput};

    pub struct SshRemoteExec;

    impl RemoteExec for SshRemoteExec {
        fn run(&self, ctx: &str, hostname: &str, argv: &[&str]) -> Result<RemoteOutput> {
            let output = cmd("ssh", [hostname, &argv.join(" ")])
                .stdout_capture()
                .stderr_capture()
                .unchecked()
                .run()
                .with_context(|| format!("{ctx}: failed to run ssh to '{hostname}'"))?;
            Ok(RemoteOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                status: output.status.code().unwrap_or(-1),
            })
        }
    }
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

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("clownfishd failed: {e:?}");
            ExitCode::FAILURE
        }
    }
}
