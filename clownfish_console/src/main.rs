//! `clownfish_console`: the interactive/one-shot CLI front-end to the
//! Session Protocol Server (spec.md §6 "CLI surface"). Mirrors the
//! teacher's `crates/trident_cli` split of a thin `main.rs` over a
//! `client.rs` gRPC wrapper, generalized from Trident's server-streaming
//! servicing calls to this protocol's unary partway/input/done polling.

mod client;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Context, Editor};

use client::SessionClient;
use clownfish_api::constants::{DEFAULT_SERVER_PORT, PING_INTERVAL};

/// `clownfish_console [host[:port]] [command...]` (spec.md §6). With no
/// trailing command words the console starts an interactive session;
/// otherwise it runs exactly that one command and exits with its status.
#[derive(Parser, Debug)]
#[command(version, about = "Console for the clownfish session protocol server")]
struct Args {
    /// Server to connect to. Defaults to `localhost` on the default port;
    /// a bare hostname without `:port` also gets the default port appended.
    target: Option<String>,

    /// One-shot command line, given as separate words the way a shell
    /// would split them. If empty, starts the interactive prompt instead.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Logging verbosity [error, warn, info, debug, trace].
    #[arg(short = 'v', long, default_value = "info")]
    verbosity: LevelFilter,
}

fn resolve_target(target: Option<String>) -> String {
    let target = target.unwrap_or_else(|| "localhost".to_string());
    if target.contains(':') {
        target
    } else {
        format!("{target}:{DEFAULT_SERVER_PORT}")
    }
}

/// Pings the server every `PING_INTERVAL` for as long as the connection
/// holds (spec.md §4.3), the Rust analogue of `cc_ping_thread`. Runs on its
/// own tokio task rather than `cc_ping_thread`'s dedicated OS thread.
async fn run_ping_loop(mut client: SessionClient) {
    loop {
        tokio::time::sleep(PING_INTERVAL).await;
        if let Err(e) = client.ping().await {
            info!("ping loop stopping: {e}");
            return;
        }
    }
}

async fn run(args: Args) -> Result<i32> {
    let target = resolve_target(args.target.clone());
    info!("connecting to clownfish session server at [{target}]");
    let client = SessionClient::connect(&target).await?;

    tokio::spawn(run_ping_loop(client.clone()));

    let abort = Arc::new(AtomicBool::new(false));

    if !args.command.is_empty() {
        let line = args.command.join(" ");
        let mut client = client;
        let outcome = client.run_command(&line, &abort).await?;
        return Ok(outcome.status);
    }

    println!(
        "Starting clownfish console to server [{target}], client uuid [{}]",
        client.client_uuid()
    );
    let handle = tokio::runtime::Handle::current();
    tokio::task::block_in_place(|| interactive_loop(client, abort, handle))
}

/// Holds a completer client for rustyline's tab-completion hook (spec.md
/// §4.2 "complete"); the Rust analogue of `cc_completer`/`_cc_get_candidates`.
struct ConsoleHelper {
    handle: tokio::runtime::Handle,
    client: std::sync::Mutex<SessionClient>,
}

impl rustyline::completion::Completer for ConsoleHelper {
    type Candidate = String;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> rustyline::Result<(usize, Vec<String>)> {
        let handle = self.handle.clone();
        let candidates = tokio::task::block_in_place(|| {
            handle.block_on(async {
                let line = &line[..pos];
                let mut client = self.client.lock().unwrap();
                client.complete(line).await
            })
        });
        let start = line[..pos].rfind(' ').map(|i| i + 1).unwrap_or(0);
        Ok((start, candidates))
    }
}

impl rustyline::hint::Hinter for ConsoleHelper {
    type Hint = String;
}

impl rustyline::highlight::Highlighter for ConsoleHelper {}
impl rustyline::validate::Validator for ConsoleHelper {}
impl rustyline::Helper for ConsoleHelper {}

/// The command loop (spec.md §6): read a line, run it to completion against
/// the server, repeat until the server tells us to quit or the operator
/// hits EOF. The Rust analogue of `cc_loop`/`cc_command`.
fn interactive_loop(client: SessionClient, abort: Arc<AtomicBool>, handle: tokio::runtime::Handle) -> Result<i32> {
    let helper = ConsoleHelper {
        handle: handle.clone(),
        client: std::sync::Mutex::new(client.clone()),
    };
    let mut editor = Editor::<ConsoleHelper, DefaultHistory>::new()?;
    editor.set_helper(Some(helper));

    let mut client = client;
    loop {
        match editor.readline("$ (h for help): ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                abort.store(false, Ordering::SeqCst);
                let outcome = handle.block_on(client.run_command(line, &abort))?;
                if outcome.quit {
                    return Ok(outcome.status);
                }
            }
            Err(ReadlineError::Interrupted) => {
                abort.store(true, Ordering::SeqCst);
                println!();
                println!("Type q to exit");
            }
            Err(ReadlineError::Eof) => return Ok(0),
            Err(e) => return Err(anyhow!("readline error: {e}")),
        }
    }
}

fn exit_code(status: i32) -> u8 {
    u8::try_from(status).unwrap_or(1)
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::builder().format_timestamp(None).filter_level(args.verbosity).init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(status) => ExitCode::from(exit_code(status)),
        Err(e) => {
            error!("clownfish_console failed: {e:?}");
            ExitCode::FAILURE
        }
    }
}
