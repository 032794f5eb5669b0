//! Thin async client over the Session Protocol Server's unary RPCs (spec.md
//! §4.3, §6). The Rust analogue of `clownfish_console.py`'s
//! `ClownfishClient`/`ClownfishConsoleMessage`: one connection per process,
//! a server-assigned client uuid stamped into every envelope after
//! `connect`, and a command loop that keeps re-querying partway state until
//! the server reports `done`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use tonic::transport::Channel;

use clownfish::server::proto::command_reply::Shape;
use clownfish::server::proto::session_service_client::SessionServiceClient;
use clownfish::server::proto::{
    CommandInputReply, CommandPartwayQuery, CommandRequest, ConnectRequest, Envelope,
    InteractRequest, LogRecord, PingRequest,
};

const PROTOCOL_VERSION: u32 = 0;

fn envelope(client_uuid: u64) -> Envelope {
    Envelope {
        protocol_version: PROTOCOL_VERSION,
        client_uuid,
        message_type: String::new(),
        error_code: 0,
    }
}

/// The result of running one command line to completion.
pub struct CommandOutcome {
    pub status: i32,
    pub quit: bool,
}

/// Connection to a single `clownfishd` Session Protocol Server. Cheap to
/// clone: the underlying `tonic` channel is reference-counted, so the ping
/// loop and the completer can each hold their own handle.
#[derive(Clone)]
pub struct SessionClient {
    inner: SessionServiceClient<Channel>,
    client_uuid: u64,
}

impl SessionClient {
    /// Connects to `target` (`host:port`) and completes the connect
    /// handshake, picking up the server-assigned uuid (spec.md §4.3
    /// "Session lifecycle").
    pub async fn connect(target: &str) -> Result<Self> {
        let endpoint = format!("http://{target}");
        let mut inner = SessionServiceClient::connect(endpoint)
            .await
            .map_err(|e| anyhow!("failed to connect to {target}: {e}"))?;

        let reply = inner
            .connect(ConnectRequest {
                envelope: Some(envelope(0)),
            })
            .await
            .map_err(|e| anyhow!("connect handshake with {target} failed: {e}"))?
            .into_inner();

        debug!("connected to {target}, client uuid [{}]", reply.client_uuid);
        Ok(SessionClient {
            inner,
            client_uuid: reply.client_uuid,
        })
    }

    pub fn client_uuid(&self) -> u64 {
        self.client_uuid
    }

    /// One keepalive ping (spec.md §4.3: "console-side keepalive pings run
    /// on an independent socket at a shorter interval").
    pub async fn ping(&mut self) -> Result<()> {
        self.inner
            .ping(PingRequest {
                envelope: Some(envelope(self.client_uuid)),
            })
            .await
            .map_err(|e| anyhow!("ping failed: {e}"))?;
        Ok(())
    }

    /// Tab-completion candidates for a partially typed line (spec.md §4.2
    /// "complete").
    pub async fn complete(&mut self, line: &str) -> Vec<String> {
        match self
            .inner
            .interact(InteractRequest {
                envelope: Some(envelope(self.client_uuid)),
                partial_line: line.to_string(),
            })
            .await
        {
            Ok(reply) => reply.into_inner().candidates,
            Err(e) => {
                warn!("failed to query completions: {e}");
                Vec::new()
            }
        }
    }

    /// Runs one command line to completion, printing log output as it
    /// streams in and answering input prompts from stdin (spec.md §4.3
    /// "Command execution"). `abort` is sampled on every partway query, so
    /// setting it from another thread cancels the in-flight command.
    pub async fn run_command(&mut self, line: &str, abort: &Arc<AtomicBool>) -> Result<CommandOutcome> {
        let mut reply = self
            .inner
            .command(CommandRequest {
                envelope: Some(envelope(self.client_uuid)),
                command_line: line.to_string(),
            })
            .await
            .map_err(|e| anyhow!("command request failed: {e}"))?
            .into_inner();

        loop {
            match reply.shape {
                Some(Shape::Partway(partway)) => {
                    for record in &partway.records {
                        emit_record(record);
                    }
                    reply = self
                        .inner
                        .command_partway_query(CommandPartwayQuery {
                            envelope: Some(envelope(self.client_uuid)),
                            abort: abort.load(Ordering::SeqCst),
                        })
                        .await
                        .map_err(|e| anyhow!("partway query failed: {e}"))?
                        .into_inner();
                }
                Some(Shape::Input(input)) => {
                    let answer = prompt_for_input(&input.prompt)?;
                    reply = self
                        .inner
                        .command_input(CommandInputReply {
                            envelope: Some(envelope(self.client_uuid)),
                            answer,
                        })
                        .await
                        .map_err(|e| anyhow!("input reply failed: {e}"))?
                        .into_inner();
                }
                Some(Shape::Done(done)) => {
                    return Ok(CommandOutcome {
                        status: done.status,
                        quit: done.quit,
                    });
                }
                None => {
                    error!("server returned an empty command reply");
                    return Ok(CommandOutcome { status: -1, quit: false });
                }
            }
        }
    }
}

/// Renders one log record the way a console is expected to (spec.md §4.3
/// "Log record format"): `is_stdout`/`is_stderr` go straight to the
/// matching stream, everything else is routed through `log` like any
/// other internal message.
fn emit_record(record: &LogRecord) {
    if record.is_stdout {
        println!("{}", record.message);
    } else if record.is_stderr {
        eprintln!("{}", record.message);
    } else {
        info!(target: "clownfishd", "{}", record.message);
    }
}

fn prompt_for_input(prompt: &str) -> Result<String> {
    use std::io::Write;
    print!("{prompt}");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches('\n').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_the_protocol_version_and_uuid() {
        let e = envelope(42);
        assert_eq!(e.protocol_version, PROTOCOL_VERSION);
        assert_eq!(e.client_uuid, 42);
        assert_eq!(e.error_code, 0);
    }

    #[tokio::test]
    async fn connect_to_an_unroutable_address_fails_without_panicking() {
        let result = SessionClient::connect("127.0.0.1:1").await;
        assert!(result.is_err());
    }
}
