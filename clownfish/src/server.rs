//! Session Protocol Server (spec.md §4.3, §6): a tonic/tokio service that
//! accepts console connections, runs one command pipeline per session at a
//! time on a dedicated OS thread, and lets the console poll for partway
//! log output, respond to input prompts, or request an abort. Built on
//! the same transport stack `trident/src/grpc.rs` uses (`tokio` + `tonic`);
//! the session bookkeeping itself (per-connection workspace, condvar-gated
//! command thread, ask-for-input slot, idle reaper) is ported from
//! `clownfish_server.py`'s `ClownfishConnection`/`ClownfishServer`, with the
//! worker-pool/ZeroMQ plumbing replaced by tonic's own request dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info};
use tonic::{Request, Response, Status};

use clownfish_api::constants::{PING_INTERVAL, SESSION_TIMEOUT};

use crate::dispatch::{Registry, SessionIo};
use crate::logging::{self, LogRecord, LogSink};
use crate::Instance;

pub mod proto {
    tonic::include_proto!("clownfish");
}

use proto::command_reply::Shape;
use proto::session_service_server::SessionService;
use proto::{
    CommandInputReply, CommandPartwayQuery, CommandReply, CommandRequest, ConnectReply,
    ConnectRequest, Envelope, FinishedReply, InputReply, InteractReply, InteractRequest,
    PartwayReply, PingReply, PingRequest,
};

const PROTOCOL_VERSION: u32 = 0;

/// One pending input request: the prompt text, and the slot the answering
/// `CommandInput` RPC fills in (spec.md §4.3 "Input reply").
#[derive(Default)]
struct PendingInput {
    prompt: Option<String>,
    answer: Option<String>,
}

/// Per-connection state (spec.md §4.3 "Session"), the Rust analogue of
/// `ClownfishConnection`. `condition` plays the role of `cc_condition`:
/// the command thread notifies it whenever it appends a log record,
/// starts waiting for input, or finishes.
struct Session {
    uuid: u64,
    #[allow(dead_code)]
    workspace: std::path::PathBuf,
    atime: Mutex<Instant>,
    records: Mutex<Vec<LogRecord>>,
    condition: Condvar,
    lock: Mutex<()>,
    running: AtomicBool,
    abort: AtomicBool,
    quit: AtomicBool,
    last_retval: AtomicI32,
    pending_input: Mutex<PendingInput>,
}

impl Session {
    fn new(uuid: u64, workspace: std::path::PathBuf) -> Arc<Self> {
        Arc::new(Session {
            uuid,
            workspace,
            atime: Mutex::new(Instant::now()),
            records: Mutex::new(Vec::new()),
            condition: Condvar::new(),
            lock: Mutex::new(()),
            running: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            last_retval: AtomicI32::new(0),
            pending_input: Mutex::new(PendingInput::default()),
        })
    }

    fn touch(&self) {
        *self.atime.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.atime.lock().unwrap().elapsed()
    }

    fn notify(&self) {
        let _guard = self.lock.lock().unwrap();
        self.condition.notify_all();
    }
}

impl LogSink for Session {
    fn push(&self, record: LogRecord) {
        self.records.lock().unwrap().push(record);
        self.notify();
    }
}

/// Implements `SessionIo` over a `Session` so dispatch commands can prompt
/// and poll the abort flag without knowing about the transport (spec.md
/// §4.2 "Per-session callbacks").
struct SessionHandle(Arc<Session>);

impl SessionIo for SessionHandle {
    fn should_abort(&self) -> bool {
        self.0.abort.load(Ordering::SeqCst)
    }

    fn last_retval(&self) -> i32 {
        self.0.last_retval.load(Ordering::SeqCst)
    }

    fn prompt(&self, prompt: &str) -> String {
        {
            let mut pending = self.0.pending_input.lock().unwrap();
            pending.prompt = Some(prompt.to_string());
            pending.answer = None;
        }
        self.0.notify();

        let guard = self.0.lock.lock().unwrap();
        let (guard, _) = self
            .0
            .condition
            .wait_timeout_while(guard, Duration::from_secs(3600), |_| {
                self.0.pending_input.lock().unwrap().answer.is_none() && !self.0.abort.load(Ordering::SeqCst)
            })
            .unwrap();
        drop(guard);

        let mut pending = self.0.pending_input.lock().unwrap();
        pending.prompt = None;
        pending.answer.take().unwrap_or_default()
    }
}

/// Owns the session table and the registry every command is dispatched
/// through (spec.md §4.3 "Session table", the Rust analogue of
/// `ClownfishServer.cs_connections`).
pub struct ClownfishServer {
    instance: Arc<Instance>,
    registry: Arc<Registry>,
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    next_uuid: AtomicU64,
}

impl ClownfishServer {
    pub fn new(instance: Arc<Instance>) -> Arc<Self> {
        Arc::new(ClownfishServer {
            instance,
            registry: Arc::new(Registry::new()),
            sessions: Mutex::new(HashMap::new()),
            next_uuid: AtomicU64::new(1),
        })
    }

    fn envelope(&self, client_uuid: u64) -> Envelope {
        Envelope {
            protocol_version: PROTOCOL_VERSION,
            client_uuid,
            message_type: String::new(),
            error_code: 0,
        }
    }

    fn find(&self, uuid: u64) -> Result<Arc<Session>, Status> {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(&uuid) {
            Some(session) => {
                session.touch();
                Ok(session.clone())
            }
            None => Err(Status::not_found(format!("session '{uuid}' is unknown or has expired"))),
        }
    }

    /// Evicts every session idle for longer than `SESSION_TIMEOUT` (spec.md
    /// §4.3 "Session reaper"), the Rust analogue of
    /// `cs_connection_cleanup_thread`.
    pub async fn run_reaper(self: Arc<Self>) {
        loop {
            tokio::time::sleep(PING_INTERVAL).await;
            let mut sessions = self.sessions.lock().unwrap();
            sessions.retain(|uuid, session| {
                let stale = session.idle_for() > SESSION_TIMEOUT;
                if stale {
                    info!("session '{uuid}' timed out, cleaning it up");
                }
                !stale
            });
        }
    }

    /// Spawns the command pipeline on a dedicated OS thread and returns
    /// immediately; the console then polls via `CommandPartwayQuery`
    /// (spec.md §4.3 "Command protocol"), the Rust analogue of
    /// `cc_cmdline_thread` being started by `cc_command`.
    fn spawn_command(&self, session: Arc<Session>, command_line: String) {
        session.running.store(true, Ordering::SeqCst);
        session.abort.store(false, Ordering::SeqCst);
        session.quit.store(false, Ordering::SeqCst);
        session.records.lock().unwrap().clear();

        let instance = self.instance.clone();
        let registry = self.registry.clone();

        std::thread::Builder::new()
            .name(format!("session-{}", session.uuid))
            .spawn(move || {
                let _guard = logging::bind_thread_sink(session.clone() as Arc<dyn LogSink>);
                let io = SessionHandle(session.clone());

                let result = registry.evaluate(&instance, &io, &command_line);
                let (status, quit) = match result {
                    Ok(outcome) => {
                        for line in outcome.stdout.lines() {
                            session.push(LogRecord::captured_line("stdout", line.to_string(), false));
                        }
                        for line in outcome.stderr.lines() {
                            session.push(LogRecord::captured_line("stderr", line.to_string(), true));
                        }
                        (outcome.status, outcome.quit)
                    }
                    Err(e) => {
                        session.push(LogRecord::captured_line("stderr", format!("{e}"), true));
                        (-1, false)
                    }
                };

                session.last_retval.store(status, Ordering::SeqCst);
                session.quit.store(quit, Ordering::SeqCst);
                session.running.store(false, Ordering::SeqCst);
                session.notify();
            })
            .expect("failed to spawn session command thread");
    }

    /// Builds the next reply in the three-shape state machine of spec.md
    /// §4.3 "Command protocol": input if a prompt is pending, partway if
    /// the command is still running, final once it has finished. The Rust
    /// analogue of `cc_consume_command_log`.
    fn consume(&self, session: &Arc<Session>) -> CommandReply {
        {
            let guard = session.lock.lock().unwrap();
            let _ = session
                .condition
                .wait_timeout_while(guard, Duration::from_secs(1), |_| {
                    session.pending_input.lock().unwrap().prompt.is_none()
                        && session.records.lock().unwrap().is_empty()
                        && session.running.load(Ordering::SeqCst)
                })
                .unwrap();
        }

        if let Some(prompt) = session.pending_input.lock().unwrap().prompt.clone() {
            return CommandReply {
                envelope: Some(self.envelope(session.uuid)),
                shape: Some(Shape::Input(InputReply { prompt })),
            };
        }

        let records: Vec<LogRecord> = std::mem::take(&mut *session.records.lock().unwrap());
        if !records.is_empty() {
            return CommandReply {
                envelope: Some(self.envelope(session.uuid)),
                shape: Some(Shape::Partway(PartwayReply {
                    records: records.into_iter().map(to_proto_record).collect(),
                })),
            };
        }

        if !session.running.load(Ordering::SeqCst) {
            return CommandReply {
                envelope: Some(self.envelope(session.uuid)),
                shape: Some(Shape::Done(FinishedReply {
                    status: session.last_retval.load(Ordering::SeqCst),
                    quit: session.quit.load(Ordering::SeqCst),
                })),
            };
        }

        CommandReply {
            envelope: Some(self.envelope(session.uuid)),
            shape: Some(Shape::Partway(PartwayReply { records: Vec::new() })),
        }
    }
}

fn to_proto_record(record: LogRecord) -> proto::LogRecord {
    proto::LogRecord {
        level: record.level,
        logger_name: record.logger_name,
        source_path: record.source_path,
        source_line: record.source_line,
        function: record.function,
        time_secs: record.time_secs,
        message: record.message,
        is_stdout: record.is_stdout,
        is_stderr: record.is_stderr,
    }
}

#[tonic::async_trait]
impl SessionService for Arc<ClownfishServer> {
    async fn connect(&self, request: Request<ConnectRequest>) -> Result<Response<ConnectReply>, Status> {
        let _ = request.into_inner();
        let uuid = self.next_uuid.fetch_add(1, Ordering::SeqCst);
        let session_workspace = self.instance.workspace.join(format!("connection_{uuid}"));
        if let Err(e) = std::fs::create_dir_all(&session_workspace) {
            error!("failed to create session workspace '{}': {e}", session_workspace.display());
        }
        let session = Session::new(uuid, session_workspace);
        self.sessions.lock().unwrap().insert(uuid, session);
        debug!("allocated session '{uuid}'");
        Ok(Response::new(ConnectReply {
            envelope: Some(self.envelope(uuid)),
            client_uuid: uuid,
        }))
    }

    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingReply>, Status> {
        let envelope = request.into_inner().envelope.unwrap_or_default();
        let session = self.find(envelope.client_uuid)?;
        Ok(Response::new(PingReply {
            envelope: Some(self.envelope(session.uuid)),
        }))
    }

    async fn interact(&self, request: Request<InteractRequest>) -> Result<Response<InteractReply>, Status> {
        let request = request.into_inner();
        let envelope = request.envelope.unwrap_or_default();
        let session = self.find(envelope.client_uuid)?;
        let candidates = self.registry.complete(&self.instance, &request.partial_line);
        Ok(Response::new(InteractReply {
            envelope: Some(self.envelope(session.uuid)),
            candidates,
        }))
    }

    async fn command(&self, request: Request<CommandRequest>) -> Result<Response<CommandReply>, Status> {
        let request = request.into_inner();
        let envelope = request.envelope.unwrap_or_default();
        let session = self.find(envelope.client_uuid)?;

        if session.running.load(Ordering::SeqCst) {
            return Err(Status::failed_precondition("a command is already running on this session"));
        }
        self.spawn_command(session.clone(), request.command_line);
        let reply = self.consume(&session);
        if is_final_quit(&reply) {
            self.sessions.lock().unwrap().remove(&session.uuid);
            info!("disconnected client '{}' is cleaned up", session.uuid);
        }
        Ok(Response::new(reply))
    }

    async fn command_partway_query(
        &self,
        request: Request<CommandPartwayQuery>,
    ) -> Result<Response<CommandReply>, Status> {
        let request = request.into_inner();
        let envelope = request.envelope.unwrap_or_default();
        let session = self.find(envelope.client_uuid)?;
        if request.abort {
            session.abort.store(true, Ordering::SeqCst);
            session.notify();
        }
        let reply = self.consume(&session);
        if is_final_quit(&reply) {
            self.sessions.lock().unwrap().remove(&session.uuid);
            info!("disconnected client '{}' is cleaned up", session.uuid);
        }
        Ok(Response::new(reply))
    }

    async fn command_input(
        &self,
        request: Request<CommandInputReply>,
    ) -> Result<Response<CommandReply>, Status> {
        let request = request.into_inner();
        let envelope = request.envelope.unwrap_or_default();
        let session = self.find(envelope.client_uuid)?;
        {
            let mut pending = session.pending_input.lock().unwrap();
            pending.answer = Some(request.answer);
        }
        session.notify();
        let reply = self.consume(&session);
        if is_final_quit(&reply) {
            self.sessions.lock().unwrap().remove(&session.uuid);
            info!("disconnected client '{}' is cleaned up", session.uuid);
        }
        Ok(Response::new(reply))
    }
}

fn is_final_quit(reply: &CommandReply) -> bool {
    matches!(&reply.shape, Some(Shape::Done(done)) if done.quit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_exec::FakeRemoteExec;
    use clownfish_api::topology::{HighAvailabilityConfig, Topology};

    fn sample_instance() -> Arc<Instance> {
        let topology = Topology::new(vec![], vec![], vec![], vec![], HighAvailabilityConfig::default());
        Instance::new(topology, Arc::new(FakeRemoteExec::new()), tempfile::tempdir().unwrap().into_path(), 1)
    }

    #[tokio::test]
    async fn connect_allocates_an_incrementing_uuid() {
        let server = ClownfishServer::new(sample_instance());
        let first = server.connect(Request::new(ConnectRequest { envelope: None })).await.unwrap();
        let second = server.connect(Request::new(ConnectRequest { envelope: None })).await.unwrap();
        assert!(second.into_inner().client_uuid > first.into_inner().client_uuid);
    }

    #[tokio::test]
    async fn command_on_unknown_session_is_not_found() {
        let server = ClownfishServer::new(sample_instance());
        let req = CommandRequest {
            envelope: Some(Envelope { protocol_version: 0, client_uuid: 999, message_type: String::new(), error_code: 0 }),
            command_line: "global help".to_string(),
        };
        let err = server.command(Request::new(req)).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn a_simple_command_eventually_reports_finished() {
        let server = ClownfishServer::new(sample_instance());
        let uuid = server
            .connect(Request::new(ConnectRequest { envelope: None }))
            .await
            .unwrap()
            .into_inner()
            .client_uuid;

        let envelope = Some(Envelope { protocol_version: 0, client_uuid: uuid, message_type: String::new(), error_code: 0 });
        let mut reply = server
            .command(Request::new(CommandRequest { envelope: envelope.clone(), command_line: "global help".to_string() }))
            .await
            .unwrap()
            .into_inner();

        let mut iterations = 0;
        loop {
            match &reply.shape {
                Some(Shape::Done(_)) => break,
                _ => {
                    iterations += 1;
                    assert!(iterations < 20, "command never finished");
                    reply = server
                        .command_partway_query(Request::new(CommandPartwayQuery { envelope: envelope.clone(), abort: false }))
                        .await
                        .unwrap()
                        .into_inner();
                }
            }
        }
        assert!(matches!(reply.shape, Some(Shape::Done(done)) if done.status == 0));
    }
}
