//! Error taxonomy for Clownfish, following the same structured-error shape
//! the teacher uses: one `thiserror` enum per concern, composed into a single
//! `ErrorKind`, wrapped in `ClownfishError` which remembers the call site and
//! an optional `anyhow` source so diagnostics reach the session log with full
//! context (see spec.md §7).

use std::borrow::Cow;
use std::fmt::Debug;
use std::panic::Location;

use strum_macros::IntoStaticStr;

/// Clownfish failed to load or validate its configuration (spec.md §4.5).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}'")]
    Read { path: String },
    #[error("failed to parse configuration file '{path}'")]
    Parse { path: String },
    #[error("duplicate distribution id '{id}' in 'lustre_distributions'")]
    DuplicateDistributionId { id: String },
    #[error("duplicate host id '{id}' in 'ssh_hosts'")]
    DuplicateHostId { id: String },
    #[error("host '{host_id}' references unknown distribution '{distribution_id}'")]
    UnknownDistribution {
        host_id: String,
        distribution_id: String,
    },
    #[error("duplicate filesystem name '{fsname}' in 'lustres'")]
    DuplicateFsname { fsname: String },
    #[error("duplicate service name '{service_name}'")]
    DuplicateServiceName { service_name: String },
    #[error("instance of service '{service_name}' references unknown host '{host_id}'")]
    UnknownHost {
        service_name: String,
        host_id: String,
    },
    #[error("filesystem '{fsname}' has no MDTs")]
    EmptyMdtSet { fsname: String },
    #[error("filesystem '{fsname}' has no OSTs")]
    EmptyOstSet { fsname: String },
    #[error("service '{service_name}' has no instances")]
    EmptyInstanceSet { service_name: String },
    #[error(
        "filesystem '{fsname}' has no resolvable MGT: 'mgs_id' is absent and no MDT is marked 'is_mgs'"
    )]
    MissingMgs { fsname: String },
    #[error("filesystem '{fsname}' references unknown mgs_id '{mgs_id}'")]
    UnknownMgs { fsname: String, mgs_id: String },
    #[error(
        "filesystem '{fsname}' has more than one MDT marked 'is_mgs' (indices {first} and {second})"
    )]
    MultipleMgsMdt {
        fsname: String,
        first: u32,
        second: u32,
    },
    #[error("back-store kind mismatch for device '{device}': {kind:?} requires {expected}")]
    DeviceShapeMismatch {
        device: String,
        kind: &'static str,
        expected: &'static str,
    },
    #[error("duplicate uid {uid} in QoS overrides for filesystem '{fsname}'")]
    DuplicateQosUid { fsname: String, uid: u32 },
    #[error("'high_availability.native' is false but 'high_availability.bindnetaddr' is absent")]
    MissingBindnetaddr,
    #[error("duplicate MDT index {index} in filesystem '{fsname}'")]
    DuplicateMdtIndex { fsname: String, index: u32 },
    #[error("duplicate OST index {index} in filesystem '{fsname}'")]
    DuplicateOstIndex { fsname: String, index: u32 },
}

/// A caller attempted an operation against a `service-name` or host pair that
/// does not resolve in the topology (spec.md §4.6, §3).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("no service named '{0}'")]
    NoSuchService(String),
    #[error("service '{service_name}' has no instance on host '{hostname}'")]
    NoSuchInstance {
        service_name: String,
        hostname: String,
    },
    #[error("'{0}' is not a valid service-name (expected a bare MGT id or '<fsname>-<tag>')")]
    MalformedServiceName(String),
    #[error("no host named '{0}'")]
    NoSuchHost(String),
}

/// The session/console wire protocol misbehaved (spec.md §4.3, §7).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("protocol version mismatch: client sent {client}, server expects {server}")]
    VersionMismatch { client: u32, server: u32 },
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("session '{0}' is unknown or has expired")]
    UnknownSession(String),
}

/// A problem confined to one command-session's execution (spec.md §4.3, §7).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("command was aborted by the operator")]
    AbortedByOperator,
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("a command is already running on this session")]
    CommandAlreadyRunning,
    #[error("no command is currently awaiting input on this session")]
    NotAwaitingInput,
}

/// Status & Repair Engine failures (spec.md §4.1, §7).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("writer lock on service '{0}' could not be acquired before the timeout")]
    LockTimeout(String),
    #[error("acquiring locks for a bulk operation was aborted by the operator")]
    AbortedByOperator,
    #[error("remote command for service '{service_name}' failed: {detail}")]
    RemoteCommand { service_name: String, detail: String },
    #[error("disabling HA was aborted before all workers went idle")]
    DisableAborted,
}

/// HA Cluster Bootstrap failures (spec.md §4.4, §7).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum HaBootstrapError {
    #[error("failed to generate membership key on host '{0}'")]
    KeyGeneration(String),
    #[error("failed to distribute file '{file}' to host '{host}'")]
    Distribution { file: String, host: String },
    #[error("failed to create resource '{0}'")]
    ResourceCreate(String),
    #[error("failed to create location constraint for resource '{0}'")]
    ConstraintCreate(String),
    #[error("failed to create ordering constraint '{0}'")]
    OrderingCreate(String),
    #[error("failed to tear down the cluster on host '{0}'")]
    Teardown(String),
}

/// Command-dispatch grammar/routing failures (spec.md §4.2, §7).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("empty command line")]
    EmptyLine,
    #[error("leading or trailing pipeline delimiter")]
    DanglingDelimiter,
    #[error("duplicate pipeline delimiter")]
    DuplicateDelimiter,
    #[error("no subsystem or global command named '{0}'")]
    NoSuchCommand(String),
    #[error("'{command}' in subsystem '{subsystem}' requires at least {min} argument(s)")]
    MissingArguments {
        subsystem: String,
        command: String,
        min: usize,
    },
}

/// Catch-all for bugs/invariant violations: never expected to surface to an
/// operator in a healthy system.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum InternalError {
    #[error("{0}")]
    Invariant(String),
}

/// Each variant corresponds to a different category of error, matching the
/// taxonomy of spec.md §7 one-to-one.
#[derive(Debug, thiserror::Error, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    HaBootstrap(#[from] HaBootstrapError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct ClownfishErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

/// The error type threaded through the whole crate. Carries the `ErrorKind`,
/// the call site that raised it, and an optional underlying `anyhow::Error`
/// (usually a remote-command failure) plus any context pushed on while it
/// propagated.
pub struct ClownfishError(Box<ClownfishErrorInner>);

impl ClownfishError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        ClownfishError(Box::new(ClownfishErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }
}

impl Debug for ClownfishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;
        for (msg, loc) in self.0.context.iter().rev() {
            write!(f, "\n  while: {msg} ({}:{})", loc.file(), loc.line())?;
        }
        if let Some(ref source) = self.0.source {
            write!(f, "\nCaused by:\n{source:?}")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ClownfishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.kind)
    }
}

impl std::error::Error for ClownfishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// Attaches a `kind` to an `Option`/`Result`, converting it into a
/// `ClownfishError` and recording the call site, the way
/// `osutils::exe::OutputChecker`/`trident_api::error::ReportError` do.
pub trait ReportError<T, K> {
    fn structured(self, kind: K) -> Result<T, ClownfishError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, ClownfishError> {
        match self {
            Some(t) => Ok(t),
            None => Err(ClownfishError(Box::new(ClownfishErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, ClownfishError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(ClownfishError(Box::new(ClownfishErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

/// Attach additional human-readable context as a `ClownfishError` propagates.
pub trait ClownfishResultExt<T> {
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, ClownfishError>;
}

impl<T> ClownfishResultExt<T> for Result<T, ClownfishError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, ClownfishError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_preserves_source() {
        let res: Result<(), anyhow::Error> = Err(anyhow::anyhow!("boom"));
        let err = res
            .structured(TopologyError::NoSuchHost("h1".into()))
            .unwrap_err();
        assert!(format!("{err:?}").contains("boom"));
        assert!(matches!(err.kind(), ErrorKind::Topology(_)));
    }

    #[test]
    fn message_adds_context_without_changing_kind() {
        let res: Result<(), ClownfishError> = Err(ClownfishError::new(DispatchError::EmptyLine));
        let err = res.message("parsing pipeline").unwrap_err();
        assert!(format!("{err:?}").contains("parsing pipeline"));
    }
}
