//! Session-aware logging (spec.md §4.3, §6): one global `env_logger`-style
//! sink for the daemon's own console/file output, plus a thread-local
//! routing table so whichever OS thread is currently running a session's
//! command also forwards every `log::info!`/`warn!`/... record into that
//! session's own record buffer. Mirrors the teacher's `logstream::LogSender`
//! (a `log::Log` impl that forwards records to a second destination)
//! generalized from "one HTTP endpoint" to "whichever session owns this
//! thread right now".

use std::cell::RefCell;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, Log, Metadata, Record};

/// One log record as carried over the wire (spec.md §4.3 "Partway reply"):
/// level, logger name, source location, creation time, message, and
/// stdout/stderr flags a console uses to decide how to render it.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: String,
    pub logger_name: String,
    pub source_path: String,
    pub source_line: u32,
    pub function: String,
    pub time_secs: f64,
    pub message: String,
    pub is_stdout: bool,
    pub is_stderr: bool,
}

impl LogRecord {
    fn from_log_record(record: &Record) -> Self {
        LogRecord {
            level: record.level().to_string(),
            logger_name: record.target().to_string(),
            source_path: record.file().unwrap_or_default().to_string(),
            source_line: record.line().unwrap_or(0),
            function: record.module_path().unwrap_or_default().to_string(),
            time_secs: now_secs(),
            message: record.args().to_string(),
            is_stdout: false,
            is_stderr: false,
        }
    }

    /// Builds a synthetic record for one line of a command's captured
    /// stdout/stderr (spec.md §4.2 "Outcome"), which never goes through the
    /// `log` crate since it is the subsystem's own output, not a diagnostic.
    pub fn captured_line(logger_name: &str, line: String, is_stderr: bool) -> Self {
        LogRecord {
            level: if is_stderr { "ERROR" } else { "INFO" }.to_string(),
            logger_name: logger_name.to_string(),
            source_path: String::new(),
            source_line: 0,
            function: String::new(),
            time_secs: now_secs(),
            message: line,
            is_stdout: !is_stderr,
            is_stderr,
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Anything that wants the current thread's log records (spec.md §4.3: a
/// running session's own `CommandReply` stream). Implemented by
/// `server::Session`.
pub trait LogSink: Send + Sync {
    fn push(&self, record: LogRecord);
}

thread_local! {
    static CURRENT_SINK: RefCell<Option<Arc<dyn LogSink>>> = const { RefCell::new(None) };
}

/// Routes every `log` record emitted on the calling thread into `sink`
/// until the returned guard is dropped (spec.md §6 "per-thread sub-log
/// workspace"). Each session's command thread installs one of these for
/// its lifetime.
pub fn bind_thread_sink(sink: Arc<dyn LogSink>) -> ThreadSinkGuard {
    CURRENT_SINK.with(|cell| *cell.borrow_mut() = Some(sink));
    ThreadSinkGuard { _private: () }
}

pub struct ThreadSinkGuard {
    _private: (),
}

impl Drop for ThreadSinkGuard {
    fn drop(&mut self) {
        CURRENT_SINK.with(|cell| *cell.borrow_mut() = None);
    }
}

struct ClownfishLogger {
    filter: Level,
}

impl Log for ClownfishLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!(
            "[{}] {} - {}",
            record.level(),
            record.target(),
            record.args()
        );
        CURRENT_SINK.with(|cell| {
            if let Some(sink) = cell.borrow().as_ref() {
                sink.push(LogRecord::from_log_record(record));
            }
        });
    }

    fn flush(&self) {}
}

/// Installs the process-wide logger (spec.md §6 "Logging"). `filter` comes
/// from `RUST_LOG`/CLI verbosity the same way the teacher's CLI builds its
/// `env_logger::Builder`; this logger additionally fans out to whichever
/// session thread-locally claimed the current thread.
pub fn init(filter: Level) {
    log::set_max_level(filter.to_level_filter());
    let _ = log::set_boxed_logger(Box::new(ClownfishLogger { filter }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CollectingSink(Mutex<Vec<LogRecord>>);

    impl LogSink for CollectingSink {
        fn push(&self, record: LogRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    #[test]
    fn captured_line_sets_stdout_flag() {
        let record = LogRecord::captured_line("fs", "ok".to_string(), false);
        assert!(record.is_stdout);
        assert!(!record.is_stderr);
    }

    #[test]
    fn captured_line_sets_stderr_flag() {
        let record = LogRecord::captured_line("fs", "boom".to_string(), true);
        assert!(record.is_stderr);
        assert!(!record.is_stdout);
    }

    #[test]
    fn thread_sink_guard_clears_on_drop() {
        let sink: Arc<dyn LogSink> = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        {
            let _guard = bind_thread_sink(sink.clone());
            CURRENT_SINK.with(|cell| assert!(cell.borrow().is_some()));
        }
        CURRENT_SINK.with(|cell| assert!(cell.borrow().is_none()));
    }
}
