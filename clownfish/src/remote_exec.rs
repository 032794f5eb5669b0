//! The `RemoteExec` capability (spec.md §9 "Blocking remote I/O"). Every
//! call that touches a target host's shell goes through here, the way
//! `osutils::exe::OutputChecker` isolates process-output handling from the
//! logic that interprets it — this is the seam the engine and HA bootstrap
//! are tested against with an in-memory fake instead of a real network.

use anyhow::Result;

/// Output of one remote command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl RemoteOutput {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        RemoteOutput {
            stdout: stdout.into(),
            stderr: String::new(),
            status: 0,
        }
    }

    pub fn failed(stderr: impl Into<String>, status: i32) -> Self {
        RemoteOutput {
            stdout: String::new(),
            stderr: stderr.into(),
            status,
        }
    }
}

/// Out-of-scope collaborator: the actual remote-shell executor (spec.md §1
/// "Out of scope"). The core depends only on this trait.
pub trait RemoteExec: Send + Sync {
    /// Runs `argv` on `hostname`, returning its captured output. `ctx` is a
    /// short label used for logging (e.g. the calling service-name).
    fn run(&self, ctx: &str, hostname: &str, argv: &[&str]) -> Result<RemoteOutput>;
}

/// An in-memory `RemoteExec` for tests: returns scripted results keyed by
/// `(hostname, argv.join(" "))`, falling back to a default success.
#[derive(Default)]
pub struct FakeRemoteExec {
    scripted: std::sync::Mutex<std::collections::HashMap<(String, String), RemoteOutput>>,
    pub calls: std::sync::Mutex<Vec<(String, String, String)>>,
}

impl FakeRemoteExec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, hostname: &str, argv_joined: &str, output: RemoteOutput) {
        self.scripted
            .lock()
            .unwrap()
            .insert((hostname.to_string(), argv_joined.to_string()), output);
    }
}

impl RemoteExec for FakeRemoteExec {
    fn run(&self, ctx: &str, hostname: &str, argv: &[&str]) -> Result<RemoteOutput> {
        let joined = argv.join(" ");
        self.calls
            .lock()
            .unwrap()
            .push((ctx.to_string(), hostname.to_string(), joined.clone()));
        Ok(self
            .scripted
            .lock()
            .unwrap()
            .get(&(hostname.to_string(), joined))
            .cloned()
            .unwrap_or_else(|| RemoteOutput::ok("")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_replays_scripted_output_and_records_calls() {
        let fake = FakeRemoteExec::new();
        fake.script("oss1", "lctl dl", RemoteOutput::ok("0 UP osd-ldiskfs"));

        let out = fake.run("testfs-OST0000", "oss1", &["lctl", "dl"]).unwrap();
        assert!(out.is_success());
        assert_eq!(out.stdout, "0 UP osd-ldiskfs");

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "oss1");
    }

    #[test]
    fn unscripted_call_defaults_to_success() {
        let fake = FakeRemoteExec::new();
        let out = fake.run("x", "h", &["true"]).unwrap();
        assert!(out.is_success());
    }
}
