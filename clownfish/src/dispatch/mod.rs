//! Command Dispatch & Subsystems (spec.md §4.2): parses `subsystem command
//! args` lines, pipelines them with `AND`/`OR`/`CONT`, and routes each
//! phrase to a registered subsystem.

pub mod subsystems;

use std::sync::RwLockWriteGuard;
use std::time::{Duration, Instant};

use clownfish_api::error::{ClownfishError, EngineError};
use clownfish_api::topology::service::MountState;

use crate::Instance;

/// Pipeline delimiter tokens (spec.md §4.2 "Command line grammar"). Matched
/// case-sensitively against whole whitespace-separated tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    And,
    Or,
    Cont,
}

impl Delimiter {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "AND" => Some(Delimiter::And),
            "OR" => Some(Delimiter::Or),
            "CONT" => Some(Delimiter::Cont),
            _ => None,
        }
    }
}

/// One `subsystem command [arg...]` phrase (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrase {
    pub subsystem: String,
    pub command: String,
    pub args: Vec<String>,
}

/// The speed tag every command is annotated with (spec.md §4.2 "Command
/// speed tag"); an assertion checked by tests, not an execution bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedTag {
    AlwaysSlow,
    AlwaysFast,
    SlowOrFast,
}

/// Result of running one phrase or a whole pipeline.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    pub quit: bool,
}

impl Outcome {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Outcome {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            quit: false,
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Outcome {
            status: -1,
            stdout: String::new(),
            stderr: stderr.into(),
            quit: false,
        }
    }
}

/// Per-session callbacks a subsystem command needs: whether the session's
/// abort flag is set (spec.md §5 "Cancellation & timeouts"), the
/// last-executed command's return value (`global retval`), and a blocking
/// yes/no prompt (`format_all` without `-f`).
pub trait SessionIo {
    fn should_abort(&self) -> bool;
    fn last_retval(&self) -> i32;
    fn prompt(&self, prompt: &str) -> String;
}

/// A `SessionIo` for tests and one-shot non-interactive use: never aborts,
/// always answers prompts with a scripted string.
pub struct FixedSessionIo {
    pub retval: i32,
    pub answer: String,
    pub abort: std::sync::atomic::AtomicBool,
}

impl Default for FixedSessionIo {
    fn default() -> Self {
        FixedSessionIo {
            retval: 0,
            answer: "n".to_string(),
            abort: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl SessionIo for FixedSessionIo {
    fn should_abort(&self) -> bool {
        self.abort.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn last_retval(&self) -> i32 {
        self.retval
    }

    fn prompt(&self, _prompt: &str) -> String {
        self.answer.clone()
    }
}

/// Registered subsystem: `option`, `fs`, `service`, and the implicit
/// `global` (spec.md §4.2 "Subsystems").
pub trait Subsystem: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, instance: &Instance, io: &dyn SessionIo, command: &str, args: &[String]) -> Outcome;
    /// Completion candidates for `command`'s arguments (spec.md §4.2
    /// "Completion"): a list of argument-provider outputs, already
    /// flattened. Default: no completions.
    fn complete_args(&self, _instance: &Instance, _command: &str, _args_so_far: &[String]) -> Vec<String> {
        Vec::new()
    }
    fn command_names(&self) -> &'static [&'static str];
}

/// Owns every registered subsystem and routes phrases to them.
pub struct Registry {
    subsystems: Vec<Box<dyn Subsystem>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            subsystems: vec![
                Box::new(subsystems::global::Global),
                Box::new(subsystems::option::OptionSubsystem),
                Box::new(subsystems::fs::Fs),
                Box::new(subsystems::service::ServiceSubsystem),
            ],
        }
    }

    fn names(&self) -> Vec<&str> {
        self.subsystems.iter().map(|s| s.name()).collect()
    }

    fn find(&self, name: &str) -> Option<&dyn Subsystem> {
        self.subsystems
            .iter()
            .find(|s| s.name() == name)
            .map(|b| b.as_ref())
    }

    /// Completion for a whole partial line (spec.md §4.2 "Completion"):
    /// empty line ⇒ every subsystem plus every `global` command name; one
    /// token ⇒ commands of the matched subsystem (or `global`'s if none
    /// match); further tokens ⇒ the command's argument providers. Results
    /// are filtered to those with the last token as a prefix.
    pub fn complete(&self, instance: &Instance, partial_line: &str) -> Vec<String> {
        let tokens: Vec<&str> = partial_line.split_whitespace().collect();
        let trailing_space = partial_line.ends_with(' ') || partial_line.is_empty();

        if tokens.is_empty() {
            let mut out: Vec<String> = self.names().iter().map(|s| s.to_string()).collect();
            if let Some(global) = self.find("global") {
                out.extend(global.command_names().iter().map(|c| c.to_string()));
            }
            return out;
        }

        if tokens.len() == 1 && !trailing_space {
            let prefix = tokens[0];
            let mut candidates: Vec<String> = self.names().iter().map(|s| s.to_string()).collect();
            if let Some(global) = self.find("global") {
                candidates.extend(global.command_names().iter().map(|c| c.to_string()));
            }
            return candidates.into_iter().filter(|c| c.starts_with(prefix)).collect();
        }

        let (subsystem_name, command_prefix_index) = if self.find(tokens[0]).is_some() {
            (tokens[0], 1)
        } else {
            ("global", 0)
        };
        let Some(subsystem) = self.find(subsystem_name) else {
            return Vec::new();
        };

        if tokens.len() == command_prefix_index + 1 && !trailing_space {
            let prefix = tokens[command_prefix_index];
            return subsystem
                .command_names()
                .iter()
                .map(|c| c.to_string())
                .filter(|c| c.starts_with(prefix))
                .collect();
        }

        let command = tokens.get(command_prefix_index).copied().unwrap_or("");
        let args_so_far: Vec<String> = tokens[(command_prefix_index + 1).min(tokens.len())..]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let prefix = if trailing_space { "" } else { args_so_far.last().map(String::as_str).unwrap_or("") };
        subsystem
            .complete_args(instance, command, &args_so_far)
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn dispatch_phrase(&self, instance: &Instance, io: &dyn SessionIo, phrase: &Phrase) -> Outcome {
        match self.find(&phrase.subsystem) {
            Some(subsystem) => subsystem.run(instance, io, &phrase.command, &phrase.args),
            None => Outcome::failed(format!("no such subsystem '{}'\n", phrase.subsystem)),
        }
    }

    /// Parses and evaluates a whole command line (spec.md §4.2
    /// "Evaluation"). `A AND B` runs B iff A succeeded; `A OR B` runs B iff
    /// A failed; `A CONT B` always runs B and the final status is B's.
    /// stdout/stderr accumulate across every phrase that actually ran, the
    /// way the session's log stream accumulates records across a pipeline
    /// even though only the last phrase determines the headline status.
    pub fn evaluate(&self, instance: &Instance, io: &dyn SessionIo, line: &str) -> Result<Outcome, clownfish_api::error::DispatchError> {
        let phrases = parse_line(line, &self.names())?;
        let mut outcome = Outcome::default();
        outcome.status = -1;

        for (phrase, delimiter) in &phrases {
            let step = self.dispatch_phrase(instance, io, phrase);
            outcome.stdout.push_str(&step.stdout);
            outcome.stderr.push_str(&step.stderr);
            outcome.status = step.status;
            outcome.quit = outcome.quit || step.quit;

            let run_next = match delimiter {
                None => false,
                Some(Delimiter::And) => outcome.status == 0,
                Some(Delimiter::Or) => outcome.status != 0,
                Some(Delimiter::Cont) => true,
            };
            if !run_next {
                break;
            }
        }
        Ok(outcome)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `line` into phrases and the delimiter that follows each
/// (`None` for the last), rejecting leading/trailing/duplicate delimiters
/// (spec.md §4.2).
fn parse_line(
    line: &str,
    known_subsystems: &[&str],
) -> Result<Vec<(Phrase, Option<Delimiter>)>, clownfish_api::error::DispatchError> {
    use clownfish_api::error::DispatchError;

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(DispatchError::EmptyLine);
    }

    let mut groups: Vec<Vec<&str>> = Vec::new();
    let mut delimiters: Vec<Delimiter> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for token in &tokens {
        if let Some(delimiter) = Delimiter::parse(token) {
            if current.is_empty() {
                if delimiters.is_empty() {
                    return Err(DispatchError::DanglingDelimiter);
                }
                return Err(DispatchError::DuplicateDelimiter);
            }
            groups.push(std::mem::take(&mut current));
            delimiters.push(delimiter);
        } else {
            current.push(token);
        }
    }
    if current.is_empty() {
        return Err(DispatchError::DanglingDelimiter);
    }
    groups.push(current);

    let phrases: Vec<Phrase> = groups
        .into_iter()
        .map(|tokens| parse_phrase(&tokens, known_subsystems))
        .collect();

    Ok(phrases
        .into_iter()
        .enumerate()
        .map(|(i, phrase)| (phrase, delimiters.get(i).copied()))
        .collect())
}

fn parse_phrase(tokens: &[&str], known_subsystems: &[&str]) -> Phrase {
    if !tokens.is_empty() && known_subsystems.contains(&tokens[0]) {
        Phrase {
            subsystem: tokens[0].to_string(),
            command: tokens.get(1).map(|s| s.to_string()).unwrap_or_default(),
            args: tokens[2.min(tokens.len())..].iter().map(|s| s.to_string()).collect(),
        }
    } else {
        Phrase {
            subsystem: "global".to_string(),
            command: tokens[0].to_string(),
            args: tokens[1..].iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Acquires the writer lock on every configured service's `mount_lock`, in
/// `Topology::services` order, before a bulk mutation (spec.md §5
/// "Per-service RW lock"). On abort or timeout, releases everything already
/// held in reverse order and returns the corresponding error.
pub fn acquire_all_writer_locks<'a>(
    instance: &'a Instance,
    io: &dyn SessionIo,
    timeout: Duration,
) -> Result<Vec<RwLockWriteGuard<'a, MountState>>, ClownfishError> {
    let mut guards = Vec::new();
    let start = Instant::now();
    for service in &instance.topology.services {
        loop {
            if io.should_abort() {
                while guards.pop().is_some() {}
                return Err(ClownfishError::new(EngineError::AbortedByOperator));
            }
            match service.mount_lock.try_write() {
                Ok(guard) => {
                    guards.push(guard);
                    break;
                }
                Err(_) => {
                    if start.elapsed() > timeout {
                        while guards.pop().is_some() {}
                        return Err(ClownfishError::new(EngineError::LockTimeout(
                            service.service_name.clone(),
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }
    Ok(guards)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<&'static str> {
        vec!["option", "fs", "service", "global"]
    }

    #[test]
    fn implicit_global_subsystem_is_used_when_first_token_unrecognized() {
        let phrases = parse_line("help", &names()).unwrap();
        assert_eq!(phrases.len(), 1);
        assert_eq!(phrases[0].0.subsystem, "global");
        assert_eq!(phrases[0].0.command, "help");
    }

    #[test]
    fn explicit_subsystem_is_honored() {
        let phrases = parse_line("fs list testfs", &names()).unwrap();
        assert_eq!(phrases[0].0.subsystem, "fs");
        assert_eq!(phrases[0].0.command, "list");
        assert_eq!(phrases[0].0.args, vec!["testfs"]);
    }

    #[test]
    fn pipeline_with_and_or_cont_parses_delimiters_in_order() {
        let phrases = parse_line("h AND h OR h CONT h", &names()).unwrap();
        assert_eq!(phrases.len(), 4);
        assert_eq!(phrases[0].1, Some(Delimiter::And));
        assert_eq!(phrases[1].1, Some(Delimiter::Or));
        assert_eq!(phrases[2].1, Some(Delimiter::Cont));
        assert_eq!(phrases[3].1, None);
    }

    #[test]
    fn leading_delimiter_is_rejected() {
        let err = parse_line("AND h", &names()).unwrap_err();
        assert_eq!(err, clownfish_api::error::DispatchError::DanglingDelimiter);
    }

    #[test]
    fn trailing_delimiter_is_rejected() {
        let err = parse_line("h AND", &names()).unwrap_err();
        assert_eq!(err, clownfish_api::error::DispatchError::DanglingDelimiter);
    }

    #[test]
    fn duplicate_delimiter_is_rejected() {
        let err = parse_line("h AND AND h", &names()).unwrap_err();
        assert_eq!(err, clownfish_api::error::DispatchError::DuplicateDelimiter);
    }

    #[test]
    fn empty_line_is_rejected() {
        assert_eq!(parse_line("   ", &names()).unwrap_err(), clownfish_api::error::DispatchError::EmptyLine);
    }
}
