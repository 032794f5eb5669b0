//! `option` subsystem (spec.md §4.2): `enable|disable {lazy_prepare|
//! high_availability}` toggles a named boolean on the running instance.
//! Toggling `high_availability` routes to the engine's enable/disable
//! primitive (spec.md §4.1 "Disable semantics").

use crate::dispatch::{Outcome, SessionIo, Subsystem};
use crate::Instance;

pub struct OptionSubsystem;

impl Subsystem for OptionSubsystem {
    fn name(&self) -> &'static str {
        "option"
    }

    fn command_names(&self) -> &'static [&'static str] {
        &["enable", "disable"]
    }

    fn complete_args(&self, _instance: &Instance, _command: &str, args_so_far: &[String]) -> Vec<String> {
        if args_so_far.is_empty() {
            vec!["lazy_prepare".to_string(), "high_availability".to_string()]
        } else {
            Vec::new()
        }
    }

    fn run(&self, instance: &Instance, io: &dyn SessionIo, command: &str, args: &[String]) -> Outcome {
        let enabling = match command {
            "enable" => true,
            "disable" => false,
            other => return Outcome::failed(format!("no such command 'option {other}'\n")),
        };
        match args.first().map(String::as_str) {
            Some("lazy_prepare") => {
                instance.set_lazy_prepare(enabling);
                Outcome::ok(format!("lazy_prepare {}\n", if enabling { "enabled" } else { "disabled" }))
            }
            Some("high_availability") => {
                if enabling {
                    instance.engine.enable_ha();
                    Outcome::ok("high_availability enabled\n")
                } else {
                    match instance.engine.disable_ha(&|| io.should_abort()) {
                        Ok(()) => Outcome::ok("high_availability disabled\n"),
                        Err(e) => Outcome::failed(format!("{e}\n")),
                    }
                }
            }
            Some(other) => Outcome::failed(format!("no such option '{other}'\n")),
            None => Outcome::failed("option enable|disable requires an option name\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FixedSessionIo;
    use crate::remote_exec::FakeRemoteExec;
    use clownfish_api::topology::{HighAvailabilityConfig, Topology};
    use std::sync::Arc;

    fn sample_instance() -> Arc<Instance> {
        let topology = Topology::new(vec![], vec![], vec![], vec![], HighAvailabilityConfig::default());
        Instance::new(topology, Arc::new(FakeRemoteExec::new()), "/tmp".into(), 1)
    }

    #[test]
    fn enabling_lazy_prepare_flips_the_flag_on_the_instance() {
        let instance = sample_instance();
        assert!(!instance.lazy_prepare());
        let outcome = OptionSubsystem.run(&instance, &FixedSessionIo::default(), "enable", &["lazy_prepare".to_string()]);
        assert_eq!(outcome.status, 0);
        assert!(instance.lazy_prepare());
    }

    #[test]
    fn unknown_option_name_is_rejected() {
        let instance = sample_instance();
        let outcome = OptionSubsystem.run(&instance, &FixedSessionIo::default(), "enable", &["bogus".to_string()]);
        assert_eq!(outcome.status, -1);
    }
}
