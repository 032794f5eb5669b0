//! `global` subsystem (spec.md §4.2): the implicit subsystem used when a
//! phrase's first token is not a registered subsystem name.

use std::time::Duration;

use crate::dispatch::{acquire_all_writer_locks, Outcome, SessionIo, Subsystem};
use crate::{ha, probe, Instance};

pub struct Global;

const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const HELP_TEXT: &str = "\
global: help[h] quit[q] retval prepare format_all mount_all umount_all
option: enable|disable {lazy_prepare|high_availability}
fs:     list [fs-or-service...] mount fs... umount fs... help
service: move service-name hostname, umount service-name...
";

impl Subsystem for Global {
    fn name(&self) -> &'static str {
        "global"
    }

    fn command_names(&self) -> &'static [&'static str] {
        &[
            "help",
            "h",
            "quit",
            "q",
            "retval",
            "prepare",
            "format_all",
            "mount_all",
            "umount_all",
        ]
    }

    fn run(&self, instance: &Instance, io: &dyn SessionIo, command: &str, args: &[String]) -> Outcome {
        match command {
            "help" | "h" => Outcome::ok(HELP_TEXT),
            "quit" | "q" => Outcome {
                status: 0,
                stdout: String::new(),
                stderr: String::new(),
                quit: true,
            },
            "retval" => Outcome::ok(format!("{}\n", io.last_retval())),
            "prepare" => prepare(instance),
            "format_all" => format_all(instance, io, args),
            "mount_all" => mount_all(instance, io),
            "umount_all" => umount_all(instance, io),
            other => Outcome::failed(format!("no such command 'global {other}'\n")),
        }
    }
}

/// `global prepare` (spec.md §2 "Control flow": "HA bootstrap is invoked
/// once at 'prepare all' time from a command handler"): stages every
/// host's distribution, then, if `high_availability.enabled`, renders and
/// distributes the membership config and installs the Pacemaker resource
/// graph.
fn prepare(instance: &Instance) -> Outcome {
    let mut stdout = String::new();
    for host in &instance.topology.hosts {
        let distribution = &instance.topology.distributions[host.distribution];
        match instance.engine.remote.run(
            "prepare",
            &host.hostname,
            &["test", "-d", distribution.package_dir.to_str().unwrap_or("")],
        ) {
            Ok(out) if out.is_success() => stdout.push_str(&format!("{}: prepared\n", host.hostname)),
            Ok(out) => return Outcome::failed(format!("{}: prepare failed: {}\n", host.hostname, out.stderr)),
            Err(e) => return Outcome::failed(format!("{}: prepare failed: {e:#}\n", host.hostname)),
        }
    }

    if instance.topology.high_availability.enabled {
        if let Err(e) = prepare_ha(instance) {
            return Outcome::failed(format!("ha bootstrap failed: {e}\n"));
        }
        stdout.push_str("ha bootstrap: complete\n");
    }
    Outcome::ok(stdout)
}

fn prepare_ha(instance: &Instance) -> Result<(), clownfish_api::error::ClownfishError> {
    let bindnetaddr = instance
        .topology
        .high_availability
        .bindnetaddr
        .as_deref()
        .unwrap_or("0.0.0.0/0");
    let hostnames = ha::sorted_nodelist_hostnames(&instance.topology);
    let config = ha::render_corosync_config(bindnetaddr, &hostnames);
    let config_path = instance
        .config_path()
        .unwrap_or_else(|| instance.workspace.join("clownfish.yaml"));
    ha::distribute(
        &instance.topology,
        instance.engine.remote.as_ref(),
        &config,
        &config_path,
        &instance.workspace,
    )?;
    ha::start_cluster(&instance.topology, instance.engine.remote.as_ref())
}

fn format_all(instance: &Instance, io: &dyn SessionIo, args: &[String]) -> Outcome {
    let forced = args.iter().any(|a| a == "-f" || a == "--force");
    if !forced {
        let answer = io.prompt("format every configured service? [y/N] ");
        if !answer.starts_with(['y', 'Y']) {
            return Outcome::ok("format_all cancelled\n");
        }
    }

    let guards = match acquire_all_writer_locks(instance, io, LOCK_TIMEOUT) {
        Ok(guards) => guards,
        Err(e) => return Outcome::failed(format!("{e}\n")),
    };

    let mut stdout = String::new();
    for service in &instance.topology.services {
        if io.should_abort() {
            drop(guards);
            return Outcome::failed("format_all aborted by operator\n");
        }
        match probe::format(&instance.topology, service, instance.engine.remote.as_ref()) {
            Ok(()) => stdout.push_str(&format!("{}: formatted\n", service.service_name)),
            Err(e) => {
                drop(guards);
                return Outcome::failed(format!("{}: format failed: {e:#}\n", service.service_name));
            }
        }
    }
    drop(guards);
    Outcome::ok(stdout)
}

fn mount_all(instance: &Instance, io: &dyn SessionIo) -> Outcome {
    let guards = match acquire_all_writer_locks(instance, io, LOCK_TIMEOUT) {
        Ok(guards) => guards,
        Err(e) => return Outcome::failed(format!("{e}\n")),
    };
    drop(guards);

    let mut stdout = String::new();
    for service in &instance.topology.services {
        if io.should_abort() {
            return Outcome::failed("mount_all aborted by operator\n");
        }
        if service.mount_lock.read().unwrap().mounted_on.is_some() {
            stdout.push_str(&format!("{}: already mounted\n", service.service_name));
            continue;
        }
        match probe::mount(&instance.topology, service, 0, instance.engine.remote.as_ref()) {
            Ok(()) => stdout.push_str(&format!("{}: mounted\n", service.service_name)),
            Err(e) => return Outcome::failed(format!("{}: mount failed: {e:#}\n", service.service_name)),
        }
    }
    Outcome::ok(stdout)
}

fn umount_all(instance: &Instance, io: &dyn SessionIo) -> Outcome {
    let mut stdout = String::new();
    for service in &instance.topology.services {
        if io.should_abort() {
            return Outcome::failed("umount_all aborted by operator\n");
        }
        match probe::umount(&instance.topology, service, instance.engine.remote.as_ref()) {
            Ok(()) => stdout.push_str(&format!("{}: unmounted\n", service.service_name)),
            Err(e) => return Outcome::failed(format!("{}: umount failed: {e:#}\n", service.service_name)),
        }
    }
    Outcome::ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FixedSessionIo;
    use crate::remote_exec::FakeRemoteExec;
    use clownfish_api::topology::host::{Host, ServiceDistribution};
    use clownfish_api::topology::instance::{BackFsType, ServiceInstance};
    use clownfish_api::topology::service::{Service, ServiceKind};
    use clownfish_api::topology::{HighAvailabilityConfig, Topology};
    use std::sync::Arc;

    fn sample_instance() -> Arc<Instance> {
        let distributions = vec![ServiceDistribution {
            id: "d0".into(),
            package_dir: "/opt".into(),
            helper_dir: "/opt/h".into(),
        }];
        let hosts = vec![Host {
            id: "h0".into(),
            hostname: "oss1".into(),
            credential_path: None,
            distribution: 0,
        }];
        let services = vec![Service::new(
            "testfs-OST0000".into(),
            ServiceKind::Ost,
            BackFsType::Ldiskfs,
            vec![ServiceInstance {
                host: 0,
                device: "/dev/sdb".into(),
                mount_point: "/mnt/testfs-ost0".into(),
                network_id: "o2ib0".into(),
                zpool_create: None,
            }],
            None,
            Some(0),
        )];
        let topology = Topology::new(hosts, distributions, vec![], services, HighAvailabilityConfig::default());
        Instance::new(topology, Arc::new(FakeRemoteExec::new()), "/tmp/clownfish-test".into(), 1)
    }

    #[test]
    fn help_lists_every_subsystem() {
        let outcome = Global.run(&sample_instance(), &FixedSessionIo::default(), "help", &[]);
        assert_eq!(outcome.status, 0);
        assert!(outcome.stdout.contains("option:"));
    }

    #[test]
    fn quit_sets_the_quit_flag() {
        let outcome = Global.run(&sample_instance(), &FixedSessionIo::default(), "q", &[]);
        assert!(outcome.quit);
        assert_eq!(outcome.status, 0);
    }

    #[test]
    fn format_all_without_force_requires_yes_prompt() {
        let instance = sample_instance();
        let io = FixedSessionIo { answer: "n".into(), ..Default::default() };
        let outcome = Global.run(&instance, &io, "format_all", &[]);
        assert_eq!(outcome.status, 0);
        assert!(outcome.stdout.contains("cancelled"));
    }

    #[test]
    fn format_all_with_force_flag_skips_the_prompt() {
        let instance = sample_instance();
        let io = FixedSessionIo::default();
        let outcome = Global.run(&instance, &io, "format_all", &["-f".to_string()]);
        assert_eq!(outcome.status, 0);
        assert!(outcome.stdout.contains("formatted"));
    }

    #[test]
    fn mount_all_then_umount_all_restores_unmounted_state() {
        let instance = sample_instance();
        let io = FixedSessionIo::default();
        let mounted = Global.run(&instance, &io, "mount_all", &[]);
        assert_eq!(mounted.status, 0);
        assert!(instance.topology.services[0].mount_lock.read().unwrap().mounted_on.is_some());

        let unmounted = Global.run(&instance, &io, "umount_all", &[]);
        assert_eq!(unmounted.status, 0);
        assert!(instance.topology.services[0].mount_lock.read().unwrap().mounted_on.is_none());
    }

    #[test]
    fn unknown_command_returns_error_status() {
        let outcome = Global.run(&sample_instance(), &FixedSessionIo::default(), "nonexistent", &[]);
        assert_eq!(outcome.status, -1);
        assert!(!outcome.stderr.is_empty());
        assert!(outcome.stdout.is_empty());
    }
}
