//! `service` subsystem (spec.md §4.2): `move service-name hostname` and
//! `umount service-name...`.

use crate::dispatch::{Outcome, SessionIo, Subsystem};
use crate::{probe, Instance};

pub struct ServiceSubsystem;

impl Subsystem for ServiceSubsystem {
    fn name(&self) -> &'static str {
        "service"
    }

    fn command_names(&self) -> &'static [&'static str] {
        &["move", "umount"]
    }

    fn complete_args(&self, instance: &Instance, _command: &str, args_so_far: &[String]) -> Vec<String> {
        if args_so_far.is_empty() {
            instance.topology.services.iter().map(|s| s.service_name.clone()).collect()
        } else {
            Vec::new()
        }
    }

    fn run(&self, instance: &Instance, io: &dyn SessionIo, command: &str, args: &[String]) -> Outcome {
        match command {
            "move" => mv(instance, args),
            "umount" => umount(instance, io, args),
            other => Outcome::failed(format!("no such command 'service {other}'\n")),
        }
    }
}

/// Relocates a service to a specific host: mounts it there, implying
/// unmount elsewhere (spec.md §4.2 `service move`).
fn mv(instance: &Instance, args: &[String]) -> Outcome {
    let [service_name, hostname] = args else {
        return Outcome::failed("service move requires a service-name and a hostname\n");
    };
    let Some(service_index) = instance.topology.service_index(service_name) else {
        return Outcome::failed(format!("no such service '{service_name}'\n"));
    };
    let service = &instance.topology.services[service_index];
    let Some(instance_index) = service
        .instances
        .iter()
        .position(|inst| instance.topology.hosts[inst.host].hostname == *hostname)
    else {
        return Outcome::failed(format!("'{service_name}' has no instance on host '{hostname}'\n"));
    };

    if let Err(e) = probe::umount(&instance.topology, service, instance.engine.remote.as_ref()) {
        return Outcome::failed(format!("{service_name}: umount failed before move: {e:#}\n"));
    }
    match probe::mount(&instance.topology, service, instance_index, instance.engine.remote.as_ref()) {
        Ok(()) => Outcome::ok(format!("{service_name}: moved to '{hostname}'\n")),
        Err(e) => Outcome::failed(format!("{service_name}: mount failed during move: {e:#}\n")),
    }
}

fn umount(instance: &Instance, io: &dyn SessionIo, args: &[String]) -> Outcome {
    if args.is_empty() {
        return Outcome::failed("service umount requires at least one service-name\n");
    }
    let mut stdout = String::new();
    for service_name in args {
        if io.should_abort() {
            return Outcome::failed("service umount aborted by operator\n");
        }
        let Some(service_index) = instance.topology.service_index(service_name) else {
            return Outcome::failed(format!("no such service '{service_name}'\n"));
        };
        let service = &instance.topology.services[service_index];
        match probe::umount(&instance.topology, service, instance.engine.remote.as_ref()) {
            Ok(()) => stdout.push_str(&format!("{service_name}: unmounted\n")),
            Err(e) => return Outcome::failed(format!("{service_name}: umount failed: {e:#}\n")),
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
        let hosts = vec![
            Host { id: "h0".into(), hostname: "oss1".into(), credential_path: None, distribution: 0 },
            Host { id: "h1".into(), hostname: "oss2".into(), credential_path: None, distribution: 0 },
        ];
        let services = vec![Service::new(
            "testfs-OST0000".into(),
            ServiceKind::Ost,
            BackFsType::Ldiskfs,
            vec![
                ServiceInstance { host: 0, device: "/dev/sdb".into(), mount_point: "/mnt/a".into(), network_id: "o2ib0".into(), zpool_create: None },
                ServiceInstance { host: 1, device: "/dev/sdc".into(), mount_point: "/mnt/b".into(), network_id: "o2ib0".into(), zpool_create: None },
            ],
            None,
            Some(0),
        )];
        let topology = Topology::new(hosts, distributions, vec![], services, HighAvailabilityConfig::default());
        Instance::new(topology, Arc::new(FakeRemoteExec::new()), "/tmp".into(), 1)
    }

    #[test]
    fn move_mounts_on_the_requested_host() {
        let instance = sample_instance();
        let outcome = ServiceSubsystem.run(
            &instance,
            &FixedSessionIo::default(),
            "move",
            &["testfs-OST0000".to_string(), "oss2".to_string()],
        );
        assert_eq!(outcome.status, 0);
        assert_eq!(
            instance.topology.services[0].mount_lock.read().unwrap().mounted_on,
            Some(1)
        );
    }

    #[test]
    fn move_to_unknown_host_fails() {
        let instance = sample_instance();
        let outcome = ServiceSubsystem.run(
            &instance,
            &FixedSessionIo::default(),
            "move",
            &["testfs-OST0000".to_string(), "oss9".to_string()],
        );
        assert_eq!(outcome.status, -1);
    }
}
