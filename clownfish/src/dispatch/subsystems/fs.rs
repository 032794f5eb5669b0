//! `fs` subsystem (spec.md §4.2): `list`, `mount`, `umount`, `help`.

use crate::dispatch::{Outcome, SessionIo, Subsystem};
use crate::{probe, Instance};

pub struct Fs;

const HELP_TEXT: &str = "fs list [fs-or-service...] | fs mount fs... | fs umount fs... | fs help\n";

impl Subsystem for Fs {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn command_names(&self) -> &'static [&'static str] {
        &["list", "mount", "umount", "help"]
    }

    fn complete_args(&self, instance: &Instance, command: &str, _args_so_far: &[String]) -> Vec<String> {
        if matches!(command, "list" | "mount" | "umount") {
            instance.topology.filesystems.iter().map(|f| f.fsname.clone()).collect()
        } else {
            Vec::new()
        }
    }

    fn run(&self, instance: &Instance, io: &dyn SessionIo, command: &str, args: &[String]) -> Outcome {
        match command {
            "help" => Outcome::ok(HELP_TEXT),
            "list" => list(instance, args),
            "mount" => mount(instance, io, args),
            "umount" => umount(instance, io, args),
            other => Outcome::failed(format!("no such command 'fs {other}'\n")),
        }
    }
}

/// `fs list` with no args prints every filesystem; with a bare fsname
/// prints that filesystem's services; with `fsname-tag` prints one service
/// (spec.md §4.2 `fs list`).
fn list(instance: &Instance, args: &[String]) -> Outcome {
    if args.is_empty() {
        let mut stdout = String::new();
        for filesystem in &instance.topology.filesystems {
            stdout.push_str(&format!(
                "{}\tmdts={}\tosts={}\tclients={}\n",
                filesystem.fsname,
                filesystem.mdts.len(),
                filesystem.osts.len(),
                filesystem.clients.len(),
            ));
        }
        return Outcome::ok(stdout);
    }

    let mut stdout = String::new();
    for arg in args {
        if let Some(filesystem) = instance.topology.filesystem(arg) {
            for index in filesystem.target_service_indices() {
                stdout.push_str(&format!("{}\n", instance.topology.services[index].service_name));
            }
        } else if let Some(service) = instance.topology.service(arg) {
            stdout.push_str(&format!("{}\n", service.service_name));
        } else {
            return Outcome::failed(format!("no such filesystem or service '{arg}'\n"));
        }
    }
    Outcome::ok(stdout)
}

fn mount(instance: &Instance, io: &dyn SessionIo, args: &[String]) -> Outcome {
    if args.is_empty() {
        return Outcome::failed("fs mount requires at least one fsname\n");
    }
    let mut stdout = String::new();
    for fsname in args {
        let Some(filesystem) = instance.topology.filesystem(fsname) else {
            return Outcome::failed(format!("no such filesystem '{fsname}'\n"));
        };
        for index in filesystem.target_service_indices().collect::<Vec<_>>() {
            if io.should_abort() {
                return Outcome::failed("fs mount aborted by operator\n");
            }
            let service = &instance.topology.services[index];
            match probe::mount(&instance.topology, service, 0, instance.engine.remote.as_ref()) {
                Ok(()) => stdout.push_str(&format!("{}: mounted\n", service.service_name)),
                Err(e) => return Outcome::failed(format!("{}: mount failed: {e:#}\n", service.service_name)),
            }
        }
    }
    Outcome::ok(stdout)
}

fn umount(instance: &Instance, io: &dyn SessionIo, args: &[String]) -> Outcome {
    if args.is_empty() {
        return Outcome::failed("fs umount requires at least one fsname\n");
    }
    let mut stdout = String::new();
    for fsname in args {
        let Some(filesystem) = instance.topology.filesystem(fsname) else {
            return Outcome::failed(format!("no such filesystem '{fsname}'\n"));
        };
        for index in filesystem.target_service_indices().collect::<Vec<_>>() {
            if io.should_abort() {
                return Outcome::failed("fs umount aborted by operator\n");
            }
            let service = &instance.topology.services[index];
            match probe::umount(&instance.topology, service, instance.engine.remote.as_ref()) {
                Ok(()) => stdout.push_str(&format!("{}: unmounted\n", service.service_name)),
                Err(e) => return Outcome::failed(format!("{}: umount failed: {e:#}\n", service.service_name)),
            }
        }
    }
    Outcome::ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FixedSessionIo;
    use crate::remote_exec::FakeRemoteExec;
    use clownfish_api::topology::filesystem::{Filesystem, MgsRef};
    use clownfish_api::topology::host::{Host, ServiceDistribution};
    use clownfish_api::topology::instance::{BackFsType, ServiceInstance};
    use clownfish_api::topology::service::{Service, ServiceKind};
    use clownfish_api::topology::{HighAvailabilityConfig, Topology};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn sample_instance() -> Arc<Instance> {
        let distributions = vec![ServiceDistribution {
            id: "d0".into(),
            package_dir: "/opt".into(),
            helper_dir: "/opt/h".into(),
        }];
        let hosts = vec![Host {
            id: "h0".into(),
            hostname: "mds1".into(),
            credential_path: None,
            distribution: 0,
        }];
        let instance = ServiceInstance {
            host: 0,
            device: "/dev/sdb".into(),
            mount_point: "/mnt/testfs-mdt0".into(),
            network_id: "o2ib0".into(),
            zpool_create: None,
        };
        let services = vec![Service::new(
            "testfs-MDT0000".into(),
            ServiceKind::Mdt { is_mgs: true },
            BackFsType::Ldiskfs,
            vec![instance],
            Some(0),
            Some(0),
        )];
        let mut mdts = BTreeMap::new();
        mdts.insert(0, 0);
        let filesystems = vec![Filesystem {
            fsname: "testfs".into(),
            mgs: MgsRef::FoldedIntoMdt(0),
            mdts,
            osts: BTreeMap::new(),
            clients: vec![],
            qos: None,
        }];
        let topology = Topology::new(hosts, distributions, filesystems, services, HighAvailabilityConfig::default());
        Instance::new(topology, Arc::new(FakeRemoteExec::new()), "/tmp".into(), 1)
    }

    #[test]
    fn list_with_no_args_prints_every_filesystem() {
        let outcome = Fs.run(&sample_instance(), &FixedSessionIo::default(), "list", &[]);
        assert_eq!(outcome.status, 0);
        assert!(outcome.stdout.contains("testfs"));
    }

    #[test]
    fn list_with_fsname_prints_its_services() {
        let outcome = Fs.run(&sample_instance(), &FixedSessionIo::default(), "list", &["testfs".to_string()]);
        assert_eq!(outcome.status, 0);
        assert!(outcome.stdout.contains("testfs-MDT0000"));
    }

    #[test]
    fn list_with_unknown_name_fails() {
        let outcome = Fs.run(&sample_instance(), &FixedSessionIo::default(), "list", &["bogus".to_string()]);
        assert_eq!(outcome.status, -1);
    }

    #[test]
    fn mount_then_list_shows_it_mounted() {
        let instance = sample_instance();
        let io = FixedSessionIo::default();
        let mounted = Fs.run(&instance, &io, "mount", &["testfs".to_string()]);
        assert_eq!(mounted.status, 0);
        assert!(instance.topology.services[0].mount_lock.read().unwrap().mounted_on.is_some());
    }
}
