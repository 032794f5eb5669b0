//! Service Probe Wrapper (spec.md §2 component 2): the `check/mount/umount/
//! format/fix` capability the engine drives every service through. Wraps
//! `RemoteExec` the way the teacher wraps `Dependency::cmd()` calls behind
//! `osutils` helpers — the engine never shells out directly.

use chrono::Utc;
use clownfish_api::topology::service::Service;
use clownfish_api::topology::Topology;
use clownfish_api::status::{ServiceStatus, ServiceStatusKind};

use crate::remote_exec::RemoteExec;

/// Probes `service`'s instances and derives a fresh `ServiceStatus` (spec.md
/// §4.1 "Monitor protocol", §3 "ServiceStatus").
pub fn check(topology: &Topology, service: &Service, remote: &dyn RemoteExec) -> ServiceStatus {
    let mut mounted_hosts = Vec::new();
    let mut any_unreachable = false;

    for instance in &service.instances {
        let hostname = &topology.hosts[instance.host].hostname;
        match remote.run(
            &service.service_name,
            hostname,
            &["findmnt", "-n", instance.mount_point.to_str().unwrap_or("")],
        ) {
            Ok(out) if out.is_success() && !out.stdout.trim().is_empty() => {
                mounted_hosts.push(instance.host);
            }
            Ok(_) => {}
            Err(_) => any_unreachable = true,
        }
    }

    let kind = if any_unreachable {
        ServiceStatusKind::Unreachable
    } else if mounted_hosts.is_empty() {
        ServiceStatusKind::NotMounted
    } else if mounted_hosts.len() > 1 {
        ServiceStatusKind::MountedOnMultiple
    } else {
        let mounted_instance = service
            .instances
            .iter()
            .position(|inst| inst.host == mounted_hosts[0]);
        let desired = service.mount_lock.read().unwrap().desired;
        match (desired, mounted_instance) {
            (Some(d), Some(m)) if d != m => ServiceStatusKind::MountedOnWrongHost,
            _ => ServiceStatusKind::Healthy,
        }
    };

    {
        let mut state = service.mount_lock.write().unwrap();
        state.mounted_on = service
            .instances
            .iter()
            .position(|inst| mounted_hosts.contains(&inst.host));
    }

    ServiceStatus::new(service.service_name.clone(), Utc::now(), kind)
}

/// Mounts `service` on `instance_index`, recording it as the desired
/// instance (spec.md §4.2 `service move`, `fs mount`).
pub fn mount(
    topology: &Topology,
    service: &Service,
    instance_index: usize,
    remote: &dyn RemoteExec,
) -> anyhow::Result<()> {
    let instance = &service.instances[instance_index];
    let hostname = &topology.hosts[instance.host].hostname;
    let out = remote.run(
        &service.service_name,
        hostname,
        &["mount", "-t", "lustre", &instance.device, instance.mount_point.to_str().unwrap_or("")],
    )?;
    if !out.is_success() {
        anyhow::bail!("mount failed on {hostname}: {}", out.stderr);
    }
    let mut state = service.mount_lock.write().unwrap();
    state.desired = Some(instance_index);
    state.mounted_on = Some(instance_index);
    Ok(())
}

/// Unmounts `service` from whichever instance it is believed mounted on
/// (spec.md §4.2 `fs umount`, `service umount`).
pub fn umount(topology: &Topology, service: &Service, remote: &dyn RemoteExec) -> anyhow::Result<()> {
    let mounted_on = service.mount_lock.read().unwrap().mounted_on;
    let Some(instance_index) = mounted_on else {
        return Ok(());
    };
    let instance = &service.instances[instance_index];
    let hostname = &topology.hosts[instance.host].hostname;
    let out = remote.run(
        &service.service_name,
        hostname,
        &["umount", instance.mount_point.to_str().unwrap_or("")],
    )?;
    if !out.is_success() {
        anyhow::bail!("umount failed on {hostname}: {}", out.stderr);
    }
    let mut state = service.mount_lock.write().unwrap();
    state.mounted_on = None;
    state.desired = None;
    Ok(())
}

/// Formats every instance of `service` (spec.md §4.2 `format_all`).
pub fn format(topology: &Topology, service: &Service, remote: &dyn RemoteExec) -> anyhow::Result<()> {
    for instance in &service.instances {
        let hostname = &topology.hosts[instance.host].hostname;
        let argv: Vec<&str> = if let Some(recipe) = &instance.zpool_create {
            vec!["zpool", "create", &instance.device, recipe]
        } else {
            vec!["mkfs.lustre", &instance.device]
        };
        let out = remote.run(&service.service_name, hostname, &argv)?;
        if !out.is_success() {
            anyhow::bail!("format failed on {hostname}: {}", out.stderr);
        }
    }
    Ok(())
}

/// Runs the service's fix procedure: unmount everywhere it is wrongly
/// mounted, then (re-)mount on its first instance (spec.md §4.1 "Repair
/// worker protocol" step 5).
pub fn fix(topology: &Topology, service: &Service, remote: &dyn RemoteExec) -> anyhow::Result<()> {
    umount(topology, service, remote)?;
    mount(topology, service, 0, remote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_exec::{FakeRemoteExec, RemoteOutput};
    use clownfish_api::topology::host::{Host, ServiceDistribution};
    use clownfish_api::topology::instance::{BackFsType, ServiceInstance};
    use clownfish_api::topology::service::ServiceKind;
    use clownfish_api::topology::HighAvailabilityConfig;

    fn single_instance_topology() -> (Topology, usize) {
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
        (topology, 0)
    }

    #[test]
    fn check_reports_not_mounted_when_findmnt_is_empty() {
        let (topology, idx) = single_instance_topology();
        let remote = FakeRemoteExec::new();
        let status = check(&topology, &topology.services[idx], &remote);
        assert_eq!(status.kind, ServiceStatusKind::NotMounted);
    }

    #[test]
    fn check_reports_healthy_when_mounted_on_its_only_instance() {
        let (topology, idx) = single_instance_topology();
        let remote = FakeRemoteExec::new();
        remote.script(
            "oss1",
            "findmnt -n /mnt/testfs-ost0",
            RemoteOutput::ok("/dev/sdb /mnt/testfs-ost0 lustre rw"),
        );
        let status = check(&topology, &topology.services[idx], &remote);
        assert_eq!(status.kind, ServiceStatusKind::Healthy);
        assert!(!status.has_problem());
    }

    #[test]
    fn mount_then_umount_clears_mount_state() {
        let (topology, idx) = single_instance_topology();
        let remote = FakeRemoteExec::new();
        mount(&topology, &topology.services[idx], 0, &remote).unwrap();
        assert_eq!(
            topology.services[idx].mount_lock.read().unwrap().mounted_on,
            Some(0)
        );
        umount(&topology, &topology.services[idx], &remote).unwrap();
        assert_eq!(
            topology.services[idx].mount_lock.read().unwrap().mounted_on,
            None
        );
    }
}
