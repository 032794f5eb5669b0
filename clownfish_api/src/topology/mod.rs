//! The in-memory cluster topology (spec.md §3). An arena of hosts,
//! distributions, filesystems and services with stable indices; back-pointers
//! (service → filesystem, instance → host) are stored as indices rather than
//! owning references, per spec.md §9 "Cyclic graphs". Populated once during
//! config load (`crate::config`) and frozen thereafter — the only mutable
//! state is the per-service `mount_lock` and the per-process `HaToggle` the
//! daemon layers on top.

pub mod filesystem;
pub mod host;
pub mod instance;
pub mod qos;
pub mod service;

use std::collections::HashMap;

use filesystem::Filesystem;
use host::{Host, ServiceDistribution};
use service::Service;

use crate::error::TopologyError;

/// `high_availability` block of the configuration (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighAvailabilityConfig {
    pub enabled: bool,
    pub native: bool,
    pub bindnetaddr: Option<String>,
}

impl Default for HighAvailabilityConfig {
    fn default() -> Self {
        HighAvailabilityConfig {
            enabled: false,
            native: false,
            bindnetaddr: None,
        }
    }
}

/// The frozen, validated cluster topology.
pub struct Topology {
    pub hosts: Vec<Host>,
    host_by_id: HashMap<String, usize>,
    pub distributions: Vec<ServiceDistribution>,
    distribution_by_id: HashMap<String, usize>,
    pub filesystems: Vec<Filesystem>,
    filesystem_by_name: HashMap<String, usize>,
    pub services: Vec<Service>,
    service_by_name: HashMap<String, usize>,
    pub high_availability: HighAvailabilityConfig,
}

impl Topology {
    pub fn new(
        hosts: Vec<Host>,
        distributions: Vec<ServiceDistribution>,
        filesystems: Vec<Filesystem>,
        services: Vec<Service>,
        high_availability: HighAvailabilityConfig,
    ) -> Self {
        let host_by_id = hosts
            .iter()
            .enumerate()
            .map(|(i, h)| (h.id.clone(), i))
            .collect();
        let distribution_by_id = distributions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        let filesystem_by_name = filesystems
            .iter()
            .enumerate()
            .map(|(i, f)| (f.fsname.clone(), i))
            .collect();
        let service_by_name = services
            .iter()
            .enumerate()
            .map(|(i, s)| (s.service_name.clone(), i))
            .collect();
        Topology {
            hosts,
            host_by_id,
            distributions,
            distribution_by_id,
            filesystems,
            filesystem_by_name,
            services,
            service_by_name,
            high_availability,
        }
    }

    pub fn service(&self, service_name: &str) -> Option<&Service> {
        self.service_by_name
            .get(service_name)
            .map(|&i| &self.services[i])
    }

    pub fn service_index(&self, service_name: &str) -> Option<usize> {
        self.service_by_name.get(service_name).copied()
    }

    pub fn host_by_id(&self, id: &str) -> Option<&Host> {
        self.host_by_id.get(id).map(|&i| &self.hosts[i])
    }

    pub fn host_by_hostname(&self, hostname: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.hostname == hostname)
    }

    pub fn filesystem(&self, fsname: &str) -> Option<&Filesystem> {
        self.filesystem_by_name.get(fsname).map(|&i| &self.filesystems[i])
    }

    pub fn distribution(&self, id: &str) -> Option<&ServiceDistribution> {
        self.distribution_by_id.get(id).map(|&i| &self.distributions[i])
    }

    /// Every configured service, in arena order; used to spawn one monitor
    /// per service (spec.md §4.1) and by bulk operations.
    pub fn all_services(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    /// All hosts referenced by any service instance, across every filesystem
    /// and every MGT, deduplicated (spec.md §4.4 "node-list", testable
    /// property #5 and scenario #8). A host with no instances anywhere is
    /// excluded.
    pub fn hosts_with_any_instance(&self) -> Vec<&Host> {
        let mut seen = std::collections::BTreeSet::new();
        for service in &self.services {
            for instance in &service.instances {
                seen.insert(instance.host);
            }
        }
        seen.into_iter().map(|i| &self.hosts[i]).collect()
    }

    /// Resolves `(service-name, hostname)` to the matching instance's device
    /// and mount point (spec.md §4.6 Local Lookup Utility). `service-name`
    /// must be either a bare MGT id or `<fsname>-<tag>`.
    pub fn locate(
        &self,
        service_name: &str,
        hostname: &str,
    ) -> Result<(&str, &std::path::Path), TopologyError> {
        let service = self
            .service(service_name)
            .ok_or_else(|| TopologyError::NoSuchService(service_name.to_string()))?;
        let instance = service
            .instances
            .iter()
            .find(|inst| self.hosts[inst.host].hostname == hostname)
            .ok_or_else(|| TopologyError::NoSuchInstance {
                service_name: service_name.to_string(),
                hostname: hostname.to_string(),
            })?;
        Ok((instance.device.as_str(), instance.mount_point.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::host::{Host, ServiceDistribution};
    use crate::topology::instance::{BackFsType, ServiceInstance};
    use crate::topology::service::{Service, ServiceKind};
    use std::path::PathBuf;

    fn sample_instance(host: usize) -> ServiceInstance {
        ServiceInstance {
            host,
            device: "/dev/sdb".to_string(),
            mount_point: PathBuf::from("/mnt/target"),
            network_id: "o2ib0".to_string(),
            zpool_create: None,
        }
    }

    #[test]
    fn locate_resolves_device_and_mount_point() {
        let distributions = vec![ServiceDistribution {
            id: "dist0".into(),
            package_dir: "/opt/lustre".into(),
            helper_dir: "/opt/lustre/helpers".into(),
        }];
        let hosts = vec![Host {
            id: "host0".into(),
            hostname: "oss1".into(),
            credential_path: None,
            distribution: 0,
        }];
        let services = vec![Service::new(
            "testfs-OST0000".into(),
            ServiceKind::Ost,
            BackFsType::Ldiskfs,
            vec![sample_instance(0)],
            Some(0),
            Some(0),
        )];
        let filesystems = vec![];
        let topology = Topology::new(
            hosts,
            distributions,
            filesystems,
            services,
            HighAvailabilityConfig::default(),
        );

        let (device, mount_point) = topology.locate("testfs-OST0000", "oss1").unwrap();
        assert_eq!(device, "/dev/sdb");
        assert_eq!(mount_point, std::path::Path::new("/mnt/target"));

        assert!(matches!(
            topology.locate("testfs-OST0000", "oss2"),
            Err(TopologyError::NoSuchInstance { .. })
        ));
        assert!(matches!(
            topology.locate("nonexistent", "oss1"),
            Err(TopologyError::NoSuchService(_))
        ));
    }

    #[test]
    fn hosts_with_any_instance_excludes_idle_hosts() {
        let distributions = vec![ServiceDistribution {
            id: "dist0".into(),
            package_dir: "/opt".into(),
            helper_dir: "/opt/helpers".into(),
        }];
        let hosts = vec![
            Host {
                id: "h1".into(),
                hostname: "h1".into(),
                credential_path: None,
                distribution: 0,
            },
            Host {
                id: "h2".into(),
                hostname: "h2".into(),
                credential_path: None,
                distribution: 0,
            },
            Host {
                id: "h3".into(),
                hostname: "h3".into(),
                credential_path: None,
                distribution: 0,
            },
        ];
        let services = vec![
            Service::new(
                "mgs0".into(),
                ServiceKind::Mgt,
                BackFsType::Ldiskfs,
                vec![sample_instance(0)],
                None,
                None,
            ),
            Service::new(
                "testfs-OST0000".into(),
                ServiceKind::Ost,
                BackFsType::Ldiskfs,
                vec![sample_instance(1)],
                Some(0),
                Some(0),
            ),
        ];
        let topology = Topology::new(
            hosts,
            distributions,
            vec![],
            services,
            HighAvailabilityConfig::default(),
        );
        let hostnames: Vec<&str> = topology
            .hosts_with_any_instance()
            .into_iter()
            .map(|h| h.hostname.as_str())
            .collect();
        assert_eq!(hostnames, vec!["h1", "h2"]);
    }
}
