//! The typed configuration tree (spec.md §4.5, §6) and the validation pass
//! that turns it into a frozen `Topology`. Mirrors the teacher's
//! `trident_api::config`: plain serde structs for the wire/file shape, with
//! a separate fallible `build()` step that cross-checks references and
//! produces the runtime model.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::topology::filesystem::{Client, Filesystem, MgsRef};
use crate::topology::host::{Host, ServiceDistribution};
use crate::topology::instance::{BackFsType, ServiceInstance};
use crate::topology::qos::{QosPolicy, QosUser};
use crate::topology::service::{Service, ServiceKind};
use crate::topology::{HighAvailabilityConfig, Topology};

/// Root of the Clownfish configuration file (spec.md §4.5, §6: YAML or
/// equivalent typed tree).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub lustre_distributions: Vec<DistributionConfig>,
    #[serde(default)]
    pub ssh_hosts: Vec<HostConfig>,
    #[serde(default)]
    pub mgs_list: Vec<MgsConfig>,
    #[serde(default)]
    pub lustres: Vec<LustreConfig>,
    #[serde(default)]
    pub high_availability: HighAvailabilityConfigFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionConfig {
    pub id: String,
    pub package_dir: PathBuf,
    pub helper_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub id: String,
    pub hostname: String,
    pub distribution_id: String,
    #[serde(default)]
    pub credential_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    pub host_id: String,
    pub device: String,
    pub mount_point: PathBuf,
    pub network_id: String,
    pub backfstype: BackFsType,
    #[serde(default)]
    pub zpool_create: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MgsConfig {
    pub id: String,
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MdtConfig {
    pub index: u32,
    pub backfstype: BackFsType,
    #[serde(default)]
    pub is_mgs: bool,
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OstConfig {
    pub index: u32,
    pub backfstype: BackFsType,
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub host_id: String,
    pub mount_point: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LustreConfig {
    pub fsname: String,
    #[serde(default)]
    pub mgs_id: Option<String>,
    pub mdts: Vec<MdtConfig>,
    pub osts: Vec<OstConfig>,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub qos: Option<QosConfig>,
}

/// File-shape mirror of [`QosPolicy`], keeping per-uid overrides as a `Vec`
/// (rather than the runtime `HashMap`) so `build()` can reject a duplicate
/// `uid` instead of silently letting the last entry win (spec.md §4.5
/// "each uid must be unique within the filesystem").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QosConfig {
    pub telemetry_hostname: String,
    #[serde(default = "qos_default_enabled")]
    pub enabled: bool,
    pub interval_secs: u64,
    pub global_iops_threshold: f64,
    pub global_mbps_threshold: f64,
    pub mds_rpc_rate: f64,
    pub oss_rpc_rate: f64,
    #[serde(default)]
    pub users: Vec<QosUserEntry>,
}

fn qos_default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QosUserEntry {
    pub uid: u32,
    #[serde(default)]
    pub global_iops_threshold: Option<f64>,
    #[serde(default)]
    pub global_mbps_threshold: Option<f64>,
    #[serde(default)]
    pub mds_rpc_rate: Option<f64>,
    #[serde(default)]
    pub oss_rpc_rate: Option<f64>,
}

impl QosUserEntry {
    fn into_overrides(self) -> QosUser {
        QosUser {
            global_iops_threshold: self.global_iops_threshold,
            global_mbps_threshold: self.global_mbps_threshold,
            mds_rpc_rate: self.mds_rpc_rate,
            oss_rpc_rate: self.oss_rpc_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HighAvailabilityConfigFile {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub native: bool,
    #[serde(default)]
    pub bindnetaddr: Option<String>,
}

impl Default for HighAvailabilityConfigFile {
    fn default() -> Self {
        HighAvailabilityConfigFile {
            enabled: false,
            native: false,
            bindnetaddr: None,
        }
    }
}

impl ConfigFile {
    /// Load and parse a configuration file from disk (spec.md §6). Does not
    /// validate; call `build()` on the result.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|_| ConfigError::Read {
            path: path.display().to_string(),
        })?;
        serde_yaml::from_str(&text).map_err(|_| ConfigError::Parse {
            path: path.display().to_string(),
        })
    }

    /// Validates the configuration and builds the frozen `Topology`
    /// (spec.md §4.5, §3 Invariants). Fails on the first unrecoverable
    /// error, naming the offending key (spec.md §4.5 closing paragraph).
    pub fn build(&self) -> Result<Topology, ConfigError> {
        let distributions = build_distributions(&self.lustre_distributions)?;
        let distribution_ids: HashMap<&str, usize> = distributions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.as_str(), i))
            .collect();

        let hosts = build_hosts(&self.ssh_hosts, &distribution_ids)?;
        let host_ids: HashMap<&str, usize> =
            hosts.iter().enumerate().map(|(i, h)| (h.id.as_str(), i)).collect();

        if !self.high_availability.native && self.high_availability.bindnetaddr.is_none() {
            return Err(ConfigError::MissingBindnetaddr);
        }
        let high_availability = HighAvailabilityConfig {
            enabled: self.high_availability.enabled,
            native: self.high_availability.native,
            bindnetaddr: self.high_availability.bindnetaddr.clone(),
        };

        let mut services = Vec::new();
        let mut service_names = HashSet::new();

        // MGTs first so their indices are stable and known before filesystems
        // resolve `mgs_id` references.
        let mut mgt_index_by_id: HashMap<&str, usize> = HashMap::new();
        for mgs in &self.mgs_list {
            check_unique(&mut service_names, &mgs.id).map_err(|service_name| {
                ConfigError::DuplicateServiceName { service_name }
            })?;
            let instances = build_instances(&mgs.instances, &host_ids, &mgs.id)?;
            if instances.is_empty() {
                return Err(ConfigError::EmptyInstanceSet {
                    service_name: mgs.id.clone(),
                });
            }
            let backfstype = instances[0].1;
            mgt_index_by_id.insert(mgs.id.as_str(), services.len());
            services.push(Service::new(
                mgs.id.clone(),
                ServiceKind::Mgt,
                backfstype,
                instances.into_iter().map(|(inst, _)| inst).collect(),
                None,
                None,
            ));
        }

        let mut filesystems = Vec::new();
        let mut fsnames = HashSet::new();
        for lustre in &self.lustres {
            check_unique(&mut fsnames, &lustre.fsname)
                .map_err(|fsname| ConfigError::DuplicateFsname { fsname })?;
            let fs_index = filesystems.len();

            if lustre.mdts.is_empty() {
                return Err(ConfigError::EmptyMdtSet {
                    fsname: lustre.fsname.clone(),
                });
            }
            if lustre.osts.is_empty() {
                return Err(ConfigError::EmptyOstSet {
                    fsname: lustre.fsname.clone(),
                });
            }

            let mgs_mdt_entries: Vec<&MdtConfig> =
                lustre.mdts.iter().filter(|mdt| mdt.is_mgs).collect();
            if mgs_mdt_entries.len() > 1 {
                return Err(ConfigError::MultipleMgsMdt {
                    fsname: lustre.fsname.clone(),
                    first: mgs_mdt_entries[0].index,
                    second: mgs_mdt_entries[1].index,
                });
            }

            let mgs = match (&lustre.mgs_id, mgs_mdt_entries.first()) {
                (Some(mgs_id), None) => {
                    let idx = *mgt_index_by_id.get(mgs_id.as_str()).ok_or_else(|| {
                        ConfigError::UnknownMgs {
                            fsname: lustre.fsname.clone(),
                            mgs_id: mgs_id.clone(),
                        }
                    })?;
                    MgsRef::Standalone(idx)
                }
                (None, Some(_)) => {
                    // Resolved to the MDT's service index after MDTs are built below.
                    MgsRef::FoldedIntoMdt(usize::MAX)
                }
                (None, None) => {
                    return Err(ConfigError::MissingMgs {
                        fsname: lustre.fsname.clone(),
                    })
                }
                (Some(_), Some(mdt)) => {
                    return Err(ConfigError::MultipleMgsMdt {
                        fsname: lustre.fsname.clone(),
                        first: mdt.index,
                        second: mdt.index,
                    })
                }
            };

            let mut mdts = BTreeMap::new();
            let mut mdt_indices = HashSet::new();
            let mut mgs = mgs;
            for mdt in &lustre.mdts {
                if !mdt_indices.insert(mdt.index) {
                    return Err(ConfigError::DuplicateMdtIndex {
                        fsname: lustre.fsname.clone(),
                        index: mdt.index,
                    });
                }
                let service_name = format!("{}-MDT{:04x}", lustre.fsname, mdt.index);
                check_unique(&mut service_names, &service_name).map_err(|service_name| {
                    ConfigError::DuplicateServiceName { service_name }
                })?;
                let instances = build_instances(&mdt.instances, &host_ids, &service_name)?;
                if instances.is_empty() {
                    return Err(ConfigError::EmptyInstanceSet {
                        service_name: service_name.clone(),
                    });
                }
                let service_index = services.len();
                if mdt.is_mgs {
                    mgs = MgsRef::FoldedIntoMdt(service_index);
                }
                mdts.insert(mdt.index, service_index);
                services.push(Service::new(
                    service_name,
                    ServiceKind::Mdt { is_mgs: mdt.is_mgs },
                    mdt.backfstype,
                    instances.into_iter().map(|(inst, _)| inst).collect(),
                    Some(fs_index),
                    Some(mdt.index),
                ));
            }

            let mut osts = BTreeMap::new();
            let mut ost_indices = HashSet::new();
            for ost in &lustre.osts {
                if !ost_indices.insert(ost.index) {
                    return Err(ConfigError::DuplicateOstIndex {
                        fsname: lustre.fsname.clone(),
                        index: ost.index,
                    });
                }
                let service_name = format!("{}-OST{:04x}", lustre.fsname, ost.index);
                check_unique(&mut service_names, &service_name).map_err(|service_name| {
                    ConfigError::DuplicateServiceName { service_name }
                })?;
                let instances = build_instances(&ost.instances, &host_ids, &service_name)?;
                if instances.is_empty() {
                    return Err(ConfigError::EmptyInstanceSet {
                        service_name: service_name.clone(),
                    });
                }
                let service_index = services.len();
                osts.insert(ost.index, service_index);
                services.push(Service::new(
                    service_name,
                    ServiceKind::Ost,
                    ost.backfstype,
                    instances.into_iter().map(|(inst, _)| inst).collect(),
                    Some(fs_index),
                    Some(ost.index),
                ));
            }

            let mut clients = Vec::new();
            for client in &lustre.clients {
                let host = *host_ids.get(client.host_id.as_str()).ok_or_else(|| {
                    ConfigError::UnknownHost {
                        service_name: lustre.fsname.clone(),
                        host_id: client.host_id.clone(),
                    }
                })?;
                clients.push(Client {
                    host,
                    mount_point: client.mount_point.clone(),
                });
            }

            let qos = lustre
                .qos
                .as_ref()
                .map(|qos| build_qos(&lustre.fsname, qos))
                .transpose()?;

            filesystems.push(Filesystem {
                fsname: lustre.fsname.clone(),
                mgs,
                mdts,
                osts,
                clients,
                qos,
            });
        }

        Ok(Topology::new(
            hosts,
            distributions,
            filesystems,
            services,
            high_availability,
        ))
    }
}

fn check_unique(seen: &mut HashSet<String>, value: &str) -> Result<(), String> {
    if !seen.insert(value.to_string()) {
        return Err(value.to_string());
    }
    Ok(())
}

fn build_distributions(
    configs: &[DistributionConfig],
) -> Result<Vec<ServiceDistribution>, ConfigError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(configs.len());
    for d in configs {
        check_unique(&mut seen, &d.id)
            .map_err(|id| ConfigError::DuplicateDistributionId { id })?;
        out.push(ServiceDistribution {
            id: d.id.clone(),
            package_dir: d.package_dir.clone(),
            helper_dir: d.helper_dir.clone(),
        });
    }
    Ok(out)
}

fn build_hosts(
    configs: &[HostConfig],
    distribution_ids: &HashMap<&str, usize>,
) -> Result<Vec<Host>, ConfigError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(configs.len());
    for h in configs {
        check_unique(&mut seen, &h.id).map_err(|id| ConfigError::DuplicateHostId { id })?;
        let distribution = *distribution_ids
            .get(h.distribution_id.as_str())
            .ok_or_else(|| ConfigError::UnknownDistribution {
                host_id: h.id.clone(),
                distribution_id: h.distribution_id.clone(),
            })?;
        out.push(Host {
            id: h.id.clone(),
            hostname: h.hostname.clone(),
            credential_path: h.credential_path.clone(),
            distribution,
        });
    }
    Ok(out)
}

fn build_instances(
    configs: &[InstanceConfig],
    host_ids: &HashMap<&str, usize>,
    service_name: &str,
) -> Result<Vec<(ServiceInstance, BackFsType)>, ConfigError> {
    let mut out = Vec::with_capacity(configs.len());
    for inst in configs {
        let host = *host_ids
            .get(inst.host_id.as_str())
            .ok_or_else(|| ConfigError::UnknownHost {
                service_name: service_name.to_string(),
                host_id: inst.host_id.clone(),
            })?;
        if !inst.backfstype.device_is_well_shaped(&inst.device) {
            return Err(ConfigError::DeviceShapeMismatch {
                device: inst.device.clone(),
                kind: inst.backfstype.as_str(),
                expected: match inst.backfstype {
                    BackFsType::Ldiskfs => "an absolute path",
                    BackFsType::Zfs => "a non-absolute pool/dataset name",
                },
            });
        }
        out.push((
            ServiceInstance {
                host,
                device: inst.device.clone(),
                mount_point: inst.mount_point.clone(),
                network_id: inst.network_id.clone(),
                zpool_create: inst.zpool_create.clone(),
            },
            inst.backfstype,
        ));
    }
    Ok(out)
}

/// Converts the file-shape `QosConfig` into the runtime `QosPolicy`,
/// rejecting a duplicate `uid` among the per-user overrides (spec.md §4.5).
fn build_qos(fsname: &str, qos: &QosConfig) -> Result<QosPolicy, ConfigError> {
    let mut users = HashMap::with_capacity(qos.users.len());
    for entry in &qos.users {
        let uid = entry.uid;
        if users.insert(uid, entry.clone().into_overrides()).is_some() {
            return Err(ConfigError::DuplicateQosUid {
                fsname: fsname.to_string(),
                uid,
            });
        }
    }
    Ok(QosPolicy {
        telemetry_hostname: qos.telemetry_hostname.clone(),
        enabled: qos.enabled,
        interval: std::time::Duration::from_secs(qos.interval_secs),
        global_iops_threshold: qos.global_iops_threshold,
        global_mbps_threshold: qos.global_mbps_threshold,
        mds_rpc_rate: qos.mds_rpc_rate,
        oss_rpc_rate: qos.oss_rpc_rate,
        users,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> ConfigFile {
        ConfigFile {
            lustre_distributions: vec![DistributionConfig {
                id: "dist0".into(),
                package_dir: "/opt/lustre".into(),
                helper_dir: "/opt/lustre/helpers".into(),
            }],
            ssh_hosts: vec![
                HostConfig {
                    id: "h0".into(),
                    hostname: "mgs1".into(),
                    distribution_id: "dist0".into(),
                    credential_path: None,
                },
                HostConfig {
                    id: "h1".into(),
                    hostname: "mds1".into(),
                    distribution_id: "dist0".into(),
                    credential_path: None,
                },
                HostConfig {
                    id: "h2".into(),
                    hostname: "oss1".into(),
                    distribution_id: "dist0".into(),
                    credential_path: None,
                },
            ],
            mgs_list: vec![MgsConfig {
                id: "mgs0".into(),
                instances: vec![InstanceConfig {
                    host_id: "h0".into(),
                    device: "/dev/sda".into(),
                    mount_point: "/mnt/mgs".into(),
                    network_id: "o2ib0".into(),
                    backfstype: BackFsType::Ldiskfs,
                    zpool_create: None,
                }],
            }],
            lustres: vec![LustreConfig {
                fsname: "testfs".into(),
                mgs_id: Some("mgs0".into()),
                mdts: vec![MdtConfig {
                    index: 0,
                    backfstype: BackFsType::Ldiskfs,
                    is_mgs: false,
                    instances: vec![InstanceConfig {
                        host_id: "h1".into(),
                        device: "/dev/sdb".into(),
                        mount_point: "/mnt/testfs-mdt0".into(),
                        network_id: "o2ib0".into(),
                        backfstype: BackFsType::Ldiskfs,
                        zpool_create: None,
                    }],
                }],
                osts: vec![OstConfig {
                    index: 0,
                    backfstype: BackFsType::Ldiskfs,
                    instances: vec![InstanceConfig {
                        host_id: "h2".into(),
                        device: "/dev/sdc".into(),
                        mount_point: "/mnt/testfs-ost0".into(),
                        network_id: "o2ib0".into(),
                        backfstype: BackFsType::Ldiskfs,
                        zpool_create: None,
                    }],
                }],
                clients: vec![],
                qos: None,
            }],
            high_availability: HighAvailabilityConfigFile {
                enabled: true,
                native: true,
                bindnetaddr: None,
            },
        }
    }

    #[test]
    fn minimal_config_builds() {
        let topology = minimal_config().build().unwrap();
        assert_eq!(topology.services.len(), 3);
        assert!(topology.service("mgs0").is_some());
        assert!(topology.service("testfs-MDT0000").is_some());
        assert!(topology.service("testfs-OST0000").is_some());
        let fs = topology.filesystem("testfs").unwrap();
        assert_eq!(fs.mdts.len(), 1);
        assert_eq!(fs.osts.len(), 1);
    }

    #[test]
    fn missing_mgs_is_rejected() {
        let mut config = minimal_config();
        config.lustres[0].mgs_id = None;
        assert!(matches!(
            config.build(),
            Err(ConfigError::MissingMgs { .. })
        ));
    }

    #[test]
    fn unknown_host_is_rejected() {
        let mut config = minimal_config();
        config.mgs_list[0].instances[0].host_id = "nope".into();
        assert!(matches!(config.build(), Err(ConfigError::UnknownHost { .. })));
    }

    #[test]
    fn device_shape_mismatch_is_rejected() {
        let mut config = minimal_config();
        config.mgs_list[0].instances[0].device = "not-absolute".into();
        assert!(matches!(
            config.build(),
            Err(ConfigError::DeviceShapeMismatch { .. })
        ));
    }

    #[test]
    fn mdt_marked_is_mgs_folds_into_filesystem() {
        let mut config = minimal_config();
        config.mgs_list.clear();
        config.lustres[0].mgs_id = None;
        config.lustres[0].mdts[0].is_mgs = true;
        let topology = config.build().unwrap();
        let fs = topology.filesystem("testfs").unwrap();
        assert!(matches!(fs.mgs, MgsRef::FoldedIntoMdt(_)));
    }

    #[test]
    fn missing_bindnetaddr_rejected_when_not_native() {
        let mut config = minimal_config();
        config.high_availability.native = false;
        config.high_availability.bindnetaddr = None;
        assert!(matches!(
            config.build(),
            Err(ConfigError::MissingBindnetaddr)
        ));
    }

    #[test]
    fn qos_with_unique_uids_builds_and_resolves_overrides() {
        let mut config = minimal_config();
        config.lustres[0].qos = Some(QosConfig {
            telemetry_hostname: "telemetry0".into(),
            enabled: true,
            interval_secs: 30,
            global_iops_threshold: 1000.0,
            global_mbps_threshold: 500.0,
            mds_rpc_rate: 200.0,
            oss_rpc_rate: 400.0,
            users: vec![QosUserEntry {
                uid: 1001,
                global_iops_threshold: Some(2000.0),
                global_mbps_threshold: None,
                mds_rpc_rate: None,
                oss_rpc_rate: None,
            }],
        });
        let topology = config.build().unwrap();
        let qos = topology.filesystem("testfs").unwrap().qos.as_ref().unwrap();
        assert_eq!(qos.global_iops_threshold_for(1001), 2000.0);
        assert_eq!(qos.global_iops_threshold_for(42), 1000.0);
    }

    #[test]
    fn qos_with_duplicate_uid_is_rejected() {
        let mut config = minimal_config();
        config.lustres[0].qos = Some(QosConfig {
            telemetry_hostname: "telemetry0".into(),
            enabled: true,
            interval_secs: 30,
            global_iops_threshold: 1000.0,
            global_mbps_threshold: 500.0,
            mds_rpc_rate: 200.0,
            oss_rpc_rate: 400.0,
            users: vec![
                QosUserEntry { uid: 1001, global_iops_threshold: None, global_mbps_threshold: None, mds_rpc_rate: None, oss_rpc_rate: None },
                QosUserEntry { uid: 1001, global_iops_threshold: None, global_mbps_threshold: None, mds_rpc_rate: None, oss_rpc_rate: None },
            ],
        });
        assert!(matches!(
            config.build(),
            Err(ConfigError::DuplicateQosUid { uid: 1001, .. })
        ));
    }
}
