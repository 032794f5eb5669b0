use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Local on-disk format under a service instance (spec.md §3, Glossary
/// "back-store kind").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackFsType {
    Ldiskfs,
    Zfs,
}

impl BackFsType {
    pub fn as_str(self) -> &'static str {
        match self {
            BackFsType::Ldiskfs => crate::constants::BACKFSTYPE_LDISKFS,
            BackFsType::Zfs => crate::constants::BACKFSTYPE_ZFS,
        }
    }

    /// The device-path shape the back-store kind requires (spec.md §3,
    /// enforced at config load per §4.5).
    pub fn device_is_well_shaped(self, device: &str) -> bool {
        match self {
            BackFsType::Ldiskfs => device.starts_with('/'),
            BackFsType::Zfs => !device.starts_with('/'),
        }
    }
}

/// A `(Service, Host, device-path, mount-point, network-id)` tuple (spec.md
/// §3 "ServiceInstance").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Index into `Topology::hosts`.
    pub host: usize,
    pub device: String,
    pub mount_point: PathBuf,
    pub network_id: String,
    /// `zpool-create` recipe, present only for `BackFsType::Zfs`.
    pub zpool_create: Option<String>,
}
