use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::instance::{BackFsType, ServiceInstance};

/// Which of the three Lustre target variants a service is (spec.md §3
/// "Service (abstract)"). `Mdt.is_mgs` folds the MGT into MDT0 the way
/// spec.md §3/§4.4 describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    Mgt,
    Mdt { is_mgs: bool },
    Ost,
}

/// The strict priority tier used by the repair-election comparator
/// (spec.md §4.1). Lower value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PriorityTier {
    Management = 1,
    Mdt = 2,
    Ost = 3,
}

impl ServiceKind {
    /// True for MGT and for an MDT marked `is_mgs` (spec.md §4.1 "services
    /// acting as management").
    pub fn acts_as_management(self) -> bool {
        matches!(
            self,
            ServiceKind::Mgt | ServiceKind::Mdt { is_mgs: true }
        )
    }

    pub fn tier(self) -> PriorityTier {
        if self.acts_as_management() {
            PriorityTier::Management
        } else {
            match self {
                ServiceKind::Mdt { .. } => PriorityTier::Mdt,
                ServiceKind::Ost => PriorityTier::Ost,
                ServiceKind::Mgt => unreachable!("Mgt always acts_as_management"),
            }
        }
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            ServiceKind::Mgt => "MGT",
            ServiceKind::Mdt { .. } => "MDT",
            ServiceKind::Ost => "OST",
        }
    }
}

/// Which instance a service is currently believed to be mounted on, if any,
/// plus which instance an operator last asked it to run on. Guarded by
/// `Service::mount_lock`, the "per-service RW lock" of spec.md §5.
#[derive(Debug, Clone, Default)]
pub struct MountState {
    /// Index into `Service::instances`; last observed by a probe.
    pub mounted_on: Option<usize>,
    /// Index into `Service::instances`; set by `service move` or `fs
    /// mount` (spec.md §4.2) and compared against `mounted_on` to detect
    /// `MountedOnWrongHost` (spec.md §3 "ServiceStatus").
    pub desired: Option<usize>,
}

/// A Lustre target, identified by a globally unique `service-name` (spec.md
/// §3 "Service (abstract)").
#[derive(Debug)]
pub struct Service {
    pub service_name: String,
    pub kind: ServiceKind,
    pub backfstype: BackFsType,
    pub instances: Vec<ServiceInstance>,
    /// Index into `Topology::filesystems`; `None` only for a standalone MGT.
    pub filesystem: Option<usize>,
    /// Target-specific index within its filesystem (MDT/OST index), `None`
    /// for a standalone MGT.
    pub index: Option<u32>,
    pub mount_lock: RwLock<MountState>,
}

impl Service {
    pub fn new(
        service_name: String,
        kind: ServiceKind,
        backfstype: BackFsType,
        instances: Vec<ServiceInstance>,
        filesystem: Option<usize>,
        index: Option<u32>,
    ) -> Self {
        Service {
            service_name,
            kind,
            backfstype,
            instances,
            filesystem,
            index,
            mount_lock: RwLock::new(MountState::default()),
        }
    }
}

// Serialize/Deserialize for Service are intentionally not derived: the
// RwLock<MountState> is runtime-only bookkeeping, never part of the loaded
// configuration (spec.md §3: "Instance (process-wide)" is the only mutable
// state beyond what config loading produces).

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn management_tier_beats_mdt_and_ost() {
        assert_eq!(ServiceKind::Mgt.tier(), PriorityTier::Management);
        assert_eq!(
            ServiceKind::Mdt { is_mgs: true }.tier(),
            PriorityTier::Management
        );
        assert_eq!(
            ServiceKind::Mdt { is_mgs: false }.tier(),
            PriorityTier::Mdt
        );
        assert_eq!(ServiceKind::Ost.tier(), PriorityTier::Ost);
        assert!(PriorityTier::Management < PriorityTier::Mdt);
        assert!(PriorityTier::Mdt < PriorityTier::Ost);
    }
}
