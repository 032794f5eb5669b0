use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::qos::QosPolicy;

/// How a filesystem's MGT is provided (spec.md §3 "Filesystem": "exactly
/// one MGT *or* an MDT marked `is-mgs`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgsRef {
    /// Index into `Topology::services`, pointing at a standalone `Mgt`.
    Standalone(usize),
    /// Index into `Topology::services`, pointing at the `Mdt { is_mgs: true }`
    /// that is folded into this filesystem's MDT0 (spec.md §4.4).
    FoldedIntoMdt(usize),
}

impl MgsRef {
    pub fn service_index(self) -> usize {
        match self {
            MgsRef::Standalone(idx) | MgsRef::FoldedIntoMdt(idx) => idx,
        }
    }
}

/// A host + mount-point pair that mounts a filesystem as a client (spec.md
/// §3 "Filesystem").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Index into `Topology::hosts`.
    pub host: usize,
    pub mount_point: PathBuf,
}

/// A named Lustre filesystem (spec.md §3 "Filesystem").
#[derive(Debug)]
pub struct Filesystem {
    pub fsname: String,
    pub mgs: MgsRef,
    /// Keyed by MDT index; indices into `Topology::services`.
    pub mdts: BTreeMap<u32, usize>,
    /// Keyed by OST index; indices into `Topology::services`.
    pub osts: BTreeMap<u32, usize>,
    pub clients: Vec<Client>,
    pub qos: Option<QosPolicy>,
}

impl Filesystem {
    /// All target service indices this filesystem owns (MDTs then OSTs, in
    /// index order), used by HA bootstrap and bulk operations.
    pub fn target_service_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.mdts.values().copied().chain(self.osts.values().copied())
    }
}
