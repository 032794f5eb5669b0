use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One candidate machine a service can run on (spec.md §3 "Host").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Stable id, unique across `ssh_hosts` (spec.md §4.5).
    pub id: String,
    pub hostname: String,
    pub credential_path: Option<PathBuf>,
    /// Index into `Topology::distributions`, resolved at load time.
    pub distribution: usize,
}

/// A named software bundle staged on a host before any service runs there
/// (spec.md §3 "ServiceDistribution").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDistribution {
    pub id: String,
    pub package_dir: PathBuf,
    pub helper_dir: PathBuf,
}
