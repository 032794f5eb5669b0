use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-uid override of any of the filesystem's QoS thresholds (spec.md §3
/// "QoS policy").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QosUser {
    #[serde(default)]
    pub global_iops_threshold: Option<f64>,
    #[serde(default)]
    pub global_mbps_threshold: Option<f64>,
    #[serde(default)]
    pub mds_rpc_rate: Option<f64>,
    #[serde(default)]
    pub oss_rpc_rate: Option<f64>,
}

/// `ClownfishDecayQoS`: per-filesystem quality-of-service policy (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QosPolicy {
    pub telemetry_hostname: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    pub global_iops_threshold: f64,
    pub global_mbps_threshold: f64,
    pub mds_rpc_rate: f64,
    pub oss_rpc_rate: f64,
    /// Key is uid, each user may override any threshold (spec.md §3).
    #[serde(default)]
    pub users: HashMap<u32, QosUser>,
}

fn default_true() -> bool {
    true
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl QosPolicy {
    /// Effective threshold for `uid`, honoring any per-user override
    /// (spec.md §3).
    pub fn global_iops_threshold_for(&self, uid: u32) -> f64 {
        self.users
            .get(&uid)
            .and_then(|u| u.global_iops_threshold)
            .unwrap_or(self.global_iops_threshold)
    }

    pub fn global_mbps_threshold_for(&self, uid: u32) -> f64 {
        self.users
            .get(&uid)
            .and_then(|u| u.global_mbps_threshold)
            .unwrap_or(self.global_mbps_threshold)
    }

    pub fn mds_rpc_rate_for(&self, uid: u32) -> f64 {
        self.users
            .get(&uid)
            .and_then(|u| u.mds_rpc_rate)
            .unwrap_or(self.mds_rpc_rate)
    }

    pub fn oss_rpc_rate_for(&self, uid: u32) -> f64 {
        self.users
            .get(&uid)
            .and_then(|u| u.oss_rpc_rate)
            .unwrap_or(self.oss_rpc_rate)
    }
}
