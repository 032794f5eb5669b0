use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of problem (or lack of one) a probe observed (spec.md §3
/// "ServiceStatus").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceStatusKind {
    Healthy,
    NotMounted,
    MountedOnWrongHost,
    MountedOnMultiple,
    Unreachable,
}

impl ServiceStatusKind {
    pub fn has_problem(self) -> bool {
        !matches!(self, ServiceStatusKind::Healthy)
    }
}

/// `(service, check-time, kind)` plus the derived `has-problem` boolean
/// (spec.md §3 "ServiceStatus"). Ephemeral: never persisted across restarts
/// (spec.md §1 Non-goals).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service_name: String,
    pub check_time: DateTime<Utc>,
    pub kind: ServiceStatusKind,
}

impl ServiceStatus {
    pub fn new(service_name: impl Into<String>, check_time: DateTime<Utc>, kind: ServiceStatusKind) -> Self {
        ServiceStatus {
            service_name: service_name.into(),
            check_time,
            kind,
        }
    }

    pub fn has_problem(&self) -> bool {
        self.kind.has_problem()
    }
}
