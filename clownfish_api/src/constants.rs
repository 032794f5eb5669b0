//! Defaults named throughout spec.md. Centralized the way
//! `trident_api::constants` collects magic numbers used across modules.

use std::time::Duration;

/// §4.1: monitor tick period.
pub const MONITOR_TICK: Duration = Duration::from_secs(1);

/// §4.1: size of the repair worker pool.
pub const REPAIR_WORKER_COUNT: usize = 5;

/// §4.3: size of the session worker pool.
pub const SESSION_WORKER_COUNT: usize = 10;

/// §4.3: session idle eviction timeout.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// §4.3: console-side keepalive ping interval.
pub const PING_INTERVAL: Duration = Duration::from_secs(1);

/// §4.2: budget within which an `always_fast` command must complete.
pub const FAST_COMMAND_BUDGET: Duration = Duration::from_secs(1);

/// §4.3: abort-to-return bound is 2x the lock-wait timeout.
pub const ABORT_RETURN_BOUND: Duration = Duration::from_secs(2);

/// §6: default Session Protocol Server port.
pub const DEFAULT_SERVER_PORT: u16 = 8787;

/// §4.4: corosync totem multicast address (fixed per spec.md).
pub const COROSYNC_MCAST_ADDR: &str = "226.94.1.2";

/// §4.4: corosync totem multicast port (fixed per spec.md).
pub const COROSYNC_MCAST_PORT: u16 = 5405;

/// §4.4: corosync totem TTL (fixed per spec.md).
pub const COROSYNC_TTL: u8 = 1;

/// §4.4: path the membership config is installed to on every HA host.
pub const COROSYNC_CONFIG_PATH: &str = "/etc/corosync/corosync.conf";

/// §4.4: path the shared authentication key is installed to on every HA host.
pub const COROSYNC_AUTHKEY_PATH: &str = "/etc/corosync/authkey";

/// §4.4: prefix for every generated Pacemaker resource/template name.
pub const RESOURCE_NAME_PREFIX: &str = "clf_";

/// §3: device-path constant naming the ldiskfs back-store kind.
pub const BACKFSTYPE_LDISKFS: &str = "ldiskfs";

/// §3: device-path constant naming the zfs back-store kind.
pub const BACKFSTYPE_ZFS: &str = "zfs";
