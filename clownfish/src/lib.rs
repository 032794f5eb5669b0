//! Clownfish daemon core: the Status & Repair Engine, Command Dispatch,
//! Session Protocol Server and HA Cluster Bootstrap (spec.md §2). Mirrors
//! the teacher's root crate: a thin `main.rs`/`cli.rs` over a library that
//! does the actual work, so the daemon, the console and the local-lookup
//! binary all link against the same core.

pub mod dispatch;
pub mod engine;
pub mod ha;
pub mod logging;
pub mod probe;
pub mod remote_exec;
pub mod server;
pub mod workspace;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clownfish_api::topology::Topology;

use crate::engine::Engine;
use crate::remote_exec::RemoteExec;

/// The process-wide instance (spec.md §3 "Instance (process-wide)"): the
/// Topology, the engine, and the only two pieces of state the running
/// daemon mutates outside of per-service mount bookkeeping (spec.md §9
/// "Global mutable state") — the lazy-prepare flag and (via `engine`) the
/// HA toggle. Created once at startup; torn down at shutdown.
pub struct Instance {
    pub topology: Arc<Topology>,
    pub engine: Arc<Engine>,
    pub workspace: PathBuf,
    lazy_prepare: AtomicBool,
    /// Bookkeeping for the staged ISO this process loop-mounted, if any
    /// (spec.md §3). Mounting/unmounting the ISO is an out-of-scope
    /// collaborator (spec.md §1); this is only the bookkeeping slot.
    iso_mount: std::sync::Mutex<Option<IsoMount>>,
    /// Path `clownfishd` was started with, if any (spec.md §4.4 "Key
    /// distribution": the Clownfish configuration file is copied in
    /// lockstep with the membership config). `None` for tests/one-shot
    /// uses that never call the daemon's `main`.
    config_path: std::sync::Mutex<Option<PathBuf>>,
}

#[derive(Debug, Clone)]
pub struct IsoMount {
    pub mount_point: PathBuf,
    pub local_host: String,
}

impl Instance {
    pub fn new(
        topology: Topology,
        remote: Arc<dyn RemoteExec>,
        workspace: PathBuf,
        worker_count: usize,
    ) -> Arc<Self> {
        let topology = Arc::new(topology);
        let engine = Engine::with_workspace(topology.clone(), remote, worker_count, Some(workspace.clone()));
        Arc::new(Instance {
            topology,
            engine,
            workspace,
            lazy_prepare: AtomicBool::new(false),
            iso_mount: std::sync::Mutex::new(None),
            config_path: std::sync::Mutex::new(None),
        })
    }

    pub fn set_config_path(&self, path: PathBuf) {
        *self.config_path.lock().unwrap() = Some(path);
    }

    pub fn config_path(&self) -> Option<PathBuf> {
        self.config_path.lock().unwrap().clone()
    }

    pub fn lazy_prepare(&self) -> bool {
        self.lazy_prepare.load(Ordering::SeqCst)
    }

    pub fn set_lazy_prepare(&self, value: bool) {
        self.lazy_prepare.store(value, Ordering::SeqCst);
    }

    pub fn set_iso_mount(&self, mount: Option<IsoMount>) {
        *self.iso_mount.lock().unwrap() = mount;
    }

    pub fn iso_mount(&self) -> Option<IsoMount> {
        self.iso_mount.lock().unwrap().clone()
    }

    /// Spawns one monitor per configured service and the repair-worker
    /// pool (spec.md §2 "Control flow"). Returns the join handles so
    /// shutdown can wait on them.
    pub fn spawn_engine_threads(self: &Arc<Self>) -> Vec<std::thread::JoinHandle<()>> {
        let mut handles = Vec::new();
        for (index, service) in self.topology.services.iter().enumerate() {
            let engine = self.engine.clone();
            let tick = clownfish_api::constants::MONITOR_TICK;
            let name = service.service_name.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("monitor-{name}"))
                    .spawn(move || crate::engine::monitor_loop(engine, index, tick))
                    .expect("failed to spawn monitor thread"),
            );
        }
        for i in 0..self.engine.worker_count {
            let engine = self.engine.clone();
            let name = format!("repair-worker-{i}");
            handles.push(
                std::thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || crate::engine::worker_loop(engine, name))
                    .expect("failed to spawn repair worker thread"),
            );
        }
        handles
    }

    /// Stops every monitor and worker thread (spec.md §4.1: both loop
    /// until `running` clears).
    pub fn shutdown(&self) {
        self.engine.running.store(false, Ordering::SeqCst);
    }
}
