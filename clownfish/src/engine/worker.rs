//! Repair worker loop (spec.md §4.1 "Repair worker protocol").

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, info, warn};

use super::Engine;
use crate::probe;

/// Runs one repair worker until `engine.running` clears. `worker_name` is
/// used for logging and, if the engine was given an invocation workspace,
/// to name this worker's `thread_fixing_<worker_name>` sub-directory
/// (spec.md §6 "workspace directory per invocation", after
/// `clownfish_server.py`'s `css_fix_thread`).
pub fn worker_loop(engine: Arc<Engine>, worker_name: String) {
    if let Some(workspace) = &engine.workspace {
        if let Err(e) = crate::workspace::sub_workspace(workspace, &format!("thread_fixing_{worker_name}")) {
            warn!("{worker_name}: failed to create worker sub-workspace: {e}");
        }
    }

    let mut held: Option<String> = None;
    loop {
        if !engine.running.load(Ordering::SeqCst) {
            return;
        }

        let Some(victim) = engine.elect_and_claim(held.as_deref()) else {
            return;
        };
        held = Some(victim.clone());

        let Some(service_index) = engine.topology.service_index(&victim) else {
            warn!("{worker_name}: elected unknown service '{victim}', dropping");
            continue;
        };
        let service = &engine.topology.services[service_index];

        let fresh = probe::check(&engine.topology, service, engine.remote.as_ref());
        if !fresh.has_problem() {
            debug!("{worker_name}: '{victim}' healed before repair started");
            engine.report_status(fresh);
            continue;
        }

        info!("{worker_name}: repairing '{victim}'");
        if let Err(e) = probe::fix(&engine.topology, service, engine.remote.as_ref()) {
            warn!("{worker_name}: fix of '{victim}' failed: {e:#}");
        }
        let after = probe::check(&engine.topology, service, engine.remote.as_ref());
        engine.report_status(after);
    }
}
