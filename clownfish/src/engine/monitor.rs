//! Monitor loop (spec.md §4.1 "Monitor protocol"): one dedicated thread per
//! service, probing on a fixed tick.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::Engine;
use crate::probe;

/// Runs one service's monitor until `engine.running` clears.
pub fn monitor_loop(engine: Arc<Engine>, service_index: usize, tick: Duration) {
    loop {
        if !engine.running.load(Ordering::SeqCst) {
            return;
        }
        let service = &engine.topology.services[service_index];
        let status = probe::check(&engine.topology, service, engine.remote.as_ref());
        engine.report_status(status);
        std::thread::sleep(tick);
    }
}
