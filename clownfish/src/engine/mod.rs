//! Status & Repair Engine (spec.md §4.1): one monitor thread per service
//! plus a bounded repair-worker pool that elects the next broken service to
//! fix under a strict priority policy. Built on `std::thread` +
//! `std::sync::{Mutex, Condvar}`, per spec.md §9's explicit guidance that
//! this domain stays blocking-thread shaped rather than async, the same way
//! the teacher keeps OS-facing work on blocking threads and only the
//! transport layer (`src/grpc.rs`) on `tokio`.

mod monitor;
mod worker;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use clownfish_api::error::EngineError;
use clownfish_api::status::ServiceStatus;
use clownfish_api::topology::service::PriorityTier;
use clownfish_api::topology::Topology;

use crate::remote_exec::RemoteExec;

pub use monitor::monitor_loop;
pub use worker::worker_loop;

/// `status_by_name` (spec.md §4.1): latest status per service,
/// most-recent-write-wins, under its own mutex.
#[derive(Default)]
pub struct StatusBoard {
    by_name: Mutex<HashMap<String, ServiceStatus>>,
}

impl StatusBoard {
    pub fn publish(&self, status: ServiceStatus) {
        self.by_name.lock().unwrap().insert(status.service_name.clone(), status);
    }

    pub fn get(&self, service_name: &str) -> Option<ServiceStatus> {
        self.by_name.lock().unwrap().get(service_name).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, ServiceStatus> {
        self.by_name.lock().unwrap().clone()
    }
}

/// The `problems_by_name` / `in_repair` / `last_repair_time` /
/// `waiting_worker_count` / `ha_enabled` block of spec.md §4.1, all guarded
/// by one mutex coupled to `problem_cv` ("problem-cv").
struct ProblemState {
    problems_by_name: HashMap<String, ServiceStatus>,
    in_repair: Vec<String>,
    last_repair_time: HashMap<String, Instant>,
    waiting_worker_count: usize,
    ha_enabled: bool,
}

/// Shared engine state threaded into every monitor and worker thread. The
/// `Arc` is cloned once per spawned thread, mirroring how the teacher
/// passes `Sender<HostUpdateCommand>` into `grpc::start`.
pub struct Engine {
    pub topology: Arc<Topology>,
    pub remote: Arc<dyn RemoteExec>,
    status: StatusBoard,
    problem: Mutex<ProblemState>,
    problem_cv: Condvar,
    pub running: AtomicBool,
    pub worker_count: usize,
    /// Invocation workspace, if any (spec.md §6); used only so repair
    /// workers can create their own `thread_fixing_service_<name>`
    /// sub-directory, mirroring `clownfish_server.py`'s `css_fix_thread`.
    pub workspace: Option<PathBuf>,
}

impl Engine {
    pub fn new(topology: Arc<Topology>, remote: Arc<dyn RemoteExec>, worker_count: usize) -> Arc<Self> {
        Self::with_workspace(topology, remote, worker_count, None)
    }

    pub fn with_workspace(
        topology: Arc<Topology>,
        remote: Arc<dyn RemoteExec>,
        worker_count: usize,
        workspace: Option<PathBuf>,
    ) -> Arc<Self> {
        let ha_enabled = topology.high_availability.enabled && topology.high_availability.native;
        Arc::new(Engine {
            topology,
            remote,
            status: StatusBoard::default(),
            problem: Mutex::new(ProblemState {
                problems_by_name: HashMap::new(),
                in_repair: Vec::new(),
                last_repair_time: HashMap::new(),
                waiting_worker_count: 0,
                ha_enabled,
            }),
            problem_cv: Condvar::new(),
            running: AtomicBool::new(true),
            worker_count,
            workspace,
        })
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Called by a monitor after probing a service (spec.md §4.1 "Monitor
    /// protocol"): publishes the status and updates `problems_by_name`,
    /// broadcasting iff membership changed.
    pub fn report_status(&self, status: ServiceStatus) {
        let has_problem = status.has_problem();
        let name = status.service_name.clone();
        self.status.publish(status.clone());

        let mut problem = self.problem.lock().unwrap();
        let was_problem = problem.problems_by_name.contains_key(&name);
        match (was_problem, has_problem) {
            (false, true) => {
                problem.problems_by_name.insert(name, status);
                self.problem_cv.notify_all();
            }
            (true, false) => {
                problem.problems_by_name.remove(&name);
                self.problem_cv.notify_all();
            }
            (true, true) => {
                problem.problems_by_name.insert(name, status);
            }
            (false, false) => {}
        }
    }

    pub fn problems_snapshot(&self) -> HashMap<String, ServiceStatus> {
        self.problem.lock().unwrap().problems_by_name.clone()
    }

    pub fn in_repair_snapshot(&self) -> Vec<String> {
        self.problem.lock().unwrap().in_repair.clone()
    }

    pub fn waiting_worker_count(&self) -> usize {
        self.problem.lock().unwrap().waiting_worker_count
    }

    pub fn is_ha_enabled(&self) -> bool {
        self.problem.lock().unwrap().ha_enabled
    }

    /// Enables HA (spec.md §4.2 `option enable high_availability`). Wakes
    /// every parked worker.
    pub fn enable_ha(&self) {
        let mut problem = self.problem.lock().unwrap();
        problem.ha_enabled = true;
        self.problem_cv.notify_all();
    }

    /// Disables HA and blocks until every worker has parked (spec.md §4.1
    /// "Disable semantics"). `should_abort` is polled cooperatively; if it
    /// returns true before quiescence, returns `EngineError::DisableAborted`
    /// without re-enabling HA (spec.md §9 Open Question: this ambiguity is
    /// preserved deliberately).
    pub fn disable_ha(&self, should_abort: &dyn Fn() -> bool) -> Result<(), EngineError> {
        let mut problem = self.problem.lock().unwrap();
        problem.ha_enabled = false;
        self.problem_cv.notify_all();

        while problem.waiting_worker_count < self.worker_count {
            if should_abort() {
                return Err(EngineError::DisableAborted);
            }
            let (guard, timeout) = self
                .problem_cv
                .wait_timeout(problem, Duration::from_millis(100))
                .unwrap();
            problem = guard;
            if timeout.timed_out() && should_abort() {
                return Err(EngineError::DisableAborted);
            }
        }
        Ok(())
    }

    /// Elects and claims the next repair victim (spec.md §4.1 "Repair
    /// worker protocol" steps 2-4). Blocks on `problem_cv` while HA is
    /// disabled or there is no electable candidate; returns `None` only if
    /// `running` clears while waiting.
    fn elect_and_claim(&self, previously_held: Option<&str>) -> Option<String> {
        let mut problem = self.problem.lock().unwrap();
        if let Some(name) = previously_held {
            problem.in_repair.retain(|n| n != name);
        }
        problem.waiting_worker_count += 1;
        self.problem_cv.notify_all();

        loop {
            if !self.running.load(Ordering::SeqCst) {
                problem.waiting_worker_count -= 1;
                return None;
            }
            let has_candidate = problem.ha_enabled
                && elect_victim(
                    &self.topology,
                    &problem.problems_by_name,
                    &problem.in_repair,
                    &problem.last_repair_time,
                )
                .is_some();
            if problem.ha_enabled && !problem.problems_by_name.is_empty() && has_candidate {
                break;
            }
            let (guard, _) = self
                .problem_cv
                .wait_timeout(problem, Duration::from_millis(200))
                .unwrap();
            problem = guard;
        }

        problem.waiting_worker_count -= 1;
        let victim = elect_victim(
            &self.topology,
            &problem.problems_by_name,
            &problem.in_repair,
            &problem.last_repair_time,
        );
        if let Some(ref name) = victim {
            problem.last_repair_time.insert(name.clone(), Instant::now());
            problem.in_repair.push(name.clone());
        }
        victim
    }
}

/// The priority comparator of spec.md §4.1: tier first (management beats
/// MDT beats OST), then "absent beats present, older wins" on
/// `last_repair_time`. Resolved against `examples/original_source/
/// pyclownfish/clownfish.py`'s `css_fix_thread`, which this spec's §9 Open
/// Question confirms as the intended direction.
fn elect_victim(
    topology: &Topology,
    problems: &HashMap<String, ServiceStatus>,
    in_repair: &[String],
    last_repair_time: &HashMap<String, Instant>,
) -> Option<String> {
    let in_repair: HashSet<&str> = in_repair.iter().map(String::as_str).collect();
    problems
        .keys()
        .filter(|name| !in_repair.contains(name.as_str()))
        .min_by(|a, b| {
            let tier_a = tier_of(topology, a);
            let tier_b = tier_of(topology, b);
            tier_a.cmp(&tier_b).then_with(|| {
                let ra = last_repair_time.get(*a);
                let rb = last_repair_time.get(*b);
                match (ra, rb) {
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (Some(x), Some(y)) => x.cmp(y),
                }
            })
        })
        .cloned()
}

/// Looks up the tier a problem's service actually belongs to (spec.md §4.1
/// "Tier 1: services acting as management (MGT, or an MDT with is-mgs)"),
/// via `ServiceKind::tier()` rather than guessing from the service-name's
/// `-MDT`/`-OST` tag. An `is_mgs` MDT is still named `<fsname>-MDT0000`
/// (`clownfish_api::config::build_services`) and would otherwise be
/// misclassified as tier 2. Falls back to the lowest tier only if the name
/// can't be resolved at all, which should never happen for a service that
/// is actually in `problems_by_name`.
fn tier_of(topology: &Topology, name: &str) -> PriorityTier {
    topology
        .service(name)
        .map(|service| service.kind.tier())
        .unwrap_or(PriorityTier::Ost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clownfish_api::topology::host::{Host, ServiceDistribution};
    use clownfish_api::topology::instance::{BackFsType, ServiceInstance};
    use clownfish_api::topology::service::{Service, ServiceKind};

    fn status(name: &str) -> ServiceStatus {
        ServiceStatus::new(name, chrono::Utc::now(), clownfish_api::status::ServiceStatusKind::NotMounted)
    }

    fn instance(host: usize) -> ServiceInstance {
        ServiceInstance {
            host,
            device: "/dev/sdb".to_string(),
            mount_point: "/mnt/target".into(),
            network_id: "o2ib0".to_string(),
            zpool_create: None,
        }
    }

    /// One standalone MGT, an `is_mgs` MDT (still named `-MDT0000`, per
    /// `clownfish_api::config`'s naming convention), a plain MDT, and two
    /// OSTs: enough to exercise every tier boundary the comparator cares
    /// about, including the MGT-folded-into-MDT case.
    fn sample_topology() -> Topology {
        let distributions = vec![ServiceDistribution {
            id: "d0".into(),
            package_dir: "/opt".into(),
            helper_dir: "/opt/h".into(),
        }];
        let hosts = vec![Host {
            id: "h0".into(),
            hostname: "h0".into(),
            credential_path: None,
            distribution: 0,
        }];
        let services = vec![
            Service::new("mgs0".into(), ServiceKind::Mgt, BackFsType::Ldiskfs, vec![instance(0)], None, None),
            Service::new(
                "fs-MDT0000".into(),
                ServiceKind::Mdt { is_mgs: true },
                BackFsType::Ldiskfs,
                vec![instance(0)],
                Some(0),
                Some(0),
            ),
            Service::new(
                "fs-MDT0001".into(),
                ServiceKind::Mdt { is_mgs: false },
                BackFsType::Ldiskfs,
                vec![instance(0)],
                Some(0),
                Some(1),
            ),
            Service::new(
                "fs-OST0000".into(),
                ServiceKind::Ost,
                BackFsType::Ldiskfs,
                vec![instance(0)],
                Some(0),
                Some(0),
            ),
            Service::new(
                "fs-OST0001".into(),
                ServiceKind::Ost,
                BackFsType::Ldiskfs,
                vec![instance(0)],
                Some(0),
                Some(1),
            ),
        ];
        Topology::new(hosts, distributions, vec![], services, clownfish_api::topology::HighAvailabilityConfig::default())
    }

    #[test]
    fn election_prefers_management_over_mdt_over_ost() {
        let topology = sample_topology();
        let problems = maplit::hashmap! {
            "mgs0".to_string() => status("mgs0"),
            "fs-MDT0001".to_string() => status("fs-MDT0001"),
            "fs-OST0000".to_string() => status("fs-OST0000"),
        };
        let victim = elect_victim(&topology, &problems, &[], &HashMap::new());
        assert_eq!(victim.as_deref(), Some("mgs0"));
    }

    #[test]
    fn an_is_mgs_mdt_is_tier_one_despite_its_mdt_tagged_name() {
        // Regression: `fs-MDT0000` is `is_mgs: true`, so it must outrank a
        // plain MDT even though both names contain "-MDT".
        let topology = sample_topology();
        let problems = maplit::hashmap! {
            "fs-MDT0000".to_string() => status("fs-MDT0000"),
            "fs-MDT0001".to_string() => status("fs-MDT0001"),
        };
        let victim = elect_victim(&topology, &problems, &[], &HashMap::new());
        assert_eq!(victim.as_deref(), Some("fs-MDT0000"));
    }

    #[test]
    fn within_a_tier_older_last_repair_time_wins_and_absent_beats_present() {
        let topology = sample_topology();
        let problems = maplit::hashmap! {
            "fs-OST0000".to_string() => status("fs-OST0000"),
            "fs-OST0001".to_string() => status("fs-OST0001"),
        };
        let now = Instant::now();
        let mut last_repair_time = HashMap::new();
        last_repair_time.insert("fs-OST0000".to_string(), now);
        // fs-OST0001 has never been repaired: absent beats present.
        let victim = elect_victim(&topology, &problems, &[], &last_repair_time);
        assert_eq!(victim.as_deref(), Some("fs-OST0001"));
    }

    #[test]
    fn candidates_already_in_repair_are_skipped() {
        let topology = sample_topology();
        let problems = maplit::hashmap! {
            "fs-OST0000".to_string() => status("fs-OST0000"),
            "fs-OST0001".to_string() => status("fs-OST0001"),
        };
        let victim = elect_victim(&topology, &problems, &["fs-OST0001".to_string()], &HashMap::new());
        assert_eq!(victim.as_deref(), Some("fs-OST0000"));
    }

    #[test]
    fn no_electable_candidate_returns_none_when_all_in_repair() {
        let topology = sample_topology();
        let problems = maplit::hashmap! {
            "fs-OST0000".to_string() => status("fs-OST0000"),
        };
        let victim = elect_victim(&topology, &problems, &["fs-OST0000".to_string()], &HashMap::new());
        assert!(victim.is_none());
    }

    #[test]
    fn starvation_avoidance_rotates_attention_across_repeated_failures() {
        // Scenario #6: two faulty OSTs, one of which perpetually fails to
        // repair; within four elections each must have been chosen once.
        let topology = sample_topology();
        let mut problems = maplit::hashmap! {
            "fs-OST0000".to_string() => status("fs-OST0000"),
            "fs-OST0001".to_string() => status("fs-OST0001"),
        };
        let mut last_repair_time = HashMap::new();
        let mut chosen = HashSet::new();
        for _ in 0..4 {
            let victim = elect_victim(&topology, &problems, &[], &last_repair_time).unwrap();
            chosen.insert(victim.clone());
            last_repair_time.insert(victim.clone(), Instant::now());
            // `fs-OST0000` always "fails" and stays a problem; `fs-OST0001`
            // would heal in reality, but both stay in `problems` here since
            // this test only exercises the comparator, not the full loop.
            problems.insert(victim.clone(), status(&victim));
        }
        assert!(chosen.contains("fs-OST0000"));
        assert!(chosen.contains("fs-OST0001"));
    }
}
