//! Health report contents and serialization.

use std::time::Duration;

use node_dispatch::health::{ComponentSnapshot, HealthChecker, HealthState};
use node_dispatch::scheduler::Scheduler;
use node_dispatch::shutdown::ShutdownState;

fn healthy_components() -> ComponentSnapshot {
    ComponentSnapshot {
        queue_depth: 2,
        queue_capacity: 16,
        live_workers: 4,
        configured_workers: 4,
        in_flight: 3,
        servicing_threads: 1,
    }
}

#[test]
fn report_serializes_scheduler_summary() {
    let scheduler = Scheduler::new();
    scheduler.schedule_from_now(|| {}, Duration::from_secs(60));
    scheduler.schedule_from_now(|| {}, Duration::from_secs(120));

    let checker = HealthChecker::new();
    let report = checker.report(
        ShutdownState::Running,
        healthy_components(),
        scheduler.queue_info().summary(),
    );
    assert_eq!(report.state, HealthState::Healthy);
    assert_eq!(report.scheduler.pending, 2);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["state"], "Healthy");
    assert_eq!(json["accepting_requests"], true);
    assert_eq!(json["in_flight_requests"], 3);
    assert_eq!(json["scheduler"]["pending"], 2);
    assert!(json["scheduler"]["next_due"].is_string());

    scheduler.stop(false);
}

#[test]
fn draining_node_is_unhealthy_and_not_accepting() {
    let checker = HealthChecker::new();
    let report = checker.report(
        ShutdownState::Draining,
        healthy_components(),
        Scheduler::new().queue_info().summary(),
    );
    assert_eq!(report.state, HealthState::Unhealthy);
    assert!(!report.accepting_requests);
    assert!(report.scheduler.next_due.is_none());
}
