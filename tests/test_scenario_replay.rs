mod common;

use common::{load_fixture, runner_for, status, step};
use goaltrack::engine::{ContractStatus, Notification};
use goaltrack::group::TrackingPhase;
use goaltrack::host::{IdentityAssociation, UnitWorld};
use goaltrack::observability::EventEmitter;
use goaltrack::scenario::ScenarioRunner;

#[test]
fn station_ops_completes_both_contracts() {
    let mut runner = runner_for("station_ops.yaml");
    let report = runner.run(&EventEmitter::noop()).unwrap();

    assert_eq!(report.summary.steps_applied, 7);
    assert_eq!(report.summary.completed, 2);
    assert_eq!(report.summary.failed, 0);
    assert!((report.summary.sim_time - 90.0).abs() < f64::EPSILON);

    let station = runner.world().find("station").unwrap();
    assert_eq!(runner.names().resolve("Outpost"), Some(station));
    assert!(runner.names().resolve("ferry").is_none());

    let ferry2 = runner.world().find("ferry2").unwrap();
    let parts: Vec<&str> = runner
        .world()
        .get(ferry2)
        .unwrap()
        .snapshot
        .parts
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(parts, ["cabin", "tank"]);
    assert_eq!(
        runner.world().get(station).unwrap().snapshot.crew.len(),
        2,
        "crew stays aboard the station"
    );
}

#[test]
fn spacewalk_counts_only_while_focused() {
    let mut runner = runner_for("station_ops.yaml");

    // eva: val is outside but the ferry still has focus
    let outcome = step(&mut runner);
    assert_eq!(outcome.action, "eva");
    assert_eq!(status(&runner, "pilot-eva"), ContractStatus::Active);
    let val = runner.world().find("val").unwrap();
    let tree = runner.tracker().get("pilot-eva").unwrap().tree();
    assert!(tree.leaf("spacewalk").unwrap().ledger().state(val).is_complete());

    // focus moves to val
    let outcome = step(&mut runner);
    assert!(outcome.notifications.iter().any(|n| matches!(
        n,
        Notification::ContractFinished { contract, status: ContractStatus::Completed }
            if contract == "pilot-eva"
    )));
}

#[test]
fn dock_hands_the_outpost_group_to_the_station() {
    let mut runner = runner_for("station_ops.yaml");
    for _ in 0..3 {
        step(&mut runner);
    }
    let outcome = step(&mut runner);
    assert_eq!(outcome.action, "dock");

    let station = runner.world().find("station").unwrap();
    let tree = runner.tracker().get("science-outpost").unwrap().tree();
    let group = tree.as_group(tree.find("outpost").unwrap()).unwrap();
    assert_eq!(
        group.phase(),
        TrackingPhase::Waiting {
            unit: station,
            deadline: 80.0
        }
    );
    assert_eq!(runner.world().focused(), Some(station));
    assert_eq!(
        runner.presentation().title("science-outpost", "outpost"),
        Some("Tracking: station")
    );
}

#[test]
fn replay_is_deterministic() {
    let first = ScenarioRunner::new(load_fixture("station_ops.yaml"))
        .unwrap()
        .run(&EventEmitter::noop())
        .unwrap();
    let second = ScenarioRunner::new(load_fixture("station_ops.yaml"))
        .unwrap()
        .run(&EventEmitter::noop())
        .unwrap();
    assert_eq!(first.summary, second.summary);
    assert_eq!(first.contracts, second.contracts);
}

#[test]
fn event_stream_brackets_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let emitter = EventEmitter::from_file(&path).unwrap();
    runner_for("sequence_order.yaml").run(&emitter).unwrap();

    let events: Vec<serde_json::Value> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(events.first().unwrap()["type"], "ScenarioStarted");
    assert_eq!(events.last().unwrap()["type"], "ScenarioFinished");
    assert_eq!(
        events.iter().filter(|e| e["type"] == "StepApplied").count(),
        3
    );
    assert!(events.iter().any(|e| e["type"] == "ContractFinished"
        && e["contract"] == "strict-checklist"
        && e["status"] == "failed"));
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event["sequence"], i);
    }
}
