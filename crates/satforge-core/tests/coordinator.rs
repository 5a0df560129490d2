//! Coordinator dispatch, validation, and merge behaviour.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use satforge_core::fakes::ScriptedProposer;
use satforge_core::{
    Coordinator, Domain, DomainProposer, DropStage, OptimizerConfig, OracleError, StrategicPlan,
    StrategyKind, SubTask,
};
use satforge_state::{metric, Component, DesignState, Envelope, MetricMap, Vec3};

fn state() -> DesignState {
    DesignState::root(
        vec![
            Component::new("battery", Vec3::ZERO, Vec3::new(10.0, 10.0, 10.0)),
            Component::new("radio", Vec3::new(40.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 10.0)),
        ],
        Envelope::new(Vec3::new(400.0, 400.0, 400.0), 2.0),
    )
}

fn plan(tasks: Vec<SubTask>) -> StrategicPlan {
    StrategicPlan {
        strategy: StrategyKind::Hybrid,
        reasoning: "split by discipline".into(),
        tasks,
    }
}

fn coordinator(config: OptimizerConfig, proposers: Vec<Arc<dyn DomainProposer>>) -> Coordinator {
    Coordinator::with_proposers(Arc::new(config), proposers)
}

fn mv(component: &str, x: f64) -> serde_json::Value {
    json!({"op": "MOVE", "component": component, "delta": {"x": x, "y": 0.0, "z": 0.0}})
}

#[tokio::test]
async fn invalid_actions_are_dropped_individually() {
    let geometry = ScriptedProposer::new(
        Domain::Geometry,
        vec![
            json!({"op": "TELEPORT", "component": "battery"}),
            mv("battery", 5.0),
            mv("gyro", 5.0),
            mv("radio", 10_000.0),
            json!({"op": "ROTATE", "component": "radio"}),
        ],
    );
    let c = coordinator(OptimizerConfig::default(), vec![Arc::new(geometry)]);

    let exec = c
        .coordinate(
            &plan(vec![SubTask::new("g1", Domain::Geometry, "spread out")]),
            &state(),
            &MetricMap::new(),
            1,
        )
        .await;

    assert_eq!(exec.action_labels(), vec!["MOVE(battery)".to_string()]);
    assert_eq!(exec.counts.requested, 5);
    assert_eq!(exec.counts.validated, 1);
    assert_eq!(exec.counts.admitted, 1);

    let reasons: Vec<(&str, &str)> = exec
        .dropped
        .iter()
        .map(|d| (d.op.as_str(), d.reason.as_str()))
        .collect();
    assert_eq!(reasons.len(), 4);
    assert!(exec.dropped.iter().all(|d| d.stage == DropStage::Validation));
    assert_eq!(reasons[0].0, "TELEPORT");
    assert!(reasons[0].1.contains("unknown operator"));
    assert!(reasons[1].1.contains("gyro"));
    assert!(reasons[2].1.contains("delta"));
    assert_eq!(reasons[3].0, "ROTATE");
}

#[tokio::test(start_paused = true)]
async fn slow_proposer_costs_only_its_own_proposal() {
    let mut config = OptimizerConfig::default();
    config.timeouts.proposal_ms = 50;

    let geometry = ScriptedProposer::new(Domain::Geometry, vec![mv("radio", 5.0)]);
    let thermal = ScriptedProposer::new(
        Domain::Thermal,
        vec![json!({"op": "MODIFY_COATING", "component": "battery", "emissivity": 0.9})],
    )
    .with_delay(Duration::from_secs(5));
    let c = coordinator(config, vec![Arc::new(geometry), Arc::new(thermal)]);

    let exec = c
        .coordinate(
            &plan(vec![
                SubTask::new("g1", Domain::Geometry, "move radio"),
                SubTask::new("t1", Domain::Thermal, "recoat battery"),
            ]),
            &state(),
            &MetricMap::new(),
            1,
        )
        .await;

    assert_eq!(exec.action_labels(), vec!["MOVE(radio)".to_string()]);
    let thermal_trace = exec.traces.iter().find(|t| t.task_id == "t1").unwrap();
    assert_eq!(thermal_trace.action_count, 0);
    assert!(thermal_trace.reasoning.contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn proposers_run_concurrently() {
    let geometry = ScriptedProposer::new(Domain::Geometry, vec![mv("radio", 5.0)])
        .with_delay(Duration::from_millis(100));
    let thermal = ScriptedProposer::new(
        Domain::Thermal,
        vec![json!({"op": "MODIFY_COATING", "component": "battery", "emissivity": 0.9})],
    )
    .with_delay(Duration::from_millis(100));
    let c = coordinator(
        OptimizerConfig::default(),
        vec![Arc::new(geometry), Arc::new(thermal)],
    );

    let started = tokio::time::Instant::now();
    let exec = c
        .coordinate(
            &plan(vec![
                SubTask::new("g1", Domain::Geometry, "move radio"),
                SubTask::new("t1", Domain::Thermal, "recoat battery"),
            ]),
            &state(),
            &MetricMap::new(),
            1,
        )
        .await;

    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(exec.actions.len(), 2);
}

#[tokio::test]
async fn unregistered_domain_is_skipped() {
    let geometry = ScriptedProposer::new(Domain::Geometry, vec![mv("radio", 5.0)]);
    let c = coordinator(OptimizerConfig::default(), vec![Arc::new(geometry)]);

    let exec = c
        .coordinate(
            &plan(vec![
                SubTask::new("p1", Domain::Power, "shed load"),
                SubTask::new("g1", Domain::Geometry, "move radio"),
            ]),
            &state(),
            &MetricMap::new(),
            1,
        )
        .await;

    assert_eq!(exec.actions.len(), 1);
    let power = exec.traces.iter().find(|t| t.task_id == "p1").unwrap();
    assert!(power.reasoning.contains("no proposer registered"));
}

#[tokio::test]
async fn parse_failure_drops_only_that_proposal() {
    let geometry = ScriptedProposer::new(Domain::Geometry, vec![mv("radio", 5.0)]);
    let structural = ScriptedProposer::failing(
        Domain::Structural,
        OracleError::Parse("missing field `actions`".into()),
    );
    let c = coordinator(
        OptimizerConfig::default(),
        vec![Arc::new(geometry), Arc::new(structural)],
    );

    let exec = c
        .coordinate(
            &plan(vec![
                SubTask::new("s1", Domain::Structural, "stiffen"),
                SubTask::new("g1", Domain::Geometry, "move radio"),
            ]),
            &state(),
            &MetricMap::new(),
            2,
        )
        .await;

    assert_eq!(exec.iteration, 2);
    assert_eq!(exec.action_labels(), vec!["MOVE(radio)".to_string()]);
    assert_eq!(exec.traces.len(), 2);
}

#[tokio::test]
async fn geometry_wins_conflicts_and_predictions() {
    let geometry = ScriptedProposer::new(Domain::Geometry, vec![mv("battery", 5.0)])
        .with_confidence(0.3)
        .with_predicted(metric::MAX_TEMP, 58.0);
    let thermal = ScriptedProposer::new(
        Domain::Thermal,
        vec![
            json!({"op": "ADJUST_LAYOUT", "components": ["battery"], "delta": {"x": 0.0, "y": 20.0, "z": 0.0}}),
            json!({"op": "SET_THERMAL_CONTACT", "component": "battery", "contact_component": "radio", "conductance": 300.0}),
        ],
    )
    .with_confidence(0.95)
    .with_predicted(metric::MAX_TEMP, 52.0);
    let c = coordinator(
        OptimizerConfig::default(),
        vec![Arc::new(thermal), Arc::new(geometry)],
    );

    let exec = c
        .coordinate(
            &plan(vec![
                SubTask::new("t1", Domain::Thermal, "cool battery"),
                SubTask::new("g1", Domain::Geometry, "clear battery"),
            ]),
            &state(),
            &MetricMap::new(),
            1,
        )
        .await;

    // Placement first, contact last.
    assert_eq!(
        exec.action_labels(),
        vec!["MOVE(battery)".to_string(), "SET_THERMAL_CONTACT(battery)".to_string()]
    );
    assert_eq!(exec.conflicts.len(), 1);
    assert_eq!(exec.conflicts[0].kept_domain, Domain::Geometry);
    assert_eq!(exec.conflicts[0].dropped_domain, Domain::Thermal);
    assert_eq!(exec.predicted_metrics[metric::MAX_TEMP], 58.0);
    assert_eq!(exec.counts.validated, 3);
    assert_eq!(exec.counts.admitted, 2);
}
