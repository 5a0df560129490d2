//! Adaptive executor: magnitude ladder and parameter-name cascades.

use std::sync::Arc;

use satforge_core::fakes::{AabbLayout, ScriptedPhysics};
use satforge_core::{
    Action, ActionExecutor, ActionOutcome, Domain, DropStage, ExecutionPlan, OptimizerConfig,
    ParameterTarget, PlannedAction,
};
use satforge_state::{Axis, Component, DesignState, Envelope, Vec3};

fn pair(b_x: f64) -> DesignState {
    DesignState::root(
        vec![
            Component::new("A", Vec3::ZERO, Vec3::new(10.0, 10.0, 10.0)),
            Component::new("B", Vec3::new(b_x, 0.0, 0.0), Vec3::new(10.0, 10.0, 10.0)),
        ],
        Envelope::new(Vec3::new(400.0, 400.0, 400.0), 2.0),
    )
}

fn executor(physics: Arc<ScriptedPhysics>) -> ActionExecutor {
    ActionExecutor::new(
        Arc::new(AabbLayout::new()),
        physics,
        Arc::new(OptimizerConfig::default()),
    )
}

fn planned(action: Action, domain: Domain) -> PlannedAction {
    PlannedAction {
        action,
        domain,
        task_index: 0,
        task_id: "t1".into(),
        confidence: 0.8,
    }
}

fn plan_of(iteration: u32, actions: Vec<PlannedAction>) -> ExecutionPlan {
    let mut plan = ExecutionPlan::empty(iteration);
    plan.counts.admitted = actions.len();
    plan.actions = actions;
    plan
}

fn move_a(x: f64) -> Action {
    Action::Move {
        component: "A".into(),
        delta: Vec3::new(x, 0.0, 0.0),
    }
}

#[test]
fn ladder_keeps_the_largest_feasible_scale() {
    // Full +24 puts A into B; half lands at x = 12 with 8 mm to spare.
    // A quarter would also be feasible but must not be chosen.
    let exec = executor(Arc::new(ScriptedPhysics::new([50.0])));
    let (next, scale) = exec.apply_with_ladder(&pair(30.0), &move_a(24.0)).unwrap();
    assert_eq!(scale, 0.5);
    assert_eq!(next.component("A").unwrap().position.x, 12.0);
}

#[test]
fn ladder_gives_up_when_every_scale_is_infeasible() {
    // B starts exactly 3 mm away; every fraction of +10 eats into the clearance.
    let exec = executor(Arc::new(ScriptedPhysics::new([50.0])));
    assert!(exec.apply_with_ladder(&pair(13.0), &move_a(10.0)).is_none());
}

#[test]
fn lowered_rotation_walks_the_ladder() {
    // A quarter turn of the 40 mm box sweeps it into B, and so does the
    // half step (45 degrees snaps to a quarter turn). 22.5 degrees keeps
    // the original extents.
    let state = DesignState::root(
        vec![
            Component::new("A", Vec3::ZERO, Vec3::new(40.0, 10.0, 10.0)),
            Component::new("B", Vec3::new(0.0, 20.0, 0.0), Vec3::new(10.0, 10.0, 10.0)),
        ],
        Envelope::new(Vec3::new(400.0, 400.0, 400.0), 2.0),
    );
    let turn = Action::ChangeOrientation {
        component: "A".into(),
        axis: Axis::Z,
        angle_deg: 90.0,
    }
    .lower()
    .remove(0);

    let exec = executor(Arc::new(ScriptedPhysics::new([50.0])));
    let (next, scale) = exec.apply_with_ladder(&state, &turn).unwrap();

    assert_eq!(scale, 0.25);
    assert_eq!(next.component("A").unwrap().orientation.z, 22.5);
}

#[tokio::test]
async fn sync_parameters_restores_the_kept_state() {
    let physics = Arc::new(ScriptedPhysics::new([50.0]).accepting(["emissivity", "h_joint"]));
    let exec = executor(physics.clone());
    let working = pair(30.0);
    let coat = Action::ModifyCoating {
        component: "A".into(),
        emissivity: Some(0.95),
        absorptivity: None,
        coating: None,
    };
    let contact = Action::SetThermalContact {
        component: "A".into(),
        contact_component: "B".into(),
        conductance: 400.0,
    };
    let mut plan = plan_of(
        1,
        vec![planned(coat, Domain::Thermal), planned(contact, Domain::Thermal)],
    );

    let report = exec.execute(&working, &mut plan).await.unwrap();
    assert!(report.wrote_parameters);
    assert_eq!(exec.bindings().len(), 2);

    let synced = exec.sync_parameters(&working).await;

    assert_eq!(synced, 2);
    assert_eq!(
        physics.parameter_writes(),
        vec![
            ("emissivity".to_string(), 0.95),
            ("h_joint".to_string(), 400.0),
            ("emissivity".to_string(), 0.8),
            ("h_joint".to_string(), 0.0),
        ]
    );
}

#[tokio::test]
async fn failed_second_cascade_reverts_the_first() {
    let physics = Arc::new(ScriptedPhysics::new([50.0]).accepting(["epsilon_rad"]));
    let exec = executor(physics.clone());
    let working = pair(30.0);
    let coat = Action::ModifyCoating {
        component: "A".into(),
        emissivity: Some(0.95),
        absorptivity: Some(0.1),
        coating: None,
    };
    let mut plan = plan_of(1, vec![planned(coat, Domain::Thermal)]);

    exec.execute(&working, &mut plan).await.unwrap();

    assert_eq!(plan.counts.executed, 0);
    assert_eq!(
        physics.parameter_writes(),
        vec![("epsilon_rad".to_string(), 0.95), ("epsilon_rad".to_string(), 0.8)]
    );
}

#[tokio::test]
async fn execute_records_scale_and_rebases_candidate() {
    let exec = executor(Arc::new(ScriptedPhysics::new([50.0])));
    let working = pair(30.0);
    let mut plan = plan_of(4, vec![planned(move_a(24.0), Domain::Geometry)]);

    let report = exec.execute(&working, &mut plan).await.unwrap();

    assert_eq!(report.candidate.parent_id.as_ref(), Some(&working.state_id));
    assert_ne!(report.candidate.state_id, working.state_id);
    assert_eq!(report.candidate.iteration, 4);
    assert!(plan.state_changed);
    assert_eq!(plan.counts.executed, 1);
    assert_eq!(plan.counts.effective, 1);
    match &report.outcomes[0] {
        ActionOutcome::Applied { scale, effective, .. } => {
            assert_eq!(*scale, Some(0.5));
            assert!(*effective);
        }
        other => panic!("expected applied, got {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_ladder_drops_only_that_action() {
    let exec = executor(Arc::new(ScriptedPhysics::new([50.0])));
    let working = pair(13.0);
    let coat = Action::ModifyCoating {
        component: "B".into(),
        emissivity: Some(0.9),
        absorptivity: None,
        coating: Some("white paint".into()),
    };
    let mut plan = plan_of(
        1,
        vec![
            planned(move_a(10.0), Domain::Geometry),
            planned(coat, Domain::Thermal),
        ],
    );

    let report = exec.execute(&working, &mut plan).await.unwrap();

    assert_eq!(plan.counts.admitted, 2);
    assert_eq!(plan.counts.executed, 1);
    assert_eq!(plan.dropped.len(), 1);
    assert_eq!(plan.dropped[0].stage, DropStage::Execution);
    assert_eq!(plan.dropped[0].op, "MOVE");
    assert!(plan.state_changed);
    let b = report.candidate.component("B").unwrap();
    assert_eq!(b.emissivity, 0.9);
    assert_eq!(b.coating.as_deref(), Some("white paint"));
    assert_eq!(report.candidate.component("A").unwrap().position.x, 0.0);
}

#[tokio::test]
async fn cascade_stops_at_first_accepted_name() {
    let physics = Arc::new(ScriptedPhysics::new([50.0]).accepting(["nameB"]));
    let exec = executor(physics.clone());
    let names = vec!["nameA".to_string(), "nameB".to_string(), "nameC".to_string()];
    let target = ParameterTarget {
        component: "A".into(),
        counterpart: Some("B".into()),
    };

    let report = exec.set_with_cascade(&target, &names, 250.0).await;

    assert_eq!(report.accepted.as_deref(), Some("nameB"));
    assert_eq!(physics.parameter_attempts(), vec!["nameA", "nameB"]);
    assert!(report.attempts[0].1.is_some());
    assert!(report.attempts[1].1.is_none());
}

#[tokio::test]
async fn contact_action_walks_configured_cascade() {
    let physics = Arc::new(ScriptedPhysics::new([50.0]).accepting(["h_joint"]));
    let exec = executor(physics.clone());
    let working = pair(30.0);
    let contact = Action::SetThermalContact {
        component: "A".into(),
        contact_component: "B".into(),
        conductance: 400.0,
    };
    let mut plan = plan_of(1, vec![planned(contact, Domain::Thermal)]);

    let report = exec.execute(&working, &mut plan).await.unwrap();

    assert_eq!(physics.parameter_attempts(), vec!["h_tc", "h_joint"]);
    match &report.outcomes[0] {
        ActionOutcome::Applied { parameters, .. } => {
            assert_eq!(parameters, &vec!["h_joint".to_string()])
        }
        other => panic!("expected applied, got {other:?}"),
    }
    assert_eq!(
        report.candidate.component("A").unwrap().thermal_contacts.get("B"),
        Some(&400.0)
    );
}

#[tokio::test]
async fn exhausted_cascade_drops_the_action() {
    let physics = Arc::new(ScriptedPhysics::new([50.0]).accepting(["k_contact"]));
    let exec = executor(physics.clone());
    let working = pair(30.0);
    let contact = Action::SetThermalContact {
        component: "A".into(),
        contact_component: "B".into(),
        conductance: 400.0,
    };
    let mut plan = plan_of(1, vec![planned(contact, Domain::Thermal)]);

    let report = exec.execute(&working, &mut plan).await.unwrap();

    assert_eq!(physics.parameter_attempts(), vec!["h_tc", "h_joint", "h"]);
    assert_eq!(plan.counts.executed, 0);
    assert!(!plan.state_changed);
    assert!(matches!(report.outcomes[0], ActionOutcome::Dropped { .. }));
    assert!(report.candidate.component("A").unwrap().thermal_contacts.is_empty());
}
