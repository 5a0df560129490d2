//! Proposal merge and conflict strategy.
//!
//! Validated proposals are flattened into one action list and reconciled in
//! four passes:
//! 1. duplicate actions from the same domain collapse to one
//! 2. cross-domain operators yield to geometry-owned placement of the same
//!    component, and survivors are lowered to primitive moves and rotations
//! 3. remaining conflicts are resolved greedily by domain priority, then
//!    proposal confidence, then proposal order
//! 4. survivors are sorted into execution order

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::config::CoordinatorConfig;
use crate::domain::{
    Action, AgentProposal, ConflictRecord, Domain, DropStage, DroppedAction, EffectClass,
    PlannedAction,
};

/// Result of merging one iteration's proposals.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub actions: Vec<PlannedAction>,
    pub dropped: Vec<DroppedAction>,
    pub conflicts: Vec<ConflictRecord>,
}

#[derive(Debug, Clone)]
struct Candidate {
    planned: PlannedAction,
    order: usize,
}

/// Two actions conflict when they share an effect class and either one is
/// global or they touch a common component.
pub fn actions_conflict(a: &Action, b: &Action) -> bool {
    if a.effect_class() != b.effect_class() {
        return false;
    }
    if a.is_global() || b.is_global() {
        return true;
    }
    let tb = b.targets();
    a.targets().iter().any(|t| tb.contains(t))
}

fn drop_record(c: &Candidate, stage: DropStage, reason: String) -> DroppedAction {
    DroppedAction {
        stage,
        domain: c.planned.domain,
        task_id: c.planned.task_id.clone(),
        op: c.planned.action.operator().to_string(),
        reason,
    }
}

fn conflict(kept: &Candidate, dropped: &Candidate, reason: &str) -> ConflictRecord {
    ConflictRecord {
        kept: kept.planned.action.to_string(),
        kept_domain: kept.planned.domain,
        dropped: dropped.planned.action.to_string(),
        dropped_domain: dropped.planned.domain,
        reason: reason.to_string(),
    }
}

/// Merge validated proposals into a conflict-free, execution-ordered action list.
pub fn merge_proposals(proposals: &[AgentProposal], config: &CoordinatorConfig) -> MergeOutcome {
    let mut out = MergeOutcome::default();

    let flattened = proposals.iter().flat_map(|p| {
        p.actions.iter().map(move |a| (p, a.clone()))
    });

    // Pass 1: de-duplicate within a domain.
    let mut seen: HashSet<(Domain, String)> = HashSet::new();
    let mut candidates: Vec<Candidate> = Vec::new();
    for (order, (proposal, action)) in flattened.enumerate() {
        let candidate = Candidate {
            planned: PlannedAction {
                action,
                domain: proposal.domain,
                task_index: proposal.task_index,
                task_id: proposal.task_id.clone(),
                confidence: proposal.confidence,
            },
            order,
        };
        if !seen.insert((proposal.domain, candidate.planned.action.signature())) {
            out.dropped.push(drop_record(
                &candidate,
                DropStage::Duplicate,
                "identical action already proposed by this domain".to_string(),
            ));
            continue;
        }
        candidates.push(candidate);
    }

    // Pass 2: arbitrate cross-domain operators against geometry placement.
    let geometry_placement: Vec<Candidate> = candidates
        .iter()
        .filter(|c| {
            c.planned.domain == Domain::Geometry
                && !c.planned.action.is_cross_domain()
                && c.planned.action.effect_class() == EffectClass::Placement
        })
        .cloned()
        .collect();

    let mut lowered: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if !c.planned.action.is_cross_domain() {
            lowered.push(c);
            continue;
        }
        if let Some(owner) = geometry_placement
            .iter()
            .find(|g| actions_conflict(&g.planned.action, &c.planned.action))
        {
            out.conflicts.push(conflict(
                owner,
                &c,
                "cross-domain operator yields to geometry placement",
            ));
            out.dropped.push(drop_record(
                &c,
                DropStage::Conflict,
                format!("component placement owned by geometry ({})", owner.planned.action),
            ));
            continue;
        }
        for primitive in c.planned.action.lower() {
            lowered.push(Candidate {
                planned: PlannedAction {
                    action: primitive,
                    ..c.planned.clone()
                },
                order: c.order,
            });
        }
    }

    // Pass 3: greedy priority resolution.
    let mut ranked: Vec<Candidate> = lowered;
    ranked.sort_by(|a, b| {
        config
            .priority_rank(a.planned.domain)
            .cmp(&config.priority_rank(b.planned.domain))
            .then_with(|| {
                b.planned
                    .confidence
                    .partial_cmp(&a.planned.confidence)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.planned.task_index.cmp(&b.planned.task_index))
            .then_with(|| a.order.cmp(&b.order))
    });

    let mut accepted: Vec<Candidate> = Vec::new();
    for c in ranked {
        if let Some(winner) = accepted
            .iter()
            .find(|w| actions_conflict(&w.planned.action, &c.planned.action))
        {
            let reason = if winner.planned.domain == c.planned.domain {
                "same-domain conflict resolved by confidence and order"
            } else {
                "resolved by domain priority"
            };
            out.conflicts.push(conflict(winner, &c, reason));
            out.dropped.push(drop_record(
                &c,
                DropStage::Conflict,
                format!("conflicts with {} from {}", winner.planned.action, winner.planned.domain),
            ));
            continue;
        }
        accepted.push(c);
    }

    // Pass 4: execution order.
    accepted.sort_by(|a, b| {
        a.planned
            .action
            .execution_rank()
            .cmp(&b.planned.action.execution_rank())
            .then_with(|| a.order.cmp(&b.order))
    });
    out.actions = accepted.into_iter().map(|c| c.planned).collect();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use satforge_state::{Axis, Vec3};

    fn proposal(task_index: usize, domain: Domain, confidence: f64, actions: Vec<Action>) -> AgentProposal {
        AgentProposal {
            task_index,
            task_id: format!("t{task_index}"),
            domain,
            reasoning: String::new(),
            actions,
            predicted_metrics: Default::default(),
            confidence,
        }
    }

    fn mv(c: &str, x: f64) -> Action {
        Action::Move { component: c.into(), delta: Vec3::new(x, 0.0, 0.0) }
    }

    #[test]
    fn test_conflict_rules() {
        assert!(actions_conflict(&mv("a", 1.0), &mv("a", 2.0)));
        assert!(!actions_conflict(&mv("a", 1.0), &mv("b", 2.0)));
        assert!(actions_conflict(&mv("a", 1.0), &Action::Repack { clearance_mm: 5.0 }));
        let coat = Action::ModifyCoating { component: "a".into(), emissivity: Some(0.9), absorptivity: None, coating: None };
        assert!(!actions_conflict(&mv("a", 1.0), &coat));
        let swap = Action::Swap { component: "b".into(), other: "a".into() };
        assert!(actions_conflict(&mv("a", 1.0), &swap));
    }

    #[test]
    fn test_priority_drops_lower_domain() {
        let rotate_geo = Action::Rotate { component: "a".into(), axis: Axis::Z, angle_deg: 90.0 };
        let rotate_structural = Action::Rotate { component: "a".into(), axis: Axis::X, angle_deg: 90.0 };
        let out = merge_proposals(
            &[
                proposal(0, Domain::Structural, 0.99, vec![rotate_structural]),
                proposal(1, Domain::Geometry, 0.1, vec![rotate_geo.clone()]),
            ],
            &CoordinatorConfig::default(),
        );
        assert_eq!(out.actions.len(), 1);
        assert_eq!(out.actions[0].action, rotate_geo);
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].dropped_domain, Domain::Structural);
        assert_eq!(out.dropped[0].stage, DropStage::Conflict);
    }

    #[test]
    fn test_same_domain_tie_goes_to_confidence() {
        let out = merge_proposals(
            &[
                proposal(0, Domain::Geometry, 0.4, vec![mv("a", 1.0)]),
                proposal(1, Domain::Geometry, 0.9, vec![mv("a", 2.0)]),
            ],
            &CoordinatorConfig::default(),
        );
        assert_eq!(out.actions.len(), 1);
        assert_eq!(out.actions[0].action, mv("a", 2.0));
    }

    #[test]
    fn test_duplicates_collapse_within_domain() {
        let out = merge_proposals(
            &[
                proposal(0, Domain::Geometry, 0.5, vec![mv("a", 1.0)]),
                proposal(1, Domain::Geometry, 0.5, vec![mv("a", 1.0)]),
            ],
            &CoordinatorConfig::default(),
        );
        assert_eq!(out.actions.len(), 1);
        assert!(out.conflicts.is_empty());
        assert_eq!(out.dropped.len(), 1);
        assert_eq!(out.dropped[0].stage, DropStage::Duplicate);
    }

    #[test]
    fn test_cross_domain_yields_to_geometry() {
        let adjust = Action::AdjustLayout { components: vec!["a".into(), "b".into()], delta: Vec3::new(0.0, 5.0, 0.0) };
        let out = merge_proposals(
            &[
                proposal(0, Domain::Thermal, 0.9, vec![adjust]),
                proposal(1, Domain::Geometry, 0.5, vec![mv("b", 3.0)]),
            ],
            &CoordinatorConfig::default(),
        );
        assert_eq!(out.actions.len(), 1);
        assert_eq!(out.actions[0].action, mv("b", 3.0));
        assert_eq!(out.conflicts[0].reason, "cross-domain operator yields to geometry placement");
    }

    #[test]
    fn test_cross_domain_is_lowered_when_free() {
        let adjust = Action::AdjustLayout { components: vec!["a".into(), "b".into()], delta: Vec3::new(0.0, 5.0, 0.0) };
        let orient = Action::ChangeOrientation { component: "c".into(), axis: Axis::Z, angle_deg: 90.0 };
        let out = merge_proposals(
            &[proposal(0, Domain::Thermal, 0.9, vec![adjust, orient])],
            &CoordinatorConfig::default(),
        );
        let ops: Vec<&str> = out.actions.iter().map(|p| p.action.operator()).collect();
        assert_eq!(ops, vec!["MOVE", "MOVE", "ROTATE"]);
        assert!(out.actions.iter().all(|p| p.domain == Domain::Thermal));
    }

    #[test]
    fn test_execution_order_geometry_before_thermal() {
        let coat = Action::ModifyCoating { component: "a".into(), emissivity: Some(0.9), absorptivity: None, coating: None };
        let env = Action::ChangeEnvelope { outer_size: Vec3::new(500.0, 500.0, 500.0) };
        let out = merge_proposals(
            &[
                proposal(0, Domain::Thermal, 0.9, vec![coat]),
                proposal(1, Domain::Geometry, 0.9, vec![mv("b", 1.0), env]),
            ],
            &CoordinatorConfig::default(),
        );
        let ops: Vec<&str> = out.actions.iter().map(|p| p.action.operator()).collect();
        assert_eq!(ops, vec!["CHANGE_ENVELOPE", "MOVE", "MODIFY_COATING"]);
    }
}
