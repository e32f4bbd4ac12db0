//! Beam search over WAIT / RESCUE / COMMIT
//!
//! Nodes live in an arena and point at their parent by index. Live nodes
//! carry their own environment clone; terminal (COMMIT) nodes are kept in
//! a separate list and never compete with live nodes for beam slots.
//!
//! A COMMIT child exists only when the parent's calibrated confidence
//! clears `commit_threshold`. When no COMMIT exists and the budget runs
//! out, the best live node is force-terminated as `BudgetExhausted`.
//!
//! Every COMMIT child is logged as a candidate when it is created. Once the
//! outcome node is chosen, exactly one decision record follows it.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use tracing::{debug, info};

use crate::calibration::belief::BeliefState;
use crate::core::config::PlannerConfig;
use crate::core::types::{Hours, VesselId};
use crate::planner::action::{Action, Terminal};
use crate::planner::environment::{Assessment, PlanningEnvironment};
use crate::planner::events::{DecisionEvent, DecisionLog, COMMIT_CANDIDATE};
use crate::planner::utility::{commit_utility, utility_bound};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    /// `None` for the root
    pub action: Option<Action>,
    pub depth: usize,
    pub elapsed_h: Hours,
    pub measurements: u32,
    /// RESCUEs taken since time last advanced
    pub rescues_at_timepoint: u32,
    pub utility: f64,
    /// `None` when inference was unavailable at this node
    pub assessment: Option<Assessment>,
    pub terminal: Option<Terminal>,
}

impl BeamNode {
    pub fn belief(&self) -> Option<&BeliefState> {
        self.assessment.as_ref().map(|a| &a.belief)
    }

    pub fn calibrated_confidence(&self) -> Option<f64> {
        self.belief().map(|b| b.calibrated_confidence)
    }
}

/// Result of one search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub terminal: Terminal,
    /// Node the outcome was read from
    pub node: NodeId,
    pub utility: f64,
    pub belief: Option<BeliefState>,
    pub elapsed_h: Hours,
    pub measurements: u32,
    pub steps: usize,
    pub nodes: Vec<BeamNode>,
    pub log: DecisionLog,
}

impl SearchOutcome {
    pub fn node(&self, id: NodeId) -> &BeamNode {
        &self.nodes[id.0]
    }

    /// Actions from the root to the outcome node
    pub fn path(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        let mut cursor = Some(self.node);
        while let Some(id) = cursor {
            let node = self.node(id);
            if let Some(action) = node.action {
                actions.push(action);
            }
            cursor = node.parent;
        }
        actions.reverse();
        actions
    }

    pub fn commit_nodes(&self) -> impl Iterator<Item = &BeamNode> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.terminal, Some(Terminal::Commit { .. })))
    }
}

#[derive(Debug, Clone)]
pub struct BeamSearch {
    config: PlannerConfig,
}

impl BeamSearch {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Search from `root`'s current state until COMMIT or budget exhaustion
    pub fn search<E: PlanningEnvironment>(&self, vessel: &VesselId, root: E) -> SearchOutcome {
        let config = &self.config;
        let mut nodes: Vec<BeamNode> = Vec::new();
        let mut commits: Vec<NodeId> = Vec::new();
        let mut log = DecisionLog::new();

        let root_assessment = root.assess().ok();
        let root_id = NodeId(0);
        nodes.push(BeamNode {
            id: root_id,
            parent: None,
            action: None,
            depth: 0,
            elapsed_h: root.elapsed_h(),
            measurements: root.measurements(),
            rescues_at_timepoint: 0,
            utility: self.live_utility(root_assessment.as_ref(), root.elapsed_h()),
            assessment: root_assessment,
            terminal: None,
        });

        let mut live: Vec<(NodeId, E)> = vec![(root_id, root)];
        let mut steps = 0;

        while !live.is_empty() {
            steps += 1;
            let mut candidates: Vec<(NodeId, E)> = Vec::new();

            for (parent_id, env) in &live {
                let parent = nodes[parent_id.0].clone();

                if let Some(assessment) = parent.assessment {
                    if assessment.belief.calibrated_confidence >= config.commit_threshold {
                        let id = self.push_commit(&mut nodes, &parent, assessment);
                        log.push(self.candidate_event(vessel, &nodes[id.0], assessment));
                        commits.push(id);
                    }
                }

                if parent.measurements >= config.max_measurements {
                    continue;
                }

                if parent.elapsed_h + config.wait_step_h <= config.max_elapsed_h + 1e-9 {
                    let mut child = env.clone();
                    child.wait(config.wait_step_h);
                    let id = self.push_live(&mut nodes, &parent, Action::Wait, &child, 0);
                    candidates.push((id, child));
                }

                if parent.rescues_at_timepoint < config.max_rescues_per_timepoint {
                    let mut child = env.clone();
                    child.rescue();
                    let id = self.push_live(
                        &mut nodes,
                        &parent,
                        Action::Rescue,
                        &child,
                        parent.rescues_at_timepoint + 1,
                    );
                    candidates.push((id, child));
                }
            }

            // Highest utility first, lowest id on ties
            candidates.sort_by_key(|(id, _)| (Reverse(OrderedFloat(nodes[id.0].utility)), *id));
            candidates.truncate(config.beam_width);

            debug!(
                vessel = %vessel,
                step = steps,
                live = candidates.len(),
                commits = commits.len(),
                "Beam step"
            );

            if let Some(best) = best_commit(&nodes, &commits) {
                let best_utility = nodes[best.0].utility;
                let dominated = candidates
                    .iter()
                    .all(|(id, _)| utility_bound(nodes[id.0].elapsed_h, config) <= best_utility);
                if dominated {
                    debug!(vessel = %vessel, step = steps, "Live nodes dominated by best COMMIT");
                    break;
                }
            }

            if candidates.is_empty() && commits.is_empty() {
                let forced = best_live(&nodes, &live);
                self.force_terminate(&mut nodes, forced, vessel);
                break;
            }

            live = candidates;
        }

        let outcome_id = match best_commit(&nodes, &commits) {
            Some(id) => id,
            // Loop exits with a forced node whenever no COMMIT exists
            None => nodes
                .iter()
                .rev()
                .find(|n| matches!(n.terminal, Some(Terminal::BudgetExhausted { .. })))
                .map_or(root_id, |n| n.id),
        };

        let outcome = &nodes[outcome_id.0];
        let terminal = outcome.terminal.unwrap_or(Terminal::BudgetExhausted {
            inference_unavailable: outcome.assessment.is_none(),
        });
        log.push(self.decision_event(vessel, outcome, terminal, commits.len()));

        SearchOutcome {
            terminal,
            node: outcome_id,
            utility: outcome.utility,
            belief: outcome.belief().copied(),
            elapsed_h: outcome.elapsed_h,
            measurements: outcome.measurements,
            steps,
            nodes,
            log,
        }
    }

    /// Re-apply the outcome's path to `root`, reproducing the environment at the outcome node
    ///
    /// Environments are deterministic clones, so the replay lands on the same state.
    pub fn replay<E: PlanningEnvironment>(&self, mut root: E, outcome: &SearchOutcome) -> E {
        for action in outcome.path() {
            match action {
                Action::Wait => root.wait(self.config.wait_step_h),
                Action::Rescue => root.rescue(),
                Action::Commit { .. } => {}
            }
        }
        root
    }

    fn live_utility(&self, assessment: Option<&Assessment>, elapsed_h: Hours) -> f64 {
        match assessment {
            Some(a) => commit_utility(a.belief.calibrated_confidence, elapsed_h, &self.config),
            None => -self.config.time_penalty.at(elapsed_h),
        }
    }

    fn push_live<E: PlanningEnvironment>(
        &self,
        nodes: &mut Vec<BeamNode>,
        parent: &BeamNode,
        action: Action,
        env: &E,
        rescues_at_timepoint: u32,
    ) -> NodeId {
        let id = NodeId(nodes.len());
        let assessment = env.assess().ok();
        let elapsed_h = env.elapsed_h();
        nodes.push(BeamNode {
            id,
            parent: Some(parent.id),
            action: Some(action),
            depth: parent.depth + 1,
            elapsed_h,
            measurements: parent.measurements + 1,
            rescues_at_timepoint,
            utility: self.live_utility(assessment.as_ref(), elapsed_h),
            assessment,
            terminal: None,
        });
        id
    }

    fn push_commit(&self, nodes: &mut Vec<BeamNode>, parent: &BeamNode, assessment: Assessment) -> NodeId {
        let id = NodeId(nodes.len());
        let class = assessment.top_class;
        nodes.push(BeamNode {
            id,
            parent: Some(parent.id),
            action: Some(Action::Commit { class }),
            depth: parent.depth + 1,
            elapsed_h: parent.elapsed_h,
            measurements: parent.measurements,
            rescues_at_timepoint: parent.rescues_at_timepoint,
            utility: commit_utility(assessment.belief.calibrated_confidence, parent.elapsed_h, &self.config),
            assessment: Some(assessment),
            terminal: Some(Terminal::Commit { class }),
        });
        id
    }

    fn event(&self, vessel: &VesselId, node: &BeamNode, action: String, rationale: String) -> DecisionEvent {
        DecisionEvent {
            step: node.depth,
            node: node.id.0,
            vessel: vessel.clone(),
            action,
            predicted_class: None,
            belief: node.belief().copied(),
            utility: node.utility,
            threshold: self.config.commit_threshold,
            rationale,
        }
    }

    fn candidate_event(&self, vessel: &VesselId, node: &BeamNode, assessment: Assessment) -> DecisionEvent {
        let confidence = assessment.belief.calibrated_confidence;
        debug!(
            vessel = %vessel,
            node = node.id.0,
            class = %assessment.top_class,
            calibrated_confidence = confidence,
            utility = node.utility,
            "COMMIT candidate"
        );
        let rationale = format!(
            "calibrated confidence {:.4} >= threshold {:.2} at {:.1}h after {} measurements",
            confidence, self.config.commit_threshold, node.elapsed_h, node.measurements
        );
        DecisionEvent {
            predicted_class: Some(assessment.top_class),
            ..self.event(vessel, node, COMMIT_CANDIDATE.to_string(), rationale)
        }
    }

    /// The one record naming what the vessel actually did
    fn decision_event(&self, vessel: &VesselId, node: &BeamNode, terminal: Terminal, candidates: usize) -> DecisionEvent {
        let (action, rationale) = match (terminal, node.calibrated_confidence()) {
            (Terminal::Commit { class }, confidence) => {
                let confidence = confidence.unwrap_or(f64::NAN);
                info!(
                    vessel = %vessel,
                    step = node.depth,
                    node = node.id.0,
                    class = %class,
                    calibrated_confidence = confidence,
                    top_probability = node.belief().map_or(f64::NAN, |b| b.top_probability),
                    nuisance_fraction = node.belief().map_or(f64::NAN, |b| b.nuisance_fraction),
                    utility = node.utility,
                    threshold = self.config.commit_threshold,
                    candidates,
                    "COMMIT"
                );
                (
                    Action::Commit { class }.to_string(),
                    format!(
                        "best of {} candidates: calibrated confidence {:.4} >= threshold {:.2} at {:.1}h after {} measurements",
                        candidates, confidence, self.config.commit_threshold, node.elapsed_h, node.measurements
                    ),
                )
            }
            (Terminal::BudgetExhausted { .. }, Some(c)) => (
                terminal.to_string(),
                format!(
                    "budget exhausted at {:.1}h after {} measurements; best calibrated confidence {:.4} below threshold {:.2}",
                    node.elapsed_h, node.measurements, c, self.config.commit_threshold
                ),
            ),
            (Terminal::BudgetExhausted { .. }, None) => (
                terminal.to_string(),
                format!(
                    "budget exhausted at {:.1}h after {} measurements; inference unavailable",
                    node.elapsed_h, node.measurements
                ),
            ),
        };
        DecisionEvent {
            predicted_class: terminal.predicted_class(),
            ..self.event(vessel, node, action, rationale)
        }
    }

    fn force_terminate(&self, nodes: &mut [BeamNode], id: NodeId, vessel: &VesselId) {
        let node = &mut nodes[id.0];
        let inference_unavailable = node.assessment.is_none();
        node.terminal = Some(Terminal::BudgetExhausted {
            inference_unavailable,
        });

        info!(
            vessel = %vessel,
            step = node.depth,
            inference_unavailable,
            elapsed_h = node.elapsed_h,
            "Budget exhausted without COMMIT"
        );
    }
}

fn best_commit(nodes: &[BeamNode], commits: &[NodeId]) -> Option<NodeId> {
    commits
        .iter()
        .copied()
        .min_by_key(|id| (Reverse(OrderedFloat(nodes[id.0].utility)), *id))
}

fn best_live<E>(nodes: &[BeamNode], live: &[(NodeId, E)]) -> NodeId {
    live.iter()
        .map(|(id, _)| *id)
        .min_by_key(|id| (Reverse(OrderedFloat(nodes[id.0].utility)), *id))
        .unwrap_or(NodeId(0))
}
