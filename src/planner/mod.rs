//! Decision planner
//!
//! Per vessel: PRE_DECISION → {WAIT, RESCUE, COMMIT}. WAIT and RESCUE
//! return to PRE_DECISION with a fresh measurement; COMMIT is terminal.

pub mod action;
pub mod beam;
pub mod environment;
pub mod events;
pub mod utility;

pub use action::{Action, Terminal};
pub use beam::{BeamNode, BeamSearch, NodeId, SearchOutcome};
pub use environment::{Assessment, PlanningEnvironment};
pub use events::{DecisionEvent, DecisionLog, COMMIT_CANDIDATE, DECISION_LOG_HEADER};
pub use utility::commit_utility;
