//! Planner actions and terminal outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::types::MechanismClass;

/// What a beam node did to reach its state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Advance simulated time by one step and re-measure
    Wait,
    /// Targeted re-measurement at the current timepoint
    Rescue,
    /// Finalize a predicted class, ends the branch
    Commit { class: MechanismClass },
}

impl Action {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Commit { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Wait => write!(f, "WAIT"),
            Action::Rescue => write!(f, "RESCUE"),
            Action::Commit { .. } => write!(f, "COMMIT"),
        }
    }
}

/// How a search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "terminal", rename_all = "snake_case")]
pub enum Terminal {
    Commit { class: MechanismClass },
    /// Budget ran out before any belief cleared the commit threshold
    BudgetExhausted { inference_unavailable: bool },
}

impl Terminal {
    pub fn predicted_class(&self) -> Option<MechanismClass> {
        match self {
            Terminal::Commit { class } => Some(*class),
            Terminal::BudgetExhausted { .. } => None,
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Commit { class } => write!(f, "COMMIT({})", class),
            Terminal::BudgetExhausted { .. } => write!(f, "BUDGET_EXHAUSTED"),
        }
    }
}
