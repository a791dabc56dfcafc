use serde::{Deserialize, Serialize};

use crate::agent::Rotation;
use crate::position::Position;

/// One decoded action per planned agent, decoded from the first coarse tick
/// of a solved model. All offsets are relative to the acting agent and walk
/// the short way around wrapped bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    /// The model produced no beneficial action for this agent; the caller may
    /// substitute its fallback policy.
    Skip,
    /// Ordered cardinal offsets, at most the agent's current speed.
    Move { offsets: Vec<Position> },
    Clear { offset: Position },
    Request { offset: Position },
    Attach { offset: Position },
    Detach { offset: Position },
    Connect {
        partner: usize,
        offset: Position,
        /// For the constructor side of a connect: where the newly joined
        /// block sits relative to the constructor.
        attached: Option<Position>,
    },
    Rotate { rotation: Rotation },
    Submit,
}

impl AgentAction {
    pub fn is_skip(&self) -> bool {
        matches!(self, AgentAction::Skip)
    }
}
