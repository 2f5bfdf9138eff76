//! Agent actions and admission errors.

use crate::direction::Direction;
use std::error::Error;
use std::fmt;

/// An action requested by an agent for the current tick.
///
/// At most one action per agent per tick: a second request while one
/// is pending is rejected with [`ActionError::ActionAlreadyQueued`].
/// The pending action is cleared when the tick it was issued for
/// completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Move up to `steps` cells in the agent-relative `direction`.
    /// Blocking items truncate the path at the last free cell.
    Move {
        /// Agent-relative movement direction.
        direction: Direction,
        /// Number of cells to attempt, `1..=max_steps_per_movement`.
        steps: u32,
    },
    /// Turn to face `resolve(direction)` without moving.
    Turn {
        /// Agent-relative turn.
        direction: Direction,
    },
    /// Do nothing this tick (still counts toward quorum).
    NoOp,
}

/// Errors from action admission.
///
/// These are per-call, synchronous errors: a rejected action leaves
/// the agent's pending state untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionError {
    /// No agent with the given id exists, or the agent is inactive.
    InvalidAgentId,
    /// The agent already has a pending action this tick.
    ActionAlreadyQueued,
    /// The direction is disallowed by the movement or turn policy.
    DirectionNotAllowed {
        /// The rejected direction.
        direction: Direction,
    },
    /// The step count is outside `1..=max_steps_per_movement`.
    StepCountOutOfRange {
        /// The rejected step count.
        steps: u32,
    },
    /// No-op actions are disallowed by the configuration.
    NoOpNotAllowed,
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAgentId => write!(f, "invalid agent id"),
            Self::ActionAlreadyQueued => write!(f, "agent already has a pending action"),
            Self::DirectionNotAllowed { direction } => {
                write!(f, "direction {direction} not allowed by policy")
            }
            Self::StepCountOutOfRange { steps } => {
                write!(f, "step count {steps} out of range")
            }
            Self::NoOpNotAllowed => write!(f, "no-op actions are disallowed"),
        }
    }
}

impl Error for ActionError {}
