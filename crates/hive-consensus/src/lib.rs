//! Hive consensus.
//!
//! A three-phase protocol for picking one winner among several candidate
//! solutions to the same task:
//!
//! 1. **Collecting**: agents submit one solution each, with a confidence
//! 2. **Voting**: agents vote for the author of the solution they prefer
//! 3. **Complete**: votes are tallied and the winner is frozen
//!
//! The winner is a pure function of the submitted solutions and votes.

pub mod process;
pub mod tally;

pub use process::{ConsensusProcess, ConsensusStatus};
pub use tally::{count_votes, select_winner};

use hive_protocol::AgentId;

/// Reasons a consensus operation is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsensusError {
    #[error("Operation requires phase {expected:?} but process is {actual:?}")]
    WrongPhase {
        expected: ConsensusStatus,
        actual: ConsensusStatus,
    },

    #[error("No solutions submitted for consensus {0}")]
    NoSolutions(String),

    #[error("Agent {0} has already submitted a solution")]
    DuplicateSolution(AgentId),

    #[error("No solution submitted by agent {0}")]
    UnknownCandidate(AgentId),

    #[error("Confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),
}
