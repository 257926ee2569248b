//! The consensus process state machine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hive_protocol::{AgentId, ConsensusId, SwarmSolution, TaskId};

use crate::tally::{count_votes, select_winner};
use crate::ConsensusError;

/// Phase of a consensus process. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStatus {
    #[default]
    /// Accepting candidate solutions
    Collecting,
    /// Accepting votes on the collected solutions
    Voting,
    /// Winner selected; no further changes
    Complete,
}

/// Arbitration among independently produced solutions for one task.
///
/// Lifecycle:
/// 1. `submit_solution()` - collect one candidate per agent
/// 2. `start_voting()` - freeze the candidate list
/// 3. `submit_vote()` - record (and overwrite) each voter's choice
/// 4. `complete()` - tally and freeze the winner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusProcess {
    pub id: ConsensusId,
    pub task_id: TaskId,
    pub status: ConsensusStatus,
    pub solutions: Vec<SwarmSolution>,
    /// voter -> author of the solution voted for
    pub votes: BTreeMap<AgentId, AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_id: Option<AgentId>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConsensusProcess {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            id: ConsensusId::generate(),
            task_id,
            status: ConsensusStatus::Collecting,
            solutions: Vec::new(),
            votes: BTreeMap::new(),
            winning_id: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn require(&self, expected: ConsensusStatus) -> Result<(), ConsensusError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(ConsensusError::WrongPhase {
                expected,
                actual: self.status,
            })
        }
    }

    /// Add a candidate solution. Each agent may submit once.
    pub fn submit_solution(
        &mut self,
        agent_id: AgentId,
        solution: serde_json::Value,
        confidence: f64,
        reasoning: String,
    ) -> Result<&SwarmSolution, ConsensusError> {
        self.require(ConsensusStatus::Collecting)?;

        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ConsensusError::InvalidConfidence(confidence));
        }

        if self.solution_by(&agent_id).is_some() {
            return Err(ConsensusError::DuplicateSolution(agent_id));
        }

        self.solutions.push(SwarmSolution {
            task_id: self.task_id.clone(),
            agent_id,
            solution,
            confidence,
            reasoning,
            timestamp: Utc::now(),
        });

        tracing::debug!(
            consensus_id = %self.id,
            solutions = self.solutions.len(),
            "Recorded solution"
        );

        Ok(&self.solutions[self.solutions.len() - 1])
    }

    /// Close collection and open voting. Needs at least one solution.
    pub fn start_voting(&mut self) -> Result<(), ConsensusError> {
        self.require(ConsensusStatus::Collecting)?;
        if self.solutions.is_empty() {
            return Err(ConsensusError::NoSolutions(self.id.to_string()));
        }
        self.status = ConsensusStatus::Voting;
        Ok(())
    }

    /// Record `voter`'s vote for the solution authored by `candidate`.
    ///
    /// A later vote from the same voter replaces the earlier one; the
    /// replaced choice is returned.
    pub fn submit_vote(
        &mut self,
        voter: AgentId,
        candidate: AgentId,
    ) -> Result<Option<AgentId>, ConsensusError> {
        self.require(ConsensusStatus::Voting)?;
        if self.solution_by(&candidate).is_none() {
            return Err(ConsensusError::UnknownCandidate(candidate));
        }

        let previous = self.votes.insert(voter.clone(), candidate.clone());
        if let Some(ref prev) = previous {
            tracing::debug!(
                consensus_id = %self.id,
                voter = %voter,
                previous = %prev,
                now = %candidate,
                "Vote overwritten"
            );
        }
        Ok(previous)
    }

    /// Tally the votes and freeze the winner.
    pub fn complete(&mut self) -> Result<SwarmSolution, ConsensusError> {
        self.require(ConsensusStatus::Voting)?;

        let index = select_winner(&self.solutions, &self.votes)
            .ok_or_else(|| ConsensusError::NoSolutions(self.id.to_string()))?;
        let winner = self.solutions[index].clone();

        self.status = ConsensusStatus::Complete;
        self.winning_id = Some(winner.agent_id.clone());
        self.completed_at = Some(Utc::now());

        tracing::info!(
            consensus_id = %self.id,
            task_id = %self.task_id,
            winner = %winner.agent_id,
            votes = self.votes.len(),
            "Consensus complete"
        );

        Ok(winner)
    }

    pub fn solution_by(&self, agent_id: &AgentId) -> Option<&SwarmSolution> {
        self.solutions.iter().find(|s| &s.agent_id == agent_id)
    }

    pub fn winning_solution(&self) -> Option<&SwarmSolution> {
        self.winning_id.as_ref().and_then(|id| self.solution_by(id))
    }

    pub fn vote_counts(&self) -> BTreeMap<AgentId, usize> {
        count_votes(&self.votes)
    }

    pub fn is_complete(&self) -> bool {
        self.status == ConsensusStatus::Complete
    }
}
