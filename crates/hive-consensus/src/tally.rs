//! Vote tallying.

use std::collections::BTreeMap;

use hive_protocol::{AgentId, SwarmSolution};

/// Number of votes cast for each solution author.
pub fn count_votes(votes: &BTreeMap<AgentId, AgentId>) -> BTreeMap<AgentId, usize> {
    let mut counts = BTreeMap::new();
    for candidate in votes.values() {
        *counts.entry(candidate.clone()).or_insert(0) += 1;
    }
    counts
}

/// Index of the winning solution.
///
/// The most-voted author wins. With no votes cast, the most confident
/// solution wins. Ties go to the solution submitted first in both cases.
/// Returns `None` only when there are no solutions.
pub fn select_winner(
    solutions: &[SwarmSolution],
    votes: &BTreeMap<AgentId, AgentId>,
) -> Option<usize> {
    if solutions.is_empty() {
        return None;
    }

    let counts = count_votes(votes);
    let total: usize = counts.values().sum();

    let mut best = 0;
    if total == 0 {
        for (i, solution) in solutions.iter().enumerate().skip(1) {
            if solution.confidence > solutions[best].confidence {
                best = i;
            }
        }
    } else {
        let votes_for = |s: &SwarmSolution| counts.get(&s.agent_id).copied().unwrap_or(0);
        for (i, solution) in solutions.iter().enumerate().skip(1) {
            if votes_for(solution) > votes_for(&solutions[best]) {
                best = i;
            }
        }
    }
    Some(best)
}
