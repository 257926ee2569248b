use std::collections::BTreeSet;

use hive_protocol::Agent;

/// Weight of an agent's success rate in its assignment score.
pub const SUCCESS_RATE_WEIGHT: f64 = 3.0;

/// Weight of each specialization that matches a required capability.
pub const SPECIALIZATION_WEIGHT: f64 = 2.0;

/// Assignment score of `agent` for a task needing `required`.
/// - `3 * success_rate + 2 * |specializations ∩ required|`
/// - Agents without valid performance data score 0
pub fn agent_score(agent: &Agent, required: &BTreeSet<String>) -> f64 {
    let Some(perf) = agent.performance.as_ref().filter(|perf| perf.is_valid()) else {
        return 0.0;
    };
    let matches = perf.specializations.intersection(required).count();
    SUCCESS_RATE_WEIGHT * perf.success_rate + SPECIALIZATION_WEIGHT * matches as f64
}

/// Pick the best-scoring candidate. Candidates must be given in
/// registration order; the earliest wins a tie.
pub fn best_candidate<'a, I>(candidates: I, required: &BTreeSet<String>) -> Option<&'a Agent>
where
    I: IntoIterator<Item = &'a Agent>,
{
    let mut best: Option<(&Agent, f64)> = None;
    for agent in candidates {
        let score = agent_score(agent, required);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((agent, score)),
        }
    }
    best.map(|(agent, _)| agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_protocol::{AgentId, AgentPerformance, AgentStatus};

    fn agent(id: &str, perf: Option<(f64, &[&str])>) -> Agent {
        Agent {
            id: AgentId::new(id),
            name: id.into(),
            role: "worker".into(),
            capabilities: BTreeSet::new(),
            status: AgentStatus::Idle,
            performance: perf.map(|(rate, specs)| AgentPerformance {
                success_rate: rate,
                average_task_time: 0.0,
                specializations: specs.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    fn caps(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_score_formula() {
        let a = agent("a", Some((0.5, &["pricing", "legal"])));
        assert_eq!(agent_score(&a, &caps(&["pricing"])), 1.5 + 2.0);
        assert_eq!(agent_score(&a, &caps(&["pricing", "legal"])), 1.5 + 4.0);
        assert_eq!(agent_score(&agent("b", None), &caps(&["pricing"])), 0.0);
    }

    #[test]
    fn test_specialization_outweighs_success_rate() {
        let generalist = agent("g", Some((1.0, &[])));
        let specialist = agent("s", Some((0.5, &["pricing"])));
        let pool = [generalist, specialist];
        let best = best_candidate(pool.iter(), &caps(&["pricing"])).unwrap();
        assert_eq!(best.id.as_str(), "s");
    }

    #[test]
    fn test_tie_goes_to_first_registered() {
        let pool = [agent("first", None), agent("second", None)];
        let best = best_candidate(pool.iter(), &BTreeSet::new()).unwrap();
        assert_eq!(best.id.as_str(), "first");
        assert!(best_candidate(std::iter::empty(), &BTreeSet::new()).is_none());
    }

    #[test]
    fn test_non_finite_rate_cannot_displace_leader() {
        let pool = [agent("leader", Some((0.8, &[]))), agent("nan", Some((f64::NAN, &[])))];
        assert_eq!(agent_score(&pool[1], &BTreeSet::new()), 0.0);
        let best = best_candidate(pool.iter(), &BTreeSet::new()).unwrap();
        assert_eq!(best.id.as_str(), "leader");
    }
}
