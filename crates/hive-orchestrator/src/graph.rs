//! Step definitions and the dependency graph built from them.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use hive_protocol::{TaskId, DEFAULT_STEP_TIMEOUT_MS};

use crate::OrchestratorError;

fn default_timeout_ms() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

/// One step of a compound task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    /// Kind of agent expected to handle the step.
    pub agent_type: String,
    pub action: String,
    /// Context keys forwarded to the step; empty forwards the whole context.
    #[serde(default)]
    pub required_data: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub priority: i32,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            action: action.into(),
            required_data: Vec::new(),
            depends_on: Vec::new(),
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            priority: 0,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn requires<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_data = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A compound task: a named set of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub id: Option<TaskId>,
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            id: None,
            name: name.into(),
            steps,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Dependency graph of a task's steps plus their completion state.
///
/// Owned by exactly one running task. `ready_steps` only reads; the only
/// mutation is `mark_completed`.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    steps: Vec<StepDefinition>,
    results: BTreeMap<String, serde_json::Value>,
}

impl TaskGraph {
    /// Build a graph, rejecting duplicate step ids and dependency cycles.
    ///
    /// A dependency on a step that does not exist is accepted here; it
    /// can never be satisfied and surfaces as a deadlock at run time.
    pub fn new(steps: Vec<StepDefinition>) -> Result<Self, OrchestratorError> {
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.id.as_str()) {
                return Err(OrchestratorError::DuplicateStep(step.id.clone()));
            }
        }

        let blocked = Self::cyclic_steps(&steps);
        if !blocked.is_empty() {
            return Err(OrchestratorError::Cycle(blocked));
        }

        Ok(Self {
            steps,
            results: BTreeMap::new(),
        })
    }

    /// Kahn's algorithm over the known steps. Whatever cannot be ordered
    /// sits on, or downstream of, a cycle.
    fn cyclic_steps(steps: &[StepDefinition]) -> Vec<String> {
        let known: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for step in steps {
            let deps: HashSet<&str> = step
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|d| known.contains(d))
                .collect();
            indegree.insert(step.id.as_str(), deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(step.id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = steps
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| indegree[id] == 0)
            .collect();
        let mut ordered = HashSet::new();

        while let Some(id) = queue.pop_front() {
            ordered.insert(id);
            for next in dependents.get(id).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }

        steps
            .iter()
            .filter(|s| !ordered.contains(s.id.as_str()))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Steps not yet completed whose dependencies all are, in definition order.
    pub fn ready_steps(&self) -> Vec<&StepDefinition> {
        self.steps
            .iter()
            .filter(|s| !self.results.contains_key(&s.id))
            .filter(|s| s.depends_on.iter().all(|d| self.results.contains_key(d)))
            .collect()
    }

    pub fn mark_completed(&mut self, step_id: &str, result: serde_json::Value) {
        self.results.insert(step_id.to_string(), result);
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| self.results.contains_key(&s.id))
    }

    pub fn pending_steps(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| !self.results.contains_key(&s.id))
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn results(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.results
    }

    pub fn into_results(self) -> BTreeMap<String, serde_json::Value> {
        self.results
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> StepDefinition {
        StepDefinition::new(id, "worker", format!("do-{id}")).depends_on(deps.iter().copied())
    }

    fn ready_ids(graph: &TaskGraph) -> Vec<String> {
        graph.ready_steps().iter().map(|s| s.id.clone()).collect()
    }

    #[test]
    fn test_ready_steps_follow_dependencies() {
        let mut graph = TaskGraph::new(vec![
            step("a", &[]),
            step("b", &[]),
            step("c", &["a", "b"]),
        ])
        .unwrap();

        assert_eq!(ready_ids(&graph), vec!["a", "b"]);
        graph.mark_completed("a", serde_json::json!(1));
        assert_eq!(ready_ids(&graph), vec!["b"]);
        graph.mark_completed("b", serde_json::json!(2));
        assert_eq!(ready_ids(&graph), vec!["c"]);
        graph.mark_completed("c", serde_json::json!(3));
        assert!(graph.is_complete());
        assert!(ready_ids(&graph).is_empty());
    }

    #[test]
    fn test_cycle_rejected_at_construction() {
        let err = TaskGraph::new(vec![step("a", &["b"]), step("b", &["a"]), step("c", &[])])
            .unwrap_err();
        match err {
            OrchestratorError::Cycle(ids) => assert_eq!(ids, vec!["a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        assert!(matches!(
            TaskGraph::new(vec![step("a", &["a"])]),
            Err(OrchestratorError::Cycle(_))
        ));
    }

    #[test]
    fn test_duplicate_step_rejected() {
        assert!(matches!(
            TaskGraph::new(vec![step("a", &[]), step("a", &[])]),
            Err(OrchestratorError::DuplicateStep(id)) if id == "a"
        ));
    }

    #[test]
    fn test_unknown_dependency_is_never_ready() {
        let graph = TaskGraph::new(vec![step("a", &["missing"])]).unwrap();
        assert!(ready_ids(&graph).is_empty());
        assert_eq!(graph.pending_steps(), vec!["a"]);
        assert!(!graph.is_complete());
    }

    #[test]
    fn test_step_defaults_from_json() {
        let step: StepDefinition = serde_json::from_value(serde_json::json!({
            "id": "a",
            "agent_type": "pricing",
            "action": "quote"
        }))
        .unwrap();
        assert_eq!(step.timeout_ms, DEFAULT_STEP_TIMEOUT_MS);
        assert!(step.depends_on.is_empty());
        assert!(step.required_data.is_empty());
    }
}
