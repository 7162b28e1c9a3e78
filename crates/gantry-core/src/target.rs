//! Declarative target graph and topological execution planning.
//!
//! Models pipeline steps as nodes in a directed acyclic graph (DAG). An
//! edge `A → B` means "B requires A" — A must run to completion before B
//! may start. Aggregator targets carry no action of their own; they exist
//! only to fan in over their prerequisites (`lints` over `lints.*`).
//!
//! Plans are computed via Kahn's algorithm over the transitive
//! prerequisite closure of the requested target, with a sorted wavefront
//! so plan order is deterministic.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{GantryError, Result};

/// Validate a dotted hierarchical target name (`lints`, `lints.flake8`).
///
/// Segments are non-empty and limited to lowercase ascii, digits and
/// underscores.
pub fn validate_target_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(GantryError::InvalidTargetName(name.to_string()))
    }
}

/// A single named step in the pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Unique dotted name, e.g. `"lints.flake8"`.
    pub name: String,
    /// Short human-readable description.
    pub description: String,
    /// True when this target has no action and only fans in over its
    /// prerequisites.
    pub aggregate: bool,
}

impl Target {
    /// Create an actionable target.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            aggregate: false,
        }
    }

    /// Create an aggregator target (prerequisites only, no action).
    pub fn aggregator(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            aggregate: true,
        }
    }
}

/// A step in a validated execution plan.
#[derive(Debug, Clone)]
pub struct PlanStep {
    /// 0-indexed position in the plan.
    pub position: usize,
    /// The target assigned to this step.
    pub target: Target,
    /// Names of targets whose completion this step waits for.
    pub requires: Vec<String>,
}

/// An ordered, cycle-free execution plan for one requested target.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// The target the plan was requested for.
    pub goal: String,
    /// Steps in topological order (prerequisites before dependents).
    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    /// Names of all planned targets, in execution order.
    pub fn target_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.target.name.as_str()).collect()
    }
}

/// Directed prerequisite graph over [`Target`]s.
///
/// Edges are stored as `prerequisite → dependents` adjacency lists.
/// Cycles are rejected at insertion time via DFS with rollback.
#[derive(Debug, Clone, Default)]
pub struct TargetGraph {
    nodes: BTreeMap<String, Target>,
    /// `prerequisite → {dependent, ...}` (downstream adjacency)
    downstream: HashMap<String, BTreeSet<String>>,
    /// `dependent → {prerequisite, ...}` (upstream adjacency)
    upstream: HashMap<String, BTreeSet<String>>,
}

impl TargetGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a [`Target`]. Idempotent — re-registering an existing name
    /// updates the node metadata.
    pub fn add_target(&mut self, target: Target) -> Result<()> {
        validate_target_name(&target.name)?;
        let name = target.name.clone();
        self.nodes.insert(name.clone(), target);
        self.downstream.entry(name.clone()).or_default();
        self.upstream.entry(name).or_default();
        Ok(())
    }

    /// Declare that `dependent` requires `prerequisite`.
    ///
    /// Both targets must already be registered. Returns
    /// [`GantryError::DependencyCycle`] if the edge would introduce a
    /// cycle (checked via DFS before the edge is committed).
    pub fn add_prerequisite(&mut self, dependent: &str, prerequisite: &str) -> Result<()> {
        for name in [dependent, prerequisite] {
            if !self.nodes.contains_key(name) {
                return Err(GantryError::TargetNotFound(name.to_string()));
            }
        }

        // Tentatively add the edge.
        self.downstream
            .entry(prerequisite.to_string())
            .or_default()
            .insert(dependent.to_string());
        self.upstream
            .entry(dependent.to_string())
            .or_default()
            .insert(prerequisite.to_string());

        // DFS cycle check starting from the newly added dependent.
        if let Some(cycle) = self.find_cycle_through(dependent) {
            // Roll back.
            self.downstream
                .get_mut(prerequisite)
                .unwrap()
                .remove(dependent);
            self.upstream
                .get_mut(dependent)
                .unwrap()
                .remove(prerequisite);
            return Err(GantryError::DependencyCycle { targets: cycle });
        }

        Ok(())
    }

    /// Look up a registered target by name.
    pub fn get(&self, name: &str) -> Option<&Target> {
        self.nodes.get(name)
    }

    /// All registered target names, sorted.
    pub fn target_names(&self) -> Vec<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }

    /// Direct prerequisites of `name`.
    pub fn prerequisites_of(&self, name: &str) -> Result<Vec<&Target>> {
        self.nodes
            .get(name)
            .ok_or_else(|| GantryError::TargetNotFound(name.to_string()))?;
        Ok(self
            .upstream
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|n| self.nodes.get(n))
            .collect())
    }

    /// Compute the execution plan for `goal`: its transitive prerequisite
    /// closure in topological order (Kahn's algorithm, sorted wavefront).
    pub fn plan(&self, goal: &str) -> Result<ExecutionPlan> {
        self.nodes
            .get(goal)
            .ok_or_else(|| GantryError::TargetNotFound(goal.to_string()))?;

        // Transitive upstream closure of the goal (BFS).
        let mut selected: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(goal.to_string());
        selected.insert(goal.to_string());
        while let Some(current) = queue.pop_front() {
            for pre in self.upstream.get(&current).into_iter().flatten() {
                if selected.insert(pre.clone()) {
                    queue.push_back(pre.clone());
                }
            }
        }

        // Kahn over the selected subgraph.
        let mut in_degree: HashMap<&str, usize> = selected
            .iter()
            .map(|n| {
                let deg = self
                    .upstream
                    .get(n)
                    .map(|pres| pres.iter().filter(|p| selected.contains(*p)).count())
                    .unwrap_or(0);
                (n.as_str(), deg)
            })
            .collect();

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&n, _)| n)
            .collect();
        ready.sort_unstable();
        let mut queue: VecDeque<&str> = ready.into();

        let mut ordered: Vec<String> = Vec::new();
        while let Some(name) = queue.pop_front() {
            ordered.push(name.to_string());
            let mut next: Vec<&str> = Vec::new();
            for dep in self.downstream.get(name).into_iter().flatten() {
                if !selected.contains(dep) {
                    continue;
                }
                let deg = in_degree.get_mut(dep.as_str()).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    next.push(dep.as_str());
                }
            }
            // Stable sort to keep plan order deterministic.
            next.sort_unstable();
            queue.extend(next);
        }

        if ordered.len() != selected.len() {
            return Err(GantryError::DependencyCycle {
                targets: selected.into_iter().collect(),
            });
        }

        let steps = ordered
            .into_iter()
            .enumerate()
            .map(|(position, name)| {
                let requires = self
                    .upstream
                    .get(&name)
                    .into_iter()
                    .flatten()
                    .filter(|p| selected.contains(*p))
                    .cloned()
                    .collect();
                PlanStep {
                    position,
                    target: self.nodes[&name].clone(),
                    requires,
                }
            })
            .collect();

        Ok(ExecutionPlan {
            goal: goal.to_string(),
            steps,
        })
    }

    /// DFS from `start` to detect cycles. Returns the cycle path if found.
    fn find_cycle_through(&self, start: &str) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        if self.dfs_cycle(start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        if path.contains(&node.to_string()) {
            path.push(node.to_string());
            return true;
        }
        if visited.contains(node) {
            return false;
        }
        visited.insert(node.to_string());
        path.push(node.to_string());

        for dep in self.downstream.get(node).into_iter().flatten() {
            if self.dfs_cycle(dep, visited, path) {
                return true;
            }
        }

        path.pop();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str) -> Target {
        Target::new(name, name)
    }

    fn lint_graph() -> TargetGraph {
        let mut g = TargetGraph::new();
        g.add_target(Target::aggregator("lints", "all linters"))
            .unwrap();
        for t in ["lints.ruff", "lints.flake8", "lints.mypy"] {
            g.add_target(target(t)).unwrap();
            g.add_prerequisite("lints", t).unwrap();
        }
        g
    }

    #[test]
    fn test_plan_orders_prerequisites_first() {
        let mut g = TargetGraph::new();
        g.add_target(target("setup")).unwrap();
        g.add_target(target("format")).unwrap();
        g.add_target(target("test_unit")).unwrap();
        g.add_prerequisite("format", "setup").unwrap();
        g.add_prerequisite("test_unit", "format").unwrap();

        let plan = g.plan("test_unit").unwrap();
        let names = plan.target_names();
        let setup = names.iter().position(|&n| n == "setup").unwrap();
        let format = names.iter().position(|&n| n == "format").unwrap();
        let unit = names.iter().position(|&n| n == "test_unit").unwrap();
        assert!(setup < format, "setup must come before format");
        assert!(format < unit, "format must come before test_unit");
    }

    #[test]
    fn test_plan_selects_only_transitive_closure() {
        let mut g = lint_graph();
        g.add_target(target("build_wheel")).unwrap();

        let plan = g.plan("lints").unwrap();
        assert_eq!(plan.steps.len(), 4);
        assert!(!plan.target_names().contains(&"build_wheel"));
    }

    #[test]
    fn test_aggregator_comes_after_all_children() {
        let g = lint_graph();
        let plan = g.plan("lints").unwrap();
        assert_eq!(plan.target_names().last(), Some(&"lints"));
        assert!(plan.steps.last().unwrap().target.aggregate);
        assert_eq!(plan.steps.last().unwrap().requires.len(), 3);
    }

    #[test]
    fn test_cycle_detection_rejects_mutual_prerequisites() {
        let mut g = TargetGraph::new();
        g.add_target(target("a")).unwrap();
        g.add_target(target("b")).unwrap();
        g.add_prerequisite("b", "a").unwrap();
        let result = g.add_prerequisite("a", "b");
        assert!(matches!(result, Err(GantryError::DependencyCycle { .. })));

        // Rolled back: the graph still plans cleanly.
        assert_eq!(g.plan("b").unwrap().steps.len(), 2);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let mut g = TargetGraph::new();
        g.add_target(target("setup")).unwrap();
        assert!(matches!(
            g.add_prerequisite("setup", "missing"),
            Err(GantryError::TargetNotFound(_))
        ));
        assert!(matches!(
            g.plan("missing"),
            Err(GantryError::TargetNotFound(_))
        ));
    }

    #[test]
    fn test_dotted_names_validated() {
        assert!(validate_target_name("lints.flake8").is_ok());
        assert!(validate_target_name("test_unit").is_ok());
        assert!(validate_target_name("Lints").is_err());
        assert!(validate_target_name("lints..flake8").is_err());
        assert!(validate_target_name("").is_err());
    }

    #[test]
    fn test_plan_order_is_deterministic() {
        let g = lint_graph();
        let first = g.plan("lints").unwrap().target_names().join(",");
        for _ in 0..5 {
            assert_eq!(g.plan("lints").unwrap().target_names().join(","), first);
        }
    }

    #[test]
    fn test_diamond_graph_resolves_correctly() {
        // setup -> {lints, tests} -> release
        let mut g = TargetGraph::new();
        for t in ["setup", "lints", "tests", "release"] {
            g.add_target(target(t)).unwrap();
        }
        g.add_prerequisite("lints", "setup").unwrap();
        g.add_prerequisite("tests", "setup").unwrap();
        g.add_prerequisite("release", "lints").unwrap();
        g.add_prerequisite("release", "tests").unwrap();

        let plan = g.plan("release").unwrap();
        let names = plan.target_names();
        assert_eq!(names.first(), Some(&"setup"));
        assert_eq!(names.last(), Some(&"release"));
    }
}
