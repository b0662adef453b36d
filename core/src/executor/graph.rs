use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::task::Task;

/// Task dependency graph (DAG).
///
/// Only ids and durations are stored; the tasks themselves stay in the plan arena.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// Dependency edges: task_id -> list of dependencies
    edges: HashMap<String, Vec<String>>,

    /// Reverse edges: task_id -> list of tasks that depend on it
    reverse_edges: HashMap<String, Vec<String>>,

    /// Estimated duration per task, in seconds
    durations: HashMap<String, u64>,

    /// Original insertion order (for stable sorting)
    insertion_order: Vec<String>,
}

/// Longest dependency-respecting chain through the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalPath {
    /// Total estimated time under full parallelism.
    pub total_secs: u64,
    /// Task ids on the chain, dependency first.
    pub path: Vec<String>,
    /// `longest(task)`: longest finishing time of each task.
    pub finish_secs: HashMap<String, u64>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl DependencyGraph {
    /// Construct and validate the graph for a task list.
    ///
    /// Fails on duplicate ids, unknown dependencies and cycles. No partial
    /// graph is ever returned.
    pub fn from_tasks(tasks: &[Task]) -> Result<Self, PlanError> {
        let mut edges = HashMap::new();
        let mut reverse_edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut durations = HashMap::new();
        let mut insertion_order = Vec::with_capacity(tasks.len());

        for task in tasks {
            if edges.contains_key(&task.id) {
                return Err(PlanError::DuplicateTaskId(task.id.clone()));
            }

            edges.insert(task.id.clone(), task.dependencies.clone());
            durations.insert(task.id.clone(), task.estimated_secs);
            reverse_edges.entry(task.id.clone()).or_default();
            insertion_order.push(task.id.clone());

            for dep in &task.dependencies {
                reverse_edges
                    .entry(dep.clone())
                    .or_default()
                    .push(task.id.clone());
            }
        }

        let graph = Self {
            edges,
            reverse_edges,
            durations,
            insertion_order,
        };
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> Result<(), PlanError> {
        // Check all dependencies exist, in input order so errors are stable
        for task_id in &self.insertion_order {
            for dep in self.dependencies(task_id) {
                if !self.edges.contains_key(dep) {
                    return Err(PlanError::DependencyNotFound {
                        task_id: task_id.clone(),
                        missing_dep: dep.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = self.detect_cycle() {
            return Err(PlanError::CircularDependency {
                task_id: cycle[0].clone(),
                cycle,
            });
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.insertion_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insertion_order.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.edges.contains_key(task_id)
    }

    pub fn dependencies(&self, task_id: &str) -> &[String] {
        self.edges.get(task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, task_id: &str) -> &[String] {
        self.reverse_edges
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every task reachable through dependent edges.
    pub fn transitive_dependents(&self, task_id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = vec![task_id];
        while let Some(id) = stack.pop() {
            for dependent in self.dependents(id) {
                if seen.insert(dependent.clone()) {
                    stack.push(dependent);
                }
            }
        }
        seen
    }

    /// Dependency levels using Kahn's algorithm.
    ///
    /// Level 0 holds tasks without dependencies; level k holds tasks whose
    /// dependencies all sit in levels `0..k`. Each level keeps input order.
    ///
    /// O(V + E) where V = number of tasks, E = number of dependencies
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .insertion_order
            .iter()
            .map(|id| (id.as_str(), self.dependencies(id).len()))
            .collect();
        let position = self.positions();

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = self
            .insertion_order
            .iter()
            .filter(|id| in_degree.get(id.as_str()) == Some(&0))
            .cloned()
            .collect();

        while !current.is_empty() {
            let mut next = Vec::new();
            for task_id in &current {
                for dependent in self.dependents(task_id) {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent.clone());
                        }
                    }
                }
            }
            // Preserve input order
            next.sort_by_key(|id| position.get(id.as_str()).copied().unwrap_or(usize::MAX));

            levels.push(std::mem::replace(&mut current, next));
        }

        levels
    }

    /// Topological order: every task appears after all of its dependencies.
    pub fn topological_order(&self) -> Vec<String> {
        self.levels().into_iter().flatten().collect()
    }

    /// Critical path via dynamic programming over the topological order.
    ///
    /// `longest(t) = max(longest(dep)) + t.estimated_secs`; the total is the
    /// maximum over all sinks. Independent branches never add up.
    pub fn critical_path(&self) -> CriticalPath {
        let order = self.topological_order();
        let mut finish: HashMap<String, u64> = HashMap::with_capacity(order.len());
        let mut via: HashMap<&str, &str> = HashMap::new();

        for task_id in &order {
            let mut start = 0;
            for dep in self.dependencies(task_id) {
                let dep_finish = finish.get(dep).copied().unwrap_or(0);
                // first dependency wins ties
                if dep_finish > start || !via.contains_key(task_id.as_str()) {
                    via.insert(task_id.as_str(), dep.as_str());
                    start = start.max(dep_finish);
                }
            }
            let own = self.durations.get(task_id).copied().unwrap_or(0);
            finish.insert(task_id.clone(), start.saturating_add(own));
        }

        // Sinks are tasks without dependents; ties resolve to input order.
        let mut end: Option<(&str, u64)> = None;
        for task_id in &order {
            if !self.dependents(task_id).is_empty() {
                continue;
            }
            let value = finish.get(task_id).copied().unwrap_or(0);
            match end {
                Some((_, best)) if value <= best => {}
                _ => end = Some((task_id, value)),
            }
        }

        let mut path = Vec::new();
        let mut cursor = end.map(|(id, _)| id);
        while let Some(id) = cursor {
            path.push(id.to_string());
            cursor = via.get(id).copied();
        }
        path.reverse();

        CriticalPath {
            total_secs: end.map(|(_, v)| v).unwrap_or(0),
            path,
            finish_secs: finish,
        }
    }

    /// Remaining critical-path time from each task to the end of the plan
    /// (its own duration included). Used as the scheduling priority.
    pub fn remaining_secs(&self) -> HashMap<String, u64> {
        let mut order = self.topological_order();
        order.reverse();

        let mut remaining: HashMap<String, u64> = HashMap::with_capacity(order.len());
        for task_id in order {
            let tail = self
                .dependents(&task_id)
                .iter()
                .filter_map(|d| remaining.get(d).copied())
                .max()
                .unwrap_or(0);
            let own = self.durations.get(&task_id).copied().unwrap_or(0);
            remaining.insert(task_id, own.saturating_add(tail));
        }
        remaining
    }

    fn positions(&self) -> HashMap<&str, usize> {
        self.insertion_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect()
    }

    /// Detect circular dependencies with a three-colour DFS.
    ///
    /// Returns the cycle path, starting and ending at the offending task.
    ///
    /// O(V + E) where V = number of tasks, E = number of dependencies
    fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut colors: HashMap<&str, Color> = self
            .insertion_order
            .iter()
            .map(|id| (id.as_str(), Color::White))
            .collect();
        let mut stack: Vec<&str> = Vec::new();

        for task_id in &self.insertion_order {
            if colors.get(task_id.as_str()) == Some(&Color::White) {
                if let Some(cycle) = self.dfs_cycle(task_id, &mut colors, &mut stack) {
                    return Some(cycle);
                }
            }
        }

        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        colors: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        colors.insert(node, Color::Gray);
        stack.push(node);

        for dep in self.dependencies(node) {
            match colors.get(dep.as_str()).copied().unwrap_or(Color::Black) {
                // Dependency is on the current path
                Color::Gray => {
                    let pos = stack.iter().position(|x| *x == dep.as_str())?;
                    let mut cycle: Vec<String> =
                        stack[pos..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Color::White => {
                    if let Some(cycle) = self.dfs_cycle(dep, colors, stack) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        stack.pop();
        colors.insert(node, Color::Black);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;

    fn task(id: &str, secs: u64, deps: &[&str]) -> Task {
        Task::new(id, id, TaskType::Execution, "run")
            .estimated(secs)
            .depends_on(deps.iter().copied())
    }

    #[test]
    fn parallel_branches_do_not_add_up() {
        let graph = DependencyGraph::from_tasks(&[
            task("A", 60, &[]),
            task("B", 120, &[]),
            task("C", 30, &["A", "B"]),
        ])
        .unwrap();

        let cp = graph.critical_path();
        assert_eq!(cp.total_secs, 150);
        assert_eq!(cp.path, vec!["B", "C"]);
        assert_eq!(graph.levels(), vec![vec!["A", "B"], vec!["C"]]);
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let tasks = vec![
            task("deploy", 5, &["test", "build"]),
            task("test", 5, &["build"]),
            task("build", 5, &["fetch"]),
            task("fetch", 5, &[]),
            task("lint", 5, &["fetch"]),
        ];
        let graph = DependencyGraph::from_tasks(&tasks).unwrap();
        let order = graph.topological_order();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();

        assert_eq!(order.len(), tasks.len());
        for t in &tasks {
            for dep in &t.dependencies {
                assert!(pos(dep) < pos(&t.id), "{dep} must precede {}", t.id);
            }
        }
    }

    #[test]
    fn two_task_cycle_names_a_member() {
        let err = DependencyGraph::from_tasks(&[task("X", 1, &["Y"]), task("Y", 1, &["X"])])
            .unwrap_err();
        match err {
            PlanError::CircularDependency { task_id, cycle } => {
                assert!(task_id == "X" || task_id == "Y");
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = DependencyGraph::from_tasks(&[task("A", 1, &["A"])]).unwrap_err();
        assert!(matches!(err, PlanError::CircularDependency { ref task_id, .. } if task_id == "A"));
    }

    #[test]
    fn missing_dependency_and_duplicates_are_rejected() {
        assert_eq!(
            DependencyGraph::from_tasks(&[task("A", 1, &["ghost"])]).unwrap_err(),
            PlanError::DependencyNotFound {
                task_id: "A".into(),
                missing_dep: "ghost".into()
            }
        );
        assert_eq!(
            DependencyGraph::from_tasks(&[task("A", 1, &[]), task("A", 1, &[])]).unwrap_err(),
            PlanError::DuplicateTaskId("A".into())
        );
    }

    #[test]
    fn critical_path_is_monotone_in_duration() {
        let base = vec![
            task("a", 10, &[]),
            task("b", 20, &["a"]),
            task("c", 5, &["a"]),
            task("d", 1, &["b", "c"]),
        ];
        let base_total = DependencyGraph::from_tasks(&base)
            .unwrap()
            .critical_path()
            .total_secs;
        assert_eq!(base_total, 31);

        for idx in 0..base.len() {
            let mut previous = base_total;
            let mut tasks = base.clone();
            for bump in [1, 7, 40] {
                tasks[idx].estimated_secs += bump;
                let total = DependencyGraph::from_tasks(&tasks)
                    .unwrap()
                    .critical_path()
                    .total_secs;
                assert!(total >= previous, "bumping {} lowered the total", tasks[idx].id);
                previous = total;
            }
        }
    }

    #[test]
    fn remaining_secs_counts_the_longest_tail() {
        let graph = DependencyGraph::from_tasks(&[
            task("a", 10, &[]),
            task("b", 20, &["a"]),
            task("c", 5, &["a"]),
        ])
        .unwrap();
        let remaining = graph.remaining_secs();
        assert_eq!(remaining["a"], 30);
        assert_eq!(remaining["b"], 20);
        assert_eq!(remaining["c"], 5);
    }

    #[test]
    fn transitive_dependents_follow_the_chain() {
        let graph = DependencyGraph::from_tasks(&[
            task("a", 1, &[]),
            task("b", 1, &["a"]),
            task("c", 1, &["b"]),
            task("d", 1, &[]),
        ])
        .unwrap();
        let deps = graph.transitive_dependents("a");
        assert!(deps.contains("b") && deps.contains("c"));
        assert!(!deps.contains("d"));
    }
}
