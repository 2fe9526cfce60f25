use crate::types::{DependencyId, TaskDependency, TaskId};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// In-memory view of the dependency edges
///
/// Built from the stored edges for each operation; the store stays the
/// source of truth.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    inner: DiGraphMap<TaskId, DependencyId>,
}

impl TaskGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored edges
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a TaskDependency>) -> Self {
        let mut graph = Self::new();
        for edge in edges {
            graph.insert(edge);
        }
        graph
    }

    pub fn insert(&mut self, edge: &TaskDependency) {
        self.inner.add_edge(edge.predecessor, edge.successor, edge.id);
    }

    pub fn remove(&mut self, predecessor: TaskId, successor: TaskId) -> Option<DependencyId> {
        self.inner.remove_edge(predecessor, successor)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Id of the edge `predecessor -> successor`, if stored
    #[must_use]
    pub fn edge_between(&self, predecessor: TaskId, successor: TaskId) -> Option<DependencyId> {
        self.inner.edge_weight(predecessor, successor).copied()
    }

    /// Immediate predecessors, sorted
    #[must_use]
    pub fn predecessors(&self, task: TaskId) -> Vec<TaskId> {
        self.neighbors(task, Direction::Incoming)
    }

    /// Immediate successors, sorted
    #[must_use]
    pub fn successors(&self, task: TaskId) -> Vec<TaskId> {
        self.neighbors(task, Direction::Outgoing)
    }

    fn neighbors(&self, task: TaskId, dir: Direction) -> Vec<TaskId> {
        if !self.inner.contains_node(task) {
            return Vec::new();
        }
        let mut out: Vec<TaskId> = self.inner.neighbors_directed(task, dir).collect();
        out.sort_unstable();
        out
    }

    /// Path `from ->* to` following edge direction, if one exists
    ///
    /// Iterative depth-first search; each task is expanded at most once so
    /// the walk is bounded by O(V + E).
    #[must_use]
    pub fn find_path(&self, from: TaskId, to: TaskId) -> Option<Vec<TaskId>> {
        if !self.inner.contains_node(from) || !self.inner.contains_node(to) {
            return None;
        }

        let mut parent: HashMap<TaskId, TaskId> = HashMap::new();
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut stack = vec![from];

        while let Some(node) = stack.pop() {
            if node == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(&prev) = parent.get(&cursor) {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            if !visited.insert(node) {
                continue;
            }
            for next in self.inner.neighbors_directed(node, Direction::Outgoing) {
                if !visited.contains(&next) {
                    parent.entry(next).or_insert(node);
                    stack.push(next);
                }
            }
        }
        None
    }

    /// Whether `predecessor -> successor` would close a cycle
    ///
    /// Returns the existing path from `successor` back to `predecessor`.
    #[must_use]
    pub fn would_close_cycle(&self, predecessor: TaskId, successor: TaskId) -> Option<Vec<TaskId>> {
        if predecessor == successor {
            return Some(vec![predecessor]);
        }
        self.find_path(successor, predecessor)
    }

    /// Whether the graph contains any cycle
    #[must_use]
    pub fn is_cyclic(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.inner)
    }

    /// One cycle in the graph, if any, as the tasks along it
    #[must_use]
    pub fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        let mut path = Vec::new();

        fn dfs(
            node: TaskId,
            graph: &DiGraphMap<TaskId, DependencyId>,
            visiting: &mut HashSet<TaskId>,
            visited: &mut HashSet<TaskId>,
            path: &mut Vec<TaskId>,
        ) -> Option<Vec<TaskId>> {
            if visiting.contains(&node) {
                let start = path.iter().position(|&n| n == node).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(node);
                return Some(cycle);
            }
            if visited.contains(&node) {
                return None;
            }

            visiting.insert(node);
            path.push(node);

            let mut next: Vec<TaskId> =
                graph.neighbors_directed(node, Direction::Outgoing).collect();
            next.sort_unstable();
            for neighbor in next {
                if let Some(cycle) = dfs(neighbor, graph, visiting, visited, path) {
                    return Some(cycle);
                }
            }

            path.pop();
            visiting.remove(&node);
            visited.insert(node);
            None
        }

        let mut nodes: Vec<TaskId> = self.inner.nodes().collect();
        nodes.sort_unstable();
        for node in nodes {
            if !visited.contains(&node) {
                let found = dfs(node, &self.inner, &mut visiting, &mut visited, &mut path);
                if found.is_some() {
                    return found;
                }
            }
        }
        None
    }

    /// Topological order of every task with an edge
    #[must_use]
    pub fn topological_order(&self) -> Option<Vec<TaskId>> {
        petgraph::algo::toposort(&self.inner, None).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(predecessor: TaskId, successor: TaskId) -> TaskDependency {
        TaskDependency {
            id: DependencyId::new(),
            predecessor,
            successor,
        }
    }

    #[test]
    fn chain_reachability() {
        let (a, b, c) = (TaskId::new(), TaskId::new(), TaskId::new());
        let graph = TaskGraph::from_edges(&[edge(a, b), edge(b, c)]);

        assert_eq!(graph.find_path(a, c), Some(vec![a, b, c]));
        assert_eq!(graph.find_path(c, a), None);
        assert_eq!(graph.would_close_cycle(c, a), Some(vec![a, b, c]));
        assert_eq!(graph.would_close_cycle(a, c), None);
    }

    #[test]
    fn self_loop_always_closes_cycle() {
        let a = TaskId::new();
        assert_eq!(TaskGraph::new().would_close_cycle(a, a), Some(vec![a]));
    }

    #[test]
    fn detect_cycle_returns_closed_walk() {
        let (a, b, c) = (TaskId::new(), TaskId::new(), TaskId::new());
        let graph = TaskGraph::from_edges(&[edge(a, b), edge(b, c), edge(c, a)]);

        assert!(graph.is_cyclic());
        let cycle = graph.detect_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(graph.topological_order().is_none());
    }

    #[test]
    fn diamond_is_acyclic() {
        let (a, b, c, d) = (TaskId::new(), TaskId::new(), TaskId::new(), TaskId::new());
        let graph = TaskGraph::from_edges(&[edge(a, b), edge(a, c), edge(b, d), edge(c, d)]);

        assert!(!graph.is_cyclic());
        assert!(graph.detect_cycle().is_none());
        assert_eq!(graph.predecessors(d).len(), 2);
        assert_eq!(graph.successors(a).len(), 2);
        let order = graph.topological_order().unwrap();
        let pos = |t: TaskId| order.iter().position(|&n| n == t).unwrap();
        assert!(pos(a) < pos(d));
    }
}
