//! Group containment graph.
//!
//! Groups form a directed graph with an edge from each parent to each child.
//! Building a [`GroupGraph`] checks that graph for cycles once; afterwards
//! every walk is a plain topological traversal and cannot loop.
//!
//! Nodes are added in inventory declaration order, so a node's index doubles
//! as its declaration rank. [`GroupGraph::ancestry`] uses that rank to order
//! groups that are otherwise unordered (siblings): earlier declared first.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::debug;

use super::{Inventory, InventoryError, InventoryResult};

/// The group DAG of an inventory
#[derive(Debug, Clone)]
pub struct GroupGraph {
    graph: DiGraph<String, ()>,
    node_indices: HashMap<String, NodeIndex>,
}

impl GroupGraph {
    /// Build the graph and reject containment cycles.
    pub fn build(inventory: &Inventory) -> InventoryResult<Self> {
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();

        for name in inventory.group_names() {
            let idx = graph.add_node(name.clone());
            node_indices.insert(name.clone(), idx);
        }

        for group in inventory.groups() {
            let parent = node_indices[&group.name];
            for child in &group.children {
                let child_idx = match node_indices.get(child) {
                    Some(idx) => *idx,
                    None => return Err(InventoryError::GroupNotFound(child.clone())),
                };
                graph.update_edge(parent, child_idx, ());
            }
        }

        let built = Self {
            graph,
            node_indices,
        };
        if let Some(cycle) = built.find_cycle() {
            return Err(InventoryError::CycleDetected(cycle));
        }

        debug!(
            groups = built.graph.node_count(),
            edges = built.graph.edge_count(),
            "Built group graph"
        );
        Ok(built)
    }

    /// A cycle as a closed path (`[a, b, a]`), if one exists.
    fn find_cycle(&self) -> Option<Vec<String>> {
        for idx in self.graph.node_indices() {
            if self.graph.contains_edge(idx, idx) {
                let name = self.graph[idx].clone();
                return Some(vec![name.clone(), name]);
            }
        }

        let mut components: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .collect();
        components.sort_by_key(|scc| scc.iter().map(|i| i.index()).min());
        let component = components.into_iter().next()?;

        let members: HashSet<NodeIndex> = component.iter().copied().collect();
        let start = component.iter().copied().min_by_key(|i| i.index())?;
        let mut path = self.path_back_to(start, &members)?;
        path.push(start);
        Some(path.into_iter().map(|i| self.graph[i].clone()).collect())
    }

    /// Shortest path from `start` back to itself within `members`.
    fn path_back_to(&self, start: NodeIndex, members: &HashSet<NodeIndex>) -> Option<Vec<NodeIndex>> {
        let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            let mut next: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(current, Direction::Outgoing)
                .filter(|n| members.contains(n))
                .collect();
            next.sort_by_key(|n| n.index());

            for neighbor in next {
                if neighbor == start {
                    let mut path = vec![current];
                    let mut cursor = current;
                    while let Some(prev) = previous.get(&cursor) {
                        path.push(*prev);
                        cursor = *prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                if neighbor != start && !previous.contains_key(&neighbor) {
                    previous.insert(neighbor, current);
                    queue.push_back(neighbor);
                }
            }
        }
        None
    }

    /// Whether a group is part of the graph
    pub fn contains(&self, group: &str) -> bool {
        self.node_indices.contains_key(group)
    }

    /// Groups `direct` belong to, with every inherited ancestor, in the
    /// order their variables apply: parents before children, and among
    /// groups with no ordering between them, declaration order.
    pub fn ancestry<'a, I>(&self, direct: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        // Upward closure
        let mut members: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = direct
            .into_iter()
            .filter_map(|g| self.node_indices.get(g).copied())
            .collect();
        while let Some(idx) = queue.pop_front() {
            if members.insert(idx) {
                queue.extend(self.graph.neighbors_directed(idx, Direction::Incoming));
            }
        }

        // Kahn's algorithm with the declaration rank as tie-breaker
        let mut in_degree: HashMap<NodeIndex, usize> = members
            .iter()
            .map(|&idx| {
                let parents = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .filter(|p| members.contains(p))
                    .count();
                (idx, parents)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| Reverse(idx.index()))
            .collect();

        let mut order = Vec::with_capacity(members.len());
        while let Some(Reverse(rank)) = ready.pop() {
            let idx = NodeIndex::new(rank);
            order.push(self.graph[idx].clone());
            for child in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(child.index()));
                    }
                }
            }
        }

        order
    }

    /// Every group in topological order
    pub fn topological(&self) -> Vec<String> {
        self.ancestry(self.graph.node_weights().map(String::as_str))
    }

    /// Direct children of a group, in declaration order
    pub fn children(&self, group: &str) -> Vec<String> {
        self.neighbors(group, Direction::Outgoing)
    }

    /// Direct parents of a group, in declaration order
    pub fn parents(&self, group: &str) -> Vec<String> {
        self.neighbors(group, Direction::Incoming)
    }

    fn neighbors(&self, group: &str, direction: Direction) -> Vec<String> {
        let Some(&idx) = self.node_indices.get(group) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort_by_key(|n| n.index());
        found.into_iter().map(|n| self.graph[n].clone()).collect()
    }
}
