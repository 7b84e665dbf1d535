/// Dependency graph over a drained execution queue
///
/// Nodes are queue positions; an edge runs from a producer stub to every later
/// stub that takes its output placeholder as an argument. Placeholders pointing at
/// executions outside the queue (earlier runs) add no edges.

use crate::runtime::placeholder::ExecutionId;
use crate::runtime::stub::CallStub;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug)]
pub struct StubGraph {
    /// Node weight is the stub's queue position
    graph: DiGraph<usize, ()>,
    /// Queue position -> graph node
    nodes: Vec<NodeIndex>,
}

impl StubGraph {
    pub fn build(stubs: &[CallStub]) -> Self {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..stubs.len()).map(|i| graph.add_node(i)).collect();

        let producers: HashMap<&ExecutionId, usize> = stubs
            .iter()
            .enumerate()
            .map(|(i, stub)| (&stub.execution_id, i))
            .collect();

        for (consumer, stub) in stubs.iter().enumerate() {
            for placeholder in stub.placeholders() {
                match producers.get(&placeholder.execution_id) {
                    // Only earlier entries can feed a stub; anything else is left to
                    // fail with NotReady when resolved
                    Some(&producer) if producer < consumer => {
                        graph.update_edge(nodes[producer], nodes[consumer], ());
                    }
                    Some(&producer) => {
                        tracing::warn!("{} references a later queue entry {}", stub, stubs[producer]);
                    }
                    None => {}
                }
            }
        }

        tracing::debug!("Built stub graph with {} nodes and {} edges", graph.node_count(), graph.edge_count());
        Self { graph, nodes }
    }

    /// Queue positions that (transitively) consume the output of `position`
    pub fn downstream(&self, position: usize) -> Vec<usize> {
        let start = self.nodes[position];
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        seen.insert(start);

        while let Some(current) = queue.pop_front() {
            for target in self.graph.neighbors(current) {
                if seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }

        let mut reachable: Vec<usize> = seen
            .into_iter()
            .filter(|&idx| idx != start)
            .map(|idx| self.graph[idx])
            .collect();
        reachable.sort_unstable();
        reachable
    }

    /// Queue positions whose output `position` reads directly
    pub fn dependencies(&self, position: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(self.nodes[position], petgraph::Direction::Incoming)
            .map(|idx| self.graph[idx])
            .collect();
        deps.sort_unstable();
        deps
    }
}
