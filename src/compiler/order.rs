use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ahash::AHashMap;

use crate::error::CompileError;
use crate::graph::FlowGraph;
use crate::validator::find_cycle;

/// Topologically order block indices with Kahn's algorithm.
///
/// Ready blocks are drained smallest-declaration-index first so the order
/// is deterministic for a given graph. Edges to or from unknown ids are
/// ignored here; the validator reports them. A residual cycle is fatal,
/// reported with a path witness.
pub(super) fn topo_order(graph: &FlowGraph) -> Result<Vec<usize>, CompileError> {
    let index_of: AHashMap<&str, usize> = graph
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.id.as_str(), i))
        .collect();

    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); graph.blocks.len()];
    let mut in_degree: Vec<usize> = vec![0; graph.blocks.len()];
    for edge in &graph.edges {
        let (Some(&source), Some(&target)) = (
            index_of.get(edge.source.as_str()),
            index_of.get(edge.target.as_str()),
        ) else {
            continue;
        };
        outgoing[source].push(target);
        in_degree[target] += 1;
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(graph.blocks.len());
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for &next in &outgoing[index] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() < graph.blocks.len() {
        let path = find_cycle(graph).unwrap_or_else(|| {
            graph
                .blocks
                .iter()
                .enumerate()
                .filter(|(i, _)| !order.contains(i))
                .map(|(_, b)| b.id.clone())
                .collect()
        });
        return Err(CompileError::CycleDetected { path });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BlockInstance, BlockKind, Edge};

    fn graph(ids: &[&str], edges: &[(&str, &str)]) -> FlowGraph {
        FlowGraph {
            blocks: ids
                .iter()
                .map(|id| BlockInstance::new(*id, BlockKind::Transform))
                .collect(),
            edges: edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect(),
        }
    }

    #[test]
    fn declaration_order_breaks_ties() {
        // b and c both become ready after a; b was declared first.
        let graph = graph(&["a", "b", "c", "d"], &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);
        let order = topo_order(&graph).unwrap();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn dependency_beats_declaration() {
        let graph = graph(&["late", "early"], &[("early", "late")]);
        let order = topo_order(&graph).unwrap();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn residual_cycle_is_fatal() {
        let graph = graph(&["a", "b"], &[("a", "b"), ("b", "a")]);
        let err = topo_order(&graph).unwrap_err();
        assert!(matches!(err, CompileError::CycleDetected { .. }));
    }
}
