//! Structural and per-block validation of flow graphs.
//!
//! Validation never stops at the first problem. Every check runs and the
//! full diagnostic list comes back in one [`GraphReport`], errors and
//! warnings split so callers can block compilation on the former and
//! surface the latter.

use ahash::{AHashMap, AHashSet};
use serde::Serialize;

use crate::diagnostic::Diagnostic;
use crate::graph::{BlockKind, FlowGraph};
use crate::registry::BlockRegistry;

/// The outcome of validating one graph.
///
/// `is_valid` is true exactly when `errors` is empty; warnings never
/// block compilation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphReport {
    pub is_valid: bool,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl GraphReport {
    fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) =
            diagnostics.into_iter().partition(Diagnostic::is_error);
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Validate a graph against structural rules and each block's config
/// schema.
pub fn validate_graph(graph: &FlowGraph, registry: &BlockRegistry) -> GraphReport {
    if graph.blocks.is_empty() {
        return GraphReport::from_diagnostics(vec![Diagnostic::error("Flow has no blocks")]);
    }

    let mut diagnostics = Vec::new();

    check_unique_ids(graph, &mut diagnostics);
    check_input_cardinality(graph, &mut diagnostics);
    check_outputs_present(graph, &mut diagnostics);
    check_edges(graph, &mut diagnostics);
    check_connectivity(graph, &mut diagnostics);
    check_acyclic(graph, &mut diagnostics);
    check_block_configs(graph, registry, &mut diagnostics);

    GraphReport::from_diagnostics(diagnostics)
}

fn check_unique_ids(graph: &FlowGraph, diagnostics: &mut Vec<Diagnostic>) {
    let mut seen = AHashSet::new();
    for block in &graph.blocks {
        if !seen.insert(block.id.as_str()) {
            diagnostics.push(
                Diagnostic::error(format!("Duplicate block id '{}'", block.id))
                    .for_block(&block.id),
            );
        }
    }
}

fn check_input_cardinality(graph: &FlowGraph, diagnostics: &mut Vec<Diagnostic>) {
    let count = graph.blocks_of_kind(BlockKind::Input).count();
    match count {
        1 => {}
        0 => diagnostics.push(Diagnostic::error(
            "Flow needs exactly one input block, found none",
        )),
        n => diagnostics.push(Diagnostic::error(format!(
            "Flow needs exactly one input block, found {n}"
        ))),
    }
}

fn check_outputs_present(graph: &FlowGraph, diagnostics: &mut Vec<Diagnostic>) {
    if graph.blocks_of_kind(BlockKind::Output).next().is_none() {
        diagnostics.push(Diagnostic::warning(
            "Flow has no output block; nothing will be returned",
        ));
    }
}

fn check_edges(graph: &FlowGraph, diagnostics: &mut Vec<Diagnostic>) {
    for edge in &graph.edges {
        let source = graph.block(&edge.source);
        let target = graph.block(&edge.target);

        if source.is_none() {
            diagnostics.push(
                Diagnostic::error(format!(
                    "Edge references unknown source block '{}'",
                    edge.source
                ))
                .for_block(&edge.source),
            );
        }
        if target.is_none() {
            diagnostics.push(
                Diagnostic::error(format!(
                    "Edge references unknown target block '{}'",
                    edge.target
                ))
                .for_block(&edge.target),
            );
        }

        let (Some(source), Some(target)) = (source, target) else {
            continue;
        };

        if source.kind == BlockKind::Output {
            diagnostics.push(
                Diagnostic::warning(format!(
                    "Output block '{}' has an outgoing edge; outputs are terminal",
                    source.id
                ))
                .for_block(&source.id),
            );
        }
        if target.kind == BlockKind::Input {
            diagnostics.push(
                Diagnostic::warning(format!(
                    "Input block '{}' has an incoming edge; inputs are sources",
                    target.id
                ))
                .for_block(&target.id),
            );
        }
        if source.kind == BlockKind::Input && target.kind == BlockKind::Output {
            diagnostics.push(
                Diagnostic::warning(
                    "Input connects directly to output with nothing in between",
                )
                .for_block(&source.id),
            );
        }
    }
}

fn check_connectivity(graph: &FlowGraph, diagnostics: &mut Vec<Diagnostic>) {
    if graph.blocks.len() < 2 {
        return;
    }
    for block in &graph.blocks {
        if !graph.is_connected(&block.id) {
            diagnostics.push(
                Diagnostic::warning(format!(
                    "Block '{}' is not connected to the flow",
                    block.id
                ))
                .for_block(&block.id),
            );
        }
    }
}

fn check_acyclic(graph: &FlowGraph, diagnostics: &mut Vec<Diagnostic>) {
    if let Some(path) = find_cycle(graph) {
        diagnostics.push(Diagnostic::error(format!(
            "Cycle detected among blocks: {}",
            path.join(" -> ")
        )));
    }
}

fn check_block_configs(
    graph: &FlowGraph,
    registry: &BlockRegistry,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for block in &graph.blocks {
        match registry.get(block.kind) {
            Ok(spec) => diagnostics.extend(spec.validate(block)),
            Err(_) => diagnostics.push(
                Diagnostic::error(format!(
                    "No descriptor registered for block kind '{}'",
                    block.kind
                ))
                .for_block(&block.id),
            ),
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Depth-first search for a directed cycle.
///
/// Returns the first cycle found as a path witness ending on the repeated
/// block, e.g. `[a, b, c, a]`. Blocks and edges are visited in
/// declaration order so the witness is deterministic.
pub fn find_cycle(graph: &FlowGraph) -> Option<Vec<String>> {
    let mut adjacency: AHashMap<&str, Vec<&str>> = AHashMap::new();
    for edge in &graph.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut colors: AHashMap<&str, Color> = graph
        .blocks
        .iter()
        .map(|b| (b.id.as_str(), Color::White))
        .collect();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'g>(
        id: &'g str,
        adjacency: &AHashMap<&'g str, Vec<&'g str>>,
        colors: &mut AHashMap<&'g str, Color>,
        stack: &mut Vec<&'g str>,
    ) -> Option<Vec<String>> {
        colors.insert(id, Color::Gray);
        stack.push(id);

        for &next in adjacency.get(id).map(Vec::as_slice).unwrap_or_default() {
            match colors.get(next) {
                Some(Color::Gray) => {
                    let start = stack.iter().position(|&s| s == next).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    path.push(next.to_string());
                    return Some(path);
                }
                Some(Color::White) => {
                    if let Some(path) = visit(next, adjacency, colors, stack) {
                        return Some(path);
                    }
                }
                // Black: already fully explored. None: dangling edge,
                // reported separately.
                _ => {}
            }
        }

        stack.pop();
        colors.insert(id, Color::Black);
        None
    }

    for block in &graph.blocks {
        if colors.get(block.id.as_str()).copied() == Some(Color::White) {
            if let Some(path) = visit(block.id.as_str(), &adjacency, &mut colors, &mut stack) {
                return Some(path);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BlockInstance, Edge};
    use serde_json::json;

    fn block(id: &str, kind: BlockKind, config: serde_json::Value) -> BlockInstance {
        let map = match config {
            serde_json::Value::Object(m) => m,
            _ => panic!("config must be an object"),
        };
        BlockInstance::new(id, kind).with_config(map)
    }

    fn minimal_flow() -> FlowGraph {
        FlowGraph {
            blocks: vec![
                block("in", BlockKind::Input, json!({"mode": "variable", "variable_name": "x"})),
                block("out", BlockKind::Output, json!({"format": "text"})),
            ],
            edges: vec![Edge::new("in", "out")],
        }
    }

    #[test]
    fn empty_graph_is_a_single_error() {
        let report = validate_graph(&FlowGraph::default(), &BlockRegistry::default());
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("no blocks"));
    }

    #[test]
    fn minimal_flow_passes_with_direct_edge_warning() {
        let report = validate_graph(&minimal_flow(), &BlockRegistry::default());
        assert!(report.is_valid, "errors: {:?}", report.errors);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.message.contains("directly to output")));
    }

    #[test]
    fn two_inputs_is_an_error() {
        let mut graph = minimal_flow();
        graph.blocks.push(block(
            "in2",
            BlockKind::Input,
            json!({"mode": "variable", "variable_name": "y"}),
        ));
        graph.edges.push(Edge::new("in2", "out"));
        let report = validate_graph(&graph, &BlockRegistry::default());
        assert!(!report.is_valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("found 2")));
    }

    #[test]
    fn dangling_edge_is_an_error() {
        let mut graph = minimal_flow();
        graph.edges.push(Edge::new("in", "ghost"));
        let report = validate_graph(&graph, &BlockRegistry::default());
        assert!(!report.is_valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("unknown target block 'ghost'")));
    }

    #[test]
    fn missing_required_config_is_an_error() {
        let mut graph = minimal_flow();
        graph
            .blocks
            .push(block("agent", BlockKind::Agent, json!({"provider": "openai"})));
        graph.edges = vec![Edge::new("in", "agent"), Edge::new("agent", "out")];
        let report = validate_graph(&graph, &BlockRegistry::default());
        assert!(!report.is_valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.block_id.as_deref() == Some("agent")
                && e.message.contains("model")));
    }

    #[test]
    fn disconnected_block_warns() {
        let mut graph = minimal_flow();
        graph
            .blocks
            .push(block("lonely", BlockKind::Transform, json!({"operation": "trim"})));
        let report = validate_graph(&graph, &BlockRegistry::default());
        assert!(report.is_valid);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.block_id.as_deref() == Some("lonely")));
    }

    #[test]
    fn cycle_reports_a_path_witness() {
        let mut graph = minimal_flow();
        graph
            .blocks
            .push(block("a", BlockKind::Transform, json!({"operation": "trim"})));
        graph
            .blocks
            .push(block("b", BlockKind::Transform, json!({"operation": "trim"})));
        graph.edges = vec![
            Edge::new("in", "a"),
            Edge::new("a", "b"),
            Edge::new("b", "a"),
            Edge::new("b", "out"),
        ];
        let report = validate_graph(&graph, &BlockRegistry::default());
        assert!(!report.is_valid);
        let cycle = report
            .errors
            .iter()
            .find(|e| e.message.contains("Cycle detected"))
            .map(|e| e.message.clone())
            .unwrap_or_default();
        assert!(cycle.contains("a -> b -> a"), "got: {cycle}");
    }

    #[test]
    fn find_cycle_is_none_for_a_dag() {
        assert!(find_cycle(&minimal_flow()).is_none());
    }
}
