use serde::Deserialize;

use crate::error::GraphConversionError;
use crate::graph::{BlockInstance, BlockKind, Edge, FlowGraph, Position};

/// A trait for custom data models that can be converted into a Nagare [`FlowGraph`].
///
/// This is the primary extension point for making the compiler
/// format-agnostic. By implementing this trait on your own editor or
/// storage structs, you provide a translation layer that lets the compiler
/// process your flow format.
///
/// # Example
///
/// ```rust,no_run
/// use nagare::prelude::*;
/// use nagare::error::GraphConversionError;
///
/// struct MyNode { id: String, kind: String }
/// struct MyFlow { nodes: Vec<MyNode> }
///
/// impl IntoGraph for MyFlow {
///     // The prelude's `Result` alias takes one parameter; spell the
///     // std form out when implementing the trait under the glob.
///     fn into_graph(self) -> std::result::Result<FlowGraph, GraphConversionError> {
///         let mut blocks = Vec::new();
///         for node in self.nodes {
///             let kind = serde_json::from_value(serde_json::Value::String(node.kind.clone()))
///                 .map_err(|_| GraphConversionError::UnknownKind {
///                     block_id: node.id.clone(),
///                     kind: node.kind.clone(),
///                 })?;
///             blocks.push(BlockInstance::new(node.id, kind));
///         }
///         Ok(FlowGraph::new(blocks, vec![]))
///     }
/// }
/// ```
pub trait IntoGraph {
    /// Consumes the object and converts it into a compiler-ready graph.
    fn into_graph(self) -> Result<FlowGraph, GraphConversionError>;
}

impl IntoGraph for FlowGraph {
    fn into_graph(self) -> Result<FlowGraph, GraphConversionError> {
        Ok(self)
    }
}

/// The JSON shape flow editors send: blocks wrap their kind and config in
/// a nested `data` object and use camelCase keys.
#[derive(Debug, Deserialize)]
pub struct EditorFlow {
    #[serde(alias = "nodes")]
    pub blocks: Vec<EditorBlock>,
    pub edges: Vec<EditorEdge>,
}

#[derive(Debug, Deserialize)]
pub struct EditorBlock {
    pub id: String,
    pub data: EditorBlockData,
    #[serde(default)]
    pub position: Option<Position>,
}

#[derive(Debug, Deserialize)]
pub struct EditorBlockData {
    #[serde(alias = "blockType", alias = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct EditorEdge {
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle")]
    pub source_handle: Option<String>,
    #[serde(default, alias = "targetHandle")]
    pub target_handle: Option<String>,
}

impl IntoGraph for EditorFlow {
    fn into_graph(self) -> Result<FlowGraph, GraphConversionError> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for raw in self.blocks {
            let kind: BlockKind =
                serde_json::from_value(serde_json::Value::String(raw.data.kind.clone())).map_err(
                    |_| GraphConversionError::UnknownKind {
                        block_id: raw.id.clone(),
                        kind: raw.data.kind,
                    },
                )?;
            blocks.push(BlockInstance {
                id: raw.id,
                kind,
                config: raw.data.config,
                position: raw.position,
            });
        }

        let edges = self
            .edges
            .into_iter()
            .map(|e| Edge {
                source: e.source,
                target: e.target,
                source_handle: e.source_handle,
                target_handle: e.target_handle,
            })
            .collect();

        Ok(FlowGraph::new(blocks, edges))
    }
}

/// Parse an editor-format JSON document straight into a graph.
pub fn graph_from_editor_json(json: &str) -> Result<FlowGraph, GraphConversionError> {
    let raw: EditorFlow =
        serde_json::from_str(json).map_err(|e| GraphConversionError::Json(e.to_string()))?;
    raw.into_graph()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editor_json_converts() {
        let json = r#"{
            "nodes": [
                {"id": "in-1", "data": {"blockType": "input", "config": {"mode": "variable", "variable_name": "x"}}, "position": {"x": 10.0, "y": 20.0}},
                {"id": "out-1", "data": {"type": "output", "config": {"format": "text"}}}
            ],
            "edges": [
                {"source": "in-1", "target": "out-1", "sourceHandle": "out"}
            ]
        }"#;
        let graph = graph_from_editor_json(json).unwrap();
        assert_eq!(graph.blocks.len(), 2);
        assert_eq!(graph.blocks[0].kind, BlockKind::Input);
        assert_eq!(graph.blocks[1].kind, BlockKind::Output);
        assert_eq!(graph.edges[0].source_handle.as_deref(), Some("out"));
        assert!(graph.blocks[0].position.is_some());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let json = r#"{
            "nodes": [{"id": "a", "data": {"blockType": "quantum"}}],
            "edges": []
        }"#;
        let err = graph_from_editor_json(json).unwrap_err();
        match err {
            GraphConversionError::UnknownKind { block_id, kind } => {
                assert_eq!(block_id, "a");
                assert_eq!(kind, "quantum");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
