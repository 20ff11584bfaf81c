use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of block a graph can contain.
///
/// Kinds are a closed set: the compiler matches on them exhaustively, and
/// the registry holds exactly one spec per kind. The serialized form is the
/// snake_case tag the editor sends (`"input"`, `"agent"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Input,
    Agent,
    Output,
    Condition,
    Tool,
    Interrupt,
    Transform,
}

impl BlockKind {
    pub const ALL: [BlockKind; 7] = [
        BlockKind::Input,
        BlockKind::Agent,
        BlockKind::Output,
        BlockKind::Condition,
        BlockKind::Tool,
        BlockKind::Interrupt,
        BlockKind::Transform,
    ];

    /// The snake_case tag used on the wire and in generated source.
    pub fn tag(&self) -> &'static str {
        match self {
            BlockKind::Input => "input",
            BlockKind::Agent => "agent",
            BlockKind::Output => "output",
            BlockKind::Condition => "condition",
            BlockKind::Tool => "tool",
            BlockKind::Interrupt => "interrupt",
            BlockKind::Transform => "transform",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Editor canvas coordinates. Presentation-only; the core round-trips it
/// but never reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One node of a flow graph.
///
/// `config` is an arbitrary key/value map checked against the registered
/// schema for `kind`; the compiler reads it through the block's spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInstance {
    pub id: String,
    #[serde(alias = "blockType", alias = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl BlockInstance {
    pub fn new(id: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            id: id.into(),
            kind,
            config: serde_json::Map::new(),
            position: None,
        }
    }

    pub fn with_config(mut self, config: serde_json::Map<String, serde_json::Value>) -> Self {
        self.config = config;
        self
    }

    /// Read a string config field, if present and a string.
    pub fn config_str(&self, field: &str) -> Option<&str> {
        self.config.get(field).and_then(|v| v.as_str())
    }

    /// Read a numeric config field.
    pub fn config_f64(&self, field: &str) -> Option<f64> {
        self.config.get(field).and_then(|v| v.as_f64())
    }
}

/// A directed connection between two blocks.
///
/// Handles discriminate multiple ports on one block: a condition's
/// outgoing edges carry `true`/`false` source handles, and a tool block
/// attaches to an agent through an edge whose target handle is `tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, alias = "targetHandle", skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn with_target_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }

    /// Whether this edge attaches a tool to an agent rather than carrying
    /// data along the main chain.
    pub fn is_tool_attachment(&self) -> bool {
        self.target_handle.as_deref() == Some("tools")
    }
}

/// The complete, canonical definition of a flow graph, ready for
/// validation and compilation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowGraph {
    pub blocks: Vec<BlockInstance>,
    pub edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn new(blocks: Vec<BlockInstance>, edges: Vec<Edge>) -> Self {
        Self { blocks, edges }
    }

    pub fn block(&self, id: &str) -> Option<&BlockInstance> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Blocks of a given kind, in declaration order.
    pub fn blocks_of_kind(&self, kind: BlockKind) -> impl Iterator<Item = &BlockInstance> {
        self.blocks.iter().filter(move |b| b.kind == kind)
    }

    /// The single input block, when the graph has exactly one.
    pub fn input_block(&self) -> Option<&BlockInstance> {
        let mut inputs = self.blocks_of_kind(BlockKind::Input);
        let first = inputs.next()?;
        if inputs.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Incoming edges of a block, in edge declaration order.
    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.target == id)
    }

    /// Outgoing edges of a block, in edge declaration order.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Whether any edge touches the given block.
    pub fn is_connected(&self, id: &str) -> bool {
        self.edges.iter().any(|e| e.source == id || e.target == id)
    }
}
