//! The data model of flow-script, the line-oriented language the compiler
//! emits and the executor runs.
//!
//! A program is a header (`program`, `import`, `tool`, `entry` lines)
//! followed by a body of `let`, `if`, `}` and `return` statements. String
//! literals use JSON escaping so generated prompts survive round-trips
//! byte for byte.

/// Escape a string as a double-quoted flow-script literal.
///
/// The escape set matches JSON, so literals written here parse back with
/// a JSON string decoder.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// One `import` line of a program header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportRef {
    Provider(String),
    Tool(String),
}

impl ImportRef {
    /// Parse a module path of the form `provider:<name>` or `tool:<name>`.
    pub fn from_path(path: &str) -> Option<ImportRef> {
        let (kind, name) = path.split_once(':')?;
        match kind {
            "provider" => Some(ImportRef::Provider(name.to_string())),
            "tool" => Some(ImportRef::Tool(name.to_string())),
            _ => None,
        }
    }

    /// The module path shown in dependency listings.
    pub fn module_path(&self) -> String {
        match self {
            ImportRef::Provider(name) => format!("provider:{name}"),
            ImportRef::Tool(name) => format!("tool:{name}"),
        }
    }

    /// The source line declaring this import.
    pub fn render(&self) -> String {
        match self {
            ImportRef::Provider(name) => format!("import provider {}", quote(name)),
            ImportRef::Tool(name) => format!("import tool {}", quote(name)),
        }
    }
}

/// A tool declaration from the program header, attached to agents by
/// binding name.
#[derive(Debug, Clone)]
pub struct ToolDecl {
    pub binding: String,
    pub name: String,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub operations: Vec<String>,
    pub description: Option<String>,
    pub block_id: String,
}

/// How an output block renders the final value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Structured,
}

impl OutputFormat {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "text" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            "structured" => Some(OutputFormat::Structured),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::Structured => "structured",
        }
    }
}

/// One executable statement of the program body, with its source line for
/// error reporting.
#[derive(Debug, Clone)]
pub struct Statement {
    pub line: usize,
    pub kind: StatementKind,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Let { binding: String, op: Op },
    If { binding: String, negated: bool },
    End,
    Return { binding: String },
}

/// The model call described by an agent statement.
#[derive(Debug, Clone)]
pub struct AgentOp {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<String>,
    pub block_id: String,
}

/// The operation on the right-hand side of a `let`.
#[derive(Debug, Clone)]
pub enum Op {
    Param {
        name: String,
        block_id: String,
    },
    Value {
        data: serde_json::Value,
        block_id: String,
    },
    Agent(AgentOp),
    Cond {
        from: Vec<String>,
        expr: String,
        block_id: String,
    },
    Transform {
        from: Vec<String>,
        op: String,
        arg: Option<String>,
        block_id: String,
    },
    Interrupt {
        from: Vec<String>,
        reason: String,
        block_id: String,
    },
    Output {
        from: Vec<String>,
        format: OutputFormat,
        block_id: String,
    },
}

impl Op {
    /// The originating block id carried through to traces.
    pub fn block_id(&self) -> &str {
        match self {
            Op::Param { block_id, .. }
            | Op::Value { block_id, .. }
            | Op::Cond { block_id, .. }
            | Op::Transform { block_id, .. }
            | Op::Interrupt { block_id, .. }
            | Op::Output { block_id, .. } => block_id,
            Op::Agent(agent) => &agent.block_id,
        }
    }

    /// Bindings this operation reads through its `from` list.
    pub fn from_list(&self) -> &[String] {
        match self {
            Op::Cond { from, .. }
            | Op::Transform { from, .. }
            | Op::Interrupt { from, .. }
            | Op::Output { from, .. } => from,
            _ => &[],
        }
    }

    /// Short tag used in trace entries.
    pub fn tag(&self) -> &'static str {
        match self {
            Op::Param { .. } => "param",
            Op::Value { .. } => "value",
            Op::Agent(_) => "agent",
            Op::Cond { .. } => "cond",
            Op::Transform { .. } => "transform",
            Op::Interrupt { .. } => "interrupt",
            Op::Output { .. } => "output",
        }
    }
}

/// A parsed program, not yet linked against an executor's runtime.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub format: u32,
    pub imports: Vec<ImportRef>,
    pub tools: Vec<ToolDecl>,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
}

impl Program {
    pub fn tool(&self, binding: &str) -> Option<&ToolDecl> {
        self.tools.iter().find(|t| t.binding == binding)
    }
}
