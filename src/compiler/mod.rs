//! Graph to program compilation.
//!
//! [`Compiler`] validates a [`FlowGraph`], resolves its variables and
//! prompt templates, then emits flow-script in topological order. A graph
//! that fails validation never reaches emission; a fatal emission error
//! yields an invalid [`CompileOutput`] with no code rather than a partial
//! program.

use ahash::AHashSet;
use serde::Serialize;

mod emit;
mod order;
mod prompts;

pub use prompts::PromptLibrary;

use crate::diagnostic::Diagnostic;
use crate::error::CompileError;
use crate::graph::{resolve_variables, FlowGraph, FlowVariable};
use crate::registry::{BlockRegistry, BlockSpec};
use crate::validator::{validate_graph, GraphReport};
use emit::Emitter;

/// Everything a compile run produces.
///
/// `code` is empty whenever `is_valid` is false; warnings are carried
/// either way.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutput {
    pub code: String,
    pub is_valid: bool,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    /// Module paths the program imports, e.g. `provider:openai`.
    pub imports: Vec<String>,
    /// External dependencies the program needs at run time.
    pub dependencies: Vec<String>,
}

impl CompileOutput {
    fn invalid(errors: Vec<Diagnostic>, warnings: Vec<Diagnostic>) -> Self {
        Self {
            code: String::new(),
            is_valid: false,
            errors,
            warnings,
            imports: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

pub struct CompilerBuilder {
    graph: FlowGraph,
    name: String,
    registry: BlockRegistry,
    library: PromptLibrary,
    manual_variables: Vec<FlowVariable>,
}

impl CompilerBuilder {
    pub fn new(graph: FlowGraph) -> Self {
        Self {
            graph,
            name: "flow".to_string(),
            registry: BlockRegistry::default(),
            library: PromptLibrary::new(),
            manual_variables: Vec::new(),
        }
    }

    /// The program name stamped into the emitted header.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the default registry wholesale.
    pub fn with_registry(mut self, registry: BlockRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Add or override a single block spec.
    pub fn with_custom_spec(mut self, spec: Box<dyn BlockSpec>) -> Self {
        self.registry.replace(spec);
        self
    }

    pub fn with_prompt_library(mut self, library: PromptLibrary) -> Self {
        self.library = library;
        self
    }

    /// Add a variable beyond those derived from input blocks.
    pub fn with_variable(mut self, variable: FlowVariable) -> Self {
        self.manual_variables.push(variable);
        self
    }

    pub fn build(self) -> Compiler {
        Compiler {
            graph: self.graph,
            name: self.name,
            registry: self.registry,
            library: self.library,
            manual_variables: self.manual_variables,
        }
    }
}

pub struct Compiler {
    graph: FlowGraph,
    name: String,
    registry: BlockRegistry,
    library: PromptLibrary,
    manual_variables: Vec<FlowVariable>,
}

impl Compiler {
    pub fn builder(graph: FlowGraph) -> CompilerBuilder {
        CompilerBuilder::new(graph)
    }

    /// Validate without emitting.
    pub fn validate(&self) -> GraphReport {
        validate_graph(&self.graph, &self.registry)
    }

    /// The variables this graph exposes, input-derived first, then any
    /// added manually. First declaration of a name wins.
    pub fn variables(&self) -> Vec<FlowVariable> {
        let mut variables = resolve_variables(&self.graph);
        let mut seen: AHashSet<String> =
            variables.iter().map(|v| v.name.clone()).collect();
        for variable in &self.manual_variables {
            if seen.insert(variable.name.clone()) {
                variables.push(variable.clone());
            }
        }
        variables
    }

    /// Validate, then emit. Never panics on a bad graph; the output's
    /// `errors` list says what went wrong.
    pub fn compile(&self) -> CompileOutput {
        let report = self.validate();
        if !report.is_valid {
            return CompileOutput::invalid(report.errors, report.warnings);
        }

        let variables = self.variables();
        let params = entry_params(&variables);
        let emitter = Emitter {
            graph: &self.graph,
            registry: &self.registry,
            library: &self.library,
            params: &params,
            variables: &variables,
            name: &self.name,
        };

        match emitter.emit() {
            Ok(program) => CompileOutput {
                code: program.code,
                is_valid: true,
                errors: Vec::new(),
                warnings: report.warnings,
                imports: program.imports,
                dependencies: program.dependencies,
            },
            Err(error) => {
                CompileOutput::invalid(vec![diagnostic_from(error)], report.warnings)
            }
        }
    }
}

/// Variable names mapped to identifier-safe entry parameter names, with a
/// numeric suffix on collision after sanitizing.
fn entry_params(variables: &[FlowVariable]) -> Vec<(String, String)> {
    let mut taken: AHashSet<String> = AHashSet::new();
    variables
        .iter()
        .map(|variable| {
            let base = param_name(&variable.name);
            let mut candidate = base.clone();
            let mut suffix = 2;
            while !taken.insert(candidate.clone()) {
                candidate = format!("{base}_{suffix}");
                suffix += 1;
            }
            (variable.name.clone(), candidate)
        })
        .collect()
}

fn param_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "input".to_string()
    } else if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        format!("v_{cleaned}")
    } else {
        cleaned
    }
}

fn diagnostic_from(error: CompileError) -> Diagnostic {
    let message = error.to_string();
    match error {
        CompileError::UnknownBlockKind { block_id, .. }
        | CompileError::UnresolvedReference { block_id, .. }
        | CompileError::UnknownPrompt { block_id, .. }
        | CompileError::MissingUpstream { block_id } => {
            Diagnostic::error(message).for_block(block_id)
        }
        CompileError::MissingField { block_id, field } => {
            Diagnostic::error(message).for_block(block_id).for_field(field)
        }
        CompileError::CycleDetected { .. } | CompileError::EmptyProgram => {
            Diagnostic::error(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BlockInstance, BlockKind, Edge};
    use crate::script;
    use serde_json::json;

    fn block(id: &str, kind: BlockKind, config: serde_json::Value) -> BlockInstance {
        let map = match config {
            serde_json::Value::Object(m) => m,
            _ => panic!("config must be an object"),
        };
        BlockInstance::new(id, kind).with_config(map)
    }

    fn triage_graph() -> FlowGraph {
        FlowGraph {
            blocks: vec![
                block(
                    "in-1",
                    BlockKind::Input,
                    json!({"mode": "variable", "variable_name": "ticket"}),
                ),
                block(
                    "ag-1",
                    BlockKind::Agent,
                    json!({
                        "provider": "openai",
                        "model": "gpt-4o-mini",
                        "prompt": "Classify this ticket: {{input}}",
                        "temperature": 0.2,
                    }),
                ),
                block(
                    "c-1",
                    BlockKind::Condition,
                    json!({"condition": "value contains \"complaint\""}),
                ),
                block("out-1", BlockKind::Output, json!({"format": "text"})),
                block("out-2", BlockKind::Output, json!({"format": "json"})),
            ],
            edges: vec![
                Edge::new("in-1", "ag-1"),
                Edge::new("ag-1", "c-1"),
                Edge::new("c-1", "out-1").with_source_handle("true"),
                Edge::new("c-1", "out-2").with_source_handle("false"),
            ],
        }
    }

    #[test]
    fn compiles_a_branching_flow() {
        let output = Compiler::builder(triage_graph())
            .with_name("Support Triage")
            .build()
            .compile();
        assert!(output.is_valid, "errors: {:?}", output.errors);
        assert!(output.code.contains("program \"Support Triage\" format 1"));
        assert!(output.code.contains("import provider \"openai\""));
        assert!(output.code.contains("entry run(ticket)"));
        assert!(output.code.contains("if b_c_1 {"));
        assert!(output.code.contains("if not b_c_1 {"));
        assert_eq!(output.imports, vec!["provider:openai"]);
        assert_eq!(output.dependencies, vec!["openai"]);
    }

    #[test]
    fn emitted_code_parses_and_links() {
        let output = Compiler::builder(triage_graph()).build().compile();
        assert!(output.is_valid);
        let program = script::parse(&output.code).unwrap();
        assert_eq!(program.params, vec!["ticket"]);
        let providers = crate::providers::ProviderRegistry::with_builtins();
        script::link(program, &providers).unwrap();
    }

    #[test]
    fn prompt_placeholders_point_at_upstream_bindings() {
        let output = Compiler::builder(triage_graph()).build().compile();
        assert!(output.code.contains("Classify this ticket: {{b_in_1}}"));
    }

    #[test]
    fn invalid_graph_skips_emission() {
        let mut graph = triage_graph();
        graph.edges.push(Edge::new("out-1", "ghost"));
        let output = Compiler::builder(graph).build().compile();
        assert!(!output.is_valid);
        assert!(output.code.is_empty());
        assert!(!output.errors.is_empty());
    }

    #[test]
    fn unresolved_placeholder_is_a_fatal_error() {
        let mut graph = triage_graph();
        graph.blocks[1] = block(
            "ag-1",
            BlockKind::Agent,
            json!({
                "provider": "openai",
                "model": "gpt-4o-mini",
                "prompt": "Use {{nonexistent}}",
            }),
        );
        let output = Compiler::builder(graph).build().compile();
        assert!(!output.is_valid);
        assert!(output
            .errors
            .iter()
            .any(|e| e.message.contains("nonexistent")));
    }

    #[test]
    fn tool_blocks_emit_declarations_not_chain_steps() {
        let mut graph = triage_graph();
        graph.blocks.push(block(
            "tool-1",
            BlockKind::Tool,
            json!({"name": "web_search", "endpoint": "https://search.internal"}),
        ));
        graph
            .edges
            .push(Edge::new("tool-1", "ag-1").with_target_handle("tools"));

        let output = Compiler::builder(graph).build().compile();
        assert!(output.is_valid, "errors: {:?}", output.errors);
        assert!(output.code.contains("tool t_tool_1"));
        assert!(output.code.contains("tools=[t_tool_1]"));
        assert!(output.code.contains("import tool \"web_search\""));
    }

    #[test]
    fn static_input_needs_no_entry_parameter() {
        let graph = FlowGraph {
            blocks: vec![
                block("in-1", BlockKind::Input, json!({"mode": "static", "value": "fixed"})),
                block("out-1", BlockKind::Output, json!({"format": "text"})),
            ],
            edges: vec![Edge::new("in-1", "out-1")],
        };
        let output = Compiler::builder(graph).build().compile();
        assert!(output.is_valid, "errors: {:?}", output.errors);
        assert!(output.code.contains("entry run()"));
        assert!(output.code.contains("let b_in_1 = value data=\"fixed\""));
    }

    #[test]
    fn library_prompts_flow_through() {
        let mut graph = triage_graph();
        graph.blocks[1] = block(
            "ag-1",
            BlockKind::Agent,
            json!({
                "provider": "openai",
                "model": "gpt-4o-mini",
                "prompt_mode": "library",
                "prompt_id": "triage-v1",
            }),
        );
        let library = PromptLibrary::new().with_prompt("triage-v1", "Sort: {{input}}");
        let output = Compiler::builder(graph)
            .with_prompt_library(library)
            .build()
            .compile();
        assert!(output.is_valid, "errors: {:?}", output.errors);
        assert!(output.code.contains("Sort: {{b_in_1}}"));
    }
}
