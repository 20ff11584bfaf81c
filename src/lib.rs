//! # Nagare - Flow Compilation and Execution Engine
//!
//! **Nagare** compiles visual AI-pipeline graphs into executable flow scripts and
//! runs them in an isolated execution daemon. A flow graph is a set of typed
//! blocks (inputs, agents, conditions, transforms, interrupts, outputs) wired
//! together by edges; Nagare validates the graph, resolves its template
//! placeholders, and emits a deterministic, self-contained script that the
//! bundled interpreter can execute against arbitrary runtime input.
//!
//! ## Core Workflow
//!
//! The engine is format-agnostic. It operates on a canonical internal model of
//! a "flow graph." The primary workflow is:
//!
//! 1.  **Load Your Flow**: Parse your editor's flow format (e.g. JSON from a canvas UI) into your own Rust structs, or use [`graph_from_editor_json`](graph::graph_from_editor_json) for the common editor shape.
//! 2.  **Convert to Nagare's Model**: Implement the [`IntoGraph`](graph::IntoGraph) trait for your structs to translate them into a [`FlowGraph`](graph::FlowGraph).
//! 3.  **Compile**: Use [`Compiler::builder`](compiler::Compiler::builder) to validate the graph and emit flow-script source plus its import and dependency lists.
//! 4.  **Execute**: Hand the generated code to the execution daemon (see the [`daemon`] module), or parse, link, and run it in-process with the [`script`] module.
//!
//! ## Quick Start
//!
//! The following example compiles a minimal flow and runs the generated code
//! in-process.
//!
//! ```rust,no_run
//! use nagare::prelude::*;
//! use nagare::graph::{BlockInstance, BlockKind, Edge, FlowGraph};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // 1. Build (or convert) a flow graph: input -> agent -> output.
//!     let mut input = BlockInstance::new("in-1", BlockKind::Input);
//!     input.config.insert("mode".into(), "variable".into());
//!     input.config.insert("variable_name".into(), "ticket".into());
//!
//!     let mut agent = BlockInstance::new("agent-1", BlockKind::Agent);
//!     agent.config.insert("provider".into(), "openai".into());
//!     agent.config.insert("model".into(), "gpt-4o".into());
//!     agent.config.insert("prompt".into(), "Summarize: {{input}}".into());
//!
//!     let mut output = BlockInstance::new("out-1", BlockKind::Output);
//!     output.config.insert("format".into(), "text".into());
//!
//!     let graph = FlowGraph::new(
//!         vec![input, agent, output],
//!         vec![Edge::new("in-1", "agent-1"), Edge::new("agent-1", "out-1")],
//!     );
//!
//!     // 2. Compile it. Validation diagnostics ride along in the output.
//!     let compiler = Compiler::builder(graph).with_name("summarize").build();
//!     let output = compiler.compile();
//!     if !output.is_valid {
//!         for diag in &output.errors {
//!             eprintln!("error: {}", diag.message);
//!         }
//!         return Ok(());
//!     }
//!     println!("{}", output.code);
//!
//!     // 3. Parse and link the generated script, then run it.
//!     let program = nagare::script::parse(&output.code)?;
//!     let providers = ProviderRegistry::with_builtins();
//!     let linked = nagare::script::link(program, &providers)?;
//!
//!     let mut credentials = CredentialStore::new();
//!     credentials.insert("openai", std::env::var("OPENAI_API_KEY")?);
//!
//!     let mut recorder = TraceRecorder::new();
//!     let interpreter = Interpreter::new(&providers, &credentials);
//!     let result = interpreter
//!         .run(&linked, &serde_json::json!({"ticket": "My login fails"}), &mut recorder)
//!         .await?;
//!
//!     println!("-> {}", result.value());
//!     Ok(())
//! }
//! ```
//!
//! For out-of-process execution, run the `nagare-executor` binary and POST the
//! generated code to its `/execute` endpoint; each request is materialized to a
//! throwaway module file, executed, and cleaned up regardless of outcome.

pub mod compiler;
pub mod daemon;
pub mod diagnostic;
pub mod error;
pub mod graph;
pub mod prelude;
pub mod program;
pub mod providers;
pub mod registry;
pub mod script;
pub mod trace;
pub mod validator;
