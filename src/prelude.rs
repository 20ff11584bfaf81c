//! Prelude module for convenient imports
//!
//! This module re-exports the most commonly used types and traits from the nagare crate.
//! Import this module to get access to the core functionality without having to import
//! each type individually.
//!
//! # Example
//!
//! ```rust,no_run
//! // Use the prelude to get easy access to all the core types.
//! use nagare::prelude::*;
//!
//! # fn run_example() -> Result<()> {
//! // Load a flow definition and compile it
//! let flow_json = std::fs::read_to_string("path/to/flow.json")?;
//! let graph = graph_from_editor_json(&flow_json)?;
//!
//! let compiler = Compiler::builder(graph).with_name("my-flow").build();
//! let output = compiler.compile();
//!
//! if output.is_valid {
//!     println!("{}", output.code);
//! } else {
//!     for diag in &output.errors {
//!         eprintln!("error: {}", diag.message);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// Core compilation
pub use crate::compiler::{CompileOutput, Compiler, CompilerBuilder, PromptLibrary};

// Graph model and conversion
pub use crate::graph::{
    BlockInstance, BlockKind, Edge, FlowGraph, FlowVariable, IntoGraph, graph_from_editor_json,
};

// Validation and diagnostics
pub use crate::diagnostic::{Diagnostic, Severity};
pub use crate::validator::{GraphReport, validate_graph};

// Block specs and the registry
pub use crate::registry::{BlockRegistry, BlockSpec};

// Generated-script parsing, linking, and execution
pub use crate::script::{FlowResult, Interpreter, link, parse};

// Model providers and credentials
pub use crate::providers::{CredentialStore, ModelClient, ProviderRegistry};

// Execution tracing
pub use crate::trace::{BlockTrace, ExecutionRecord, ExecutionStatus, TraceRecorder};

// Compiled artifacts
pub use crate::program::CompiledProgram;

// Error types
pub use crate::error::{CompileError, ExecutionError};

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;
