use thiserror::Error;

/// Errors raised when converting a custom editor format into a [`FlowGraph`].
///
/// [`FlowGraph`]: crate::graph::FlowGraph
#[derive(Error, Debug, Clone)]
pub enum GraphConversionError {
    #[error("Failed to parse flow JSON: {0}")]
    Json(String),

    #[error("Block '{block_id}' has unknown kind '{kind}'")]
    UnknownKind { block_id: String, kind: String },

    #[error("Invalid flow data: {0}")]
    Validation(String),
}

/// Errors raised by the block registry.
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("Block kind '{0}' is already registered")]
    DuplicateKind(String),

    #[error("Block kind '{0}' is not registered")]
    NotFound(String),
}

/// Fatal errors raised while turning a validated graph into a program.
///
/// Structural problems that should have been caught earlier (a residual
/// cycle, an unknown block kind) are still fatal here: the compiler never
/// silently drops a block.
#[derive(Error, Debug, Clone)]
pub enum CompileError {
    #[error("Block '{block_id}' has unknown kind '{kind}'")]
    UnknownBlockKind { block_id: String, kind: String },

    #[error("Cycle detected among blocks: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("Block '{block_id}' references '{{{{{placeholder}}}}}', which is not a variable or upstream block")]
    UnresolvedReference {
        block_id: String,
        placeholder: String,
    },

    #[error("Block '{block_id}' references unknown library prompt '{prompt_id}'")]
    UnknownPrompt { block_id: String, prompt_id: String },

    #[error("Block '{block_id}' is missing required field '{field}'")]
    MissingField { block_id: String, field: String },

    #[error("Block '{block_id}' has no upstream value to read")]
    MissingUpstream { block_id: String },

    #[error("Graph has no output block reachable from the input")]
    EmptyProgram,
}

/// Errors raised while parsing flow-script source into a program.
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("Syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("Unterminated string literal on line {line}")]
    UnterminatedString { line: usize },

    #[error("Program is missing its '{0}' declaration")]
    MissingDeclaration(&'static str),
}

/// Errors raised while linking a parsed program against the runtime.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    #[error("Cannot resolve module '{0}': provider is not installed on this executor")]
    UnresolvedProvider(String),

    #[error("Statement on line {line} references undefined binding '{binding}'")]
    UndefinedBinding { line: usize, binding: String },

    #[error("Unbalanced 'if' block opened on line {0}")]
    UnbalancedIf(usize),

    #[error("Unexpected '}}' on line {0}")]
    UnexpectedEnd(usize),

    #[error("Program never returns a value")]
    MissingReturn,
}

/// Runtime failures inside a single flow execution.
///
/// The daemon classifies these for the caller; anything it cannot
/// classify passes through with the original message intact.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Syntax error in generated code: {0}")]
    Script(String),

    #[error("Missing API key for provider '{provider}'")]
    MissingCredential { provider: String },

    #[error("Provider '{provider}' call failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Binding '{0}' was never produced (its branch may not have run)")]
    UndefinedBinding(String),

    #[error("Cannot evaluate condition '{0}'")]
    Condition(String),

    #[error("Flow finished without producing an output")]
    NoOutput,

    #[error("{0}")]
    Runtime(String),
}

impl ExecutionError {
    /// Short class tag used in execution records and daemon responses.
    pub fn class(&self) -> &'static str {
        match self {
            ExecutionError::MissingDependency(_) => "missing_dependency",
            ExecutionError::Script(_) => "syntax_error",
            ExecutionError::MissingCredential { .. } => "missing_credential",
            _ => "runtime_error",
        }
    }
}

impl From<ParseError> for ExecutionError {
    fn from(err: ParseError) -> Self {
        ExecutionError::Script(err.to_string())
    }
}

impl From<LinkError> for ExecutionError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::UnresolvedProvider(name) => ExecutionError::MissingDependency(format!(
                "Cannot resolve module 'provider:{name}'"
            )),
            other => ExecutionError::Script(other.to_string()),
        }
    }
}

/// Errors raised while saving or loading a compiled program artifact.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Could not encode program: {0}")]
    Encode(String),

    #[error("Could not decode program: {0}")]
    Decode(String),

    #[error("Could not access '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Daemon-internal faults, distinct from flow-level failures.
///
/// A flow that fails still answers HTTP 200 with `success:false`; these
/// answer 500 or abort startup.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Scratch directory error: {0}")]
    Scratch(#[from] std::io::Error),

    #[error("Failed to bind '{addr}': {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(std::io::Error),
}
