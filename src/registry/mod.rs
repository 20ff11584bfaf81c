//! The block registry: one [`BlockSpec`] per block kind, covering palette
//! metadata, config schemas, config validation, and source emission.
//!
//! The compiler never branches on kind strings; it looks the spec up here
//! and calls through the trait.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use ahash::AHashMap;
use serde::Serialize;

use crate::diagnostic::Diagnostic;
use crate::error::{CompileError, RegistryError};
use crate::graph::{BlockInstance, BlockKind, FlowVariable};

mod builtin;
pub mod schema;

pub use schema::*;

/// A reference to an upstream block's emitted binding.
#[derive(Debug, Clone)]
pub struct UpstreamRef {
    pub block_id: String,
    pub binding: String,
}

/// Everything a block spec sees when emitting its source fragment.
///
/// `config` is the block's config with template placeholders already
/// rewritten to binding references; `upstream` lists data edges into this
/// block in edge declaration order, and `tools` the bindings of tool
/// blocks attached through the tool handle.
pub struct EmitContext<'a> {
    pub block: &'a BlockInstance,
    pub config: &'a serde_json::Map<String, serde_json::Value>,
    pub binding: &'a str,
    pub upstream: &'a [UpstreamRef],
    pub tools: &'a [String],
    pub variables: &'a [FlowVariable],
}

impl EmitContext<'_> {
    /// The first upstream binding, where the block's main value comes from.
    pub fn primary_upstream(&self) -> Result<&UpstreamRef, CompileError> {
        self.upstream
            .first()
            .ok_or_else(|| CompileError::MissingUpstream {
                block_id: self.block.id.clone(),
            })
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.config.get(name).and_then(|v| v.as_str())
    }

    pub fn f64_field(&self, name: &str) -> Option<f64> {
        self.config.get(name).and_then(|v| v.as_f64())
    }

    pub fn require_str(&self, name: &str) -> Result<&str, CompileError> {
        self.str_field(name)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CompileError::MissingField {
                block_id: self.block.id.clone(),
                field: name.to_string(),
            })
    }
}

/// The source fragment one block emission produces.
#[derive(Debug, Default, Clone)]
pub struct Fragment {
    pub lines: Vec<String>,
    pub imports: Vec<String>,
    pub dependencies: Vec<String>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn import(mut self, import: impl Into<String>) -> Self {
        self.imports.push(import.into());
        self
    }

    pub fn dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }
}

/// The compile-time contract of one block kind.
///
/// Implement this to add a new block: the registry feeds the palette from
/// `name`/`description`/`category`/`schema`, the validator calls
/// `validate`, and the compiler calls `emit` once per reachable block.
pub trait BlockSpec: Send + Sync {
    fn kind(&self) -> BlockKind;
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn category(&self) -> &str;
    fn schema(&self) -> ConfigSchema;

    /// Check a block's config against the schema.
    ///
    /// The default walks the schema: required fields must be present,
    /// non-empty and well typed; unknown fields warn. Kinds with coupled
    /// fields override this and extend the result.
    fn validate(&self, block: &BlockInstance) -> Vec<Diagnostic> {
        schema_diagnostics(self.name(), &self.schema(), block)
    }

    /// Emit the block's source fragment.
    fn emit(&self, ctx: &EmitContext) -> Result<Fragment, CompileError>;
}

/// Schema-driven config check shared by every spec's default `validate`.
pub(crate) fn schema_diagnostics(
    spec_name: &str,
    schema: &ConfigSchema,
    block: &BlockInstance,
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for field in &schema.fields {
        let missing = Diagnostic::error(format!(
            "{spec_name} block is missing required field '{}'",
            field.name
        ))
        .for_block(&block.id)
        .for_field(&field.name);

        match block.config.get(&field.name) {
            None | Some(serde_json::Value::Null) => {
                if field.required {
                    diagnostics.push(missing);
                }
            }
            Some(serde_json::Value::String(s)) if field.required && s.is_empty() => {
                diagnostics.push(missing);
            }
            Some(value) => {
                if !field.field_type.accepts(value) {
                    diagnostics.push(
                        Diagnostic::error(format!(
                            "Field '{}' expects {}",
                            field.name,
                            field.field_type.describe()
                        ))
                        .for_block(&block.id)
                        .for_field(&field.name),
                    );
                }
            }
        }
    }

    for key in block.config.keys() {
        if schema.field(key).is_none() {
            diagnostics.push(
                Diagnostic::warning(format!("Unknown config field '{key}'"))
                    .for_block(&block.id)
                    .for_field(key),
            );
        }
    }

    diagnostics
}

/// A serializable snapshot of one spec, as the palette consumes it.
#[derive(Debug, Clone, Serialize)]
pub struct BlockDescriptor {
    pub kind: BlockKind,
    pub name: String,
    pub description: String,
    pub category: String,
    pub schema: ConfigSchema,
    pub default_config: serde_json::Map<String, serde_json::Value>,
}

/// Registry stats for dashboards and the palette header.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub count: usize,
    pub by_category: BTreeMap<String, usize>,
}

/// Lookup table of block specs, built once at startup.
pub struct BlockRegistry {
    specs: AHashMap<BlockKind, Box<dyn BlockSpec>>,
}

impl BlockRegistry {
    /// An empty registry. Most callers want [`BlockRegistry::with_builtins`].
    pub fn new() -> Self {
        Self {
            specs: AHashMap::new(),
        }
    }

    /// A registry holding every builtin block kind.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtin_specs(&mut registry);
        registry
    }

    pub fn register(&mut self, spec: Box<dyn BlockSpec>) -> Result<(), RegistryError> {
        let kind = spec.kind();
        if self.specs.contains_key(&kind) {
            return Err(RegistryError::DuplicateKind(kind.tag().to_string()));
        }
        self.specs.insert(kind, spec);
        Ok(())
    }

    /// Register or overwrite, for callers swapping out a builtin spec.
    pub fn replace(&mut self, spec: Box<dyn BlockSpec>) {
        self.specs.insert(spec.kind(), spec);
    }

    /// Registration for the builtin set; kinds are statically distinct.
    fn insert(&mut self, spec: Box<dyn BlockSpec>) {
        self.specs.insert(spec.kind(), spec);
    }

    pub fn get(&self, kind: BlockKind) -> Result<&dyn BlockSpec, RegistryError> {
        self.specs
            .get(&kind)
            .map(|s| s.as_ref())
            .ok_or_else(|| RegistryError::NotFound(kind.tag().to_string()))
    }

    pub fn contains(&self, kind: BlockKind) -> bool {
        self.specs.contains_key(&kind)
    }

    /// Registered kinds, in declaration order of [`BlockKind::ALL`].
    pub fn kinds(&self) -> Vec<BlockKind> {
        BlockKind::ALL
            .into_iter()
            .filter(|k| self.specs.contains_key(k))
            .collect()
    }

    pub fn describe(&self, kind: BlockKind) -> Result<BlockDescriptor, RegistryError> {
        let spec = self.get(kind)?;
        let schema = spec.schema();
        Ok(BlockDescriptor {
            kind,
            name: spec.name().to_string(),
            description: spec.description().to_string(),
            category: spec.category().to_string(),
            default_config: schema.default_config(),
            schema,
        })
    }

    /// Descriptors for every registered kind, palette order.
    pub fn descriptors(&self) -> Vec<BlockDescriptor> {
        self.kinds()
            .into_iter()
            .filter_map(|k| self.describe(k).ok())
            .collect()
    }

    pub fn default_config(
        &self,
        kind: BlockKind,
    ) -> Result<serde_json::Map<String, serde_json::Value>, RegistryError> {
        Ok(self.get(kind)?.schema().default_config())
    }

    pub fn stats(&self) -> RegistryStats {
        let mut by_category = BTreeMap::new();
        for spec in self.specs.values() {
            *by_category.entry(spec.category().to_string()).or_insert(0) += 1;
        }
        RegistryStats {
            count: self.specs.len(),
            by_category,
        }
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// The process-wide registry of builtin specs.
pub fn global() -> &'static BlockRegistry {
    static REGISTRY: OnceLock<BlockRegistry> = OnceLock::new();
    REGISTRY.get_or_init(BlockRegistry::with_builtins)
}
