use ahash::AHashMap;

use crate::error::CompileError;
use crate::graph::{BlockInstance, BlockKind};
use crate::registry::UpstreamRef;

/// Named prompt templates for agent blocks in library mode.
///
/// Looked up by `prompt_id` at compile time; the resolved template then
/// goes through the same placeholder rewriting as an inline prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    prompts: AHashMap<String, String>,
}

impl PromptLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(mut self, id: impl Into<String>, template: impl Into<String>) -> Self {
        self.insert(id, template);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, template: impl Into<String>) {
        self.prompts.insert(id.into(), template.into());
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.prompts.get(id).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// Rewrites `{{name}}` placeholders in block config before emission.
///
/// `{{input}}` becomes the primary upstream binding, a block id becomes
/// that block's binding, and a known variable name stays as is (the entry
/// parameter carries it at runtime). Anything else is fatal. Placeholder
/// names here may contain `-` (block ids often do); the rewritten form is
/// always identifier-safe.
pub(super) struct TemplateResolver<'a> {
    bindings: &'a AHashMap<String, String>,
    variables: &'a AHashMap<String, String>,
}

impl<'a> TemplateResolver<'a> {
    pub(super) fn new(
        bindings: &'a AHashMap<String, String>,
        variables: &'a AHashMap<String, String>,
    ) -> Self {
        Self {
            bindings,
            variables,
        }
    }

    /// Resolve the config fields of `block` that hold templates, plus the
    /// library prompt lookup for agents, returning a rewritten copy.
    pub(super) fn resolve_config(
        &self,
        block: &BlockInstance,
        library: &PromptLibrary,
        upstream: &[UpstreamRef],
    ) -> Result<serde_json::Map<String, serde_json::Value>, CompileError> {
        let mut config = block.config.clone();

        if block.kind == BlockKind::Agent {
            if block.config_str("prompt_mode") == Some("library") {
                let prompt_id = block.config_str("prompt_id").unwrap_or_default().to_string();
                let template = library.get(&prompt_id).ok_or_else(|| {
                    CompileError::UnknownPrompt {
                        block_id: block.id.clone(),
                        prompt_id: prompt_id.clone(),
                    }
                })?;
                config.insert(
                    "prompt".to_string(),
                    serde_json::Value::String(template.to_string()),
                );
            }
            self.rewrite_field(&mut config, "prompt", &block.id, upstream)?;
            self.rewrite_field(&mut config, "system", &block.id, upstream)?;
        }

        if block.kind == BlockKind::Transform
            && block.config_str("operation") == Some("template")
        {
            self.rewrite_field(&mut config, "argument", &block.id, upstream)?;
        }

        Ok(config)
    }

    fn rewrite_field(
        &self,
        config: &mut serde_json::Map<String, serde_json::Value>,
        field: &str,
        block_id: &str,
        upstream: &[UpstreamRef],
    ) -> Result<(), CompileError> {
        let Some(serde_json::Value::String(template)) = config.get(field) else {
            return Ok(());
        };
        let rewritten = self.rewrite(template, block_id, upstream)?;
        config.insert(field.to_string(), serde_json::Value::String(rewritten));
        Ok(())
    }

    /// Rewrite one template string.
    pub(super) fn rewrite(
        &self,
        template: &str,
        block_id: &str,
        upstream: &[UpstreamRef],
    ) -> Result<String, CompileError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                return Ok(out);
            };
            let name = after[..end].trim();
            if is_placeholder_name(name) {
                let target = self.resolve_name(name, block_id, upstream)?;
                out.push_str("{{");
                out.push_str(&target);
                out.push_str("}}");
            } else {
                out.push_str(&rest[start..start + 2 + end + 2]);
            }
            rest = &after[end + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn resolve_name(
        &self,
        name: &str,
        block_id: &str,
        upstream: &[UpstreamRef],
    ) -> Result<String, CompileError> {
        // `input` always names the upstream value, even when a variable
        // or block shares the name.
        if name == "input" {
            let first = upstream.first().ok_or_else(|| CompileError::MissingUpstream {
                block_id: block_id.to_string(),
            })?;
            return Ok(first.binding.clone());
        }
        if let Some(binding) = self.bindings.get(name) {
            return Ok(binding.clone());
        }
        if let Some(param) = self.variables.get(name) {
            return Ok(param.clone());
        }
        Err(CompileError::UnresolvedReference {
            block_id: block_id.to_string(),
            placeholder: name.to_string(),
        })
    }
}

fn is_placeholder_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
