//! The builtin block set: input, agent, condition, tool, output,
//! interrupt, transform.

use crate::diagnostic::Diagnostic;
use crate::error::CompileError;
use crate::graph::{BlockInstance, BlockKind};
use crate::registry::{
    BlockRegistry, BlockSpec, ConfigSchema, EmitContext, FieldSpec, Fragment, schema_diagnostics,
};
use crate::script::quote;

pub(super) fn register_builtin_specs(registry: &mut BlockRegistry) {
    registry.insert(Box::new(InputSpec));
    registry.insert(Box::new(AgentSpec));
    registry.insert(Box::new(ConditionSpec));
    registry.insert(Box::new(ToolSpec));
    registry.insert(Box::new(OutputSpec));
    registry.insert(Box::new(InterruptSpec));
    registry.insert(Box::new(TransformSpec));
}

fn from_list(ctx: &EmitContext) -> String {
    let bindings: Vec<&str> = ctx.upstream.iter().map(|u| u.binding.as_str()).collect();
    bindings.join(", ")
}

struct InputSpec;

impl BlockSpec for InputSpec {
    fn kind(&self) -> BlockKind {
        BlockKind::Input
    }
    fn name(&self) -> &str {
        "Input"
    }
    fn description(&self) -> &str {
        "Entry point of the flow; binds a caller-supplied variable or a fixed value"
    }
    fn category(&self) -> &str {
        "io"
    }
    fn schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::choice("mode", ["variable", "static"]).with_default("variable"),
            FieldSpec::text("variable_name").with_default("input"),
            FieldSpec::choice("variable_type", ["string", "number", "boolean", "json"])
                .with_default("string"),
            FieldSpec::json("value"),
            FieldSpec::text("description"),
        ])
    }

    fn validate(&self, block: &BlockInstance) -> Vec<Diagnostic> {
        let mut diagnostics = schema_diagnostics(self.name(), &self.schema(), block);
        if block.config_str("mode") == Some("static") && !block.config.contains_key("value") {
            diagnostics.push(
                Diagnostic::error("Input block in static mode is missing 'value'")
                    .for_block(&block.id)
                    .for_field("value"),
            );
        }
        diagnostics
    }

    fn emit(&self, ctx: &EmitContext) -> Result<Fragment, CompileError> {
        let line = if ctx.str_field("mode") == Some("static") {
            let value = ctx
                .config
                .get("value")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            format!(
                "let {} = value data={} id={}",
                ctx.binding,
                value,
                quote(&ctx.block.id)
            )
        } else {
            let name = ctx.str_field("variable_name").unwrap_or("input");
            format!(
                "let {} = param name={} id={}",
                ctx.binding,
                quote(name),
                quote(&ctx.block.id)
            )
        };
        Ok(Fragment::new().line(line))
    }
}

struct AgentSpec;

impl BlockSpec for AgentSpec {
    fn kind(&self) -> BlockKind {
        BlockKind::Agent
    }
    fn name(&self) -> &str {
        "Agent"
    }
    fn description(&self) -> &str {
        "Calls a generative model with a templated prompt and optional attached tools"
    }
    fn category(&self) -> &str {
        "ai"
    }
    fn schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::text("provider").required(),
            FieldSpec::text("model").required().with_default("gpt-4o-mini"),
            FieldSpec::choice("prompt_mode", ["static", "library"]).with_default("static"),
            FieldSpec::text("prompt"),
            FieldSpec::text("prompt_id"),
            FieldSpec::text("system"),
            FieldSpec::number("temperature").with_default(0.7),
            FieldSpec::number("max_tokens").with_default(1024),
        ])
    }

    fn validate(&self, block: &BlockInstance) -> Vec<Diagnostic> {
        let mut diagnostics = schema_diagnostics(self.name(), &self.schema(), block);
        let library_mode = block.config_str("prompt_mode") == Some("library");
        let missing = |field: &str| {
            block
                .config_str(field)
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        };
        if library_mode && missing("prompt_id") {
            diagnostics.push(
                Diagnostic::error("Agent block in library mode is missing 'prompt_id'")
                    .for_block(&block.id)
                    .for_field("prompt_id"),
            );
        } else if !library_mode && missing("prompt") {
            diagnostics.push(
                Diagnostic::error("Agent block is missing required field 'prompt'")
                    .for_block(&block.id)
                    .for_field("prompt"),
            );
        }
        diagnostics
    }

    fn emit(&self, ctx: &EmitContext) -> Result<Fragment, CompileError> {
        let provider = ctx.require_str("provider")?;
        let model = ctx.require_str("model")?;
        // Library prompts are already substituted into `prompt` by now.
        let prompt = ctx.require_str("prompt")?;

        let mut line = format!(
            "let {} = agent provider={} model={} prompt={}",
            ctx.binding,
            quote(provider),
            quote(model),
            quote(prompt)
        );
        if let Some(system) = ctx.str_field("system").filter(|s| !s.is_empty()) {
            line.push_str(&format!(" system={}", quote(system)));
        }
        if let Some(temperature) = ctx.f64_field("temperature") {
            line.push_str(&format!(" temperature={temperature}"));
        }
        if let Some(max_tokens) = ctx.f64_field("max_tokens") {
            line.push_str(&format!(" max_tokens={max_tokens}"));
        }
        if !ctx.tools.is_empty() {
            line.push_str(&format!(" tools=[{}]", ctx.tools.join(", ")));
        }
        line.push_str(&format!(" id={}", quote(&ctx.block.id)));

        Ok(Fragment::new()
            .line(line)
            .import(format!("provider:{provider}"))
            .dependency(provider))
    }
}

struct ConditionSpec;

impl BlockSpec for ConditionSpec {
    fn kind(&self) -> BlockKind {
        BlockKind::Condition
    }
    fn name(&self) -> &str {
        "Condition"
    }
    fn description(&self) -> &str {
        "Evaluates an expression against the upstream value and forks the flow"
    }
    fn category(&self) -> &str {
        "logic"
    }
    fn schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![FieldSpec::text("condition").required()])
    }

    fn emit(&self, ctx: &EmitContext) -> Result<Fragment, CompileError> {
        ctx.primary_upstream()?;
        let expr = ctx.require_str("condition")?;
        let line = format!(
            "let {} = cond from=[{}] expr={} id={}",
            ctx.binding,
            from_list(ctx),
            quote(expr),
            quote(&ctx.block.id)
        );
        Ok(Fragment::new().line(line))
    }
}

struct ToolSpec;

impl BlockSpec for ToolSpec {
    fn kind(&self) -> BlockKind {
        BlockKind::Tool
    }
    fn name(&self) -> &str {
        "Tool"
    }
    fn description(&self) -> &str {
        "An invocable capability attached to an agent, never part of the main chain"
    }
    fn category(&self) -> &str {
        "tools"
    }
    fn schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::text("name").required(),
            FieldSpec::text("endpoint"),
            FieldSpec::choice("method", ["GET", "POST", "PUT", "DELETE"]).with_default("POST"),
            FieldSpec::list("operations").with_default(serde_json::Value::Array(vec![])),
            FieldSpec::text("description"),
        ])
    }

    fn emit(&self, ctx: &EmitContext) -> Result<Fragment, CompileError> {
        let name = ctx.require_str("name")?;
        let mut line = format!("tool {} name={}", ctx.binding, quote(name));
        if let Some(endpoint) = ctx.str_field("endpoint").filter(|s| !s.is_empty()) {
            line.push_str(&format!(" endpoint={}", quote(endpoint)));
        }
        if let Some(method) = ctx.str_field("method") {
            line.push_str(&format!(" method={}", quote(method)));
        }
        if let Some(operations) = ctx.config.get("operations").filter(|v| v.is_array()) {
            line.push_str(&format!(" operations={operations}"));
        }
        if let Some(description) = ctx.str_field("description").filter(|s| !s.is_empty()) {
            line.push_str(&format!(" description={}", quote(description)));
        }
        line.push_str(&format!(" id={}", quote(&ctx.block.id)));

        Ok(Fragment::new().line(line).import(format!("tool:{name}")))
    }
}

struct OutputSpec;

impl BlockSpec for OutputSpec {
    fn kind(&self) -> BlockKind {
        BlockKind::Output
    }
    fn name(&self) -> &str {
        "Output"
    }
    fn description(&self) -> &str {
        "Formats the final upstream value and returns it from the flow"
    }
    fn category(&self) -> &str {
        "io"
    }
    fn schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::choice("format", ["text", "json", "structured"])
                .required()
                .with_default("text"),
        ])
    }

    fn emit(&self, ctx: &EmitContext) -> Result<Fragment, CompileError> {
        ctx.primary_upstream()?;
        let format = ctx.require_str("format")?;
        let line = format!(
            "let {} = output from=[{}] format={} id={}",
            ctx.binding,
            from_list(ctx),
            quote(format),
            quote(&ctx.block.id)
        );
        Ok(Fragment::new()
            .line(line)
            .line(format!("return {}", ctx.binding)))
    }
}

struct InterruptSpec;

impl BlockSpec for InterruptSpec {
    fn kind(&self) -> BlockKind {
        BlockKind::Interrupt
    }
    fn name(&self) -> &str {
        "Interrupt"
    }
    fn description(&self) -> &str {
        "Suspends the flow and returns an awaiting-external-response marker"
    }
    fn category(&self) -> &str {
        "control"
    }
    fn schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::text("reason").with_default("Awaiting external response"),
        ])
    }

    fn emit(&self, ctx: &EmitContext) -> Result<Fragment, CompileError> {
        ctx.primary_upstream()?;
        let reason = ctx
            .str_field("reason")
            .filter(|s| !s.is_empty())
            .unwrap_or("Awaiting external response");
        let line = format!(
            "let {} = interrupt from=[{}] reason={} id={}",
            ctx.binding,
            from_list(ctx),
            quote(reason),
            quote(&ctx.block.id)
        );
        Ok(Fragment::new().line(line))
    }
}

struct TransformSpec;

impl BlockSpec for TransformSpec {
    fn kind(&self) -> BlockKind {
        BlockKind::Transform
    }
    fn name(&self) -> &str {
        "Transform"
    }
    fn description(&self) -> &str {
        "Applies a deterministic operation to the upstream value"
    }
    fn category(&self) -> &str {
        "logic"
    }
    fn schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            FieldSpec::choice(
                "operation",
                [
                    "trim",
                    "uppercase",
                    "lowercase",
                    "pick",
                    "json_parse",
                    "json_stringify",
                    "template",
                ],
            )
            .required()
            .with_default("trim"),
            FieldSpec::text("argument"),
        ])
    }

    fn validate(&self, block: &BlockInstance) -> Vec<Diagnostic> {
        let mut diagnostics = schema_diagnostics(self.name(), &self.schema(), block);
        let needs_argument = matches!(block.config_str("operation"), Some("pick" | "template"));
        let argument_empty = block
            .config_str("argument")
            .map(str::trim)
            .unwrap_or_default()
            .is_empty();
        if needs_argument && argument_empty {
            diagnostics.push(
                Diagnostic::error("Transform block needs an 'argument' for this operation")
                    .for_block(&block.id)
                    .for_field("argument"),
            );
        }
        diagnostics
    }

    fn emit(&self, ctx: &EmitContext) -> Result<Fragment, CompileError> {
        ctx.primary_upstream()?;
        let operation = ctx.require_str("operation")?;
        let mut line = format!(
            "let {} = transform from=[{}] op={}",
            ctx.binding,
            from_list(ctx),
            quote(operation)
        );
        if let Some(argument) = ctx.str_field("argument").filter(|s| !s.is_empty()) {
            line.push_str(&format!(" arg={}", quote(argument)));
        }
        line.push_str(&format!(" id={}", quote(&ctx.block.id)));
        Ok(Fragment::new().line(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::registry::global;
    use serde_json::json;

    fn block(kind: BlockKind, config: serde_json::Value) -> BlockInstance {
        let map = match config {
            serde_json::Value::Object(m) => m,
            _ => panic!("config must be an object"),
        };
        BlockInstance::new("blk-1", kind).with_config(map)
    }

    fn emit_with(
        spec: &dyn BlockSpec,
        block: &BlockInstance,
        upstream: &[crate::registry::UpstreamRef],
    ) -> Fragment {
        let ctx = EmitContext {
            block,
            config: &block.config,
            binding: "b_blk_1",
            upstream,
            tools: &[],
            variables: &[],
        };
        spec.emit(&ctx).unwrap()
    }

    #[test]
    fn registry_holds_all_builtin_kinds() {
        let registry = global();
        assert_eq!(registry.kinds().len(), 7);
        let stats = registry.stats();
        assert_eq!(stats.count, 7);
        assert_eq!(stats.by_category["io"], 2);
        assert_eq!(stats.by_category["logic"], 2);
    }

    #[test]
    fn registering_a_taken_kind_is_rejected() {
        let mut registry = BlockRegistry::with_builtins();
        let err = registry.register(Box::new(InputSpec)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKind(kind) if kind == "input"));

        // `replace` is the sanctioned way to swap a builtin out.
        registry.replace(Box::new(InputSpec));
        assert_eq!(registry.kinds().len(), 7);
    }

    #[test]
    fn variable_input_emits_param() {
        let block = block(
            BlockKind::Input,
            json!({"mode": "variable", "variable_name": "topic"}),
        );
        let fragment = emit_with(&InputSpec, &block, &[]);
        assert_eq!(
            fragment.lines,
            vec![r#"let b_blk_1 = param name="topic" id="blk-1""#]
        );
    }

    #[test]
    fn static_input_embeds_literal() {
        let block = block(
            BlockKind::Input,
            json!({"mode": "static", "value": {"k": 1}}),
        );
        let fragment = emit_with(&InputSpec, &block, &[]);
        assert_eq!(
            fragment.lines,
            vec![r#"let b_blk_1 = value data={"k":1} id="blk-1""#]
        );
    }

    #[test]
    fn agent_emits_provider_import_and_dependency() {
        let block = block(
            BlockKind::Agent,
            json!({
                "provider": "openai",
                "model": "gpt-4o-mini",
                "prompt": "Summarize: {{b_up}}",
                "temperature": 0.2
            }),
        );
        let fragment = emit_with(&AgentSpec, &block, &[]);
        assert_eq!(fragment.imports, vec!["provider:openai"]);
        assert_eq!(fragment.dependencies, vec!["openai"]);
        assert!(fragment.lines[0].contains(r#"provider="openai""#));
        assert!(fragment.lines[0].contains("temperature=0.2"));
    }

    #[test]
    fn agent_without_prompt_fails_emission() {
        let block = block(
            BlockKind::Agent,
            json!({"provider": "openai", "model": "gpt-4o-mini"}),
        );
        let ctx = EmitContext {
            block: &block,
            config: &block.config,
            binding: "b_blk_1",
            upstream: &[],
            tools: &[],
            variables: &[],
        };
        let err = AgentSpec.emit(&ctx).unwrap_err();
        assert!(matches!(err, CompileError::MissingField { ref field, .. } if field == "prompt"));
    }

    #[test]
    fn output_emits_return_after_binding() {
        let block = block(BlockKind::Output, json!({"format": "text"}));
        let upstream = [crate::registry::UpstreamRef {
            block_id: "up-1".to_string(),
            binding: "b_up_1".to_string(),
        }];
        let fragment = emit_with(&OutputSpec, &block, &upstream);
        assert_eq!(fragment.lines.len(), 2);
        assert!(fragment.lines[0].contains("from=[b_up_1]"));
        assert_eq!(fragment.lines[1], "return b_blk_1");
    }

    #[test]
    fn library_mode_agent_requires_prompt_id() {
        let block = block(
            BlockKind::Agent,
            json!({"provider": "openai", "model": "gpt-4o-mini", "prompt_mode": "library"}),
        );
        let diagnostics = AgentSpec.validate(&block);
        assert!(
            diagnostics
                .iter()
                .any(|d| d.is_error() && d.message.contains("prompt_id"))
        );
    }

    #[test]
    fn transform_pick_requires_argument() {
        let block = block(BlockKind::Transform, json!({"operation": "pick"}));
        let diagnostics = TransformSpec.validate(&block);
        assert!(
            diagnostics
                .iter()
                .any(|d| d.is_error() && d.message.contains("argument"))
        );
    }
}
