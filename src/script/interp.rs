//! Statement-by-statement execution of a [`LinkedProgram`].
//!
//! One interpreter can be shared across executions; per-run state (scope,
//! program counter, trace) lives on the stack of [`Interpreter::run`].

use std::time::Instant;

use ahash::AHashMap;

use crate::error::ExecutionError;
use crate::providers::{CredentialStore, ModelRequest, ProviderRegistry, ToolDescriptor};
use crate::script::ast::{AgentOp, Op, OutputFormat, Statement, StatementKind, ToolDecl};
use crate::script::link::LinkedProgram;
use crate::trace::TraceRecorder;

/// How a program run ended, short of an error.
#[derive(Debug, Clone)]
pub enum FlowResult {
    /// The program reached a `return`.
    Completed(serde_json::Value),
    /// An interrupt statement halted the program with a marker payload.
    Interrupted(serde_json::Value),
}

impl FlowResult {
    pub fn value(&self) -> &serde_json::Value {
        match self {
            FlowResult::Completed(v) | FlowResult::Interrupted(v) => v,
        }
    }

    pub fn into_value(self) -> serde_json::Value {
        match self {
            FlowResult::Completed(v) | FlowResult::Interrupted(v) => v,
        }
    }
}

enum EvalOutcome {
    Value(serde_json::Value),
    Interrupt(serde_json::Value),
}

/// Executes linked programs against the executor's providers and the
/// request's credentials.
pub struct Interpreter<'a> {
    providers: &'a ProviderRegistry,
    credentials: &'a CredentialStore,
}

impl<'a> Interpreter<'a> {
    pub fn new(providers: &'a ProviderRegistry, credentials: &'a CredentialStore) -> Self {
        Self {
            providers,
            credentials,
        }
    }

    /// Run the program against one input, recording a trace entry per
    /// block touched.
    pub async fn run(
        &self,
        program: &LinkedProgram,
        input: &serde_json::Value,
        recorder: &mut TraceRecorder,
    ) -> Result<FlowResult, ExecutionError> {
        let params = bind_params(&program.params, input);
        let mut scope: AHashMap<String, serde_json::Value> = AHashMap::new();
        let mut pc = 0usize;

        while pc < program.body.len() {
            let statement = &program.body[pc];
            match &statement.kind {
                StatementKind::Let { binding, op } => {
                    let started = Instant::now();
                    let consumed = op_input(op, &scope, &params);
                    let outcome = self.eval_op(op, &scope, &params, program).await;
                    let elapsed = started.elapsed().as_millis() as u64;
                    match outcome {
                        Ok(EvalOutcome::Value(value)) => {
                            recorder.succeeded(
                                op.block_id(),
                                binding,
                                op.tag(),
                                consumed,
                                value.clone(),
                                elapsed,
                            );
                            scope.insert(binding.clone(), value);
                        }
                        Ok(EvalOutcome::Interrupt(marker)) => {
                            recorder.succeeded(
                                op.block_id(),
                                binding,
                                op.tag(),
                                consumed,
                                marker.clone(),
                                elapsed,
                            );
                            return Ok(FlowResult::Interrupted(marker));
                        }
                        Err(error) => {
                            recorder.failed(
                                op.block_id(),
                                binding,
                                op.tag(),
                                consumed,
                                &error.to_string(),
                                elapsed,
                            );
                            return Err(error);
                        }
                    }
                }
                StatementKind::If { binding, negated } => {
                    let value = scope.get(binding).ok_or_else(|| {
                        ExecutionError::UndefinedBinding(binding.clone())
                    })?;
                    let truthy = match value {
                        serde_json::Value::Bool(b) => *b,
                        _ => {
                            return Err(ExecutionError::Runtime(format!(
                                "guard '{binding}' is not a boolean"
                            )));
                        }
                    };
                    if truthy == *negated {
                        let target = program
                            .skip_targets
                            .get(&pc)
                            .copied()
                            .unwrap_or(program.body.len());
                        record_skipped(&program.body[pc + 1..target], recorder);
                        pc = target;
                        continue;
                    }
                }
                StatementKind::End => {}
                StatementKind::Return { binding } => {
                    let value = scope
                        .get(binding)
                        .ok_or_else(|| ExecutionError::UndefinedBinding(binding.clone()))?
                        .clone();
                    return Ok(FlowResult::Completed(value));
                }
            }
            pc += 1;
        }

        Err(ExecutionError::NoOutput)
    }

    async fn eval_op(
        &self,
        op: &Op,
        scope: &AHashMap<String, serde_json::Value>,
        params: &AHashMap<String, serde_json::Value>,
        program: &LinkedProgram,
    ) -> Result<EvalOutcome, ExecutionError> {
        let value = match op {
            Op::Param { name, .. } => params
                .get(name)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            Op::Value { data, .. } => data.clone(),
            Op::Agent(agent) => self.call_agent(agent, scope, params, program).await?,
            Op::Cond { from, expr, .. } => {
                let subject = first_available(from, scope)?;
                serde_json::Value::Bool(eval_condition(expr, &subject)?)
            }
            Op::Transform { from, op, arg, .. } => {
                let subject = first_available(from, scope)?;
                apply_transform(op, arg.as_deref(), subject, scope, params)?
            }
            Op::Interrupt {
                from,
                reason,
                block_id,
            } => {
                let payload = first_available(from, scope)?;
                return Ok(EvalOutcome::Interrupt(serde_json::json!({
                    "type": "interrupt",
                    "status": "awaiting_external_response",
                    "block": block_id,
                    "reason": reason,
                    "payload": payload,
                })));
            }
            Op::Output { from, format, .. } => {
                let subject = first_available(from, scope)?;
                apply_format(*format, subject)
            }
        };
        Ok(EvalOutcome::Value(value))
    }

    async fn call_agent(
        &self,
        agent: &AgentOp,
        scope: &AHashMap<String, serde_json::Value>,
        params: &AHashMap<String, serde_json::Value>,
        program: &LinkedProgram,
    ) -> Result<serde_json::Value, ExecutionError> {
        let client = self.providers.get(&agent.provider).ok_or_else(|| {
            ExecutionError::MissingDependency(format!(
                "Cannot resolve module 'provider:{}'",
                agent.provider
            ))
        })?;

        let api_key = if client.needs_api_key() {
            Some(self.credentials.require(&agent.provider)?)
        } else {
            self.credentials.get(&agent.provider)
        };

        let prompt = render(&agent.prompt, scope, params)?;
        let system = agent
            .system
            .as_deref()
            .map(|s| render(s, scope, params))
            .transpose()?;
        let tools = agent
            .tools
            .iter()
            .filter_map(|binding| program.tools.get(binding))
            .map(tool_descriptor)
            .collect();

        let request = ModelRequest {
            model: agent.model.clone(),
            prompt,
            system,
            temperature: agent.temperature,
            max_tokens: agent.max_tokens,
            tools,
            api_key,
        };

        let reply = client.generate(request).await?;
        Ok(serde_json::Value::String(reply.text))
    }
}

fn tool_descriptor(decl: &ToolDecl) -> ToolDescriptor {
    ToolDescriptor {
        name: decl.name.clone(),
        description: decl.description.clone(),
        endpoint: decl.endpoint.clone(),
        method: decl.method.clone(),
        operations: decl.operations.clone(),
    }
}

fn record_skipped(statements: &[Statement], recorder: &mut TraceRecorder) {
    for statement in statements {
        if let StatementKind::Let { binding, op } = &statement.kind {
            recorder.skipped(op.block_id(), binding, op.tag());
        }
    }
}

/// The value a block consumed, for its trace entry. Params report their
/// bound entry value, agents the rendered prompt, chain ops the first
/// defined upstream binding. Literals consume nothing.
fn op_input(
    op: &Op,
    scope: &AHashMap<String, serde_json::Value>,
    params: &AHashMap<String, serde_json::Value>,
) -> Option<serde_json::Value> {
    match op {
        Op::Param { name, .. } => params.get(name).cloned(),
        Op::Value { .. } => None,
        Op::Agent(agent) => render(&agent.prompt, scope, params)
            .ok()
            .map(serde_json::Value::String),
        Op::Cond { from, .. }
        | Op::Transform { from, .. }
        | Op::Interrupt { from, .. }
        | Op::Output { from, .. } => {
            from.iter().find_map(|binding| scope.get(binding).cloned())
        }
    }
}

/// Bind the caller's input to the entry parameters.
///
/// A single parameter accepts either `{name: value}` or the bare value;
/// multiple parameters each pull their key from an object input, binding
/// null when absent.
fn bind_params(
    names: &[String],
    input: &serde_json::Value,
) -> AHashMap<String, serde_json::Value> {
    let mut params = AHashMap::new();
    match names {
        [] => {}
        [single] => {
            let value = match input {
                serde_json::Value::Object(map) if map.contains_key(single) => {
                    map[single].clone()
                }
                other => other.clone(),
            };
            params.insert(single.clone(), value);
        }
        many => {
            for name in many {
                let value = input
                    .get(name)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                params.insert(name.clone(), value);
            }
        }
    }
    params
}

fn first_available(
    from: &[String],
    scope: &AHashMap<String, serde_json::Value>,
) -> Result<serde_json::Value, ExecutionError> {
    for binding in from {
        if let Some(value) = scope.get(binding) {
            return Ok(value.clone());
        }
    }
    Err(ExecutionError::UndefinedBinding(
        from.first().cloned().unwrap_or_default(),
    ))
}

/// The text form of a value: strings verbatim, everything else compact
/// JSON.
fn as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{{name}}` placeholders from the scope, then the entry
/// parameters. Non-identifier placeholders pass through untouched.
fn render(
    template: &str,
    scope: &AHashMap<String, serde_json::Value>,
    params: &AHashMap<String, serde_json::Value>,
) -> Result<String, ExecutionError> {
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
        if is_ident(name) {
            let value = scope
                .get(name)
                .or_else(|| params.get(name))
                .ok_or_else(|| ExecutionError::UndefinedBinding(name.to_string()))?;
            out.push_str(&as_text(value));
        } else {
            out.push_str(&rest[start..start + 2 + end + 2]);
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Evaluate a condition expression against the upstream value.
///
/// Forms: `true`, `false`, `value OP "text"`, `<key> OP "text"` (object
/// upstream), `contains` as OP, and `length CMP <number>`. Anything else
/// is a runtime error, never a silent false.
fn eval_condition(expr: &str, subject: &serde_json::Value) -> Result<bool, ExecutionError> {
    let expr = expr.trim();
    match expr {
        "true" => return Ok(true),
        "false" => return Ok(false),
        _ => {}
    }

    if let Some(rest) = expr.strip_prefix("length") {
        return eval_length(rest.trim(), subject)
            .ok_or_else(|| ExecutionError::Condition(expr.to_string()));
    }

    // lhs contains "text"
    if let Some((lhs, rhs)) = parse_operator(expr, "contains") {
        return Ok(lookup_text(lhs, subject).is_some_and(|s| s.contains(rhs)));
    }
    if let Some((lhs, rhs)) = parse_operator(expr, "!=") {
        return Ok(lookup_text(lhs, subject).is_some_and(|s| s != rhs));
    }
    if let Some((lhs, rhs)) = parse_operator(expr, "==") {
        return Ok(lookup_text(lhs, subject).is_some_and(|s| s == rhs));
    }

    Err(ExecutionError::Condition(expr.to_string()))
}

/// Parse `lhs OP "rhs"` expressions, returning (lhs, rhs).
fn parse_operator<'e>(expr: &'e str, op: &str) -> Option<(&'e str, &'e str)> {
    let (lhs, rhs) = expr.split_once(op)?;
    Some((lhs.trim(), rhs.trim().trim_matches('"')))
}

/// Resolve the left-hand side of a comparison: `value` means the whole
/// upstream value; any other name indexes into an object upstream.
fn lookup_text(lhs: &str, subject: &serde_json::Value) -> Option<String> {
    if lhs == "value" {
        return Some(as_text(subject));
    }
    subject.get(lhs).map(as_text)
}

fn eval_length(rest: &str, subject: &serde_json::Value) -> Option<bool> {
    let length = match subject {
        serde_json::Value::String(s) => s.chars().count(),
        serde_json::Value::Array(items) => items.len(),
        serde_json::Value::Object(map) => map.len(),
        other => as_text(other).chars().count(),
    } as f64;

    for op in [">=", "<=", "==", "!=", ">", "<"] {
        if let Some(number) = rest.strip_prefix(op) {
            let number: f64 = number.trim().parse().ok()?;
            return Some(match op {
                ">=" => length >= number,
                "<=" => length <= number,
                "==" => length == number,
                "!=" => length != number,
                ">" => length > number,
                _ => length < number,
            });
        }
    }
    None
}

fn apply_transform(
    op: &str,
    arg: Option<&str>,
    subject: serde_json::Value,
    scope: &AHashMap<String, serde_json::Value>,
    params: &AHashMap<String, serde_json::Value>,
) -> Result<serde_json::Value, ExecutionError> {
    let value = match op {
        "trim" => serde_json::Value::String(as_text(&subject).trim().to_string()),
        "uppercase" => serde_json::Value::String(as_text(&subject).to_uppercase()),
        "lowercase" => serde_json::Value::String(as_text(&subject).to_lowercase()),
        "pick" => {
            let path = arg.ok_or_else(|| {
                ExecutionError::Runtime("transform 'pick' needs an argument".to_string())
            })?;
            pick_path(&subject, path)
        }
        "json_parse" => match subject {
            serde_json::Value::String(s) => serde_json::from_str(&s).map_err(|e| {
                ExecutionError::Runtime(format!("cannot parse JSON: {e}"))
            })?,
            structured => structured,
        },
        "json_stringify" => serde_json::Value::String(subject.to_string()),
        "template" => {
            let template = arg.ok_or_else(|| {
                ExecutionError::Runtime("transform 'template' needs an argument".to_string())
            })?;
            serde_json::Value::String(render(template, scope, params)?)
        }
        other => {
            return Err(ExecutionError::Runtime(format!(
                "unknown transform operation '{other}'"
            )));
        }
    };
    Ok(value)
}

/// Walk a dot path into a value; any missing step yields null.
fn pick_path(subject: &serde_json::Value, path: &str) -> serde_json::Value {
    let mut current = subject;
    for step in path.split('.') {
        let next = match current {
            serde_json::Value::Object(map) => map.get(step),
            serde_json::Value::Array(items) => {
                step.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return serde_json::Value::Null,
        }
    }
    current.clone()
}

fn apply_format(format: OutputFormat, subject: serde_json::Value) -> serde_json::Value {
    match format {
        OutputFormat::Text => serde_json::Value::String(as_text(&subject)),
        OutputFormat::Json => match subject {
            serde_json::Value::String(s) => match serde_json::from_str(&s) {
                Ok(parsed) => parsed,
                Err(_) => serde_json::Value::String(s),
            },
            structured => structured,
        },
        OutputFormat::Structured => match subject {
            object @ serde_json::Value::Object(_) => object,
            other => serde_json::json!({"value": other}),
        },
    }
}
