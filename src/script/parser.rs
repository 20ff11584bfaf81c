//! Text to [`Program`] parsing.
//!
//! Flow-script is line oriented: one statement per line, `#` comments,
//! `key=value` attributes. Attribute values are JSON string literals,
//! JSON numbers, `true`/`false`/`null`, bare binding references, or
//! bracket groups (JSON arrays/objects, or `[b_1, b_2]` reference lists).

use crate::error::ParseError;
use crate::script::ast::{
    AgentOp, ImportRef, Op, OutputFormat, Program, Statement, StatementKind, ToolDecl,
};

/// Parse flow-script source into a program.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let mut name: Option<String> = None;
    let mut format = 1u32;
    let mut imports = Vec::new();
    let mut tools = Vec::new();
    let mut params: Option<Vec<String>> = None;
    let mut body = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("program ") {
            let (program_name, tail) = read_string(rest.trim_start(), line_no)?;
            let tail = tail.trim();
            if let Some(version) = tail.strip_prefix("format") {
                format = version.trim().parse().map_err(|_| ParseError::Syntax {
                    line: line_no,
                    message: format!("invalid format version '{}'", version.trim()),
                })?;
            } else if !tail.is_empty() {
                return Err(ParseError::Syntax {
                    line: line_no,
                    message: format!("unexpected trailing input '{tail}'"),
                });
            }
            name = Some(program_name);
            continue;
        }

        if name.is_none() {
            return Err(ParseError::Syntax {
                line: line_no,
                message: "expected 'program' header before any other statement".to_string(),
            });
        }

        if let Some(rest) = line.strip_prefix("import ") {
            imports.push(parse_import(rest.trim(), line_no)?);
        } else if let Some(rest) = line.strip_prefix("tool ") {
            tools.push(parse_tool(rest.trim(), line_no)?);
        } else if let Some(rest) = line.strip_prefix("entry ") {
            if params.is_some() {
                return Err(ParseError::Syntax {
                    line: line_no,
                    message: "duplicate 'entry' declaration".to_string(),
                });
            }
            params = Some(parse_entry(rest.trim(), line_no)?);
        } else if let Some(rest) = line.strip_prefix("let ") {
            if params.is_none() {
                return Err(ParseError::Syntax {
                    line: line_no,
                    message: "statement before 'entry' declaration".to_string(),
                });
            }
            body.push(Statement {
                line: line_no,
                kind: parse_let(rest.trim(), line_no)?,
            });
        } else if let Some(rest) = line.strip_prefix("if ") {
            body.push(Statement {
                line: line_no,
                kind: parse_if(rest.trim(), line_no)?,
            });
        } else if line == "}" {
            body.push(Statement {
                line: line_no,
                kind: StatementKind::End,
            });
        } else if let Some(rest) = line.strip_prefix("return ") {
            let binding = rest.trim();
            require_ident(binding, line_no)?;
            body.push(Statement {
                line: line_no,
                kind: StatementKind::Return {
                    binding: binding.to_string(),
                },
            });
        } else {
            return Err(ParseError::Syntax {
                line: line_no,
                message: format!("unrecognized statement '{line}'"),
            });
        }
    }

    let name = name.ok_or(ParseError::MissingDeclaration("program"))?;
    let params = params.ok_or(ParseError::MissingDeclaration("entry"))?;

    Ok(Program {
        name,
        format,
        imports,
        tools,
        params,
        body,
    })
}

fn parse_import(rest: &str, line: usize) -> Result<ImportRef, ParseError> {
    let (kind, tail) = rest.split_once(' ').ok_or_else(|| ParseError::Syntax {
        line,
        message: "import needs a module kind and a name".to_string(),
    })?;
    let (name, leftover) = read_string(tail.trim_start(), line)?;
    if !leftover.trim().is_empty() {
        return Err(ParseError::Syntax {
            line,
            message: format!("unexpected trailing input '{}'", leftover.trim()),
        });
    }
    match kind {
        "provider" => Ok(ImportRef::Provider(name)),
        "tool" => Ok(ImportRef::Tool(name)),
        _ => Err(ParseError::Syntax {
            line,
            message: format!("unknown import kind '{kind}'"),
        }),
    }
}

fn parse_entry(rest: &str, line: usize) -> Result<Vec<String>, ParseError> {
    let inner = rest
        .strip_prefix("run(")
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| ParseError::Syntax {
            line,
            message: "entry declaration must look like 'entry run(...)'".to_string(),
        })?;
    let inner = inner.trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|p| {
            let p = p.trim();
            require_ident(p, line)?;
            Ok(p.to_string())
        })
        .collect()
}

fn parse_tool(rest: &str, line: usize) -> Result<ToolDecl, ParseError> {
    let (binding, tail) = split_ident(rest, line)?;
    let mut attrs = scan_attrs(tail, line)?;
    let decl = ToolDecl {
        binding: binding.to_string(),
        name: attrs.require_str("tool", "name")?,
        endpoint: attrs.opt_str("endpoint")?,
        method: attrs.opt_str("method")?,
        operations: attrs.opt_str_list("operations")?,
        description: attrs.opt_str("description")?,
        block_id: attrs.require_str("tool", "id")?,
    };
    attrs.finish()?;
    Ok(decl)
}

fn parse_if(rest: &str, line: usize) -> Result<StatementKind, ParseError> {
    let rest = rest
        .strip_suffix('{')
        .ok_or_else(|| ParseError::Syntax {
            line,
            message: "if statement must end with '{'".to_string(),
        })?
        .trim();
    let (binding, negated) = match rest.strip_prefix("not ") {
        Some(binding) => (binding.trim(), true),
        None => (rest, false),
    };
    require_ident(binding, line)?;
    Ok(StatementKind::If {
        binding: binding.to_string(),
        negated,
    })
}

fn parse_let(rest: &str, line: usize) -> Result<StatementKind, ParseError> {
    let (binding, tail) = split_ident(rest, line)?;
    let tail = tail
        .trim_start()
        .strip_prefix('=')
        .ok_or_else(|| ParseError::Syntax {
            line,
            message: format!("expected '=' after binding '{binding}'"),
        })?;
    let (op_name, tail) = split_ident(tail.trim_start(), line)?;
    let mut attrs = scan_attrs(tail, line)?;

    let op = match op_name {
        "param" => Op::Param {
            name: attrs.require_str("param", "name")?,
            block_id: attrs.require_str("param", "id")?,
        },
        "value" => Op::Value {
            data: attrs.require_value("value", "data")?,
            block_id: attrs.require_str("value", "id")?,
        },
        "agent" => Op::Agent(AgentOp {
            provider: attrs.require_str("agent", "provider")?,
            model: attrs.require_str("agent", "model")?,
            prompt: attrs.require_str("agent", "prompt")?,
            system: attrs.opt_str("system")?,
            temperature: attrs.opt_f64("temperature")?,
            max_tokens: attrs.opt_f64("max_tokens")?.map(|v| v as u32),
            tools: attrs.opt_refs("tools")?,
            block_id: attrs.require_str("agent", "id")?,
        }),
        "cond" => Op::Cond {
            from: attrs.require_refs("cond", "from")?,
            expr: attrs.require_str("cond", "expr")?,
            block_id: attrs.require_str("cond", "id")?,
        },
        "transform" => Op::Transform {
            from: attrs.require_refs("transform", "from")?,
            op: attrs.require_str("transform", "op")?,
            arg: attrs.opt_str("arg")?,
            block_id: attrs.require_str("transform", "id")?,
        },
        "interrupt" => Op::Interrupt {
            from: attrs.require_refs("interrupt", "from")?,
            reason: attrs
                .opt_str("reason")?
                .unwrap_or_else(|| "Awaiting external response".to_string()),
            block_id: attrs.require_str("interrupt", "id")?,
        },
        "output" => {
            let from = attrs.require_refs("output", "from")?;
            let tag = attrs.require_str("output", "format")?;
            let format = OutputFormat::parse(&tag).ok_or_else(|| ParseError::Syntax {
                line,
                message: format!("unknown output format '{tag}'"),
            })?;
            Op::Output {
                from,
                format,
                block_id: attrs.require_str("output", "id")?,
            }
        }
        other => {
            return Err(ParseError::Syntax {
                line,
                message: format!("unknown operation '{other}'"),
            });
        }
    };
    attrs.finish()?;

    Ok(StatementKind::Let {
        binding: binding.to_string(),
        op,
    })
}

/// Attribute values as they appear after `key=`.
#[derive(Debug, Clone)]
enum AttrValue {
    Str(String),
    Num(serde_json::Number),
    Bool(bool),
    Null,
    Ref(String),
    Refs(Vec<String>),
    Json(serde_json::Value),
}

struct Attrs {
    line: usize,
    entries: Vec<(String, AttrValue)>,
}

impl Attrs {
    fn take(&mut self, key: &str) -> Option<AttrValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    fn require_str(&mut self, op: &str, key: &str) -> Result<String, ParseError> {
        match self.take(key) {
            Some(AttrValue::Str(s)) => Ok(s),
            Some(_) => Err(self.type_error(key, "a string")),
            None => Err(ParseError::Syntax {
                line: self.line,
                message: format!("{op} needs a '{key}' attribute"),
            }),
        }
    }

    fn opt_str(&mut self, key: &str) -> Result<Option<String>, ParseError> {
        match self.take(key) {
            Some(AttrValue::Str(s)) => Ok(Some(s)),
            Some(_) => Err(self.type_error(key, "a string")),
            None => Ok(None),
        }
    }

    fn opt_f64(&mut self, key: &str) -> Result<Option<f64>, ParseError> {
        match self.take(key) {
            Some(AttrValue::Num(n)) => Ok(n.as_f64()),
            Some(_) => Err(self.type_error(key, "a number")),
            None => Ok(None),
        }
    }

    fn require_refs(&mut self, op: &str, key: &str) -> Result<Vec<String>, ParseError> {
        let refs = match self.take(key) {
            Some(value) => self.refs_from(key, value)?,
            None => {
                return Err(ParseError::Syntax {
                    line: self.line,
                    message: format!("{op} needs a '{key}' attribute"),
                });
            }
        };
        if refs.is_empty() {
            return Err(ParseError::Syntax {
                line: self.line,
                message: format!("{op} needs at least one binding in '{key}'"),
            });
        }
        Ok(refs)
    }

    fn opt_refs(&mut self, key: &str) -> Result<Vec<String>, ParseError> {
        match self.take(key) {
            Some(value) => self.refs_from(key, value),
            None => Ok(Vec::new()),
        }
    }

    fn refs_from(&self, key: &str, value: AttrValue) -> Result<Vec<String>, ParseError> {
        match value {
            AttrValue::Refs(refs) => Ok(refs),
            AttrValue::Ref(single) => Ok(vec![single]),
            // An empty bracket group parses as valid JSON first.
            AttrValue::Json(serde_json::Value::Array(items)) if items.is_empty() => Ok(Vec::new()),
            _ => Err(self.type_error(key, "a binding list")),
        }
    }

    fn opt_str_list(&mut self, key: &str) -> Result<Vec<String>, ParseError> {
        match self.take(key) {
            Some(AttrValue::Json(serde_json::Value::Array(items))) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Ok(s),
                    _ => Err(self.type_error(key, "a list of strings")),
                })
                .collect(),
            Some(AttrValue::Refs(refs)) => Ok(refs),
            Some(_) => Err(self.type_error(key, "a list of strings")),
            None => Ok(Vec::new()),
        }
    }

    fn require_value(&mut self, op: &str, key: &str) -> Result<serde_json::Value, ParseError> {
        match self.take(key) {
            Some(AttrValue::Str(s)) => Ok(serde_json::Value::String(s)),
            Some(AttrValue::Num(n)) => Ok(serde_json::Value::Number(n)),
            Some(AttrValue::Bool(b)) => Ok(serde_json::Value::Bool(b)),
            Some(AttrValue::Null) => Ok(serde_json::Value::Null),
            Some(AttrValue::Json(v)) => Ok(v),
            Some(AttrValue::Ref(_) | AttrValue::Refs(_)) => {
                Err(self.type_error(key, "a literal value"))
            }
            None => Err(ParseError::Syntax {
                line: self.line,
                message: format!("{op} needs a '{key}' attribute"),
            }),
        }
    }

    fn finish(self) -> Result<(), ParseError> {
        if let Some((key, _)) = self.entries.first() {
            return Err(ParseError::Syntax {
                line: self.line,
                message: format!("unexpected attribute '{key}'"),
            });
        }
        Ok(())
    }

    fn type_error(&self, key: &str, expected: &str) -> ParseError {
        ParseError::Syntax {
            line: self.line,
            message: format!("'{key}' must be {expected}"),
        }
    }
}

fn scan_attrs(input: &str, line: usize) -> Result<Attrs, ParseError> {
    let bytes = input.as_bytes();
    let mut entries = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let key_start = i;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
            i += 1;
        }
        if i == key_start {
            return Err(ParseError::Syntax {
                line,
                message: format!(
                    "unexpected character '{}'",
                    input[i..].chars().next().unwrap_or('?')
                ),
            });
        }
        let key = &input[key_start..i];
        if i >= bytes.len() || bytes[i] != b'=' {
            return Err(ParseError::Syntax {
                line,
                message: format!("expected '=' after '{key}'"),
            });
        }
        i += 1;
        if i >= bytes.len() {
            return Err(ParseError::Syntax {
                line,
                message: format!("missing value for '{key}'"),
            });
        }

        let value = match bytes[i] {
            b'"' => {
                let (s, next) = scan_string(input, i, line)?;
                i = next;
                AttrValue::Str(s)
            }
            b'[' | b'{' => {
                let opener = bytes[i];
                let (group, next) = scan_group(input, i, line)?;
                i = next;
                match serde_json::from_str::<serde_json::Value>(group) {
                    Ok(v) => AttrValue::Json(v),
                    Err(_) if opener == b'[' => AttrValue::Refs(parse_ref_list(group, line)?),
                    Err(e) => {
                        return Err(ParseError::Syntax {
                            line,
                            message: format!("invalid JSON group: {e}"),
                        });
                    }
                }
            }
            c if c == b'-' || c.is_ascii_digit() => {
                let num_start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_digit()
                        || matches!(bytes[i], b'.' | b'-' | b'+' | b'e' | b'E'))
                {
                    i += 1;
                }
                let text = &input[num_start..i];
                let number =
                    serde_json::from_str::<serde_json::Number>(text).map_err(|_| {
                        ParseError::Syntax {
                            line,
                            message: format!("invalid number '{text}'"),
                        }
                    })?;
                AttrValue::Num(number)
            }
            _ => {
                let ident_start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let ident = &input[ident_start..i];
                if ident.is_empty() {
                    return Err(ParseError::Syntax {
                        line,
                        message: format!(
                            "unexpected character '{}'",
                            input[i..].chars().next().unwrap_or('?')
                        ),
                    });
                }
                match ident {
                    "true" => AttrValue::Bool(true),
                    "false" => AttrValue::Bool(false),
                    "null" => AttrValue::Null,
                    _ => AttrValue::Ref(ident.to_string()),
                }
            }
        };
        entries.push((key.to_string(), value));
    }

    Ok(Attrs { line, entries })
}

/// Scan a JSON string literal starting at `start` (the opening quote).
/// Returns the decoded string and the index past the closing quote.
fn scan_string(input: &str, start: usize, line: usize) -> Result<(String, usize), ParseError> {
    let bytes = input.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => {
                let slice = &input[start..=i];
                let decoded =
                    serde_json::from_str::<String>(slice).map_err(|e| ParseError::Syntax {
                        line,
                        message: format!("invalid string literal: {e}"),
                    })?;
                return Ok((decoded, i + 1));
            }
            _ => i += 1,
        }
    }
    Err(ParseError::UnterminatedString { line })
}

/// Scan a `[...]` or `{...}` group starting at `start`, honoring nesting
/// and embedded strings. Returns the raw slice and the index past it.
fn scan_group(input: &str, start: usize, line: usize) -> Result<(&str, usize), ParseError> {
    let bytes = input.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut i = start;

    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            match c {
                b'\\' => {
                    i += 2;
                    continue;
                }
                b'"' => in_string = false,
                _ => {}
            }
        } else {
            match c {
                b'"' => in_string = true,
                b'[' | b'{' => depth += 1,
                b']' | b'}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Ok((&input[start..=i], i + 1));
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }

    Err(ParseError::Syntax {
        line,
        message: "unterminated bracket group".to_string(),
    })
}

fn parse_ref_list(group: &str, line: usize) -> Result<Vec<String>, ParseError> {
    let inner = group
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(group)
        .trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|item| {
            let item = item.trim();
            require_ident(item, line)?;
            Ok(item.to_string())
        })
        .collect()
}

/// Read a leading JSON string literal; returns the decoded string and the
/// remainder of the line.
fn read_string(input: &str, line: usize) -> Result<(String, &str), ParseError> {
    if !input.starts_with('"') {
        return Err(ParseError::Syntax {
            line,
            message: "expected a quoted string".to_string(),
        });
    }
    let (s, next) = scan_string(input, 0, line)?;
    Ok((s, &input[next..]))
}

fn split_ident(input: &str, line: usize) -> Result<(&str, &str), ParseError> {
    let end = input
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(input.len());
    let ident = &input[..end];
    require_ident(ident, line)?;
    Ok((ident, &input[end..]))
}

fn require_ident(s: &str, line: usize) -> Result<(), ParseError> {
    let valid = !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ParseError::Syntax {
            line,
            message: format!("invalid identifier '{s}'"),
        })
    }
}
