//! Resolution of a parsed [`Program`] against an executor's runtime:
//! provider imports, binding references, and `if`/`}` pairing.
//!
//! Linking catches what later stages would otherwise hit mid-flight, so a
//! broken program fails before its first statement runs.

use ahash::{AHashMap, AHashSet};

use crate::error::LinkError;
use crate::providers::ProviderRegistry;
use crate::script::ast::{ImportRef, Op, Program, Statement, StatementKind, ToolDecl};

/// A program ready to run: every reference resolved, every guard paired.
#[derive(Debug, Clone)]
pub struct LinkedProgram {
    pub name: String,
    pub params: Vec<String>,
    /// Tool declarations keyed by binding name.
    pub tools: AHashMap<String, ToolDecl>,
    pub body: Vec<Statement>,
    /// For each `if` statement index, the body index execution resumes at
    /// when the guard skips (one past the matching `}`).
    pub skip_targets: AHashMap<usize, usize>,
}

/// Link a program, checking it against the installed providers.
pub fn link(program: Program, providers: &ProviderRegistry) -> Result<LinkedProgram, LinkError> {
    for import in &program.imports {
        if let ImportRef::Provider(name) = import {
            if !providers.contains(name) {
                return Err(LinkError::UnresolvedProvider(name.clone()));
            }
        }
    }

    let mut tools: AHashMap<String, ToolDecl> = AHashMap::new();
    for tool in &program.tools {
        tools.insert(tool.binding.clone(), tool.clone());
    }

    let mut defined: AHashSet<&str> = tools.keys().map(String::as_str).collect();
    let params: AHashSet<&str> = program.params.iter().map(String::as_str).collect();
    let mut open_ifs: Vec<(usize, usize)> = Vec::new();
    let mut skip_targets = AHashMap::new();
    let mut has_return = false;

    for (idx, statement) in program.body.iter().enumerate() {
        let line = statement.line;
        match &statement.kind {
            StatementKind::Let { binding, op } => {
                for reference in op.from_list() {
                    require_defined(&defined, reference, line)?;
                }
                if let Op::Agent(agent) = op {
                    if !providers.contains(&agent.provider) {
                        return Err(LinkError::UnresolvedProvider(agent.provider.clone()));
                    }
                    for tool_binding in &agent.tools {
                        if !tools.contains_key(tool_binding) {
                            return Err(LinkError::UndefinedBinding {
                                line,
                                binding: tool_binding.clone(),
                            });
                        }
                    }
                    check_template_refs(&agent.prompt, &defined, &params, line)?;
                    if let Some(system) = &agent.system {
                        check_template_refs(system, &defined, &params, line)?;
                    }
                }
                if let Op::Transform { arg: Some(arg), .. } = op {
                    check_template_refs(arg, &defined, &params, line)?;
                }
                defined.insert(binding);
            }
            StatementKind::If { binding, .. } => {
                require_defined(&defined, binding, line)?;
                open_ifs.push((idx, line));
            }
            StatementKind::End => {
                let (open_idx, _) = open_ifs.pop().ok_or(LinkError::UnexpectedEnd(line))?;
                skip_targets.insert(open_idx, idx + 1);
            }
            StatementKind::Return { binding } => {
                require_defined(&defined, binding, line)?;
                has_return = true;
            }
        }
    }

    if let Some((_, line)) = open_ifs.pop() {
        return Err(LinkError::UnbalancedIf(line));
    }
    if !has_return {
        return Err(LinkError::MissingReturn);
    }

    Ok(LinkedProgram {
        name: program.name,
        params: program.params,
        tools,
        body: program.body,
        skip_targets,
    })
}

fn require_defined(defined: &AHashSet<&str>, binding: &str, line: usize) -> Result<(), LinkError> {
    if defined.contains(binding) {
        Ok(())
    } else {
        Err(LinkError::UndefinedBinding {
            line,
            binding: binding.to_string(),
        })
    }
}

/// Statically check `{{ref}}` placeholders in a template.
///
/// A placeholder must name a binding defined so far or an entry
/// parameter. Bindings produced on a branch this statement may not share
/// still pass here; the runtime resolves those.
fn check_template_refs(
    template: &str,
    defined: &AHashSet<&str>,
    params: &AHashSet<&str>,
    line: usize,
) -> Result<(), LinkError> {
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start + 2..].find("}}") else {
            break;
        };
        let name = rest[start + 2..start + 2 + end].trim();
        let is_ident = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if is_ident && !defined.contains(name) && !params.contains(name) {
            return Err(LinkError::UndefinedBinding {
                line,
                binding: name.to_string(),
            });
        }
        rest = &rest[start + 2 + end + 2..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse;

    fn linked(source: &str) -> Result<LinkedProgram, LinkError> {
        let program = parse(source).unwrap();
        link(program, &ProviderRegistry::with_builtins())
    }

    const CHAIN: &str = concat!(
        "program \"t\" format 1\n",
        "import provider \"openai\"\n",
        "entry run(x)\n",
        "let b_in = param name=\"x\" id=\"in-1\"\n",
        "let b_c = cond from=[b_in] expr=\"true\" id=\"c-1\"\n",
        "if b_c {\n",
        "let b_out = output from=[b_in] format=\"text\" id=\"o-1\"\n",
        "return b_out\n",
        "}\n",
        "let b_alt = output from=[b_in] format=\"text\" id=\"o-2\"\n",
        "return b_alt\n",
    );

    #[test]
    fn links_and_records_skip_targets() {
        let program = linked(CHAIN).unwrap();
        // The `if` at body index 2 skips to index 6 (past the `}` at 5).
        assert_eq!(program.skip_targets.get(&2), Some(&6));
    }

    #[test]
    fn unknown_provider_import_fails() {
        let source = concat!(
            "program \"t\" format 1\n",
            "import provider \"galaxybrain\"\n",
            "entry run()\n",
            "let b_v = value data=1 id=\"v-1\"\n",
            "let b_out = output from=[b_v] format=\"text\" id=\"o-1\"\n",
            "return b_out\n",
        );
        let err = linked(source).unwrap_err();
        assert!(matches!(err, LinkError::UnresolvedProvider(name) if name == "galaxybrain"));
    }

    #[test]
    fn forward_reference_fails() {
        let source = concat!(
            "program \"t\" format 1\n",
            "entry run()\n",
            "let b_out = output from=[b_later] format=\"text\" id=\"o-1\"\n",
            "let b_later = value data=1 id=\"v-1\"\n",
            "return b_out\n",
        );
        let err = linked(source).unwrap_err();
        assert!(matches!(err, LinkError::UndefinedBinding { binding, .. } if binding == "b_later"));
    }

    #[test]
    fn unbalanced_if_fails() {
        let source = concat!(
            "program \"t\" format 1\n",
            "entry run()\n",
            "let b_v = value data=true id=\"v-1\"\n",
            "if b_v {\n",
            "return b_v\n",
        );
        let err = linked(source).unwrap_err();
        assert!(matches!(err, LinkError::UnbalancedIf(4)));
    }

    #[test]
    fn missing_return_fails() {
        let source = concat!(
            "program \"t\" format 1\n",
            "entry run()\n",
            "let b_v = value data=1 id=\"v-1\"\n",
        );
        let err = linked(source).unwrap_err();
        assert!(matches!(err, LinkError::MissingReturn));
    }

    #[test]
    fn template_reference_to_unknown_binding_fails() {
        let source = concat!(
            "program \"t\" format 1\n",
            "import provider \"openai\"\n",
            "entry run(x)\n",
            "let b_a = agent provider=\"openai\" model=\"gpt-4o-mini\" prompt=\"{{b_ghost}}\" id=\"a-1\"\n",
            "let b_out = output from=[b_a] format=\"text\" id=\"o-1\"\n",
            "return b_out\n",
        );
        let err = linked(source).unwrap_err();
        assert!(matches!(err, LinkError::UndefinedBinding { binding, .. } if binding == "b_ghost"));
    }
}
