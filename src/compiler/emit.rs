use ahash::{AHashMap, AHashSet};
use itertools::Itertools;

use crate::error::CompileError;
use crate::graph::{BlockInstance, BlockKind, FlowGraph, FlowVariable};
use crate::registry::{BlockRegistry, EmitContext, Fragment, UpstreamRef};
use crate::script::{quote, ImportRef};

use super::order::topo_order;
use super::prompts::{PromptLibrary, TemplateResolver};

/// One condition a block's execution depends on: the condition block's
/// binding and which branch reaches it.
type Guard = (String, bool);

pub(super) struct EmittedProgram {
    pub(super) code: String,
    pub(super) imports: Vec<String>,
    pub(super) dependencies: Vec<String>,
}

pub(super) struct Emitter<'a> {
    pub(super) graph: &'a FlowGraph,
    pub(super) registry: &'a BlockRegistry,
    pub(super) library: &'a PromptLibrary,
    /// Variable name to entry parameter name, in declaration order.
    pub(super) params: &'a [(String, String)],
    pub(super) variables: &'a [FlowVariable],
    pub(super) name: &'a str,
}

impl Emitter<'_> {
    /// Emit the whole program in topological order.
    pub(super) fn emit(&self) -> Result<EmittedProgram, CompileError> {
        let order = topo_order(self.graph)?;
        let input = self
            .graph
            .input_block()
            .ok_or(CompileError::EmptyProgram)?;

        // Tool blocks attach to agents instead of joining the chain.
        let mut attached: AHashMap<&str, Vec<&str>> = AHashMap::new();
        let mut tool_blocks: AHashSet<&str> = AHashSet::new();
        for edge in &self.graph.edges {
            let Some(source) = self.graph.block(&edge.source) else {
                continue;
            };
            if source.kind == BlockKind::Tool || edge.is_tool_attachment() {
                attached
                    .entry(edge.target.as_str())
                    .or_default()
                    .push(edge.source.as_str());
                tool_blocks.insert(edge.source.as_str());
            }
        }

        let chain_edges: Vec<_> = self
            .graph
            .edges
            .iter()
            .filter(|e| {
                !tool_blocks.contains(e.source.as_str())
                    && self.graph.block(&e.source).is_some()
                    && self.graph.block(&e.target).is_some()
            })
            .collect();

        let reachable = self.reach_from(&input.id, &chain_edges);
        if !self
            .graph
            .blocks_of_kind(BlockKind::Output)
            .any(|b| reachable.contains(b.id.as_str()))
        {
            return Err(CompileError::EmptyProgram);
        }

        // Tools are emitted only when a reachable agent uses them.
        let used_tools: AHashSet<&str> = reachable
            .iter()
            .filter_map(|id| attached.get(id))
            .flatten()
            .copied()
            .collect();

        let bindings = self.assign_bindings(&order, &reachable, &used_tools, &tool_blocks);

        let variables: AHashMap<String, String> = self
            .params
            .iter()
            .map(|(name, param)| (name.clone(), param.clone()))
            .collect();

        let guards = self.compute_guards(&order, &reachable, &chain_edges, &bindings);

        let mut bound_so_far: AHashMap<String, String> = AHashMap::new();
        let mut body: Vec<String> = Vec::new();
        let mut tool_lines: Vec<String> = Vec::new();
        let mut imports: Vec<String> = Vec::new();
        let mut dependencies: Vec<String> = Vec::new();
        let mut stack: Vec<Guard> = Vec::new();

        for &index in &order {
            let block = &self.graph.blocks[index];
            let id = block.id.as_str();

            if tool_blocks.contains(id) {
                if used_tools.contains(id) {
                    let fragment =
                        self.emit_block(block, &bindings, &bound_so_far, &variables, &[], &[])?;
                    tool_lines.extend(fragment.lines);
                    imports.extend(fragment.imports);
                    dependencies.extend(fragment.dependencies);
                }
                continue;
            }
            if !reachable.contains(id) {
                continue;
            }

            let target = guards.get(id).cloned().unwrap_or_default();
            adjust_guard_stack(&mut stack, &target, &mut body);

            let upstream = self.upstream_of(id, &chain_edges, &reachable, &bindings);
            let tools: Vec<String> = attached
                .get(id)
                .map(|sources| {
                    sources
                        .iter()
                        .filter_map(|t| bindings.get(*t).cloned())
                        .collect()
                })
                .unwrap_or_default();

            let fragment =
                self.emit_block(block, &bindings, &bound_so_far, &variables, &upstream, &tools)?;
            body.extend(fragment.lines);
            imports.extend(fragment.imports);
            dependencies.extend(fragment.dependencies);

            if let Some(binding) = bindings.get(id) {
                bound_so_far.insert(id.to_string(), binding.clone());
            }
        }

        while stack.pop().is_some() {
            body.push("}".to_string());
        }

        let code = self.assemble(&imports, &tool_lines, &body);
        let imports = imports.into_iter().unique().collect();
        let dependencies = dependencies.into_iter().unique().collect();

        Ok(EmittedProgram {
            code,
            imports,
            dependencies,
        })
    }

    fn emit_block(
        &self,
        block: &BlockInstance,
        bindings: &AHashMap<String, String>,
        bound_so_far: &AHashMap<String, String>,
        variables: &AHashMap<String, String>,
        upstream: &[UpstreamRef],
        tools: &[String],
    ) -> Result<Fragment, CompileError> {
        let spec = self.registry.get(block.kind).map_err(|_| {
            CompileError::UnknownBlockKind {
                block_id: block.id.clone(),
                kind: block.kind.to_string(),
            }
        })?;

        let resolver = TemplateResolver::new(bound_so_far, variables);
        let mut config = resolver.resolve_config(block, self.library, upstream)?;

        // The emitted `param name=` must match the sanitized entry
        // parameter, not the raw variable name.
        if block.kind == BlockKind::Input && block.config_str("mode") != Some("static") {
            let name = block
                .config_str("variable_name")
                .or_else(|| block.config_str("name"))
                .unwrap_or("input");
            if let Some((_, param)) = self.params.iter().find(|(n, _)| n == name) {
                config.insert(
                    "variable_name".to_string(),
                    serde_json::Value::String(param.clone()),
                );
            }
        }

        let binding = bindings
            .get(block.id.as_str())
            .cloned()
            .unwrap_or_else(|| format!("b_{}", sanitize(&block.id)));

        let ctx = EmitContext {
            block,
            config: &config,
            binding: &binding,
            upstream,
            tools,
            variables: self.variables,
        };
        spec.emit(&ctx)
    }

    /// Blocks reachable from the input over chain edges.
    fn reach_from<'g>(
        &'g self,
        start: &'g str,
        chain_edges: &[&'g crate::graph::Edge],
    ) -> AHashSet<&'g str> {
        let mut reachable: AHashSet<&str> = AHashSet::new();
        let mut queue = vec![start];
        while let Some(id) = queue.pop() {
            if !reachable.insert(id) {
                continue;
            }
            for edge in chain_edges {
                if edge.source == id {
                    queue.push(edge.target.as_str());
                }
            }
        }
        reachable
    }

    /// Stable binding per emitted block: `b_` for values, `t_` for tools,
    /// derived from the block id with a numeric suffix on collision.
    fn assign_bindings(
        &self,
        order: &[usize],
        reachable: &AHashSet<&str>,
        used_tools: &AHashSet<&str>,
        tool_blocks: &AHashSet<&str>,
    ) -> AHashMap<String, String> {
        let mut bindings = AHashMap::new();
        let mut taken: AHashSet<String> = AHashSet::new();

        for &index in order {
            let block = &self.graph.blocks[index];
            let id = block.id.as_str();
            let prefix = if tool_blocks.contains(id) {
                if !used_tools.contains(id) {
                    continue;
                }
                "t_"
            } else {
                if !reachable.contains(id) {
                    continue;
                }
                "b_"
            };

            let base = format!("{prefix}{}", sanitize(id));
            let mut candidate = base.clone();
            let mut suffix = 2;
            while !taken.insert(candidate.clone()) {
                candidate = format!("{base}_{suffix}");
                suffix += 1;
            }
            bindings.insert(id.to_string(), candidate);
        }
        bindings
    }

    /// For each reachable block, the set of branch conditions every path
    /// from the input agrees on. A block fed by both branches of a
    /// condition (or by an unguarded path) runs unguarded.
    fn compute_guards(
        &self,
        order: &[usize],
        reachable: &AHashSet<&str>,
        chain_edges: &[&crate::graph::Edge],
        bindings: &AHashMap<String, String>,
    ) -> AHashMap<String, Vec<Guard>> {
        // Guard sets keep the topological order of their conditions. An
        // `if` line opened ahead of its condition's definition would read
        // a binding that an untaken branch never produced.
        let rank: AHashMap<&str, usize> = order
            .iter()
            .enumerate()
            .filter_map(|(position, &index)| {
                let id = self.graph.blocks[index].id.as_str();
                bindings.get(id).map(|binding| (binding.as_str(), position))
            })
            .collect();

        let mut guards: AHashMap<String, Vec<Guard>> = AHashMap::new();

        for &index in order {
            let block = &self.graph.blocks[index];
            let id = block.id.as_str();
            if !reachable.contains(id) {
                continue;
            }

            let mut merged: Option<Vec<Guard>> = None;
            for edge in chain_edges {
                if edge.target != id || !reachable.contains(edge.source.as_str()) {
                    continue;
                }
                let source = match self.graph.block(&edge.source) {
                    Some(b) => b,
                    None => continue,
                };
                let mut contribution = guards.get(edge.source.as_str()).cloned().unwrap_or_default();
                if source.kind == BlockKind::Condition {
                    if let Some(binding) = bindings.get(edge.source.as_str()) {
                        let branch = edge.source_handle.as_deref() != Some("false");
                        let guard = (binding.clone(), branch);
                        if !contribution.contains(&guard) {
                            contribution.push(guard);
                        }
                    }
                }
                merged = Some(match merged {
                    None => contribution,
                    Some(mut acc) => {
                        acc.retain(|g| contribution.contains(g));
                        acc
                    }
                });
            }

            let mut set = merged.unwrap_or_default();
            set.sort_by_key(|(binding, _)| {
                rank.get(binding.as_str()).copied().unwrap_or(usize::MAX)
            });
            guards.insert(id.to_string(), set);
        }

        guards
    }

    fn upstream_of(
        &self,
        id: &str,
        chain_edges: &[&crate::graph::Edge],
        reachable: &AHashSet<&str>,
        bindings: &AHashMap<String, String>,
    ) -> Vec<UpstreamRef> {
        chain_edges
            .iter()
            .filter(|e| e.target == id && reachable.contains(e.source.as_str()))
            .filter_map(|e| {
                bindings.get(e.source.as_str()).map(|binding| UpstreamRef {
                    block_id: e.source.clone(),
                    binding: binding.clone(),
                })
            })
            .collect()
    }

    fn assemble(&self, imports: &[String], tool_lines: &[String], body: &[String]) -> String {
        let mut lines: Vec<String> = Vec::new();
        lines.push("# generated by the graph compiler".to_string());
        lines.push(format!("program {} format 1", quote(self.name)));

        for path in imports.iter().unique() {
            if let Some(import) = ImportRef::from_path(path) {
                lines.push(import.render());
            }
        }

        if !tool_lines.is_empty() {
            lines.push(String::new());
            lines.extend(tool_lines.iter().cloned());
        }

        lines.push(String::new());
        let params = self.params.iter().map(|(_, p)| p.as_str()).join(", ");
        lines.push(format!("entry run({params})"));
        lines.push(String::new());
        lines.extend(body.iter().cloned());

        let mut code = lines.join("\n");
        code.push('\n');
        code
    }
}

/// Open and close `if` lines so the emitted nesting matches `target`.
fn adjust_guard_stack(stack: &mut Vec<Guard>, target: &[Guard], lines: &mut Vec<String>) {
    while !stack.iter().all(|g| target.contains(g)) {
        stack.pop();
        lines.push("}".to_string());
    }
    for guard in target {
        if !stack.contains(guard) {
            let line = if guard.1 {
                format!("if {} {{", guard.0)
            } else {
                format!("if not {} {{", guard.0)
            };
            lines.push(line);
            stack.push(guard.clone());
        }
    }
}

/// Reduce a block id to the identifier-safe part of a binding name.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_punctuation() {
        assert_eq!(sanitize("agent-1"), "agent_1");
        assert_eq!(sanitize("a.b c"), "a_b_c");
    }

    #[test]
    fn guard_stack_closes_before_switching_branches() {
        let mut stack = Vec::new();
        let mut lines = Vec::new();
        adjust_guard_stack(
            &mut stack,
            &[("b_check".to_string(), true)],
            &mut lines,
        );
        adjust_guard_stack(
            &mut stack,
            &[("b_check".to_string(), false)],
            &mut lines,
        );
        adjust_guard_stack(&mut stack, &[], &mut lines);
        assert_eq!(
            lines,
            vec!["if b_check {", "}", "if not b_check {", "}"]
        );
        assert!(stack.is_empty());
    }
}
