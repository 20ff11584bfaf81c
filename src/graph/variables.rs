use serde::{Deserialize, Serialize};

use crate::graph::{BlockKind, FlowGraph};

/// Where a flow variable came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSource {
    Input,
    Manual,
    Runtime,
    Auto,
}

/// A named value the flow exposes to prompt templates and to the compiled
/// entry function's parameter list.
///
/// Variables are derived from the graph on every compile, never stored
/// alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowVariable {
    pub name: String,
    pub source: VariableSource,
    #[serde(default = "default_var_type")]
    pub var_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_var_type() -> String {
    "string".to_string()
}

impl FlowVariable {
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: VariableSource::Input,
            var_type: default_var_type(),
            description: None,
        }
    }
}

/// Derive the flow's variables from its input blocks.
///
/// Each input block in `variable` mode contributes one variable named by
/// its `variable_name` config (falling back to `name`). Static-mode inputs
/// embed their literal value at compile time and contribute nothing.
/// Duplicate names keep the first declaration.
pub fn resolve_variables(graph: &FlowGraph) -> Vec<FlowVariable> {
    let mut seen = ahash::AHashSet::new();
    let mut variables = Vec::new();

    for block in graph.blocks_of_kind(BlockKind::Input) {
        let mode = block.config_str("mode").unwrap_or("variable");
        if mode != "variable" {
            continue;
        }
        let name = block
            .config_str("variable_name")
            .or_else(|| block.config_str("name"))
            .unwrap_or("input");
        if !seen.insert(name.to_string()) {
            continue;
        }
        let mut var = FlowVariable::input(name);
        if let Some(ty) = block.config_str("variable_type") {
            var.var_type = ty.to_string();
        }
        if let Some(desc) = block.config_str("description") {
            var.description = Some(desc.to_string());
        }
        variables.push(var);
    }

    variables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::BlockInstance;
    use serde_json::json;

    fn input_block(id: &str, config: serde_json::Value) -> BlockInstance {
        let map = match config {
            serde_json::Value::Object(m) => m,
            _ => panic!("config must be an object"),
        };
        BlockInstance::new(id, BlockKind::Input).with_config(map)
    }

    #[test]
    fn variable_mode_inputs_become_variables() {
        let graph = FlowGraph::new(
            vec![
                input_block("a", json!({"mode": "variable", "variable_name": "topic"})),
                input_block("b", json!({"mode": "static", "value": "fixed"})),
            ],
            vec![],
        );
        let vars = resolve_variables(&graph);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "topic");
        assert_eq!(vars[0].source, VariableSource::Input);
        assert_eq!(vars[0].var_type, "string");
    }

    #[test]
    fn duplicate_names_keep_first() {
        let graph = FlowGraph::new(
            vec![
                input_block(
                    "a",
                    json!({"mode": "variable", "variable_name": "x", "variable_type": "number"}),
                ),
                input_block("b", json!({"mode": "variable", "variable_name": "x"})),
            ],
            vec![],
        );
        let vars = resolve_variables(&graph);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].var_type, "number");
    }

    #[test]
    fn missing_mode_defaults_to_variable() {
        let graph = FlowGraph::new(
            vec![input_block("a", json!({"variable_name": "q"}))],
            vec![],
        );
        let vars = resolve_variables(&graph);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "q");
    }
}
