//! Tests for graph validation, code emission, and the compiled artifact.
mod common;
use common::*;
use nagare::graph::VariableSource;
use nagare::prelude::*;
use serde_json::json;

#[test]
fn test_linear_flow_compiles_to_script() {
    let compiler = Compiler::builder(create_linear_flow())
        .with_name("support-triage")
        .build();
    let output = compiler.compile();

    assert!(output.is_valid, "errors: {:?}", output.errors);
    assert!(output.code.contains("program \"support-triage\" format 1"));
    assert!(output.code.contains("import provider \"mock\""));
    assert!(output.code.contains("entry run(ticket)"));
    assert!(
        output
            .code
            .contains("let b_in_1 = param name=\"ticket\" id=\"in-1\"")
    );
    assert!(output.code.contains(
        "let b_agent_1 = agent provider=\"mock\" model=\"mock-1\" \
         prompt=\"Summarize this ticket: {{b_in_1}}\" id=\"agent-1\""
    ));
    assert!(
        output
            .code
            .contains("let b_out_1 = output from=[b_agent_1] format=\"text\" id=\"out-1\"")
    );
    assert!(output.code.contains("return b_out_1"));

    assert_eq!(output.imports, vec!["provider:mock"]);
    assert_eq!(output.dependencies, vec!["mock"]);
}

#[test]
fn test_branching_flow_guards_both_arms() {
    let compiler = Compiler::builder(create_branching_flow()).build();
    let output = compiler.compile();

    assert!(output.is_valid, "errors: {:?}", output.errors);
    assert!(output.code.contains("if b_cond_1 {"));
    assert!(output.code.contains("if not b_cond_1 {"));
    // The reconvergent output runs on both arms, so it sits outside the
    // guards, right after the second one closes.
    assert!(output.code.contains("}\nlet b_out_1 = output"));
    assert_eq!(output.code.lines().filter(|l| l.starts_with("if ")).count(), 2);
    assert_eq!(output.code.lines().filter(|l| *l == "}").count(), 2);
}

#[test]
fn test_validation_gates_compilation() {
    let graph = FlowGraph::new(
        vec![block("out-1", BlockKind::Output, json!({"format": "text"}))],
        vec![],
    );
    let output = Compiler::builder(graph).build().compile();

    assert!(!output.is_valid);
    assert!(output.code.is_empty());
    assert!(
        output
            .errors
            .iter()
            .any(|d| d.message.contains("exactly one input block"))
    );
}

#[test]
fn test_duplicate_block_ids_are_reported() {
    let graph = FlowGraph::new(
        vec![
            block("dup", BlockKind::Input, json!({"mode": "variable"})),
            block("dup", BlockKind::Output, json!({"format": "text"})),
        ],
        vec![edge("dup", "dup")],
    );
    let report = Compiler::builder(graph).build().validate();

    assert!(!report.is_valid);
    assert!(
        report
            .errors
            .iter()
            .any(|d| d.message.contains("Duplicate block id"))
    );
}

#[test]
fn test_cycle_is_reported_with_a_path() {
    let graph = FlowGraph::new(
        vec![
            block("in-1", BlockKind::Input, json!({"mode": "variable"})),
            block("a", BlockKind::Transform, json!({"operation": "trim"})),
            block("b", BlockKind::Transform, json!({"operation": "trim"})),
            block("out-1", BlockKind::Output, json!({"format": "text"})),
        ],
        vec![
            edge("in-1", "a"),
            edge("a", "b"),
            edge("b", "a"),
            edge("b", "out-1"),
        ],
    );
    let output = Compiler::builder(graph).build().compile();

    assert!(!output.is_valid);
    let cycle = output
        .errors
        .iter()
        .find(|d| d.message.contains("Cycle detected among blocks"))
        .expect("cycle diagnostic missing");
    assert!(cycle.message.contains("a"));
    assert!(cycle.message.contains("b"));
}

#[test]
fn test_unreachable_output_is_an_empty_program() {
    let graph = FlowGraph::new(
        vec![
            block("in-1", BlockKind::Input, json!({"mode": "variable"})),
            block("agent-1", BlockKind::Agent, json!({
                "provider": "mock", "model": "mock-1", "prompt": "hi",
            })),
            block("out-1", BlockKind::Output, json!({"format": "text"})),
        ],
        // The output block exists but nothing flows into it.
        vec![edge("in-1", "agent-1")],
    );
    let output = Compiler::builder(graph).build().compile();

    assert!(!output.is_valid);
    assert!(
        output
            .errors
            .iter()
            .any(|d| d.message.contains("no output block reachable")),
        "errors: {:?}",
        output.errors
    );
}

#[test]
fn test_disconnected_block_warns_and_is_never_emitted() {
    let graph = FlowGraph::new(
        vec![
            block("in-1", BlockKind::Input, json!({"mode": "variable", "variable_name": "x"})),
            block("out-1", BlockKind::Output, json!({"format": "text"})),
            block("stray", BlockKind::Transform, json!({"operation": "trim"})),
        ],
        vec![edge("in-1", "out-1")],
    );
    let output = Compiler::builder(graph).build().compile();

    assert!(output.is_valid, "errors: {:?}", output.errors);
    assert!(
        output
            .warnings
            .iter()
            .any(|d| d.message.contains("not connected")),
        "warnings: {:?}",
        output.warnings
    );
    // The stray block compiles to nothing.
    assert!(!output.code.contains("stray"));
}

#[test]
fn test_manual_variables_join_the_entry_signature() {
    let compiler = Compiler::builder(create_linear_flow())
        .with_variable(FlowVariable {
            name: "locale".to_string(),
            source: VariableSource::Manual,
            var_type: "string".to_string(),
            description: None,
        })
        .build();

    let variables = compiler.variables();
    let names: Vec<&str> = variables.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["ticket", "locale"]);

    let output = compiler.compile();
    assert!(output.is_valid);
    assert!(output.code.contains("entry run(ticket, locale)"));
}

#[test]
fn test_compiled_code_round_trips_through_parser_and_linker() {
    let output = Compiler::builder(create_branching_flow()).build().compile();
    assert!(output.is_valid, "errors: {:?}", output.errors);

    let program = parse(&output.code).expect("generated code failed to parse");
    assert_eq!(program.params, vec!["ticket"]);

    let (registry, _) = mock_registry("ok");
    let linked = link(program, &registry).expect("generated code failed to link");
    assert!(!linked.skip_targets.is_empty());
}

#[test]
fn test_artifact_round_trip() {
    let output = Compiler::builder(create_linear_flow()).build().compile();
    let program = CompiledProgram::from_output("support-triage", &output)
        .expect("valid output should produce an artifact");

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("flow.nprog");
    let path = path.to_str().expect("utf-8 path");

    program.save(path).expect("save failed");
    let loaded = CompiledProgram::from_file(path).expect("load failed");

    assert_eq!(loaded.name, "support-triage");
    assert_eq!(loaded.code, output.code);
    assert_eq!(loaded.imports, output.imports);
}

#[test]
fn test_tool_attachment_stays_out_of_the_chain() {
    let graph = FlowGraph::new(
        vec![
            block("in-1", BlockKind::Input, json!({"mode": "variable", "variable_name": "q"})),
            block("search", BlockKind::Tool, json!({
                "name": "web_search",
                "description": "Search the web",
            })),
            block("agent-1", BlockKind::Agent, json!({
                "provider": "mock", "model": "mock-1", "prompt": "Answer: {{input}}",
            })),
            block("out-1", BlockKind::Output, json!({"format": "text"})),
        ],
        vec![
            edge("in-1", "agent-1"),
            edge("search", "agent-1").with_target_handle("tools"),
            edge("agent-1", "out-1"),
        ],
    );
    let output = Compiler::builder(graph).build().compile();

    assert!(output.is_valid, "errors: {:?}", output.errors);
    assert!(output.code.contains("tool t_search name=\"web_search\""));
    assert!(output.code.contains("tools=[t_search]"));
    assert!(output.code.contains("import tool \"web_search\""));
    // The tool never appears as a chain step.
    assert!(!output.code.contains("let t_search"));
}
