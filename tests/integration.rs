//! Integration tests for Nagare
//!
//! End-to-end tests that walk the whole pipeline: editor JSON in, compiled
//! flow-script through the daemon, executed result out.
mod common;
use common::*;

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use nagare::daemon::routes::{self, ExecuteRequest};
use nagare::daemon::{AppState, DaemonConfig};
use nagare::prelude::*;
use nagare::trace::ExecutionStatus;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const EDITOR_FLOW_JSON: &str = r#"{
    "nodes": [
        {
            "id": "in-1",
            "data": {"blockType": "input", "config": {"mode": "variable", "variable_name": "question"}},
            "position": {"x": 0.0, "y": 0.0}
        },
        {
            "id": "agent-1",
            "data": {"blockType": "agent", "config": {
                "provider": "mock",
                "model": "mock-1",
                "prompt": "Answer briefly: {{input}}",
                "temperature": 0.2
            }}
        },
        {
            "id": "upper-1",
            "data": {"blockType": "transform", "config": {"operation": "uppercase"}}
        },
        {
            "id": "out-1",
            "data": {"blockType": "output", "config": {"format": "text"}}
        }
    ],
    "edges": [
        {"source": "in-1", "target": "agent-1"},
        {"source": "agent-1", "target": "upper-1"},
        {"source": "upper-1", "target": "out-1"}
    ]
}"#;

fn daemon_state(scratch: &std::path::Path, providers: ProviderRegistry) -> Arc<AppState> {
    Arc::new(AppState {
        config: DaemonConfig {
            bind: "127.0.0.1:0".to_string(),
            scratch_dir: scratch.to_path_buf(),
            executor_id: "executor-test".to_string(),
        },
        providers,
        started: Instant::now(),
        shutdown: CancellationToken::new(),
    })
}

#[tokio::test]
async fn test_editor_flow_compiles_and_executes() {
    let graph = graph_from_editor_json(EDITOR_FLOW_JSON).expect("editor JSON conversion");

    let compiler = Compiler::builder(graph).with_name("qa").build();
    let report = compiler.validate();
    assert!(report.is_valid, "errors: {:?}", report.errors);

    let output = compiler.compile();
    assert!(output.is_valid, "errors: {:?}", output.errors);
    assert_eq!(output.dependencies, vec!["mock"]);

    let dir = tempfile::tempdir().expect("tempdir");
    let (registry, client) = mock_registry("forty-two");
    let state = daemon_state(dir.path(), registry);

    let request = ExecuteRequest {
        code: output.code.clone(),
        input: json!({"question": "what is the answer?"}),
        config: serde_json::Map::new(),
        flow_id: Some("flow-qa".to_string()),
        execution_id: None,
    };
    let (_, Json(response)) = routes::execute(State(state), Json(request)).await;

    assert!(response.success, "error: {:?}", response.error);
    assert_eq!(response.result, Some(json!("FORTY-TWO")));

    let trace = response.trace.expect("trace missing");
    assert_eq!(trace.status, ExecutionStatus::Completed);
    assert_eq!(trace.program, "qa");
    assert_eq!(trace.blocks.len(), 4);

    // The agent saw the rendered prompt and its configured sampling knobs.
    let seen = client
        .last_request
        .lock()
        .unwrap()
        .clone()
        .expect("agent never called");
    assert_eq!(seen.prompt, "Answer briefly: what is the answer?");
    assert_eq!(seen.temperature, Some(0.2));

    let leftovers = std::fs::read_dir(dir.path()).expect("read_dir").count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_interrupted_flow_round_trips_through_the_daemon() {
    let graph = FlowGraph::new(
        vec![
            block(
                "in-1",
                BlockKind::Input,
                json!({"mode": "variable", "variable_name": "claim"}),
            ),
            block(
                "gate-1",
                BlockKind::Interrupt,
                json!({"reason": "Needs a human reviewer"}),
            ),
            block("out-1", BlockKind::Output, json!({"format": "json"})),
        ],
        vec![edge("in-1", "gate-1"), edge("gate-1", "out-1")],
    );
    let output = Compiler::builder(graph).with_name("review").build().compile();
    assert!(output.is_valid, "errors: {:?}", output.errors);

    let dir = tempfile::tempdir().expect("tempdir");
    let (registry, _) = mock_registry("unused");
    let state = daemon_state(dir.path(), registry);

    let request = ExecuteRequest {
        code: output.code,
        input: json!({"claim": "refund #42"}),
        config: serde_json::Map::new(),
        flow_id: None,
        execution_id: None,
    };
    let (_, Json(response)) = routes::execute(State(state), Json(request)).await;

    assert!(response.success, "error: {:?}", response.error);
    let marker = response.result.expect("marker missing");
    assert_eq!(marker["type"], "interrupt");
    assert_eq!(marker["status"], "awaiting_external_response");
    assert_eq!(marker["block"], "gate-1");
    assert_eq!(marker["reason"], "Needs a human reviewer");
    assert_eq!(marker["payload"], json!("refund #42"));

    let trace = response.trace.expect("trace missing");
    assert_eq!(trace.status, ExecutionStatus::Interrupted);
}

#[tokio::test]
async fn test_variable_input_round_trips_unchanged() {
    // input -> output with nothing in between returns the value as-is.
    let graph = FlowGraph::new(
        vec![
            block(
                "in-1",
                BlockKind::Input,
                json!({"mode": "variable", "variable_name": "x"}),
            ),
            block("out-1", BlockKind::Output, json!({"format": "text"})),
        ],
        vec![edge("in-1", "out-1")],
    );
    let output = Compiler::builder(graph).with_name("echo").build().compile();
    assert!(output.is_valid, "errors: {:?}", output.errors);

    let providers = ProviderRegistry::new();
    let linked = link(parse(&output.code).expect("parse"), &providers).expect("link");
    let credentials = CredentialStore::new();
    let mut recorder = TraceRecorder::new();
    let result = Interpreter::new(&providers, &credentials)
        .run(&linked, &json!({"x": "hello"}), &mut recorder)
        .await
        .expect("run");
    assert_eq!(result.into_value(), json!("hello"));
}

#[tokio::test]
async fn test_artifact_survives_transport() {
    let output = Compiler::builder(create_linear_flow())
        .with_name("support-triage")
        .build()
        .compile();
    let program = CompiledProgram::from_output("support-triage", &output)
        .expect("artifact")
        .with_flow_id("flow-7");

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("flow.nprog");
    program.save(path.to_str().expect("utf-8 path")).expect("save");

    // Decode from raw bytes, the way a daemon receiving the artifact would.
    let bytes = std::fs::read(&path).expect("read");
    let decoded = CompiledProgram::from_bytes(&bytes).expect("decode");
    assert_eq!(decoded.flow_id.as_deref(), Some("flow-7"));
    assert_eq!(decoded.code, output.code);

    let (registry, _) = mock_registry("all sorted");
    let linked = link(parse(&decoded.code).expect("parse"), &registry).expect("link");
    let credentials = CredentialStore::new();
    let interpreter = Interpreter::new(&registry, &credentials);
    let mut recorder = TraceRecorder::new();
    let result = interpreter
        .run(&linked, &json!({"ticket": "hello"}), &mut recorder)
        .await
        .expect("run");
    assert_eq!(result.into_value(), json!("all sorted"));
}
