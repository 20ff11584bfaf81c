//! Common test utilities for building flow graphs and fake providers.
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use nagare::error::ExecutionError;
use nagare::prelude::*;
use nagare::providers::{ModelReply, ModelRequest};
use serde_json::json;

/// Builds a block from a JSON object literal config.
#[allow(dead_code)]
pub fn block(id: &str, kind: BlockKind, config: serde_json::Value) -> BlockInstance {
    let serde_json::Value::Object(config) = config else {
        panic!("block config must be a JSON object");
    };
    BlockInstance::new(id, kind).with_config(config)
}

#[allow(dead_code)]
pub fn edge(source: &str, target: &str) -> Edge {
    Edge::new(source, target)
}

/// A simple valid flow: `input -> agent -> output`.
///
/// The input runs in variable mode (one entry parameter, `ticket`) and
/// the agent targets the `mock` provider so tests never leave the process.
#[allow(dead_code)]
pub fn create_linear_flow() -> FlowGraph {
    FlowGraph::new(
        vec![
            block(
                "in-1",
                BlockKind::Input,
                json!({"mode": "variable", "variable_name": "ticket"}),
            ),
            block(
                "agent-1",
                BlockKind::Agent,
                json!({
                    "provider": "mock",
                    "model": "mock-1",
                    "prompt": "Summarize this ticket: {{input}}",
                }),
            ),
            block("out-1", BlockKind::Output, json!({"format": "text"})),
        ],
        vec![edge("in-1", "agent-1"), edge("agent-1", "out-1")],
    )
}

/// A branching flow: a condition routes to one of two agents, both of
/// which reconverge on a single output.
///
/// Logic: `classify` answers something; if it contains "urgent" the
/// `urgent` agent runs, otherwise `normal` does.
#[allow(dead_code)]
pub fn create_branching_flow() -> FlowGraph {
    FlowGraph::new(
        vec![
            block(
                "in-1",
                BlockKind::Input,
                json!({"mode": "variable", "variable_name": "ticket"}),
            ),
            block(
                "classify",
                BlockKind::Agent,
                json!({
                    "provider": "mock",
                    "model": "mock-1",
                    "prompt": "Classify: {{input}}",
                }),
            ),
            block(
                "cond-1",
                BlockKind::Condition,
                json!({"condition": "value contains \"urgent\""}),
            ),
            block(
                "urgent",
                BlockKind::Agent,
                json!({
                    "provider": "mock",
                    "model": "mock-1",
                    "prompt": "Escalate: {{classify}}",
                }),
            ),
            block(
                "normal",
                BlockKind::Agent,
                json!({
                    "provider": "mock",
                    "model": "mock-1",
                    "prompt": "Reply politely: {{classify}}",
                }),
            ),
            block("out-1", BlockKind::Output, json!({"format": "text"})),
        ],
        vec![
            edge("in-1", "classify"),
            edge("classify", "cond-1"),
            edge("cond-1", "urgent").with_source_handle("true"),
            edge("cond-1", "normal").with_source_handle("false"),
            edge("urgent", "out-1"),
            edge("normal", "out-1"),
        ],
    )
}

/// A provider client that never leaves the process.
///
/// Replies with a fixed string and records the last request so tests can
/// assert on the rendered prompt the interpreter produced.
pub struct EchoClient {
    provider: String,
    reply: String,
    #[allow(dead_code)]
    pub last_request: Mutex<Option<ModelRequest>>,
}

impl EchoClient {
    pub fn new(provider: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            provider: provider.to_string(),
            reply: reply.to_string(),
            last_request: Mutex::new(None),
        })
    }
}

impl ModelClient for EchoClient {
    fn name(&self) -> &str {
        &self.provider
    }

    fn needs_api_key(&self) -> bool {
        false
    }

    // Spelled out because the prelude glob shadows `Result` with its
    // one-parameter alias.
    fn generate(
        &self,
        request: ModelRequest,
    ) -> BoxFuture<'_, std::result::Result<ModelReply, ExecutionError>> {
        *self.last_request.lock().unwrap() = Some(request);
        let text = self.reply.clone();
        Box::pin(async move { Ok(ModelReply { text }) })
    }
}

/// A provider client whose every call fails, for error-path tests.
#[allow(dead_code)]
pub struct FailingClient {
    provider: String,
}

#[allow(dead_code)]
impl FailingClient {
    pub fn new(provider: &str) -> Arc<Self> {
        Arc::new(Self {
            provider: provider.to_string(),
        })
    }
}

impl ModelClient for FailingClient {
    fn name(&self) -> &str {
        &self.provider
    }

    fn needs_api_key(&self) -> bool {
        false
    }

    fn generate(
        &self,
        _request: ModelRequest,
    ) -> BoxFuture<'_, std::result::Result<ModelReply, ExecutionError>> {
        let provider = self.provider.clone();
        Box::pin(async move {
            Err(ExecutionError::Provider {
                provider,
                message: "simulated outage".to_string(),
            })
        })
    }
}

/// A registry holding only the `mock` provider with the given canned reply.
#[allow(dead_code)]
pub fn mock_registry(reply: &str) -> (ProviderRegistry, Arc<EchoClient>) {
    let client = EchoClient::new("mock", reply);
    let mut registry = ProviderRegistry::new();
    registry.register(client.clone());
    (registry, client)
}
