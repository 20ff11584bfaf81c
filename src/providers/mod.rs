//! Model-provider clients and the credential store.
//!
//! Providers are the one part of the runtime that leaves the process.
//! Each client implements [`ModelClient`]; the registry maps the provider
//! names generated programs import (`provider:openai`) to a client.

use std::sync::Arc;

use ahash::AHashMap;
use futures::future::BoxFuture;

use crate::error::ExecutionError;

mod anthropic;
mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiCompatClient;

/// A tool descriptor forwarded to the model call.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub operations: Vec<String>,
}

impl ToolDescriptor {
    /// A JSON schema describing how the model may invoke this tool.
    pub fn input_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        if !self.operations.is_empty() {
            properties.insert(
                "operation".to_string(),
                serde_json::json!({"type": "string", "enum": self.operations}),
            );
        }
        properties.insert(
            "arguments".to_string(),
            serde_json::json!({"type": "object"}),
        );
        serde_json::json!({"type": "object", "properties": properties})
    }
}

/// One generation request, fully self-contained.
///
/// Credentials travel inside the request rather than through process
/// environment, so concurrent executions with different keys cannot race.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDescriptor>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelReply {
    pub text: String,
}

/// A model-provider client.
pub trait ModelClient: Send + Sync + 'static {
    /// The provider name programs import (`provider:<name>`).
    fn name(&self) -> &str;

    /// Whether calls without an API key should be refused up front.
    fn needs_api_key(&self) -> bool {
        true
    }

    /// Run one generation to completion.
    fn generate(&self, request: ModelRequest)
    -> BoxFuture<'_, Result<ModelReply, ExecutionError>>;
}

/// The providers installed on this executor, keyed by name.
pub struct ProviderRegistry {
    clients: AHashMap<String, Arc<dyn ModelClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            clients: AHashMap::new(),
        }
    }

    /// The default install: OpenAI, Anthropic, plus the OpenAI-compatible
    /// Groq and Ollama endpoints.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiCompatClient::openai()));
        registry.register(Arc::new(AnthropicClient::new()));
        registry.register(Arc::new(OpenAiCompatClient::groq()));
        registry.register(Arc::new(OpenAiCompatClient::ollama()));
        registry
    }

    pub fn register(&mut self, client: Arc<dyn ModelClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelClient>> {
        self.clients.get(name).cloned()
    }

    /// Installed provider names, sorted for stable display.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Per-execution credentials, resolved from the request config with an
/// environment fallback.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    keys: AHashMap<String, String>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect credentials from an execution request's `config` object.
    ///
    /// Two spellings are accepted: a nested `credentials` map keyed by
    /// provider name, and top-level `<PROVIDER>_API_KEY` entries.
    pub fn from_config(config: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut store = Self::new();

        if let Some(serde_json::Value::Object(credentials)) = config.get("credentials") {
            for (key, value) in credentials {
                if let Some(secret) = value.as_str() {
                    store.insert(normalize_provider(key), secret);
                }
            }
        }

        for (key, value) in config {
            if let Some(provider) = key.strip_suffix("_API_KEY") {
                if let Some(secret) = value.as_str() {
                    store.insert(provider.to_ascii_lowercase(), secret);
                }
            }
        }

        store
    }

    pub fn insert(&mut self, provider: impl Into<String>, key: impl Into<String>) {
        self.keys.insert(provider.into(), key.into());
    }

    /// Look up a provider's key, falling back to `<PROVIDER>_API_KEY` in
    /// the process environment.
    pub fn get(&self, provider: &str) -> Option<String> {
        if let Some(key) = self.keys.get(provider) {
            return Some(key.clone());
        }
        std::env::var(format!("{}_API_KEY", provider.to_ascii_uppercase())).ok()
    }

    pub fn require(&self, provider: &str) -> Result<String, ExecutionError> {
        self.get(provider)
            .ok_or_else(|| ExecutionError::MissingCredential {
                provider: provider.to_string(),
            })
    }
}

fn normalize_provider(key: &str) -> String {
    key.strip_suffix("_API_KEY")
        .unwrap_or(key)
        .to_ascii_lowercase()
}
