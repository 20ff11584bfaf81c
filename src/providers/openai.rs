use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::providers::{ModelClient, ModelReply, ModelRequest, ToolDescriptor};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const OLLAMA_API_URL: &str = "http://localhost:11434/v1/chat/completions";

/// Chat-completions client. Works with OpenAI and any compatible endpoint
/// (Groq, Ollama, vLLM, OpenRouter, ...).
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    needs_api_key: bool,
    http: Client,
}

impl OpenAiCompatClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        needs_api_key: bool,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            needs_api_key,
            http: Client::new(),
        }
    }

    pub fn openai() -> Self {
        Self::new("openai", OPENAI_API_URL, true)
    }

    pub fn groq() -> Self {
        Self::new("groq", GROQ_API_URL, true)
    }

    pub fn ollama() -> Self {
        Self::new("ollama", OLLAMA_API_URL, false)
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OaiTool {
    r#type: &'static str,
    function: OaiFunctionDef,
}

#[derive(Serialize)]
struct OaiFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn convert_tools(tools: &[ToolDescriptor]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function",
            function: OaiFunctionDef {
                name: t.name.clone(),
                description: t.description.clone().unwrap_or_default(),
                parameters: t.input_schema(),
            },
        })
        .collect()
}

impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn needs_api_key(&self) -> bool {
        self.needs_api_key
    }

    fn generate(
        &self,
        request: ModelRequest,
    ) -> BoxFuture<'_, Result<ModelReply, ExecutionError>> {
        Box::pin(async move {
            let provider_err = |message: String| ExecutionError::Provider {
                provider: self.name.clone(),
                message,
            };

            let mut messages = Vec::new();
            if let Some(system) = &request.system {
                messages.push(ChatMessage {
                    role: "system",
                    content: system.clone(),
                });
            }
            messages.push(ChatMessage {
                role: "user",
                content: request.prompt.clone(),
            });

            let body = ChatRequest {
                model: request.model.clone(),
                messages,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
                tools: convert_tools(&request.tools),
            };

            let mut http_request = self.http.post(&self.base_url).json(&body);
            if let Some(api_key) = &request.api_key {
                http_request =
                    http_request.header("Authorization", format!("Bearer {api_key}"));
            }

            let response = http_request
                .send()
                .await
                .map_err(|e| provider_err(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(provider_err(format!("HTTP {status}: {body}")));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| provider_err(format!("invalid response: {e}")))?;

            let text = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();

            Ok(ModelReply { text })
        })
    }
}
