use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::providers::{ModelClient, ModelReply, ModelRequest, ToolDescriptor};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default token cap when a program does not set one; the messages API
/// requires the field.
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

fn convert_tools(tools: &[ToolDescriptor]) -> Vec<ApiTool> {
    tools
        .iter()
        .map(|t| ApiTool {
            name: t.name.clone(),
            description: t.description.clone().unwrap_or_default(),
            input_schema: t.input_schema(),
        })
        .collect()
}

impl ModelClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn generate(
        &self,
        request: ModelRequest,
    ) -> BoxFuture<'_, Result<ModelReply, ExecutionError>> {
        Box::pin(async move {
            let provider_err = |message: String| ExecutionError::Provider {
                provider: "anthropic".to_string(),
                message,
            };

            let body = MessagesRequest {
                model: request.model.clone(),
                max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                messages: vec![ApiMessage {
                    role: "user",
                    content: request.prompt.clone(),
                }],
                system: request.system.clone(),
                temperature: request.temperature,
                tools: convert_tools(&request.tools),
            };

            let mut http_request = self
                .http
                .post(ANTHROPIC_API_URL)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body);
            if let Some(api_key) = &request.api_key {
                http_request = http_request.header("x-api-key", api_key);
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

            let parsed: MessagesResponse = response
                .json()
                .await
                .map_err(|e| provider_err(format!("invalid response: {e}")))?;

            let text = parsed
                .content
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text),
                    ContentBlock::Other => None,
                })
                .collect::<Vec<_>>()
                .join("");

            Ok(ModelReply { text })
        })
    }
}
