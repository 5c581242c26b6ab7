//! HTTP-backed reasoning engine client
//!
//! Talks to a messages-style chat API with tool-use content blocks.
//! Uses a long-lived reqwest::Client for connection pooling. Retry and
//! backoff are deliberately absent: transport faults surface to the caller.

use crate::config::SessionConfig;
use crate::error::AnalysisError;
use crate::models::{
    ContentBlock, ConversationState, Role, TokenUsage, ToolRequest, ToolSpec, Turn,
};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{error, info};

use super::{EngineResponse, ReasoningEngine};

/// Reusable engine client (connection-pooled)
pub struct HttpEngine {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_output_tokens: u64,
}

impl HttpEngine {
    pub fn new(api_key: String, base_url: String, model: String, max_output_tokens: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| AnalysisError::ConfigError(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_output_tokens,
        })
    }

    /// Build a client from `ENGINE_API_KEY` / `ENGINE_BASE_URL` /
    /// `ENGINE_MODEL`, taking the output budget from the session config.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let api_key = env::var("ENGINE_API_KEY")
            .map_err(|_| AnalysisError::ConfigError("ENGINE_API_KEY is not set".to_string()))?;
        let base_url = env::var("ENGINE_BASE_URL")
            .map_err(|_| AnalysisError::ConfigError("ENGINE_BASE_URL is not set".to_string()))?;
        let model = env::var("ENGINE_MODEL")
            .map_err(|_| AnalysisError::ConfigError("ENGINE_MODEL is not set".to_string()))?;

        Self::new(api_key, base_url, model, config.max_output_tokens)
    }
}

#[async_trait]
impl ReasoningEngine for HttpEngine {
    async fn submit(
        &self,
        state: &ConversationState,
        system: &str,
        catalog: &[ToolSpec],
    ) -> Result<EngineResponse> {
        if self.api_key.is_empty() {
            return Err(AnalysisError::ConfigError(
                "ENGINE_API_KEY is not configured".to_string(),
            ));
        }

        let request = WireRequest {
            model: self.model.clone(),
            max_tokens: self.max_output_tokens,
            system: system.to_string(),
            messages: state.turns().iter().map(wire_message).collect(),
            tools: catalog.iter().map(wire_tool).collect(),
        };

        let url = format!("{}/v1/messages", self.base_url);
        info!(model = %self.model, turns = state.len(), "Calling reasoning engine");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Engine request failed: {}", e);
                AnalysisError::EngineUnavailable(format!("engine transport: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_overflow(status, &body) {
                return Err(AnalysisError::ContextOverflow(format!(
                    "engine rejected input: {}",
                    body
                )));
            }
            error!(status = %status, "Engine error response");
            return Err(AnalysisError::EngineUnavailable(format!(
                "engine returned {}: {}",
                status, body
            )));
        }

        let wire: WireResponse = response.json().await.map_err(|e| {
            AnalysisError::MalformedResponse(format!("engine response parse: {}", e))
        })?;

        Ok(reassemble(wire))
    }
}

/// An oversized prompt comes back as 413 or as a 400 naming the context
/// window; everything else is a transport-class failure.
fn is_overflow(status: reqwest::StatusCode, body: &str) -> bool {
    if status == reqwest::StatusCode::PAYLOAD_TOO_LARGE {
        return true;
    }
    let lower = body.to_lowercase();
    status == reqwest::StatusCode::BAD_REQUEST
        && (lower.contains("too long") || lower.contains("too large") || lower.contains("context"))
}

/// Rebuild one complete structured response from the wire content blocks.
fn reassemble(wire: WireResponse) -> EngineResponse {
    let mut blocks = Vec::with_capacity(wire.content.len());
    let mut tool_requests = Vec::new();

    for block in wire.content {
        match block {
            WireBlock::Text { text } => blocks.push(ContentBlock::Text { text }),
            WireBlock::Thinking { thinking } => {
                blocks.push(ContentBlock::Reasoning { text: thinking })
            }
            WireBlock::ToolUse { id, name, input } => {
                let request = ToolRequest {
                    request_id: id,
                    tool_name: name,
                    arguments: input,
                };
                blocks.push(ContentBlock::ToolRequest(request.clone()));
                tool_requests.push(request);
            }
            WireBlock::ToolResult { .. } => {
                // The engine never emits results; ignore rather than fail.
            }
        }
    }

    EngineResponse {
        blocks,
        tool_requests,
        usage: TokenUsage {
            input_tokens: wire.usage.input_tokens,
            output_tokens: wire.usage.output_tokens,
        },
    }
}

fn wire_message(turn: &Turn) -> WireMessage {
    WireMessage {
        role: match turn.role {
            Role::User => "user".to_string(),
            Role::Assistant => "assistant".to_string(),
        },
        content: turn.blocks.iter().map(wire_block).collect(),
    }
}

fn wire_block(block: &ContentBlock) -> WireBlock {
    match block {
        ContentBlock::Text { text } => WireBlock::Text { text: text.clone() },
        ContentBlock::Reasoning { text } => WireBlock::Thinking {
            thinking: text.clone(),
        },
        ContentBlock::ToolRequest(req) => WireBlock::ToolUse {
            id: req.request_id.clone(),
            name: req.tool_name.clone(),
            input: req.arguments.clone(),
        },
        ContentBlock::ToolResult(res) => WireBlock::ToolResult {
            tool_use_id: res.request_id.clone(),
            content: if res.success {
                res.payload.to_string()
            } else {
                format!("Error: {}", res.error.as_deref().unwrap_or("tool failed"))
            },
            is_error: !res.success,
        },
    }
}

fn wire_tool(spec: &ToolSpec) -> WireTool {
    WireTool {
        name: spec.name.clone(),
        description: spec.description.clone(),
        input_schema: spec.input_schema.clone(),
    }
}

//
// ================= Wire format =================
//

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    max_tokens: u64,
    system: String,
    messages: Vec<WireMessage>,
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Vec<WireBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    content: Vec<WireBlock>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reassemble_splits_tool_requests() {
        let wire = WireResponse {
            content: vec![
                WireBlock::Thinking {
                    thinking: "looking at margins".to_string(),
                },
                WireBlock::Text {
                    text: "Fetching the filing.".to_string(),
                },
                WireBlock::ToolUse {
                    id: "req_1".to_string(),
                    name: "filing_section".to_string(),
                    input: json!({"section": "mda"}),
                },
            ],
            usage: WireUsage {
                input_tokens: 12,
                output_tokens: 34,
            },
        };

        let response = reassemble(wire);
        assert_eq!(response.blocks.len(), 3);
        assert_eq!(response.tool_requests.len(), 1);
        assert_eq!(response.tool_requests[0].tool_name, "filing_section");
        assert_eq!(response.usage.output_tokens, 34);
    }

    #[test]
    fn test_from_config_takes_output_budget_from_session() {
        // Single test for both paths so the env mutations never interleave.
        env::remove_var("ENGINE_API_KEY");
        env::remove_var("ENGINE_BASE_URL");
        env::remove_var("ENGINE_MODEL");

        let config = SessionConfig {
            max_output_tokens: 4_096,
            ..SessionConfig::default()
        };
        assert!(matches!(
            HttpEngine::from_config(&config),
            Err(AnalysisError::ConfigError(_))
        ));

        env::set_var("ENGINE_API_KEY", "test-key");
        env::set_var("ENGINE_BASE_URL", "https://engine.test/");
        env::set_var("ENGINE_MODEL", "analyst-large");

        let engine = HttpEngine::from_config(&config).unwrap();
        assert_eq!(engine.max_output_tokens, config.max_output_tokens);
        assert_eq!(engine.base_url, "https://engine.test");

        env::remove_var("ENGINE_API_KEY");
        env::remove_var("ENGINE_BASE_URL");
        env::remove_var("ENGINE_MODEL");
    }

    #[test]
    fn test_overflow_detection() {
        assert!(is_overflow(
            reqwest::StatusCode::BAD_REQUEST,
            "prompt is too long: 210000 tokens"
        ));
        assert!(is_overflow(reqwest::StatusCode::PAYLOAD_TOO_LARGE, ""));
        assert!(!is_overflow(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "context lost"
        ));
        assert!(!is_overflow(reqwest::StatusCode::BAD_REQUEST, "bad field"));
    }

    #[test]
    fn test_tool_result_serialized_as_error_when_failed() {
        let block = ContentBlock::ToolResult(crate::models::ToolResult::failed(
            "req_9",
            "document not found",
        ));
        match wire_block(&block) {
            WireBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "req_9");
                assert!(is_error);
                assert!(content.contains("document not found"));
            }
            _ => panic!("expected tool_result block"),
        }
    }
}
