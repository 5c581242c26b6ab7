//! Reasoning engine trait and implementations
//!
//! The engine is the only nondeterministic collaborator. It may stream
//! internally, but `submit` returns exactly one complete structured
//! response per call; the loop never sees partial output.

use crate::models::{ContentBlock, ConversationState, TokenUsage, ToolRequest, ToolSpec};
use crate::Result;
use async_trait::async_trait;

pub mod http;
pub use http::HttpEngine;

/// One complete engine response: text/reasoning blocks plus zero or more
/// tool requests, and the token usage for the call.
#[derive(Debug, Clone, Default)]
pub struct EngineResponse {
    pub blocks: Vec<ContentBlock>,
    pub tool_requests: Vec<ToolRequest>,
    pub usage: TokenUsage,
}

impl EngineResponse {
    /// Concatenate all plain-text blocks, in order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

/// Trait for the reasoning engine (LLM controlled)
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Submit the conversation and receive one complete response.
    ///
    /// Errors: `EngineUnavailable` for transport faults, `ContextOverflow`
    /// when the input no longer fits the engine's window.
    async fn submit(
        &self,
        state: &ConversationState,
        system: &str,
        catalog: &[ToolSpec],
    ) -> Result<EngineResponse>;
}

/// Scripted engine for development & testing.
///
/// Plays back a fixed sequence of responses; calls past the end repeat the
/// last one. Keeps the pipeline functional without an LLM dependency.
pub struct ScriptedEngine {
    responses: std::sync::Mutex<Vec<EngineResponse>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(responses: Vec<EngineResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Single text-only response, terminating any loop in one iteration.
    pub fn single_text(text: impl Into<String>) -> Self {
        Self::new(vec![EngineResponse {
            blocks: vec![ContentBlock::Text { text: text.into() }],
            tool_requests: vec![],
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
        }])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn submit(
        &self,
        _state: &ConversationState,
        _system: &str,
        _catalog: &[ToolSpec],
    ) -> Result<EngineResponse> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let responses = self.responses.lock().expect("script lock poisoned");
        let index = call.min(responses.len().saturating_sub(1));
        responses
            .get(index)
            .cloned()
            .ok_or_else(|| crate::error::AnalysisError::EngineUnavailable(
                "Scripted engine has no responses".to_string(),
            ))
    }
}
