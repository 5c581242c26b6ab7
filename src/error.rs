//! Error types for the research agent
//!
//! Only `EngineUnavailable` aborts a whole run. Tool failures and an
//! exhausted iteration budget are modeled as data, not errors, so the
//! pipeline can degrade gracefully and keep them in result metadata.

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {

    // =============================
    // Core Pipeline Errors
    // =============================

    /// The reasoning engine or the network under it is unavailable.
    /// Never retried internally.
    #[error("Reasoning engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The conversation no longer fits the engine's input window.
    /// The reasoning loop gets exactly one aggressive-prune retry.
    #[error("Context overflow: {0}")]
    ContextOverflow(String),

    #[error("Engine response malformed: {0}")]
    MalformedResponse(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
