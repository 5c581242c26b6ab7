//! Equity Research Agent
//!
//! An agent-orchestration core for multi-period equity analysis:
//! - Drives a bounded, multi-turn loop between a reasoning engine and tools
//! - Memoizes tool results per session with provenance tags
//! - Prunes conversation history under a finite context budget
//! - Decomposes analysis into ordered stages with per-stage strategy
//! - Cross-checks the final record against trusted sources and
//!   auto-corrects only from them
//!
//! PIPELINE:
//! PRIMARY_ANALYSIS → HISTORICAL_ANALYSIS(0..n) → SYNTHESIS → VALIDATE → CORRECT

pub mod agent;
pub mod cache;
pub mod config;
pub mod context;
pub mod correction;
pub mod engine;
pub mod error;
pub mod extract;
pub mod models;
pub mod reasoning;
pub mod tools;
pub mod validation;

pub use error::Result;

// Re-export common types
pub use config::SessionConfig;
pub use models::*;
