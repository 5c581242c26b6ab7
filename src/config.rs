//! Session configuration
//!
//! All knobs for one analysis run, with env-var overrides.
//! Constructed once per session and passed explicitly; nothing global.

use std::env;
use std::time::Duration;

/// Configuration for one analysis session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum reasoning-loop iterations per stage
    pub max_iterations: usize,
    /// Target size for engine output, in tokens
    pub max_output_tokens: u64,
    /// Estimated conversation size (tokens) that triggers a prune pass
    pub prune_threshold_tokens: u64,
    /// Number of trailing turns a prune pass must retain
    pub min_recent_turns: usize,
    /// Primary documents above this many characters use the condensed strategy
    pub condensed_threshold_chars: usize,
    /// Output budget the condensed strategy instructs the engine to hit
    pub condensed_target_tokens: u64,
    /// Per-tool-call timeout
    pub tool_timeout: Duration,
    /// Bound on tools executed in parallel within one engine turn
    pub tool_concurrency: usize,
    /// Relative divergence tolerated between a record field and its trusted value
    pub metric_tolerance: f64,
    /// Maximum read-only lookups the validator may issue for evidence gaps
    pub max_evidence_probes: usize,
    /// USD per million input tokens, for the cost estimate
    pub cost_per_mtok_input: f64,
    /// USD per million output tokens
    pub cost_per_mtok_output: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_output_tokens: 16_000,
            prune_threshold_tokens: 150_000,
            min_recent_turns: 6,
            condensed_threshold_chars: 400_000,
            condensed_target_tokens: 10_000,
            tool_timeout: Duration::from_secs(30),
            tool_concurrency: 4,
            metric_tolerance: 0.05,
            max_evidence_probes: 3,
            cost_per_mtok_input: 3.0,
            cost_per_mtok_output: 15.0,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl SessionConfig {
    /// Build a config from defaults, then env-var overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("AGENT_MAX_ITERATIONS") {
            config.max_iterations = v;
        }
        if let Some(v) = env_parse("AGENT_PRUNE_THRESHOLD_TOKENS") {
            config.prune_threshold_tokens = v;
        }
        if let Some(v) = env_parse("AGENT_CONDENSED_THRESHOLD_CHARS") {
            config.condensed_threshold_chars = v;
        }
        if let Some(v) = env_parse::<u64>("AGENT_TOOL_TIMEOUT_SECS") {
            config.tool_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse("AGENT_TOOL_CONCURRENCY") {
            config.tool_concurrency = v;
        }
        if let Some(v) = env_parse("AGENT_METRIC_TOLERANCE") {
            config.metric_tolerance = v;
        }

        config
    }

    /// Flat-rate cost estimate for a token count pair.
    pub fn estimate_cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.cost_per_mtok_input
            + (output_tokens as f64 / 1_000_000.0) * self.cost_per_mtok_output
    }
}
