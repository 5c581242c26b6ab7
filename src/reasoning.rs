//! Bounded reasoning loop
//!
//! Alternates between the reasoning engine and the tool executor until the
//! engine answers with text only, or the iteration budget runs out.
//!
//! Failure policy: transport faults propagate un-retried; a capacity fault
//! gets exactly one aggressive prune and one retry; an exhausted iteration
//! budget returns `success=false` with the partial transcript rather than
//! an error.

use crate::config::SessionConfig;
use crate::context;
use crate::engine::ReasoningEngine;
use crate::error::AnalysisError;
use crate::models::{ConversationState, ToolSpec, Turn, UsageTotals};
use crate::tools::ToolExecutor;
use crate::Result;
use tracing::{debug, info, warn};

/// Outcome of one reasoning-loop invocation.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub success: bool,
    pub final_text: String,
    pub transcript: ConversationState,
    pub iterations: usize,
    pub usage: UsageTotals,
}

/// One bounded engine↔tools driver. Owns its conversation for the duration
/// of a single stage; holds no state across invocations.
pub struct ReasoningLoop<'a> {
    engine: &'a dyn ReasoningEngine,
    executor: &'a ToolExecutor,
    config: &'a SessionConfig,
}

impl<'a> ReasoningLoop<'a> {
    pub fn new(
        engine: &'a dyn ReasoningEngine,
        executor: &'a ToolExecutor,
        config: &'a SessionConfig,
    ) -> Self {
        Self {
            engine,
            executor,
            config,
        }
    }

    pub async fn run(
        &self,
        system: &str,
        task: &str,
        catalog: &[ToolSpec],
    ) -> Result<LoopOutcome> {
        let mut state = ConversationState::new();
        state.push(Turn::user_text(task));

        let mut usage = UsageTotals::default();
        let mut capacity_retry_spent = false;
        let mut last_text = String::new();

        let mut iteration = 0;
        while iteration < self.config.max_iterations {
            // Size is checked before every submit so the conversation never
            // crosses the threshold unpruned.
            let estimate = context::estimate_tokens(&state);
            if estimate > self.config.prune_threshold_tokens {
                debug!(estimate, "Conversation over budget, pruning");
                state = context::prune(&state, self.config.min_recent_turns);
            }

            let response = match self.engine.submit(&state, system, catalog).await {
                Ok(response) => response,
                Err(AnalysisError::ContextOverflow(detail)) if !capacity_retry_spent => {
                    warn!("Capacity fault, aggressive prune and retry: {}", detail);
                    capacity_retry_spent = true;
                    state = context::prune_aggressive(&state);
                    continue;
                }
                Err(e) => return Err(e),
            };

            iteration += 1;
            usage.absorb(response.usage);

            let text = response.text();
            if !text.is_empty() {
                last_text = text;
            }
            let tool_requests = response.tool_requests.clone();
            state.push(Turn::assistant(response.blocks));

            if tool_requests.is_empty() {
                usage.estimated_cost_usd = self
                    .config
                    .estimate_cost_usd(usage.input_tokens, usage.output_tokens);
                info!(iterations = iteration, "Reasoning loop complete");
                return Ok(LoopOutcome {
                    success: true,
                    final_text: last_text,
                    transcript: state,
                    iterations: iteration,
                    usage,
                });
            }

            debug!(count = tool_requests.len(), "Executing tool requests");
            let results = self.executor.execute_batch(&tool_requests).await;
            usage.tool_calls += results.len() as u64;

            for result in results {
                state.push(Turn::tool_results(vec![result]));
            }
        }

        // Budget exhausted: a partial result, not an error.
        warn!(
            max_iterations = self.config.max_iterations,
            "Iteration budget exhausted"
        );
        usage.estimated_cost_usd = self
            .config
            .estimate_cost_usd(usage.input_tokens, usage.output_tokens);
        Ok(LoopOutcome {
            success: false,
            final_text: last_text,
            transcript: state,
            iterations: self.config.max_iterations,
            usage,
        })
    }
}
