//! Context budgeting
//!
//! Estimates conversation size and prunes old turns when the estimate
//! crosses the configured threshold. The estimate is a chars/4 heuristic:
//! within roughly ±25% of a real tokenizer on English prose, worse on dense
//! numeric tables, which is acceptable because it only gates pruning.
//!
//! Pruning is a safety valve, not a bound. The reasoning loop's aggressive
//! fallback handles the case where one pass is not enough.

use crate::models::{ConversationState, Turn};
use tracing::debug;

/// Estimated tokens per character of block text.
const CHARS_PER_TOKEN: u64 = 4;

/// Fixed per-turn overhead (role markers, block framing) in tokens.
const TURN_OVERHEAD_TOKENS: u64 = 8;

/// Estimate the token footprint of a conversation.
pub fn estimate_tokens(state: &ConversationState) -> u64 {
    state
        .turns()
        .iter()
        .map(|turn| {
            let chars: u64 = turn.blocks.iter().map(|b| b.text_len() as u64).sum();
            chars / CHARS_PER_TOKEN + TURN_OVERHEAD_TOKENS
        })
        .sum()
}

/// Estimate for a single piece of text, used for stage output budgets.
pub fn estimate_text_tokens(text: &str) -> u64 {
    text.len() as u64 / CHARS_PER_TOKEN
}

/// Drop turns older than the retained trailing window.
///
/// Always keeps the first turn (the task statement). When the window
/// boundary lands on a turn carrying tool results, it widens backward to
/// the assistant turn holding the paired requests, so a surviving result
/// can never reference a request that was pruned away and the trailing
/// window never shrinks below its minimum.
pub fn prune(state: &ConversationState, min_recent: usize) -> ConversationState {
    let turns = state.turns();
    if turns.len() <= min_recent + 1 {
        return state.clone();
    }

    let mut start = turns.len() - min_recent;
    while start > 1 && turns[start].carries_tool_results() {
        start -= 1;
    }

    rebuild(turns, start)
}

/// Last-resort prune: first turn plus the final two turns. If the window
/// would open on a tool-result turn, it widens by one to keep the pair.
pub fn prune_aggressive(state: &ConversationState) -> ConversationState {
    let turns = state.turns();
    if turns.len() <= 3 {
        return state.clone();
    }

    let mut start = turns.len() - 2;
    if turns[start].carries_tool_results() && start > 1 {
        start -= 1;
    }

    rebuild(turns, start)
}

fn rebuild(turns: &[Turn], start: usize) -> ConversationState {
    if start <= 1 {
        return ConversationState::from_turns(turns.to_vec());
    }

    let mut kept: Vec<Turn> = Vec::with_capacity(1 + turns.len() - start);
    kept.push(turns[0].clone());
    kept.extend_from_slice(&turns[start..]);

    debug!(
        dropped = start - 1,
        kept = kept.len(),
        "Pruned conversation window"
    );

    ConversationState::from_turns(kept)
}
