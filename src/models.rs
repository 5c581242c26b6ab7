//! Core data models for the research agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Where a cached value came from. `Trusted` means an independent data
/// provider; `Derived` means the reasoning engine's own output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Trusted,
    Derived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// A numeric field diverges from its trusted source. Correctable.
    MetricMismatch,
    /// A field fails a deterministic range or cross-field rule.
    SanityViolation,
    /// A claim has no supporting evidence in the cache.
    EvidenceGap,
    /// The final record itself could not be parsed.
    MalformedRecord,
}

/// Prompting strategy chosen for a stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyTag {
    Standard,
    Condensed,
}

//
// ================= Conversation =================
//

/// One content block inside a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Reasoning { text: String },
    Text { text: String },
    ToolRequest(ToolRequest),
    ToolResult(ToolResult),
}

impl ContentBlock {
    /// Textual payload used for size estimation.
    pub fn text_len(&self) -> usize {
        match self {
            ContentBlock::Reasoning { text } | ContentBlock::Text { text } => text.len(),
            ContentBlock::ToolRequest(req) => {
                req.tool_name.len() + req.arguments.to_string().len()
            }
            ContentBlock::ToolResult(res) => {
                res.payload.to_string().len()
                    + res.error.as_deref().map(str::len).unwrap_or(0)
            }
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
}

impl Turn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            blocks,
        }
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            blocks: results.into_iter().map(ContentBlock::ToolResult).collect(),
        }
    }

    /// True if any block in this turn is a tool result.
    pub fn carries_tool_results(&self) -> bool {
        self.blocks.iter().any(ContentBlock::is_tool_result)
    }
}

/// Ordered conversation owned by one reasoning-loop invocation.
/// Mutated only by appending; discarded when the stage ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Rebuild the conversation from a retained subset of turns.
    /// Only the budgeter uses this; everything else appends.
    pub(crate) fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

//
// ================= Tool I/O =================
//

/// A tool invocation requested by the reasoning engine. Consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub request_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Outcome of one tool invocation, fresh or from cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub request_id: String,
    pub success: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failed(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            payload: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Definition advertised to the reasoning engine for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

//
// ================= Usage =================
//

/// Token counts reported by the engine for a single call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Cumulative usage across one loop or one whole run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub engine_calls: u64,
    pub tool_calls: u64,
    pub estimated_cost_usd: f64,
}

impl UsageTotals {
    pub fn absorb(&mut self, usage: TokenUsage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.engine_calls += 1;
    }

    pub fn merge(&mut self, other: &UsageTotals) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.engine_calls += other.engine_calls;
        self.tool_calls += other.tool_calls;
        self.estimated_cost_usd += other.estimated_cost_usd;
    }
}

//
// ================= Stages =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "stage", content = "period")]
pub enum StageId {
    Primary,
    Historical(String),
    Synthesis,
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageId::Primary => write!(f, "primary"),
            StageId::Historical(period) => write!(f, "historical:{}", period),
            StageId::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// Output of one completed stage. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: StageId,
    pub primary_text: String,
    pub summary: String,
    pub metrics: serde_json::Value,
    pub token_estimate: u64,
    pub strategy: StrategyTag,
    pub usage: UsageTotals,
}

//
// ================= Final record =================
//

/// The structured record synthesized at the end of a run. Schema validation
/// beyond serde is an external collaborator's concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricRecord {
    pub ticker: String,
    pub recommendation: String,
    pub confidence: f64,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub thesis: String,
}

//
// ================= Validation & correction =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: IssueCategory,
    pub field: Option<String>,
    pub description: String,
    pub suggested_fix: Option<String>,
}

/// One entry in the append-only correction ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub field: String,
    pub old_value: f64,
    pub new_value: f64,
    pub source: Provenance,
    pub cache_key: String,
    pub corrected_at: DateTime<Utc>,
}

//
// ================= Request / report =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub request_id: Uuid,
    pub ticker: String,
    pub company: String,
    /// Fiscal period of the primary filing, e.g. "FY2023".
    pub primary_period: String,
    /// Prior fiscal periods to analyze, most recent first.
    pub historical_periods: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRequest {
    pub fn new(
        ticker: impl Into<String>,
        company: impl Into<String>,
        primary_period: impl Into<String>,
        historical_periods: Vec<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            ticker: ticker.into(),
            company: company.into(),
            primary_period: primary_period.into(),
            historical_periods,
            created_at: Utc::now(),
        }
    }
}

/// Snapshot of cache effectiveness for one session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

/// Everything the caller gets back from one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub request_id: Uuid,
    pub record: MetricRecord,
    pub correction_ledger: Vec<CorrectionRecord>,
    pub validation_issues: Vec<ValidationIssue>,
    pub quality_score: f64,
    pub usage: UsageTotals,
    pub cache_stats: CacheStats,
    pub skipped_periods: Vec<String>,
    pub stage_summaries: Vec<StageResult>,
    pub trace: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyTag::Standard => "standard",
            StrategyTag::Condensed => "condensed",
        };
        write!(f, "{}", s)
    }
}
