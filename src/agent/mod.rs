//! Main orchestrator - runs the staged analysis pipeline
//!
//! PRIMARY_ANALYSIS → HISTORICAL_ANALYSIS(0..n) → SYNTHESIS → DONE
//!
//! Stage transitions are unconditional: every run covers every stage, so
//! multi-period coverage is uniform regardless of what the primary stage
//! tentatively concludes. Stages run strictly sequentially; a StageResult is
//! published only when its stage fully completes.

use crate::cache::ResultCache;
use crate::config::SessionConfig;
use crate::context::estimate_text_tokens;
use crate::correction::apply_corrections;
use crate::engine::ReasoningEngine;
use crate::extract::{extract, extract_text, SectionOutcome};
use crate::models::{
    AnalysisReport, AnalysisRequest, IssueCategory, MetricRecord, Severity, StageId, StageResult,
    StrategyTag, ToolResult, UsageTotals, ValidationIssue,
};
use crate::reasoning::{LoopOutcome, ReasoningLoop};
use crate::tools::{ToolExecutor, ToolRegistry};
use crate::validation::{severity_deduction, ValidationEngine};
use crate::Result;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const SUMMARY_SECTION: &str = "SUMMARY";
const RECORD_SECTION: &str = "RECORD";

const SYSTEM_PROMPT: &str = "You are an equity research analyst. Ground every \
number in tool output, cite the period it came from, and wrap deliverables \
in the requested section markers.";

/// Main orchestrator that coordinates one analysis session end to end.
///
/// All mutable session state (the result cache, its counters) is created
/// inside `run`, so concurrent runs over the same orchestrator cannot
/// cross-contaminate.
pub struct Orchestrator {
    engine: Arc<dyn ReasoningEngine>,
    registry: Arc<ToolRegistry>,
    validation: ValidationEngine,
    config: SessionConfig,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        registry: Arc<ToolRegistry>,
        validation: ValidationEngine,
        config: SessionConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            validation,
            config,
        }
    }

    /// Run the full staged pipeline for one request.
    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalysisReport> {
        let start_time = Instant::now();
        let mut trace = Vec::new();
        let mut usage = UsageTotals::default();

        info!(
            request_id = ?request.request_id,
            ticker = %request.ticker,
            periods = request.historical_periods.len(),
            "Orchestrator: starting analysis"
        );

        let cache = Arc::new(ResultCache::new());
        let executor = ToolExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&cache),
            self.config.tool_timeout,
            self.config.tool_concurrency,
        );
        let catalog = self.registry.catalog();

        // Trusted-metrics snapshot, fetched exactly once before any stage.
        // Synthesis and validation both read this ground truth; it is never
        // re-derived mid-run.
        let snapshot = executor
            .execute_one("metrics_snapshot", json!({"ticker": request.ticker}))
            .await;
        if !snapshot.success {
            warn!(ticker = %request.ticker, "Trusted snapshot unavailable");
        }
        trace.push(format!(
            "SNAPSHOT: trusted metrics fetch {}",
            if snapshot.success { "ok" } else { "failed" }
        ));

        let mut stage_results: Vec<StageResult> = Vec::new();
        let mut skipped_periods: Vec<String> = Vec::new();

        // === PRIMARY_ANALYSIS ===
        let primary = self
            .run_primary_stage(&request, &executor, &catalog, &mut trace)
            .await?;
        usage.merge(&primary.usage);
        stage_results.push(primary);

        // === HISTORICAL_ANALYSIS ===
        // Unconditional: every configured period runs regardless of the
        // primary stage's tentative conclusion.
        for period in &request.historical_periods {
            match self
                .run_historical_stage(&request, period, &executor, &catalog, &mut trace)
                .await?
            {
                Some(stage) => {
                    usage.merge(&stage.usage);
                    stage_results.push(stage);
                }
                None => skipped_periods.push(period.clone()),
            }
        }

        // === SYNTHESIS ===
        let (synthesis, mut record, mut parse_issues) = self
            .run_synthesis_stage(&request, &stage_results, &snapshot, &executor, &catalog, &mut trace)
            .await?;
        usage.merge(&synthesis.usage);
        stage_results.push(synthesis);

        // === VALIDATE ===
        trace.push("VALIDATE: cross-checking record against cache".to_string());
        let mut report = self
            .validation
            .validate(&record, &cache, &executor, &self.config)
            .await;

        let mut quality_score = report.quality_score;
        for issue in &parse_issues {
            quality_score = (quality_score - severity_deduction(issue.severity)).max(0.0);
        }
        parse_issues.append(&mut report.issues);
        let validation_issues = parse_issues;

        trace.push(format!(
            "VALIDATE: {} issue(s), quality {:.2}",
            validation_issues.len(),
            quality_score
        ));

        // === CORRECT ===
        let correction_ledger = apply_corrections(&mut record, &validation_issues, &cache);
        trace.push(format!(
            "CORRECT: {} field(s) rewritten from trusted sources",
            correction_ledger.len()
        ));

        info!(
            request_id = ?request.request_id,
            issues = validation_issues.len(),
            corrections = correction_ledger.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Analysis complete"
        );

        Ok(AnalysisReport {
            request_id: request.request_id,
            record,
            correction_ledger,
            validation_issues,
            quality_score,
            usage,
            cache_stats: cache.stats(),
            skipped_periods,
            stage_summaries: stage_results,
            trace,
            completed_at: Utc::now(),
        })
    }

    async fn run_primary_stage(
        &self,
        request: &AnalysisRequest,
        executor: &ToolExecutor,
        catalog: &[crate::models::ToolSpec],
        trace: &mut Vec<String>,
    ) -> Result<StageResult> {
        trace.push("PRIMARY: fetching filing".to_string());

        let filing = executor
            .execute_one(
                "filing_section",
                json!({"period": request.primary_period, "section": "full"}),
            )
            .await;

        let document = filing
            .payload
            .get("document")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");

        // Strategy selection: oversized filings get an explicit compression
        // instruction and output budget instead of the standard prompt.
        let strategy = if document.len() > self.config.condensed_threshold_chars {
            StrategyTag::Condensed
        } else {
            StrategyTag::Standard
        };
        trace.push(format!(
            "PRIMARY: {} chars, {} strategy",
            document.len(),
            strategy
        ));
        debug!(chars = document.len(), strategy = %strategy, "Primary strategy selected");

        let task = build_primary_task(request, document, strategy, &self.config);
        let looper = ReasoningLoop::new(self.engine.as_ref(), executor, &self.config);
        let outcome = looper.run(SYSTEM_PROMPT, &task, catalog).await?;

        trace.push(format!(
            "PRIMARY: loop {} in {} iteration(s)",
            if outcome.success { "completed" } else { "hit budget" },
            outcome.iterations
        ));

        Ok(stage_from_outcome(StageId::Primary, strategy, outcome))
    }

    /// Returns `None` when the period's source cannot be retrieved; the
    /// caller records it as skipped and the run continues.
    async fn run_historical_stage(
        &self,
        request: &AnalysisRequest,
        period: &str,
        executor: &ToolExecutor,
        catalog: &[crate::models::ToolSpec],
        trace: &mut Vec<String>,
    ) -> Result<Option<StageResult>> {
        let filing = executor
            .execute_one(
                "filing_section",
                json!({"period": period, "section": "full"}),
            )
            .await;

        if !filing.success {
            warn!(period = %period, "Historical source unavailable, skipping period");
            trace.push(format!("HISTORICAL {}: skipped (source unavailable)", period));
            return Ok(None);
        }

        let document = filing
            .payload
            .get("document")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");

        let task = build_historical_task(request, period, document);
        let looper = ReasoningLoop::new(self.engine.as_ref(), executor, &self.config);
        let outcome = looper.run(SYSTEM_PROMPT, &task, catalog).await?;

        trace.push(format!(
            "HISTORICAL {}: {} iteration(s)",
            period, outcome.iterations
        ));

        Ok(Some(stage_from_outcome(
            StageId::Historical(period.to_string()),
            StrategyTag::Standard,
            outcome,
        )))
    }

    async fn run_synthesis_stage(
        &self,
        request: &AnalysisRequest,
        stages: &[StageResult],
        snapshot: &ToolResult,
        executor: &ToolExecutor,
        catalog: &[crate::models::ToolSpec],
        trace: &mut Vec<String>,
    ) -> Result<(StageResult, MetricRecord, Vec<ValidationIssue>)> {
        trace.push(format!(
            "SYNTHESIS: combining {} stage result(s)",
            stages.len()
        ));

        let task = build_synthesis_task(request, stages, snapshot);
        let looper = ReasoningLoop::new(self.engine.as_ref(), executor, &self.config);
        let outcome = looper.run(SYSTEM_PROMPT, &task, catalog).await?;

        let mut parse_issues = Vec::new();
        let record = match extract(&outcome.final_text, RECORD_SECTION) {
            SectionOutcome::Parsed(body) => match serde_json::from_str::<MetricRecord>(&body) {
                Ok(mut record) => {
                    if record.ticker.is_empty() {
                        record.ticker = request.ticker.clone();
                    }
                    record
                }
                Err(e) => {
                    warn!("Record section did not parse: {}", e);
                    parse_issues.push(malformed_issue(format!("record JSON invalid: {}", e)));
                    fallback_record(request)
                }
            },
            SectionOutcome::Malformed(_) | SectionOutcome::Absent => {
                warn!("No record section in synthesis output");
                parse_issues.push(malformed_issue(
                    "synthesis output carried no record section".to_string(),
                ));
                fallback_record(request)
            }
        };

        trace.push(format!(
            "SYNTHESIS: recommendation '{}' at confidence {:.2}",
            record.recommendation, record.confidence
        ));

        let stage = stage_from_outcome(StageId::Synthesis, StrategyTag::Standard, outcome);
        Ok((stage, record, parse_issues))
    }
}

fn stage_from_outcome(
    stage_id: StageId,
    strategy: StrategyTag,
    outcome: LoopOutcome,
) -> StageResult {
    let summary = extract_text(&outcome.final_text, SUMMARY_SECTION);
    let metrics = extract(&outcome.final_text, "METRICS")
        .parsed()
        .and_then(|body| serde_json::from_str(&body).ok())
        .unwrap_or(serde_json::Value::Null);

    StageResult {
        token_estimate: estimate_text_tokens(&outcome.final_text),
        stage_id,
        primary_text: outcome.final_text,
        summary,
        metrics,
        strategy,
        usage: outcome.usage,
    }
}

fn malformed_issue(description: String) -> ValidationIssue {
    ValidationIssue {
        severity: Severity::Warning,
        category: IssueCategory::MalformedRecord,
        field: None,
        description,
        suggested_fix: Some("inspect the synthesis transcript".to_string()),
    }
}

fn fallback_record(request: &AnalysisRequest) -> MetricRecord {
    MetricRecord {
        ticker: request.ticker.clone(),
        recommendation: "inconclusive".to_string(),
        confidence: 0.0,
        metrics: Default::default(),
        thesis: String::new(),
    }
}

//
// ================= Stage prompts =================
//

fn build_primary_task(
    request: &AnalysisRequest,
    document: &str,
    strategy: StrategyTag,
    config: &SessionConfig,
) -> String {
    let mut task = format!(
        "Analyze the {} ({}) annual filing for {}. Use tools for any \
         additional data. Wrap your analysis summary in [[{}]] ... [[/{}]].\n",
        request.company, request.ticker, request.primary_period, SUMMARY_SECTION, SUMMARY_SECTION
    );

    if strategy == StrategyTag::Condensed {
        task.push_str(&format!(
            "The filing is unusually large. Compress aggressively: keep only \
             decision-relevant facts and stay within {} tokens of output.\n",
            config.condensed_target_tokens
        ));
    }

    if !document.is_empty() {
        task.push_str("\nFiling text:\n");
        task.push_str(document);
    }

    task
}

fn build_historical_task(request: &AnalysisRequest, period: &str, document: &str) -> String {
    format!(
        "Analyze the {} filing for {} ({}) as historical context. Focus on \
         trend-relevant changes versus adjacent periods. Wrap your summary in \
         [[{}]] ... [[/{}]].\n\nFiling text:\n{}",
        period, request.company, request.ticker, SUMMARY_SECTION, SUMMARY_SECTION, document
    )
}

fn build_synthesis_task(
    request: &AnalysisRequest,
    stages: &[StageResult],
    snapshot: &ToolResult,
) -> String {
    let mut task = format!(
        "Synthesize a final research record for {} ({}).\n\n",
        request.company, request.ticker
    );

    for stage in stages {
        task.push_str(&format!("--- {} ---\n{}\n\n", stage.stage_id, stage.summary));
    }

    task.push_str("Trusted metrics snapshot (ground truth, prefer over any \
                   earlier extraction):\n");
    task.push_str(&snapshot.payload.to_string());
    task.push_str(&format!(
        "\n\nReturn the record as JSON with fields ticker, recommendation, \
         confidence, metrics, thesis inside [[{}]] ... [[/{}]].",
        RECORD_SECTION, RECORD_SECTION
    ));

    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineResponse, ScriptedEngine};
    use crate::models::{ContentBlock, TokenUsage};
    use crate::tools::create_fixture_registry;
    use crate::validation::create_default_validation_engine;
    use std::collections::HashMap;

    fn text_response(text: &str) -> EngineResponse {
        EngineResponse {
            blocks: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            tool_requests: vec![],
            usage: TokenUsage {
                input_tokens: 500,
                output_tokens: 200,
            },
        }
    }

    fn summary_response(body: &str) -> EngineResponse {
        text_response(&format!("[[SUMMARY]]{}[[/SUMMARY]]", body))
    }

    fn record_response(record_json: &str) -> EngineResponse {
        text_response(&format!("[[RECORD]]{}[[/RECORD]]", record_json))
    }

    fn fixtures(
        filings: &[(&str, &str)],
        net_margin: f64,
    ) -> Arc<ToolRegistry> {
        let filings: HashMap<String, String> = filings
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut snapshots = HashMap::new();
        snapshots.insert(
            "ACME".to_string(),
            json!({"net_margin": net_margin, "pe_ratio": 21.4}),
        );
        Arc::new(create_fixture_registry(filings, snapshots))
    }

    fn orchestrator(engine: ScriptedEngine, registry: Arc<ToolRegistry>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(engine),
            registry,
            create_default_validation_engine(),
            SessionConfig::default(),
        )
    }

    fn request(periods: &[&str]) -> AnalysisRequest {
        AnalysisRequest::new(
            "ACME",
            "Acme Corp",
            "FY2023",
            periods.iter().map(|p| p.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_full_run_produces_report() {
        let engine = ScriptedEngine::new(vec![
            summary_response("Primary margins stable."),
            summary_response("FY2022 was weaker."),
            record_response(
                r#"{"ticker":"ACME","recommendation":"hold","confidence":0.8,
                    "metrics":{"net_margin":0.224},"thesis":"steady"}"#,
            ),
        ]);
        let registry = fixtures(&[("FY2023", "filing text"), ("FY2022", "older filing")], 0.224);
        let orchestrator = orchestrator(engine, registry);

        let report = orchestrator.run(request(&["FY2022"])).await.unwrap();

        assert_eq!(report.record.recommendation, "hold");
        assert!(report.correction_ledger.is_empty());
        assert!(report.skipped_periods.is_empty());
        // primary + one historical + synthesis
        assert_eq!(report.stage_summaries.len(), 3);
        assert!(report.usage.engine_calls >= 3);
        assert!(report.quality_score > 0.9);
    }

    #[tokio::test]
    async fn test_oversized_primary_selects_condensed_strategy() {
        let huge_filing = "risk and revenue ".repeat(25_000); // > 400k chars
        assert!(huge_filing.len() > 400_000);

        let engine = ScriptedEngine::new(vec![
            summary_response("Condensed view of a huge filing."),
            record_response(
                r#"{"ticker":"ACME","recommendation":"hold","confidence":0.7,
                    "metrics":{"net_margin":0.224},"thesis":"ok"}"#,
            ),
        ]);
        let registry = fixtures(&[("FY2023", huge_filing.as_str())], 0.224);
        let orchestrator = orchestrator(engine, registry);

        let report = orchestrator.run(request(&[])).await.unwrap();

        let primary = &report.stage_summaries[0];
        assert_eq!(primary.stage_id, StageId::Primary);
        assert_eq!(primary.strategy, StrategyTag::Condensed);
        assert!(primary.token_estimate <= 10_000);
    }

    #[tokio::test]
    async fn test_unretrievable_period_is_skipped_not_fatal() {
        let engine = ScriptedEngine::new(vec![
            summary_response("Primary."),
            // FY2021 filing is missing, so the next scripted response is
            // consumed by the synthesis stage, not a historical one.
            record_response(
                r#"{"ticker":"ACME","recommendation":"hold","confidence":0.6,
                    "metrics":{"net_margin":0.224},"thesis":"thin history"}"#,
            ),
        ]);
        let registry = fixtures(&[("FY2023", "filing text")], 0.224);
        let orchestrator = orchestrator(engine, registry);

        let report = orchestrator.run(request(&["FY2021"])).await.unwrap();

        assert_eq!(report.skipped_periods, vec!["FY2021".to_string()]);
        // No historical stage result was published for the skipped period.
        assert!(report
            .stage_summaries
            .iter()
            .all(|s| s.stage_id != StageId::Historical("FY2021".to_string())));
        assert_eq!(report.record.recommendation, "hold");
    }

    #[tokio::test]
    async fn test_divergent_metric_corrected_from_trusted_snapshot() {
        let engine = ScriptedEngine::new(vec![
            summary_response("Primary."),
            record_response(
                r#"{"ticker":"ACME","recommendation":"buy","confidence":0.9,
                    "metrics":{"net_margin":547.6},"thesis":"typo in margin"}"#,
            ),
        ]);
        let registry = fixtures(&[("FY2023", "filing text")], 0.224);
        let orchestrator = orchestrator(engine, registry);

        let report = orchestrator.run(request(&[])).await.unwrap();

        assert!(report
            .validation_issues
            .iter()
            .any(|i| i.category == IssueCategory::MetricMismatch));
        assert_eq!(report.record.metrics["net_margin"], 0.224);
        assert_eq!(report.correction_ledger.len(), 1);
        let correction = &report.correction_ledger[0];
        assert_eq!(correction.old_value, 547.6);
        assert_eq!(correction.new_value, 0.224);
        assert!(correction.cache_key.starts_with("metrics_snapshot:"));
    }

    #[tokio::test]
    async fn test_unparseable_record_degrades_with_issue() {
        let engine = ScriptedEngine::new(vec![
            summary_response("Primary."),
            text_response("no record markers at all"),
        ]);
        let registry = fixtures(&[("FY2023", "filing text")], 0.224);
        let orchestrator = orchestrator(engine, registry);

        let report = orchestrator.run(request(&[])).await.unwrap();

        assert_eq!(report.record.recommendation, "inconclusive");
        assert!(report
            .validation_issues
            .iter()
            .any(|i| i.category == IssueCategory::MalformedRecord));
        assert!(report.quality_score < 1.0);
    }
}
