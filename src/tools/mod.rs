//! Tool trait and registry
//!
//! Tools are the agent's only window onto external data. Each tool names
//! itself, describes its input schema for the engine's catalog, declares the
//! provenance of what it returns, and derives its own cache key.
//!
//! The shipped tools are deterministic in-crate fixtures; production
//! deployments register HTTP-backed implementations of the same trait.

use crate::cache::canonical_key;
use crate::error::AnalysisError;
use crate::models::{Provenance, ToolSpec};
use crate::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub mod executor;
pub use executor::ToolExecutor;

/// What a tool returns. `success=false` with an error message is a
/// well-formed failure (cacheable); an `Err` from `execute` is a transient
/// fault (never cached).
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub payload: Value,
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// JSON schema for the argument map, advertised to the engine.
    fn input_schema(&self) -> Value;

    /// Provenance tag applied to cached results of this tool.
    fn provenance(&self) -> Provenance {
        Provenance::Derived
    }

    /// Canonical cache key for an argument map. The default hashes the
    /// normalized arguments; tools with natural identifiers override this.
    fn cache_key(&self, arguments: &Value) -> String {
        canonical_key(self.name(), arguments)
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput>;
}

/// Tool registry for looking up tools and building the engine catalog
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Catalog advertised to the reasoning engine, in stable name order.
    pub fn catalog(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn require_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AnalysisError::InvalidToolInput(format!("Expected '{}' string", key)))
}

//
// ================= Fixture tools =================
//

/// Serves sections of regulatory filings from an in-memory corpus,
/// keyed by fiscal period.
pub struct FilingSectionTool {
    filings: HashMap<String, String>,
}

impl FilingSectionTool {
    pub fn new(filings: HashMap<String, String>) -> Self {
        Self { filings }
    }
}

#[async_trait::async_trait]
impl Tool for FilingSectionTool {
    fn name(&self) -> &'static str {
        "filing_section"
    }

    fn description(&self) -> &'static str {
        "Fetch a section of the company's annual filing for a fiscal period"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "period": { "type": "string", "description": "Fiscal period, e.g. FY2023" },
                "section": { "type": "string", "description": "Section id, e.g. mda, risk_factors" }
            },
            "required": ["period", "section"]
        })
    }

    fn provenance(&self) -> Provenance {
        Provenance::Trusted
    }

    /// Document identity is (period, section); hashing would only obscure it.
    fn cache_key(&self, arguments: &Value) -> String {
        let period = arguments.get("period").and_then(Value::as_str).unwrap_or("?");
        let section = arguments.get("section").and_then(Value::as_str).unwrap_or("full");
        format!("{}:{}:{}", self.name(), period, section)
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let period = require_str(arguments, "period")?;
        let section = arguments.get("section").and_then(Value::as_str).unwrap_or("full");

        match self.filings.get(period) {
            Some(document) => Ok(ToolOutput::ok(json!({
                "period": period,
                "section": section,
                "document": document,
                "chars": document.len(),
            }))),
            // Missing filing is a stable fact, not a fault; let it memoize.
            None => Ok(ToolOutput::not_found(format!(
                "No filing available for period {}",
                period
            ))),
        }
    }
}

/// Serves the trusted fundamental-metrics snapshot for a ticker.
pub struct MetricsSnapshotTool {
    snapshots: HashMap<String, Value>,
}

impl MetricsSnapshotTool {
    pub fn new(snapshots: HashMap<String, Value>) -> Self {
        Self { snapshots }
    }
}

#[async_trait::async_trait]
impl Tool for MetricsSnapshotTool {
    fn name(&self) -> &'static str {
        "metrics_snapshot"
    }

    fn description(&self) -> &'static str {
        "Fetch audited fundamental metrics for a ticker from the data provider"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": { "type": "string" }
            },
            "required": ["ticker"]
        })
    }

    fn provenance(&self) -> Provenance {
        Provenance::Trusted
    }

    fn cache_key(&self, arguments: &Value) -> String {
        let ticker = arguments.get("ticker").and_then(Value::as_str).unwrap_or("?");
        format!("{}:{}", self.name(), ticker.to_uppercase())
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let ticker = require_str(arguments, "ticker")?;

        match self.snapshots.get(&ticker.to_uppercase()) {
            Some(metrics) => Ok(ToolOutput::ok(json!({
                "ticker": ticker.to_uppercase(),
                "metrics": metrics,
            }))),
            None => Ok(ToolOutput::not_found(format!(
                "No metrics coverage for {}",
                ticker
            ))),
        }
    }
}

/// Keyword search over a fixed corpus of news and commentary snippets.
pub struct EvidenceSearchTool {
    corpus: Vec<(String, String)>,
}

impl EvidenceSearchTool {
    pub fn new(corpus: Vec<(String, String)>) -> Self {
        Self { corpus }
    }
}

/// Queries longer than this share a cache key prefix; trailing qualifiers
/// rarely change the result set.
const SEARCH_KEY_CHARS: usize = 64;

#[async_trait::async_trait]
impl Tool for EvidenceSearchTool {
    fn name(&self) -> &'static str {
        "evidence_search"
    }

    fn description(&self) -> &'static str {
        "Search news and commentary for supporting evidence"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" }
            },
            "required": ["query"]
        })
    }

    fn cache_key(&self, arguments: &Value) -> String {
        let query = arguments.get("query").and_then(Value::as_str).unwrap_or("");
        let truncated: String = query
            .to_lowercase()
            .chars()
            .take(SEARCH_KEY_CHARS)
            .collect();
        format!("{}:{}", self.name(), truncated.trim())
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutput> {
        let query = require_str(arguments, "query")?.to_lowercase();

        let hits: Vec<Value> = self
            .corpus
            .iter()
            .filter(|(title, body)| {
                query
                    .split_whitespace()
                    .any(|term| title.to_lowercase().contains(term) || body.to_lowercase().contains(term))
            })
            .take(5)
            .map(|(title, body)| json!({ "title": title, "snippet": body }))
            .collect();

        Ok(ToolOutput::ok(json!({
            "query": query,
            "total_hits": hits.len(),
            "results": hits,
        })))
    }
}

/// Registry with the fixture corpus used by the runner and tests.
pub fn create_fixture_registry(
    filings: HashMap<String, String>,
    snapshots: HashMap<String, Value>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FilingSectionTool::new(filings)));
    registry.register(Arc::new(MetricsSnapshotTool::new(snapshots)));
    registry.register(Arc::new(EvidenceSearchTool::new(vec![
        (
            "Quarterly margin commentary".to_string(),
            "Analysts flag gross margin compression across the sector.".to_string(),
        ),
        (
            "Regulatory update".to_string(),
            "New disclosure rules take effect next fiscal year.".to_string(),
        ),
    ])));
    registry
}
