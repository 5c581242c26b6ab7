//! Provenance-aware validation
//!
//! Second-pass cross-check of the synthesized record: deterministic numeric
//! sanity rules, then a comparison of every quantitative claim against the
//! Trusted-tagged cache entry for the same field. Thresholds are policy but
//! deterministic given identical inputs.

use crate::cache::ResultCache;
use crate::config::SessionConfig;
use crate::models::{IssueCategory, MetricRecord, Severity, ValidationIssue};
use crate::tools::ToolExecutor;
use serde_json::json;
use std::cmp::Ordering;
use tracing::{debug, info};

/// Divergences below this absolute floor never flag, whatever the relative
/// tolerance says about values near zero.
const ABSOLUTE_FLOOR: f64 = 1e-6;

/// Quality deduction per issue, by severity.
pub(crate) fn severity_deduction(severity: Severity) -> f64 {
    match severity {
        Severity::Info => 0.02,
        Severity::Warning => 0.10,
        Severity::Critical => 0.25,
    }
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub quality_score: f64,
}

/// Trait for deterministic sanity rules
pub trait SanityRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn severity(&self) -> Severity;
    fn check(&self, record: &MetricRecord) -> Vec<ValidationIssue>;
}

/// Validation engine that runs rules, then the provenance cross-reference.
pub struct ValidationEngine {
    rules: Vec<Box<dyn SanityRule>>,
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn SanityRule>) {
        self.rules.push(rule);
    }

    /// Validate the final record against the session cache.
    ///
    /// The executor is used only for a bounded number of read-only evidence
    /// probes; this is gap-filling, not open-ended investigation.
    pub async fn validate(
        &self,
        record: &MetricRecord,
        cache: &ResultCache,
        executor: &ToolExecutor,
        config: &SessionConfig,
    ) -> ValidationReport {
        let mut issues = Vec::new();

        // (a) deterministic sanity checks
        for rule in &self.rules {
            issues.extend(rule.check(record));
        }

        // (b) cross-reference against trusted cache entries.
        // BTreeMap iteration keeps the order, and therefore the probes and
        // the report, deterministic.
        let mut probes_left = config.max_evidence_probes;
        for (field, claimed) in &record.metrics {
            let mut trusted = cache.trusted_metric(field);

            // (c) one read-only probe per missing field, cost-bounded
            if trusted.is_none() && probes_left > 0 {
                probes_left -= 1;
                debug!(field = %field, "Evidence gap, probing metrics snapshot");
                executor
                    .execute_one("metrics_snapshot", json!({"ticker": record.ticker}))
                    .await;
                trusted = cache.trusted_metric(field);
            }

            match trusted {
                Some(trusted) => {
                    if diverges(*claimed, trusted.value(), config.metric_tolerance) {
                        issues.push(ValidationIssue {
                            severity: Severity::Critical,
                            category: IssueCategory::MetricMismatch,
                            field: Some(field.clone()),
                            description: format!(
                                "{} claimed as {} but trusted source says {}",
                                field,
                                claimed,
                                trusted.value()
                            ),
                            suggested_fix: Some(format!(
                                "replace with trusted value {}",
                                trusted.value()
                            )),
                        });
                    }
                }
                None => {
                    issues.push(ValidationIssue {
                        severity: Severity::Info,
                        category: IssueCategory::EvidenceGap,
                        field: Some(field.clone()),
                        description: format!("{} has no trusted source in this session", field),
                        suggested_fix: None,
                    });
                }
            }
        }

        // (d) aggregate
        let quality_score = issues
            .iter()
            .fold(1.0_f64, |score, issue| {
                score - severity_deduction(issue.severity)
            })
            .clamp(0.0, 1.0);

        info!(
            issues = issues.len(),
            quality_score, "Validation complete"
        );

        ValidationReport {
            issues,
            quality_score,
        }
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Relative divergence with an absolute floor near zero.
fn diverges(claimed: f64, trusted: f64, tolerance: f64) -> bool {
    let delta = (claimed - trusted).abs();
    if delta < ABSOLUTE_FLOOR {
        return false;
    }
    delta / trusted.abs().max(ABSOLUTE_FLOOR) > tolerance
}

//
// ================= Severity Ordering =================
//

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Severity {
    fn rank(&self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
        }
    }
}

//
// ========== Default Sanity Rules ==========
//

/// Rule: confidence must sit in [0, 1]
pub struct ConfidenceRangeRule;

impl SanityRule for ConfidenceRangeRule {
    fn name(&self) -> &'static str {
        "confidence_range"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, record: &MetricRecord) -> Vec<ValidationIssue> {
        if (0.0..=1.0).contains(&record.confidence) {
            return Vec::new();
        }
        vec![ValidationIssue {
            severity: self.severity(),
            category: IssueCategory::SanityViolation,
            field: Some("confidence".to_string()),
            description: format!("confidence {} outside [0, 1]", record.confidence),
            suggested_fix: Some("clamp to [0, 1]".to_string()),
        }]
    }
}

/// Rule: margins are fractions in [-1, 1], ratios are non-negative
pub struct MetricRangeRule;

impl SanityRule for MetricRangeRule {
    fn name(&self) -> &'static str {
        "metric_range"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, record: &MetricRecord) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for (field, value) in &record.metrics {
            let out_of_range = if field.ends_with("_margin") {
                !(-1.0..=1.0).contains(value)
            } else if field.ends_with("_ratio") {
                *value < 0.0
            } else {
                false
            };

            if out_of_range {
                issues.push(ValidationIssue {
                    severity: self.severity(),
                    category: IssueCategory::SanityViolation,
                    field: Some(field.clone()),
                    description: format!("{} = {} is outside its plausible range", field, value),
                    suggested_fix: None,
                });
            }
        }

        issues
    }
}

/// Rule: a derived margin cannot exceed the margin it is derived from
pub struct MarginOrderingRule;

impl SanityRule for MarginOrderingRule {
    fn name(&self) -> &'static str {
        "margin_ordering"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, record: &MetricRecord) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let gross = record.metrics.get("gross_margin");

        for narrower in ["operating_margin", "net_margin"] {
            if let (Some(gross), Some(value)) = (gross, record.metrics.get(narrower)) {
                if value > gross {
                    issues.push(ValidationIssue {
                        severity: self.severity(),
                        category: IssueCategory::SanityViolation,
                        field: Some(narrower.to_string()),
                        description: format!(
                            "{} ({}) exceeds gross_margin ({})",
                            narrower, value, gross
                        ),
                        suggested_fix: None,
                    });
                }
            }
        }

        issues
    }
}

/// Engine with the default rule set.
pub fn create_default_validation_engine() -> ValidationEngine {
    let mut engine = ValidationEngine::new();
    engine.add_rule(Box::new(ConfidenceRangeRule));
    engine.add_rule(Box::new(MetricRangeRule));
    engine.add_rule(Box::new(MarginOrderingRule));
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, ResultCache};
    use crate::models::Provenance;
    use crate::tools::{create_fixture_registry, ToolRegistry};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;
    use std::time::Duration;

    fn record(metrics: &[(&str, f64)]) -> MetricRecord {
        MetricRecord {
            ticker: "ACME".to_string(),
            recommendation: "hold".to_string(),
            confidence: 0.8,
            metrics: metrics
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
            thesis: String::new(),
        }
    }

    fn executor_over(cache: Arc<ResultCache>) -> ToolExecutor {
        ToolExecutor::new(
            Arc::new(ToolRegistry::new()),
            cache,
            Duration::from_secs(1),
            2,
        )
    }

    fn trusted_entry(key: &str, field: &str, value: f64) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            success: true,
            payload: serde_json::json!({ "metrics": { field: value } }),
            error: None,
            provenance: Provenance::Trusted,
        }
    }

    #[tokio::test]
    async fn test_divergent_metric_is_flagged_critical() {
        let cache = Arc::new(ResultCache::new());
        cache.put(trusted_entry("snap", "net_margin", 0.224));
        let executor = executor_over(Arc::clone(&cache));
        let config = SessionConfig::default();

        let engine = create_default_validation_engine();
        let report = engine
            .validate(&record(&[("net_margin", 547.6)]), &cache, &executor, &config)
            .await;

        let mismatch = report
            .issues
            .iter()
            .find(|i| i.category == IssueCategory::MetricMismatch)
            .expect("expected a mismatch issue");
        assert_eq!(mismatch.severity, Severity::Critical);
        assert_eq!(mismatch.field.as_deref(), Some("net_margin"));
        assert!(report.quality_score < 1.0);
    }

    #[tokio::test]
    async fn test_within_tolerance_passes() {
        let cache = Arc::new(ResultCache::new());
        cache.put(trusted_entry("snap", "pe_ratio", 20.0));
        let executor = executor_over(Arc::clone(&cache));
        let config = SessionConfig::default();

        let engine = ValidationEngine::new();
        let report = engine
            .validate(&record(&[("pe_ratio", 20.4)]), &cache, &executor, &config)
            .await;

        assert!(report
            .issues
            .iter()
            .all(|i| i.category != IssueCategory::MetricMismatch));
    }

    #[tokio::test]
    async fn test_missing_trusted_source_is_evidence_gap() {
        let cache = Arc::new(ResultCache::new());
        let executor = executor_over(Arc::clone(&cache));
        let config = SessionConfig::default();

        let engine = ValidationEngine::new();
        let report = engine
            .validate(&record(&[("roe", 0.31)]), &cache, &executor, &config)
            .await;

        assert!(report
            .issues
            .iter()
            .any(|i| i.category == IssueCategory::EvidenceGap));
    }

    #[tokio::test]
    async fn test_evidence_probe_fills_gap() {
        // Empty cache, but the probe tool can supply the snapshot.
        let cache = Arc::new(ResultCache::new());
        let mut snapshots = HashMap::new();
        snapshots.insert("ACME".to_string(), serde_json::json!({"roe": 0.31}));
        let registry = create_fixture_registry(HashMap::new(), snapshots);
        let executor = ToolExecutor::new(
            Arc::new(registry),
            Arc::clone(&cache),
            Duration::from_secs(1),
            2,
        );
        let config = SessionConfig::default();

        let engine = ValidationEngine::new();
        let report = engine
            .validate(&record(&[("roe", 0.31)]), &cache, &executor, &config)
            .await;

        // Probe landed in the cache and the claim matches it.
        assert!(report.issues.is_empty());
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_margin_ordering_rule() {
        let cache = Arc::new(ResultCache::new());
        let executor = executor_over(Arc::clone(&cache));
        let config = SessionConfig::default();

        let mut engine = ValidationEngine::new();
        engine.add_rule(Box::new(MarginOrderingRule));
        let report = engine
            .validate(
                &record(&[("gross_margin", 0.4), ("net_margin", 0.6)]),
                &cache,
                &executor,
                &config,
            )
            .await;

        assert!(report
            .issues
            .iter()
            .any(|i| i.category == IssueCategory::SanityViolation
                && i.field.as_deref() == Some("net_margin")));
    }

    #[tokio::test]
    async fn test_quality_score_deterministic() {
        let cache = Arc::new(ResultCache::new());
        cache.put(trusted_entry("snap", "net_margin", 0.224));
        let executor = executor_over(Arc::clone(&cache));
        let config = SessionConfig::default();
        let engine = create_default_validation_engine();

        let rec = record(&[("net_margin", 547.6), ("roe", 0.3)]);
        let first = engine.validate(&rec, &cache, &executor, &config).await;
        let second = engine.validate(&rec, &cache, &executor, &config).await;

        assert_eq!(first.quality_score, second.quality_score);
        assert_eq!(first.issues.len(), second.issues.len());
    }
}
