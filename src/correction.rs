//! Auto-correction from trusted sources
//!
//! Rewrites fields flagged by the validator, sourcing replacement values
//! exclusively through [`ResultCache::trusted_metric`]. That method returns
//! a [`TrustedValue`] witness, so an engine-derived cache entry cannot reach
//! this code: laundering a model error through another model value does not
//! compile, rather than merely being discouraged.

use crate::cache::ResultCache;
use crate::models::{
    CorrectionRecord, IssueCategory, MetricRecord, Provenance, ValidationIssue,
};
use chrono::Utc;
use tracing::{info, warn};

/// Issue categories the corrector may act on.
fn is_correctable(category: IssueCategory) -> bool {
    matches!(category, IssueCategory::MetricMismatch)
}

/// Apply corrections for every correctable issue with a trusted source.
///
/// Issues without a Trusted cache entry are left unresolved for the caller;
/// the record keeps its original value. Returns the ordered ledger of
/// corrections made.
pub fn apply_corrections(
    record: &mut MetricRecord,
    issues: &[ValidationIssue],
    cache: &ResultCache,
) -> Vec<CorrectionRecord> {
    let mut ledger = Vec::new();

    for issue in issues {
        if !is_correctable(issue.category) {
            continue;
        }
        let field = match &issue.field {
            Some(field) => field,
            None => continue,
        };
        let old_value = match record.metrics.get(field) {
            Some(value) => *value,
            None => continue,
        };

        match cache.trusted_metric(field) {
            Some(trusted) => {
                record.metrics.insert(field.clone(), trusted.value());
                info!(
                    field = %field,
                    old = old_value,
                    new = trusted.value(),
                    source = %trusted.cache_key(),
                    "Corrected field from trusted source"
                );
                ledger.push(CorrectionRecord {
                    field: field.clone(),
                    old_value,
                    new_value: trusted.value(),
                    source: Provenance::Trusted,
                    cache_key: trusted.cache_key().to_string(),
                    corrected_at: Utc::now(),
                });
            }
            None => {
                warn!(field = %field, "No trusted source, leaving issue unresolved");
            }
        }
    }

    ledger
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::models::Severity;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record_with(field: &str, value: f64) -> MetricRecord {
        let mut metrics = BTreeMap::new();
        metrics.insert(field.to_string(), value);
        MetricRecord {
            ticker: "ACME".to_string(),
            recommendation: "hold".to_string(),
            confidence: 0.8,
            metrics,
            thesis: String::new(),
        }
    }

    fn mismatch_issue(field: &str) -> ValidationIssue {
        ValidationIssue {
            severity: Severity::Critical,
            category: IssueCategory::MetricMismatch,
            field: Some(field.to_string()),
            description: "divergent".to_string(),
            suggested_fix: None,
        }
    }

    fn entry(key: &str, field: &str, value: f64, provenance: Provenance) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            success: true,
            payload: json!({ "metrics": { field: value } }),
            error: None,
            provenance,
        }
    }

    #[test]
    fn test_correction_from_trusted_source() {
        let cache = ResultCache::new();
        cache.put(entry("snapshot", "net_margin", 0.224, Provenance::Trusted));

        let mut record = record_with("net_margin", 547.6);
        let ledger = apply_corrections(&mut record, &[mismatch_issue("net_margin")], &cache);

        assert_eq!(record.metrics["net_margin"], 0.224);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].field, "net_margin");
        assert_eq!(ledger[0].old_value, 547.6);
        assert_eq!(ledger[0].new_value, 0.224);
        assert_eq!(ledger[0].source, Provenance::Trusted);
        assert_eq!(ledger[0].cache_key, "snapshot");
    }

    #[test]
    fn test_derived_entries_never_correct() {
        // A cache full of Derived values, including one that "matches" the
        // implicated field, must produce zero corrections.
        let cache = ResultCache::new();
        for i in 0..25 {
            cache.put(entry(
                &format!("derived_{}", i),
                "net_margin",
                i as f64 * 0.01,
                Provenance::Derived,
            ));
        }

        let mut record = record_with("net_margin", 547.6);
        let ledger = apply_corrections(&mut record, &[mismatch_issue("net_margin")], &cache);

        assert!(ledger.is_empty());
        assert_eq!(record.metrics["net_margin"], 547.6);
    }

    #[test]
    fn test_uncorrectable_category_left_alone() {
        let cache = ResultCache::new();
        cache.put(entry("snapshot", "roe", 0.3, Provenance::Trusted));

        let mut record = record_with("roe", 0.9);
        let issue = ValidationIssue {
            severity: Severity::Warning,
            category: IssueCategory::SanityViolation,
            field: Some("roe".to_string()),
            description: "out of range".to_string(),
            suggested_fix: None,
        };

        let ledger = apply_corrections(&mut record, &[issue], &cache);
        assert!(ledger.is_empty());
        assert_eq!(record.metrics["roe"], 0.9);
    }

    #[test]
    fn test_missing_trusted_source_leaves_field() {
        let cache = ResultCache::new();
        let mut record = record_with("roe", 0.9);

        let ledger = apply_corrections(&mut record, &[mismatch_issue("roe")], &cache);
        assert!(ledger.is_empty());
        assert_eq!(record.metrics["roe"], 0.9);
    }
}
