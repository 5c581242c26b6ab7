//! Session-scoped result cache
//!
//! Compute-once memoization of tool outcomes, keyed by a canonical
//! (tool name, normalized arguments) key. Both successes and well-formed
//! failures are cached; transient faults (timeouts, transport errors) are
//! never written, so they stay retryable.
//!
//! Every entry carries a provenance tag. Correction code can only consume
//! trusted values through [`TrustedValue`], which is constructible nowhere
//! else, so a Derived entry cannot "correct" another value by construction.

use crate::models::{CacheStats, Provenance, ToolResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

/// One memoized tool outcome.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub success: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
    pub provenance: Provenance,
}

impl CacheEntry {
    /// Rehydrate a cached outcome into a result for a fresh request id.
    pub fn to_result(&self, request_id: &str) -> ToolResult {
        ToolResult {
            request_id: request_id.to_string(),
            success: self.success,
            payload: self.payload.clone(),
            error: self.error.clone(),
        }
    }
}

/// A numeric value whose provenance is known to be `Trusted`.
///
/// The private field means the only way to obtain one is
/// [`ResultCache::trusted_metric`], which reads Trusted-tagged entries only.
#[derive(Debug, Clone)]
pub struct TrustedValue {
    value: f64,
    cache_key: String,
}

impl TrustedValue {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }
}

/// Memoization store for one analysis session.
///
/// Uses a synchronous `RwLock`: lock hold times are map operations only,
/// never awaited across.
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a canonical key, counting the hit or miss.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let entries = self.entries.read().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert-if-absent. The first recorded outcome for a key wins; a
    /// concurrent duplicate write is dropped and the existing entry returned.
    pub fn put(&self, entry: CacheEntry) -> CacheEntry {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries
            .entry(entry.key.clone())
            .or_insert(entry)
            .clone()
    }

    /// Find a Trusted-tagged numeric value for a metric field.
    ///
    /// Scans Trusted entries in key order (deterministic across runs) and
    /// accepts the field either at the payload top level or nested under a
    /// "metrics" object. Derived entries are invisible here.
    pub fn trusted_metric(&self, field: &str) -> Option<TrustedValue> {
        let entries = self.entries.read().expect("cache lock poisoned");

        let mut trusted: Vec<&CacheEntry> = entries
            .values()
            .filter(|e| e.provenance == Provenance::Trusted && e.success)
            .collect();
        trusted.sort_by(|a, b| a.key.cmp(&b.key));

        for entry in trusted {
            if let Some(value) = metric_from_payload(&entry.payload, field) {
                return Some(TrustedValue {
                    value,
                    cache_key: entry.key.clone(),
                });
            }
        }

        None
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().expect("cache lock poisoned");
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len() as u64,
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

fn metric_from_payload(payload: &serde_json::Value, field: &str) -> Option<f64> {
    if let Some(v) = payload.get(field).and_then(serde_json::Value::as_f64) {
        return Some(v);
    }
    payload
        .get("metrics")
        .and_then(|m| m.get(field))
        .and_then(serde_json::Value::as_f64)
}

//
// ================= Canonical keys =================
//

/// Derive the default canonical key for a tool call: the tool name plus a
/// SHA256 over the argument map with object keys sorted recursively, so
/// argument order never changes the key.
pub fn canonical_key(tool_name: &str, arguments: &serde_json::Value) -> String {
    let normalized = normalize_json(arguments);
    let mut hasher = Sha256::new();
    hasher.update(normalized.to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}", tool_name, &digest[..16])
}

fn normalize_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            sorted.sort_by_key(|(k, _)| k.as_str());
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), normalize_json(v));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(normalize_json).collect())
        }
        other => other.clone(),
    }
}
