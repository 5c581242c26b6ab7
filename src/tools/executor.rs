//! Batch tool executor
//!
//! Resolves the requests from one engine turn and runs them through the
//! result cache. Independent requests execute in parallel across a bounded
//! worker pool; results are re-joined in request order before they go back
//! into the conversation.
//!
//! Caching policy: successes and well-formed failures (the tool ran and
//! said "no") are memoized; timeouts and transient faults are not.

use crate::cache::{CacheEntry, ResultCache};
use crate::error::AnalysisError;
use crate::models::{ToolRequest, ToolResult};
use crate::tools::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    cache: Arc<ResultCache>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        cache: Arc<ResultCache>,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            cache,
            timeout,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Execute every request from one engine turn, returning results in the
    /// same order the requests arrived.
    pub async fn execute_batch(&self, requests: &[ToolRequest]) -> Vec<ToolResult> {
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let request = request.clone();
            let registry = Arc::clone(&self.registry);
            let cache = Arc::clone(&self.cache);
            let permits = Arc::clone(&self.permits);
            let timeout = self.timeout;

            handles.push(tokio::spawn(async move {
                run_one(request, registry, cache, permits, timeout).await
            }));
        }

        let mut results = Vec::with_capacity(requests.len());
        for (handle, request) in handles.into_iter().zip(requests) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    warn!(tool = %request.tool_name, "Tool task panicked: {}", join_err);
                    results.push(ToolResult::failed(
                        request.request_id.clone(),
                        format!("{} task failed: {}", request.tool_name, join_err),
                    ));
                }
            }
        }

        results
    }

    /// Execute a single out-of-band call (snapshot fetch, evidence probe).
    pub async fn execute_one(&self, tool_name: &str, arguments: serde_json::Value) -> ToolResult {
        let request = ToolRequest {
            request_id: format!("direct_{}", uuid::Uuid::new_v4().simple()),
            tool_name: tool_name.to_string(),
            arguments,
        };
        self.execute_batch(std::slice::from_ref(&request))
            .await
            .remove(0)
    }
}

async fn run_one(
    request: ToolRequest,
    registry: Arc<ToolRegistry>,
    cache: Arc<ResultCache>,
    permits: Arc<Semaphore>,
    timeout: Duration,
) -> ToolResult {
    let tool = match registry.get(&request.tool_name) {
        Some(tool) => tool,
        None => {
            warn!(tool = %request.tool_name, "Unknown tool requested");
            // Unknown tool is a genuine fault, but it goes back to the
            // engine as result data so the loop can carry on.
            let fault = AnalysisError::ToolNotFound(request.tool_name.clone());
            return ToolResult::failed(request.request_id, fault.to_string());
        }
    };

    let key = tool.cache_key(&request.arguments);
    if let Some(entry) = cache.get(&key) {
        return entry.to_result(&request.request_id);
    }

    let _permit = permits.acquire().await.expect("semaphore closed");

    debug!(tool = %request.tool_name, key = %key, "Executing tool");

    match tokio::time::timeout(timeout, tool.execute(&request.arguments)).await {
        Ok(Ok(output)) => {
            let entry = cache.put(CacheEntry {
                key,
                success: output.success,
                payload: output.payload,
                error: output.error,
                provenance: tool.provenance(),
            });
            entry.to_result(&request.request_id)
        }
        Ok(Err(fault)) => {
            warn!(tool = %request.tool_name, "Tool fault (uncached): {}", fault);
            ToolResult::failed(request.request_id, fault.to_string())
        }
        Err(_) => {
            warn!(tool = %request.tool_name, "Tool timed out after {:?}", timeout);
            ToolResult::failed(
                request.request_id,
                format!("{} timed out after {:?}", request.tool_name, timeout),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;
    use crate::tools::{Tool, ToolOutput};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts underlying invocations so memoization is observable.
    struct CountingTool {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn description(&self) -> &'static str {
            "test tool"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, arguments: &Value) -> crate::Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(ToolOutput::ok(json!({ "echo": arguments.clone() })))
        }
    }

    fn executor_with(tool: Arc<dyn Tool>, timeout: Duration) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(tool);
        ToolExecutor::new(
            Arc::new(registry),
            Arc::new(ResultCache::new()),
            timeout,
            2,
        )
    }

    fn request(id: &str, args: Value) -> ToolRequest {
        ToolRequest {
            request_id: id.to_string(),
            tool_name: "counting".to_string(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn test_memoization_invokes_tool_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = executor_with(
            Arc::new(CountingTool {
                calls: Arc::clone(&calls),
                delay: Duration::ZERO,
            }),
            Duration::from_secs(5),
        );

        let args = json!({"period": "FY2023"});
        executor.execute_batch(&[request("r1", args.clone())]).await;
        executor.execute_batch(&[request("r2", args.clone())]).await;
        executor.execute_batch(&[request("r3", args)]).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = executor.cache().stats();
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn test_results_rejoin_in_request_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = executor_with(
            Arc::new(CountingTool {
                calls,
                delay: Duration::from_millis(5),
            }),
            Duration::from_secs(5),
        );

        let requests: Vec<ToolRequest> = (0..6)
            .map(|i| request(&format!("r{}", i), json!({"i": i})))
            .collect();
        let results = executor.execute_batch(&requests).await;

        let ids: Vec<&str> = results.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1", "r2", "r3", "r4", "r5"]);
    }

    #[tokio::test]
    async fn test_timeout_is_failure_and_uncached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = executor_with(
            Arc::new(CountingTool {
                calls: Arc::clone(&calls),
                delay: Duration::from_secs(60),
            }),
            Duration::from_millis(10),
        );

        let result = executor.execute_one("counting", json!({"q": 1})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
        assert_eq!(executor.cache().stats().entries, 0);

        // A retry reaches the tool again rather than a poisoned cache entry.
        executor.execute_one("counting", json!({"q": 1})).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_without_caching() {
        let executor = executor_with(
            Arc::new(CountingTool {
                calls: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
            }),
            Duration::from_secs(1),
        );

        let result = executor.execute_one("missing", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Tool not found"));
        assert_eq!(executor.cache().stats().entries, 0);
    }
}
