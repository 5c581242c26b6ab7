use equity_research_agent::{
    agent::Orchestrator,
    engine::{EngineResponse, ScriptedEngine},
    models::{AnalysisRequest, ContentBlock, TokenUsage},
    tools::create_fixture_registry,
    validation::create_default_validation_engine,
    SessionConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

fn text_response(text: &str) -> EngineResponse {
    EngineResponse {
        blocks: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
        tool_requests: vec![],
        usage: TokenUsage {
            input_tokens: 800,
            output_tokens: 250,
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Equity Research Agent starting");

    // Fixture corpus: two filings and a trusted snapshot. A production
    // deployment registers HTTP-backed tools and builds the engine with
    // HttpEngine::from_config here instead.
    let mut filings = HashMap::new();
    filings.insert(
        "FY2023".to_string(),
        "Revenue grew 12% on stable gross margins; management flagged input \
         cost pressure in the second half."
            .to_string(),
    );
    filings.insert(
        "FY2022".to_string(),
        "Revenue grew 4%; gross margin compressed 80bps on freight costs.".to_string(),
    );

    let mut snapshots = HashMap::new();
    snapshots.insert(
        "ACME".to_string(),
        serde_json::json!({"net_margin": 0.224, "gross_margin": 0.41, "pe_ratio": 21.4}),
    );

    let registry = Arc::new(create_fixture_registry(filings, snapshots));

    // Scripted engine so the demo runs offline end to end.
    let engine = Arc::new(ScriptedEngine::new(vec![
        text_response("[[SUMMARY]]FY2023: steady growth, watch input costs.[[/SUMMARY]]"),
        text_response("[[SUMMARY]]FY2022: weaker year, margin compression.[[/SUMMARY]]"),
        text_response(
            r#"[[RECORD]]{"ticker":"ACME","recommendation":"hold","confidence":0.72,
                "metrics":{"net_margin":0.224,"pe_ratio":21.4},
                "thesis":"Solid franchise, fairly priced."}[[/RECORD]]"#,
        ),
    ]));

    let orchestrator = Orchestrator::new(
        engine,
        registry,
        create_default_validation_engine(),
        SessionConfig::from_env(),
    );

    let request = AnalysisRequest::new("ACME", "Acme Corp", "FY2023", vec!["FY2022".to_string()]);

    info!(ticker = %request.ticker, "Running analysis");
    let report = orchestrator.run(request).await?;

    println!("\n=== Analysis Report ===");
    println!(
        "Recommendation: {} (confidence {:.2})",
        report.record.recommendation, report.record.confidence
    );
    println!("Quality score: {:.2}", report.quality_score);
    println!("Issues: {}", report.validation_issues.len());
    println!("Corrections: {}", report.correction_ledger.len());
    println!(
        "Cache: {} hits / {} misses / {} entries",
        report.cache_stats.hits, report.cache_stats.misses, report.cache_stats.entries
    );
    println!(
        "Usage: {} engine calls, {} tool calls, ~${:.4}",
        report.usage.engine_calls, report.usage.tool_calls, report.usage.estimated_cost_usd
    );
    for line in &report.trace {
        println!("  {}", line);
    }

    Ok(())
}
