use bullbear_models::MarketContext;
use bullbear_tools::{is_failure_output, ToolRegistry};
use chrono::{Duration, NaiveDate};
use serde_json::json;
use tracing::{debug, warn};

/// Days of price history fetched before the analysis date.
pub const PRICE_HISTORY_DAYS: i64 = 30;

/// Market context pre-fetched through the registry for a debate.
///
/// Missing tools are skipped and failed calls are left out, so the debate
/// still runs on whatever data could be gathered.
pub async fn gather_context(registry: &ToolRegistry, symbol: &str, date: NaiveDate) -> MarketContext {
    let start = date - Duration::days(PRICE_HISTORY_DAYS);
    let calls = [
        (
            "get_stock_data",
            json!({
                "symbol": symbol,
                "start_date": start.format("%Y-%m-%d").to_string(),
                "end_date": date.format("%Y-%m-%d").to_string(),
            }),
        ),
        ("get_fundamentals", json!({"symbol": symbol})),
        ("get_news", json!({"symbol": symbol, "limit": 10})),
    ];

    let mut context = MarketContext::new();
    for (name, input) in calls {
        if !registry.contains(name) {
            debug!(tool = name, "Tool not registered, skipping context section");
            continue;
        }
        match registry.execute(name, input).await {
            Ok(output) if is_failure_output(&output) => {
                warn!(tool = name, symbol = %symbol, output = %output, "Context tool failed");
            }
            Ok(output) => context.push(name, output),
            Err(e) => {
                warn!(tool = name, symbol = %symbol, error = %e, "Context tool could not run");
            }
        }
    }
    context
}
