//! Tool registry: lookup, cache-on-read-tools, confirmation gating,
//! dynamic placeholder resolution, and the default-symbol guardrail.

use crate::limiter::Limiter;
use crate::llm::{ChatMessage, CompletionOptions, Llm};
use crate::venue::Venue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub category: String,
    pub side_effects: bool,
    pub requires_confirmation: bool,
    pub cache_ttl_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
    pub fn err(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }
}

#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub tool_name: String,
    pub input: Value,
    pub result: ToolOutcome,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub cached: bool,
    pub skipped: bool,
}

/// Confirmation prompt for tools with `requires_confirmation=true`. A
/// decline surfaces as a synthetic failed execution with error `"User
/// declined"`, never a run-level failure.
#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    async fn confirm(&self, tool_name: &str, input: &Value) -> bool;
}

pub struct AutoConfirm;
#[async_trait]
impl ConfirmationPrompt for AutoConfirm {
    async fn confirm(&self, _tool_name: &str, _input: &Value) -> bool {
        true
    }
}

pub struct ToolContext {
    pub venue: Option<Arc<dyn Venue>>,
    pub limiter: Option<Arc<dyn Limiter>>,
    pub on_confirmation: Option<Arc<dyn ConfirmationPrompt>>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDef;
    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolOutcome;
}

struct CacheEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    cache: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let tools = tools.into_iter().map(|t| (t.definition().name.clone(), t)).collect();
        Self { tools, cache: Mutex::new(HashMap::new()) }
    }

    pub fn list_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<ToolDef> {
        self.tools.get(name).map(|t| t.definition())
    }

    pub fn get_llm_schemas(&self) -> Vec<(String, String)> {
        self.tools.values().map(|t| {
            let def = t.definition();
            (def.name, def.description)
        }).collect()
    }

    /// Runs the tool, honoring the cache for side-effect-free tools with a
    /// positive TTL and confirmation for tools that require it.
    pub async fn execute(&self, tool_name: &str, input: Value, ctx: &ToolContext) -> ToolExecution {
        let start = Utc::now();
        let Some(tool) = self.tools.get(tool_name) else {
            return ToolExecution {
                tool_name: tool_name.to_string(),
                input,
                result: ToolOutcome::err(format!("unknown tool: {tool_name}")),
                timestamp: start,
                duration_ms: 0,
                cached: false,
                skipped: false,
            };
        };
        let def = tool.definition();

        let cache_key = (tool_name.to_string(), canonical_json(&input));
        if def.cache_ttl_ms > 0 && !def.side_effects {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&cache_key) {
                if entry.expires_at > Utc::now() {
                    return ToolExecution {
                        tool_name: tool_name.to_string(),
                        input,
                        result: ToolOutcome::ok(entry.value.clone()),
                        timestamp: start,
                        duration_ms: 0,
                        cached: true,
                        skipped: false,
                    };
                }
                cache.remove(&cache_key);
            }
        }

        if def.requires_confirmation {
            let approved = match &ctx.on_confirmation {
                Some(prompt) => prompt.confirm(tool_name, &input).await,
                None => false,
            };
            if !approved {
                return ToolExecution {
                    tool_name: tool_name.to_string(),
                    input,
                    result: ToolOutcome::err("User declined"),
                    timestamp: start,
                    duration_ms: 0,
                    cached: false,
                    skipped: false,
                };
            }
        }

        let result = tool.execute(input.clone(), ctx).await;
        let duration_ms = (Utc::now() - start).num_milliseconds().max(0) as u64;

        if def.cache_ttl_ms > 0 && !def.side_effects && result.success {
            if let Some(data) = &result.data {
                let mut cache = self.cache.lock().await;
                cache.insert(
                    cache_key,
                    CacheEntry { value: data.clone(), expires_at: Utc::now() + chrono::Duration::milliseconds(def.cache_ttl_ms as i64) },
                );
            }
        }

        ToolExecution { tool_name: tool_name.to_string(), input, result, timestamp: start, duration_ms, cached: false, skipped: false }
    }

    /// Synthetic success execution for skip rules: redundant `tools.list`
    /// calls, or mutating trade tools in analysis mode without execution
    /// intent.
    pub fn synthetic_skip(tool_name: &str, input: Value) -> ToolExecution {
        ToolExecution {
            tool_name: tool_name.to_string(),
            input,
            result: ToolOutcome::ok(serde_json::json!({"skipped": true})),
            timestamp: Utc::now(),
            duration_ms: 0,
            cached: true,
            skipped: true,
        }
    }
}

fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

const PLACEHOLDER_MARKERS: &[&str] =
    &["to_be_", "to_be_determined", "based_on_step", "TBD", "placeholder", "{...step...}", "FILL_IN"];

pub fn contains_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => PLACEHOLDER_MARKERS.iter().any(|m| s.contains(m)),
        Value::Array(items) => items.iter().any(contains_placeholder),
        Value::Object(map) => map.values().any(contains_placeholder),
        _ => false,
    }
}

/// Asks the LLM to produce a concrete JSON object from prior step results
/// when `input` still contains a placeholder pattern. Falls back to the
/// original input on any parse failure.
pub async fn resolve_dynamic_input(
    llm: &dyn Llm,
    tool_name: &str,
    input: &Value,
    prior_step_results: &[(String, Value)],
) -> Value {
    if !contains_placeholder(input) {
        return input.clone();
    }

    let context: Vec<String> = prior_step_results
        .iter()
        .map(|(id, result)| {
            let mut s = serde_json::to_string(result).unwrap_or_default();
            s.truncate(2000);
            format!("{id}: {s}")
        })
        .collect();

    let prompt = format!(
        "Tool `{tool_name}` has placeholder input {input}. Using these completed step results, \
         produce a JSON object of concrete parameters:\n{}",
        context.join("\n")
    );

    let messages = vec![ChatMessage::user(prompt)];
    let opts = CompletionOptions { temperature: 0.1, ..Default::default() };
    match llm.complete(&messages, opts).await {
        Ok(completion) => serde_json::from_str::<Value>(&completion.content).unwrap_or_else(|_| input.clone()),
        Err(_) => input.clone(),
    }
}

const SYMBOL_REQUIRED_TOOLS: &[&str] = &["perp_market_get", "perp_analyze", "perp_place_order"];
const SYMBOL_BENEFITS_TOOLS: &[&str] = &["perp_open_orders", "perp_positions"];

/// Inserts the configured default symbol when a symbol-bearing tool's
/// input omits `symbol`.
pub fn apply_default_symbol_guardrail(tool_name: &str, mut input: Value, default_symbol: &str) -> Value {
    let needs_symbol = SYMBOL_REQUIRED_TOOLS.contains(&tool_name) || SYMBOL_BENEFITS_TOOLS.contains(&tool_name);
    if !needs_symbol {
        return input;
    }
    if let Value::Object(map) = &mut input {
        let missing = map.get("symbol").map(|v| v.is_null() || v.as_str() == Some("")).unwrap_or(true);
        if missing {
            map.insert("symbol".to_string(), Value::String(default_symbol.to_string()));
        }
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool(ToolDef);
    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDef {
            self.0.clone()
        }
        async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolOutcome {
            ToolOutcome::ok(input)
        }
    }

    fn ctx() -> ToolContext {
        ToolContext { venue: None, limiter: None, on_confirmation: Some(Arc::new(AutoConfirm)) }
    }

    #[tokio::test]
    async fn cached_read_tool_reuses_result() {
        let def = ToolDef {
            name: "get_portfolio".to_string(),
            description: "".to_string(),
            category: "read".to_string(),
            side_effects: false,
            requires_confirmation: false,
            cache_ttl_ms: 60_000,
        };
        let registry = ToolRegistry::new(vec![Arc::new(EchoTool(def))]);
        let first = registry.execute("get_portfolio", serde_json::json!({}), &ctx()).await;
        let second = registry.execute("get_portfolio", serde_json::json!({}), &ctx()).await;
        assert!(!first.cached);
        assert!(second.cached);
    }

    #[tokio::test]
    async fn declined_confirmation_yields_user_declined_error() {
        struct NeverConfirm;
        #[async_trait]
        impl ConfirmationPrompt for NeverConfirm {
            async fn confirm(&self, _tool_name: &str, _input: &Value) -> bool {
                false
            }
        }
        let def = ToolDef {
            name: "perp_place_order".to_string(),
            description: "".to_string(),
            category: "trade".to_string(),
            side_effects: true,
            requires_confirmation: true,
            cache_ttl_ms: 0,
        };
        let registry = ToolRegistry::new(vec![Arc::new(EchoTool(def))]);
        let ctx = ToolContext { venue: None, limiter: None, on_confirmation: Some(Arc::new(NeverConfirm)) };
        let exec = registry.execute("perp_place_order", serde_json::json!({}), &ctx).await;
        assert_eq!(exec.result.error.as_deref(), Some("User declined"));
    }

    #[test]
    fn placeholder_markers_are_detected() {
        assert!(contains_placeholder(&serde_json::json!({"symbol": "to_be_determined"})));
        assert!(!contains_placeholder(&serde_json::json!({"symbol": "BTC"})));
    }

    #[test]
    fn default_symbol_inserted_when_missing() {
        let input = apply_default_symbol_guardrail("perp_market_get", serde_json::json!({}), "BTC");
        assert_eq!(input["symbol"], "BTC");
    }

    #[test]
    fn default_symbol_not_inserted_for_unrelated_tool() {
        let input = apply_default_symbol_guardrail("get_wallet_info", serde_json::json!({}), "BTC");
        assert!(input.get("symbol").is_none());
    }
}
