//! Critic pass: reviews the synthesized response against the tool trace
//! once per run, either because the mode mandates it or because a
//! terminal trade tool ran. A disapproval with no rewritten response
//! falls back to a deterministic summary rather than surfacing nothing.

use crate::llm::{ChatMessage, CompletionOptions, Llm};
use crate::orchestrator::tools::ToolExecution;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriticResult {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    pub revised_response: Option<String>,
}

pub struct CriticContext<'a> {
    pub goal: &'a str,
    pub response: &'a str,
    pub tool_executions: &'a [ToolExecution],
    pub fragility_context: Option<&'a str>,
}

/// Runs the critic. On any parse failure from the LLM the run is treated
/// as disapproved with no revision, so `deterministic_fallback` always
/// has a chance to produce a response.
pub async fn run_critic(llm: &dyn Llm, ctx: CriticContext<'_>) -> anyhow::Result<CriticResult> {
    let trace: Vec<String> = ctx
        .tool_executions
        .iter()
        .map(|e| format!("{}: success={} error={:?}", e.tool_name, e.result.success, e.result.error))
        .collect();

    let mut prompt = format!(
        "Goal: {}\nResponse: {}\nTool trace:\n{}\n\nDoes the response accurately reflect what happened? \
         Respond with JSON: {{approved, issues, revised_response}}.",
        ctx.goal,
        ctx.response,
        trace.join("\n"),
    );
    if let Some(fragility) = ctx.fragility_context {
        prompt.push_str(&format!("\nFragility context: {fragility}"));
    }

    let messages = vec![ChatMessage::system("You are a skeptical reviewer of a trading agent's own response."), ChatMessage::user(prompt)];
    let opts = CompletionOptions { temperature: 0.1, ..Default::default() };
    let completion = llm.complete(&messages, opts).await?;
    let result: CriticResult = serde_json::from_str(&completion.content).unwrap_or(CriticResult {
        approved: false,
        issues: vec!["critic response was not valid JSON".to_string()],
        revised_response: None,
    });
    Ok(result)
}

/// Deterministic fallback when the critic disapproves and supplies no
/// rewrite: lists successes, failures (capped at three, with per-attempt
/// detail), and the full tool list.
pub fn deterministic_fallback(tool_executions: &[ToolExecution]) -> String {
    let successes = tool_executions.iter().filter(|e| e.result.success).count();
    let failures: Vec<&ToolExecution> = tool_executions.iter().filter(|e| !e.result.success).collect();

    let mut lines = vec![format!(
        "Action: {} of {} tool call(s) succeeded.",
        successes,
        tool_executions.len()
    )];

    if !failures.is_empty() {
        lines.push(format!("{} call(s) failed.", failures.len()));
        for exec in failures.iter().take(3) {
            let symbol = exec.input.get("symbol").and_then(|v| v.as_str()).unwrap_or("?");
            let side = exec.input.get("side").and_then(|v| v.as_str()).unwrap_or("?");
            let size = exec.input.get("size").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let reduce_only = exec.input.get("reduce_only").and_then(|v| v.as_bool()).unwrap_or(false);
            let error = exec.result.error.clone().unwrap_or_else(|| "unknown error".to_string());
            lines.push(format!(
                "  - {}: symbol={symbol} side={side} size={size} reduce_only={reduce_only} error={error}",
                exec.tool_name,
            ));
        }
    }

    let tool_list: Vec<String> = tool_executions.iter().map(|e| e.tool_name.clone()).collect();
    lines.push(format!("Tools used: {}", tool_list.join(", ")));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fake::FakeLlm;
    use crate::orchestrator::tools::ToolOutcome;
    use chrono::Utc;

    fn exec(tool_name: &str, success: bool, error: Option<&str>, input: serde_json::Value) -> ToolExecution {
        ToolExecution {
            tool_name: tool_name.to_string(),
            input,
            result: if success { ToolOutcome::ok(serde_json::json!({})) } else { ToolOutcome::err(error.unwrap_or("")) },
            timestamp: Utc::now(),
            duration_ms: 0,
            cached: false,
            skipped: false,
        }
    }

    #[tokio::test]
    async fn approved_critic_passes_through() {
        let llm = FakeLlm::new(vec![r#"{"approved":true,"issues":[],"revised_response":null}"#]);
        let executions = vec![exec("perp_place_order", true, None, serde_json::json!({}))];
        let result = run_critic(
            &llm,
            CriticContext { goal: "buy BTC", response: "Action: done.", tool_executions: &executions, fragility_context: None },
        )
        .await
        .unwrap();
        assert!(result.approved);
    }

    #[tokio::test]
    async fn malformed_critic_json_is_treated_as_disapproved() {
        let llm = FakeLlm::new(vec!["not json"]);
        let executions = vec![];
        let result = run_critic(
            &llm,
            CriticContext { goal: "buy BTC", response: "Action: done.", tool_executions: &executions, fragility_context: None },
        )
        .await
        .unwrap();
        assert!(!result.approved);
    }

    #[test]
    fn fallback_lists_failures_with_detail_capped_at_three() {
        let executions = vec![
            exec("perp_place_order", false, Some("insufficient margin"), serde_json::json!({"symbol": "BTC", "side": "buy", "size": 1.0, "reduce_only": false})),
            exec("perp_place_order", false, Some("rejected"), serde_json::json!({"symbol": "ETH", "side": "sell", "size": 2.0, "reduce_only": false})),
            exec("perp_place_order", false, Some("rejected"), serde_json::json!({})),
            exec("perp_place_order", false, Some("rejected"), serde_json::json!({})),
        ];
        let summary = deterministic_fallback(&executions);
        assert!(summary.contains("0 of 4 tool call(s) succeeded"));
        assert!(summary.contains("insufficient margin"));
        assert_eq!(summary.matches("  - perp_place_order").count(), 3);
    }
}
