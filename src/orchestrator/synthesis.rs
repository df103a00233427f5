//! Final response assembly: one LLM call at a mode-appropriate temperature
//! over the goal, memory, and tool trace, followed by deterministic
//! enforcement of the four-line Action/Book State/Risk/Next Action
//! contract for trade-mode responses.

use crate::llm::{ChatMessage, CompletionOptions, Llm};
use crate::orchestrator::tools::ToolExecution;
use std::collections::HashMap;

pub struct SynthesisInput<'a> {
    pub identity_prompt: &'a str,
    pub goal: &'a str,
    pub memory: &'a str,
    pub tool_executions: &'a [ToolExecution],
    pub hypotheses: &'a HashMap<String, String>,
    pub assumptions: &'a HashMap<String, String>,
    pub temperature: f64,
}

pub async fn synthesize(llm: &dyn Llm, input: SynthesisInput<'_>) -> anyhow::Result<String> {
    let results: Vec<serde_json::Value> = input
        .tool_executions
        .iter()
        .map(|e| serde_json::json!({"tool": e.tool_name, "success": e.result.success, "data": e.result.data, "error": e.result.error}))
        .collect();
    let results_json = serde_json::to_string_pretty(&results).unwrap_or_default();

    let prompt = format!(
        "Goal: {}\n\n{}\n\nTool results:\n{}\n\nHypotheses: {:?}\nAssumptions: {:?}\n\n\
         Reply to the user now.",
        input.goal, input.memory, results_json, input.hypotheses, input.assumptions,
    );

    let messages = vec![ChatMessage::system(input.identity_prompt), ChatMessage::user(prompt)];
    let opts = CompletionOptions { temperature: input.temperature, ..Default::default() };
    let completion = llm.complete(&messages, opts).await?;
    Ok(completion.content)
}

/// The deterministic Action line used when the response needs the
/// four-section trade contract enforced: how many orders were placed, or
/// the last failure if none were.
pub fn deterministic_action_line(tool_executions: &[ToolExecution]) -> String {
    let placements: Vec<&ToolExecution> = tool_executions.iter().filter(|e| e.tool_name == "perp_place_order").collect();
    let succeeded = placements.iter().filter(|e| e.result.success).count();

    if succeeded > 0 {
        format!("Action: I executed {succeeded} perp order(s).")
    } else if let Some(last_failure) = placements.iter().rev().find(|e| !e.result.success) {
        let error = last_failure.result.error.clone().unwrap_or_else(|| "unknown error".to_string());
        format!("Action: I did not execute a new perp order. Last perp_place_order failed: {error}")
    } else {
        "Action: I did not execute a new perp order.".to_string()
    }
}

fn has_four_section_shape(response: &str) -> bool {
    ["Action:", "Book State:", "Risk:", "Next Action:"].iter().all(|header| response.contains(header))
}

/// Enforces the Action line on a trade-mode response. If the LLM already
/// produced the four-section shape, only the Action line is overwritten;
/// otherwise the whole reply is replaced with a deterministic contract.
pub fn enforce_trade_contract(response: &str, tool_executions: &[ToolExecution]) -> String {
    let action_line = deterministic_action_line(tool_executions);

    if has_four_section_shape(response) {
        response
            .lines()
            .map(|line| if line.trim_start().starts_with("Action:") { action_line.clone() } else { line.to_string() })
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        format!(
            "{action_line}\nBook State: see recent positions and orders.\nRisk: within configured limits.\nNext Action: continue monitoring.",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tools::ToolOutcome;
    use chrono::Utc;

    fn exec(tool_name: &str, success: bool, error: Option<&str>) -> ToolExecution {
        ToolExecution {
            tool_name: tool_name.to_string(),
            input: serde_json::json!({}),
            result: if success { ToolOutcome::ok(serde_json::json!({})) } else { ToolOutcome::err(error.unwrap_or("")) },
            timestamp: Utc::now(),
            duration_ms: 0,
            cached: false,
            skipped: false,
        }
    }

    #[test]
    fn successful_order_produces_executed_action_line() {
        let executions = vec![exec("perp_place_order", true, None)];
        assert_eq!(deterministic_action_line(&executions), "Action: I executed 1 perp order(s).");
    }

    #[test]
    fn failed_order_surfaces_last_error() {
        let executions = vec![exec("perp_place_order", false, Some("insufficient margin"))];
        let line = deterministic_action_line(&executions);
        assert!(line.contains("insufficient margin"));
    }

    #[test]
    fn four_section_response_only_overwrites_action_line() {
        let response = "Action: placeholder\nBook State: flat\nRisk: low\nNext Action: wait";
        let executions = vec![exec("perp_place_order", true, None)];
        let enforced = enforce_trade_contract(response, &executions);
        assert!(enforced.contains("Book State: flat"));
        assert!(enforced.contains("Action: I executed 1 perp order(s)."));
    }

    #[test]
    fn non_contract_response_is_fully_replaced() {
        let response = "Sure, I bought some BTC for you!";
        let executions = vec![exec("perp_place_order", true, None)];
        let enforced = enforce_trade_contract(response, &executions);
        assert!(enforced.starts_with("Action: I executed 1 perp order(s)."));
        assert!(enforced.contains("Next Action:"));
    }
}
