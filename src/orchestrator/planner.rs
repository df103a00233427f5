//! Plan creation and revision. The LLM proposes a step sequence; a
//! deterministic keyword table stands in when the LLM's output doesn't
//! parse, so planning never simply fails closed.

use crate::llm::{ChatMessage, CompletionOptions, Llm};
use crate::orchestrator::plan::{Plan, PlanStep};
use serde::Deserialize;

pub struct PlanOutcome {
    pub plan: Plan,
    pub reasoning: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlanStepWire {
    description: String,
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: serde_json::Value,
    #[serde(default)]
    depends_on: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct PlanWire {
    steps: Vec<PlanStepWire>,
    #[serde(default)]
    reasoning: String,
}

const TOOL_ALIASES: &[(&str, &str)] = &[("symbol_resolve", "perp_market_list")];

fn remap_alias(tool_name: &str) -> &str {
    TOOL_ALIASES.iter().find(|(alias, _)| *alias == tool_name).map(|(_, real)| *real).unwrap_or(tool_name)
}

/// Deterministic fallback used when the LLM's plan doesn't parse or the
/// goal doesn't look trade-shaped: a single keyword-routed step, or a
/// non-tool "respond from context" step when nothing matches.
fn deterministic_fallback_plan(goal: &str) -> (Vec<PlanStep>, Vec<String>) {
    let lower = goal.to_ascii_lowercase();
    let mut warnings = Vec::new();

    let step = if lower.contains("portfolio") {
        PlanStep::new_tool_step("Check portfolio", "get_portfolio", serde_json::json!({}))
    } else if lower.contains("news") {
        PlanStep::new_tool_step("Search news", "intel_search", serde_json::json!({"query": goal}))
    } else if lower.contains("market") {
        PlanStep::new_tool_step("List markets", "perp_market_list", serde_json::json!({}))
    } else if lower.contains("wallet") {
        PlanStep::new_tool_step("Check wallet", "get_wallet_info", serde_json::json!({}))
    } else {
        warnings.push("no keyword match; falling back to a non-tool response step".to_string());
        PlanStep::new_non_tool_step("Respond from context")
    };

    (vec![step], warnings)
}

fn apply_tool_routing(steps: &mut [PlanStep], available_tools: &[String], warnings: &mut Vec<String>) {
    for step in steps.iter_mut() {
        let Some(tool_name) = step.tool_name.clone() else { continue };
        let remapped = remap_alias(&tool_name).to_string();
        if remapped != tool_name {
            step.tool_name = Some(remapped.clone());
        }
        if !available_tools.contains(&remapped) {
            warnings.push(format!("tool `{remapped}` unavailable; downgrading step to non-tool"));
            step.requires_tool = false;
            step.tool_name = None;
            step.tool_input = None;
        }
    }
}

/// Builds a new plan for `goal`. Trade-shaped goals are expected to cap
/// pre-trade analysis at three steps before a terminal trade tool or a
/// `NO_TRADE_DECISION:` step; that shape comes from the LLM's plan, this
/// function only validates and repairs it.
pub async fn create_plan(
    llm: &dyn Llm,
    goal: &str,
    context: &str,
    identity_prompt: &str,
    available_tools: &[String],
) -> anyhow::Result<PlanOutcome> {
    let prompt = format!(
        "Goal: {goal}\nContext: {context}\nAvailable tools: {}\n\n\
         Produce a JSON plan: {{steps: [{{description, tool_name, tool_input, depends_on}}], reasoning}}. \
         depends_on is a list of step indices (0-based) within this same plan. \
         If the goal asks for a trade, use at most three analysis steps before a terminal `perp_place_order` \
         step or a step whose description starts with `NO_TRADE_DECISION:`.",
        available_tools.join(", "),
    );
    let messages = vec![ChatMessage::system(identity_prompt), ChatMessage::user(prompt)];
    let opts = CompletionOptions { temperature: 0.2, ..Default::default() };
    let completion = llm.complete(&messages, opts).await?;

    let mut warnings = Vec::new();
    let (mut steps, reasoning) = match serde_json::from_str::<PlanWire>(&completion.content) {
        Ok(wire) => {
            let mut ids = Vec::with_capacity(wire.steps.len());
            let mut steps: Vec<PlanStep> = wire
                .steps
                .iter()
                .map(|s| {
                    let step = match &s.tool_name {
                        Some(tool) => PlanStep::new_tool_step(s.description.clone(), tool.clone(), s.tool_input.clone()),
                        None => PlanStep::new_non_tool_step(s.description.clone()),
                    };
                    ids.push(step.id.clone());
                    step
                })
                .collect();
            for (step, wire_step) in steps.iter_mut().zip(wire.steps.iter()) {
                let deps: Vec<String> = wire_step.depends_on.iter().filter_map(|idx| ids.get(*idx).cloned()).collect();
                step.depends_on.extend(deps);
            }
            (steps, wire.reasoning)
        }
        Err(_) => {
            warnings.push("LLM plan did not parse as JSON".to_string());
            let (steps, fallback_warnings) = deterministic_fallback_plan(goal);
            warnings.extend(fallback_warnings);
            (steps, "fallback plan".to_string())
        }
    };

    apply_tool_routing(&mut steps, available_tools, &mut warnings);

    let plan = Plan::new(goal, steps).map_err(|_| anyhow::anyhow!("planner produced a cyclic plan"))?;
    Ok(PlanOutcome { plan, reasoning, warnings })
}

pub struct RevisionOutcome {
    pub plan: Plan,
    pub changes: Vec<String>,
    pub confidence: f64,
}

/// Revises an existing plan in response to a trigger (a reflector
/// suggestion or a tool failure). Prior step statuses, results, and
/// errors survive the revision unless the LLM explicitly overrides them.
pub async fn revise_plan(
    llm: &dyn Llm,
    mut plan: Plan,
    reason: &str,
    context: &str,
    trigger_step_id: &str,
) -> anyhow::Result<RevisionOutcome> {
    let prompt = format!(
        "Goal: {}\nRevision reason: {reason}\nContext: {context}\nTriggering step: {trigger_step_id}\n\
         Current steps: {}\n\n\
         Propose changes as JSON: {{new_steps: [{{description, tool_name, tool_input}}], changes: [string]}}",
        plan.goal,
        serde_json::to_string(&plan.steps).unwrap_or_default(),
    );
    let messages = vec![ChatMessage::user(prompt)];
    let opts = CompletionOptions { temperature: 0.2, ..Default::default() };
    let completion = llm.complete(&messages, opts).await?;

    #[derive(Deserialize)]
    struct RevisionWire {
        #[serde(default)]
        new_steps: Vec<PlanStepWire>,
        #[serde(default)]
        changes: Vec<String>,
    }

    let (changes, confidence_multiplier) = match serde_json::from_str::<RevisionWire>(&completion.content) {
        Ok(wire) => {
            for s in wire.new_steps {
                let step = match &s.tool_name {
                    Some(tool) => PlanStep::new_tool_step(s.description, tool.clone(), s.tool_input),
                    None => PlanStep::new_non_tool_step(s.description),
                };
                plan.push_step(step);
            }
            (wire.changes, 0.9)
        }
        Err(_) => (vec!["revision response did not parse; plan left unchanged aside from bookkeeping".to_string()], 0.8),
    };

    plan.revision_count += 1;
    plan.confidence = (plan.confidence * confidence_multiplier).clamp(0.0, 1.0);
    plan.assert_acyclic().map_err(|_| anyhow::anyhow!("revision produced a cyclic plan"))?;
    plan.updated_at = chrono::Utc::now();

    Ok(RevisionOutcome { confidence: plan.confidence, plan, changes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fake::FakeLlm;

    fn tools() -> Vec<String> {
        vec!["get_portfolio".to_string(), "perp_market_list".to_string(), "perp_place_order".to_string()]
    }

    #[tokio::test]
    async fn valid_plan_json_parses_into_steps_with_dependencies() {
        let llm = FakeLlm::new(vec![
            r#"{"steps":[{"description":"check portfolio","tool_name":"get_portfolio","tool_input":{}},{"description":"place order","tool_name":"perp_place_order","tool_input":{},"depends_on":[0]}],"reasoning":"analyze then trade"}"#,
        ]);
        let outcome = create_plan(&llm, "buy BTC", "", "identity", &tools()).await.unwrap();
        assert_eq!(outcome.plan.steps.len(), 2);
        assert!(outcome.plan.steps[1].depends_on.contains(&outcome.plan.steps[0].id));
    }

    #[tokio::test]
    async fn malformed_plan_falls_back_to_keyword_routing() {
        let llm = FakeLlm::new(vec!["not json"]);
        let outcome = create_plan(&llm, "show me my portfolio", "", "identity", &tools()).await.unwrap();
        assert_eq!(outcome.plan.steps.len(), 1);
        assert_eq!(outcome.plan.steps[0].tool_name.as_deref(), Some("get_portfolio"));
        assert!(!outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn unavailable_tool_is_downgraded_to_non_tool_step() {
        let llm = FakeLlm::new(vec![r#"{"steps":[{"description":"do x","tool_name":"nonexistent_tool","tool_input":{}}],"reasoning":""}"#]);
        let outcome = create_plan(&llm, "do something", "", "identity", &tools()).await.unwrap();
        assert!(!outcome.plan.steps[0].requires_tool);
    }

    #[tokio::test]
    async fn alias_tool_name_is_remapped() {
        let llm = FakeLlm::new(vec![r#"{"steps":[{"description":"resolve","tool_name":"symbol_resolve","tool_input":{}}],"reasoning":""}"#]);
        let outcome = create_plan(&llm, "resolve symbol", "", "identity", &tools()).await.unwrap();
        assert_eq!(outcome.plan.steps[0].tool_name.as_deref(), Some("perp_market_list"));
    }

    #[tokio::test]
    async fn revision_appends_steps_and_bumps_revision_count() {
        let llm = FakeLlm::new(vec![r#"{"new_steps":[{"description":"retry with smaller size","tool_name":"perp_place_order","tool_input":{}}],"changes":["reduced size"]}"#]);
        let plan = Plan::new("buy BTC", vec![PlanStep::new_non_tool_step("step")]).unwrap();
        let outcome = revise_plan(&llm, plan, "order rejected", "", "trigger-id").await.unwrap();
        assert_eq!(outcome.plan.revision_count, 1);
        assert_eq!(outcome.plan.steps.len(), 2);
        assert!(outcome.plan.confidence < 0.5);
    }

    #[tokio::test]
    async fn malformed_revision_still_advances_bookkeeping() {
        let llm = FakeLlm::new(vec!["garbage"]);
        let plan = Plan::new("buy BTC", vec![PlanStep::new_non_tool_step("step")]).unwrap();
        let outcome = revise_plan(&llm, plan, "order rejected", "", "trigger-id").await.unwrap();
        assert_eq!(outcome.plan.revision_count, 1);
        assert_eq!(outcome.plan.steps.len(), 1);
    }
}
