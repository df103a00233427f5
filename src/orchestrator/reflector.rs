//! Post-step reflection: given the current plan state and the latest tool
//! result, the LLM updates hypotheses and assumptions, adjusts confidence,
//! and optionally flags that the plan should be revised.

use crate::llm::{ChatMessage, CompletionOptions, Llm};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reflection {
    #[serde(default)]
    pub hypothesis_updates: HashMap<String, String>,
    #[serde(default)]
    pub assumption_updates: HashMap<String, String>,
    #[serde(default)]
    pub confidence_change: f64,
    #[serde(default)]
    pub new_information: Vec<String>,
    pub next_step: Option<String>,
    #[serde(default)]
    pub suggest_revision: bool,
    pub revision_reason: Option<String>,
}

const FAILURE_CUES: &[&str] =
    &["failed", "error", "unexpected", "mismatch", "invalid", "missing", "insufficient", "blocked", "no data"];

/// A revision is warranted only when the last execution failed, or the
/// reflector's own stated reason matches one of the known failure cues.
/// This keeps plan churn from a reflector that merely disagrees with a
/// successful result.
pub fn should_trigger_revision(last_step_failed: bool, revision_reason: Option<&str>) -> bool {
    if last_step_failed {
        return true;
    }
    match revision_reason {
        Some(reason) => {
            let lower = reason.to_ascii_lowercase();
            FAILURE_CUES.iter().any(|cue| lower.contains(cue))
        }
        None => false,
    }
}

pub struct ReflectInput<'a> {
    pub goal: &'a str,
    pub last_step_description: &'a str,
    pub last_step_failed: bool,
    pub tool_result_summary: &'a str,
    pub current_hypotheses: &'a HashMap<String, String>,
    pub current_assumptions: &'a HashMap<String, String>,
    pub current_confidence: f64,
}

/// Runs one reflection pass over the LLM. Confidence is clamped into
/// [0, 1] and hypotheses/assumptions are merged onto the caller's maps by
/// key, never replaced wholesale.
pub async fn reflect(llm: &dyn Llm, input: ReflectInput<'_>) -> anyhow::Result<Reflection> {
    let prompt = format!(
        "Goal: {}\nLast step: {} (failed={})\nTool result: {}\nCurrent hypotheses: {:?}\nCurrent assumptions: {:?}\n\
         Respond with JSON: {{hypothesis_updates, assumption_updates, confidence_change, new_information, next_step, suggest_revision, revision_reason}}",
        input.goal,
        input.last_step_description,
        input.last_step_failed,
        input.tool_result_summary,
        input.current_hypotheses,
        input.current_assumptions,
    );
    let messages = vec![ChatMessage::system("You are a trading agent's reflection module."), ChatMessage::user(prompt)];
    let opts = CompletionOptions { temperature: 0.2, ..Default::default() };
    let completion = llm.complete(&messages, opts).await?;
    let mut reflection: Reflection = serde_json::from_str(&completion.content).unwrap_or_default();

    let new_confidence = (input.current_confidence + reflection.confidence_change).clamp(0.0, 1.0);
    reflection.confidence_change = new_confidence - input.current_confidence;

    if !reflection.suggest_revision {
        reflection.suggest_revision =
            should_trigger_revision(input.last_step_failed, reflection.revision_reason.as_deref());
    }

    Ok(reflection)
}

/// Merges updates onto a base map by key, in place.
pub fn merge_updates(base: &mut HashMap<String, String>, updates: HashMap<String, String>) {
    for (k, v) in updates {
        base.insert(k, v);
    }
}
