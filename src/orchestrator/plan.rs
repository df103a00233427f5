//! Plan / PlanStep DAG: steps are nodes with `depends_on` edges to prior
//! step ids; readiness is a scan, not a topological sort, since
//! dependencies only point at ids declared earlier. Acyclicity is
//! asserted on creation and on every revision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Complete,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    pub requires_tool: bool,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub status: StepStatus,
    pub depends_on: HashSet<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl PlanStep {
    pub fn new_tool_step(
        description: impl Into<String>,
        tool_name: impl Into<String>,
        tool_input: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            requires_tool: true,
            tool_name: Some(tool_name.into()),
            tool_input: Some(tool_input),
            status: StepStatus::Pending,
            depends_on: HashSet::new(),
            result: None,
            error: None,
        }
    }

    pub fn new_non_tool_step(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            requires_tool: false,
            tool_name: None,
            tool_input: None,
            status: StepStatus::Pending,
            depends_on: HashSet::new(),
            result: None,
            error: None,
        }
    }

    pub fn depending_on(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.depends_on.extend(ids);
        self
    }

    /// A terminal trade step: its tool is in the terminal set, or it's a
    /// non-tool step whose description begins with the `NO_TRADE_DECISION:`
    /// sentinel.
    pub fn is_terminal_trade_step(&self) -> bool {
        if let Some(tool) = &self.tool_name {
            return tool == "perp_place_order" || tool == "perp_cancel_order";
        }
        self.description.starts_with("NO_TRADE_DECISION:")
    }

    pub fn has_placeholder_input(&self) -> bool {
        let Some(input) = &self.tool_input else { return false };
        placeholder_patterns_present(input)
    }
}

const PLACEHOLDER_MARKERS: &[&str] =
    &["to_be_", "to_be_determined", "based_on_step", "TBD", "placeholder", "{...step...}", "FILL_IN"];

fn placeholder_patterns_present(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => PLACEHOLDER_MARKERS.iter().any(|m| s.contains(m)),
        serde_json::Value::Array(items) => items.iter().any(placeholder_patterns_present),
        serde_json::Value::Object(map) => map.values().any(placeholder_patterns_present),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub confidence: f64,
    pub blockers: Vec<String>,
    pub revision_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleDetected;

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<PlanStep>) -> Result<Self, CycleDetected> {
        let now = Utc::now();
        let plan = Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            steps,
            confidence: 0.5,
            blockers: Vec::new(),
            revision_count: 0,
            created_at: now,
            updated_at: now,
            complete: false,
        };
        plan.assert_acyclic()?;
        Ok(plan)
    }

    /// Dependencies only reference ids declared at or before the current
    /// step, so a cycle can only arise from a step depending on itself or a
    /// later-declared id that in turn depends back on it. Detected via a
    /// straightforward DFS over declared ids.
    pub fn assert_acyclic(&self) -> Result<(), CycleDetected> {
        let by_id: std::collections::HashMap<&str, &PlanStep> =
            self.steps.iter().map(|s| (s.id.as_str(), s)).collect();

        fn visit<'a>(
            id: &'a str,
            by_id: &std::collections::HashMap<&'a str, &'a PlanStep>,
            visiting: &mut HashSet<&'a str>,
            done: &mut HashSet<&'a str>,
        ) -> Result<(), CycleDetected> {
            if done.contains(id) {
                return Ok(());
            }
            if !visiting.insert(id) {
                return Err(CycleDetected);
            }
            if let Some(step) = by_id.get(id) {
                for dep in &step.depends_on {
                    visit(dep.as_str(), by_id, visiting, done)?;
                }
            }
            visiting.remove(id);
            done.insert(id);
            Ok(())
        }

        let mut visiting = HashSet::new();
        let mut done = HashSet::new();
        for step in &self.steps {
            visit(step.id.as_str(), &by_id, &mut visiting, &mut done)?;
        }
        Ok(())
    }

    /// All `pending` steps whose dependencies are all `complete`, in
    /// declaration order.
    pub fn ready_steps(&self) -> Vec<&PlanStep> {
        let complete_ids: HashSet<&str> = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Complete)
            .map(|s| s.id.as_str())
            .collect();

        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .filter(|s| s.depends_on.iter().all(|d| complete_ids.contains(d.as_str())))
            .collect()
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// `complete` iff every step is `complete` or `skipped`.
    pub fn recompute_complete(&mut self) {
        self.complete = self
            .steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Complete | StepStatus::Skipped));
        self.updated_at = Utc::now();
    }

    pub fn has_pending_terminal_step(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Pending && s.is_terminal_trade_step())
    }

    pub fn has_any_terminal_step(&self) -> bool {
        self.steps.iter().any(|s| s.is_terminal_trade_step())
    }

    pub fn push_step(&mut self, step: PlanStep) {
        self.steps.push(step);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_steps_respect_dependencies() {
        let mut a = PlanStep::new_non_tool_step("a");
        let a_id = a.id.clone();
        a.status = StepStatus::Complete;
        let b = PlanStep::new_non_tool_step("b").depending_on([a_id.clone()]);
        let c = PlanStep::new_non_tool_step("c");

        let plan = Plan::new("goal", vec![a, b, c]).unwrap();
        let ready_ids: Vec<&str> = plan.ready_steps().iter().map(|s| s.description.as_str()).collect();
        assert_eq!(ready_ids, vec!["b", "c"]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut step = PlanStep::new_non_tool_step("loop");
        let id = step.id.clone();
        step.depends_on.insert(id);
        assert_eq!(Plan::new("goal", vec![step]), Err(CycleDetected));
    }

    #[test]
    fn complete_iff_all_complete_or_skipped() {
        let mut a = PlanStep::new_non_tool_step("a");
        a.status = StepStatus::Complete;
        let mut b = PlanStep::new_non_tool_step("b");
        b.status = StepStatus::Skipped;
        let mut plan = Plan::new("goal", vec![a, b]).unwrap();
        plan.recompute_complete();
        assert!(plan.complete);
    }

    #[test]
    fn placeholder_detection_matches_known_markers() {
        let step = PlanStep::new_tool_step(
            "place order",
            "perp_place_order",
            serde_json::json!({"symbol": "to_be_determined"}),
        );
        assert!(step.has_placeholder_input());
    }
}
