//! Orchestrator state machine: mode detection, memory assembly, planning,
//! an execution loop that interleaves tool calls with reflection and
//! occasional plan revision, synthesis, and a final critic pass before
//! the decision is journaled.

pub mod builtin_tools;
pub mod critic;
pub mod fragility;
pub mod memory;
pub mod mode;
pub mod plan;
pub mod planner;
pub mod reflector;
pub mod synthesis;
pub mod tools;

use crate::journal::{DecisionAudit, IncidentLog, Journal, PlaybookStore};
use crate::limiter::Limiter;
use crate::llm::Llm;
use crate::trade_contract::entry_validator::validate_entry;
use crate::trade_contract::normalize::{normalize_order_input, RawOrderInput};
use crate::trade_contract::reduce_only::reconcile_reduce_only;
use crate::trade_contract::retry::submit_with_retry;
use crate::trade_contract::terminal::{classify_blocker, inject_remediation, inject_terminal_contract};
use crate::venue::{OrderRequest, Venue};
use critic::{deterministic_fallback, run_critic, CriticContext, CriticResult};
use fragility::{scan_fragility, FragilityScanResult};
use memory::{assemble_memory, MemoryInputs};
use mode::{detect_mode, has_execution_intent, mode_config, Mode};
use plan::{Plan, PlanStep, StepStatus};
use planner::{create_plan, revise_plan};
use reflector::{merge_updates, reflect, ReflectInput};
use synthesis::{enforce_trade_contract, synthesize, SynthesisInput};
use tools::{apply_default_symbol_guardrail, resolve_dynamic_input, ConfirmationPrompt, ToolContext, ToolExecution, ToolOutcome, ToolRegistry};

use std::collections::HashMap;
use std::sync::Arc;

const MAX_REVISIONS: u32 = 3;
const TRADE_PROGRESS_GUARD_LIMIT: u32 = 3;

pub struct OrchestratorConfig {
    pub identity_prompt: String,
    pub max_parallel_read_steps: usize,
    pub base_slippage_bps: u32,
    pub max_order_retries: u32,
    pub default_symbol: String,
    pub per_order_reserve_usd: f64,
    /// Gates the one-shot pre-trade fragility scan; disabled deployments
    /// skip straight to order submission with no scan attempted.
    pub fragility_scan_enabled: bool,
}

pub struct Orchestrator {
    llm: Arc<dyn Llm>,
    venue: Arc<dyn Venue>,
    limiter: Arc<dyn Limiter>,
    journal: Arc<dyn Journal>,
    incidents: Arc<dyn IncidentLog>,
    playbooks: Arc<dyn PlaybookStore>,
    registry: Arc<ToolRegistry>,
    config: OrchestratorConfig,
}

pub struct RunOptions {
    pub force_mode: Option<Mode>,
    pub session_memory: Option<String>,
    pub kb_snippets: Vec<String>,
    pub playbook_keys: Vec<String>,
    pub max_iterations: u32,
    pub on_confirmation: Option<Arc<dyn ConfirmationPrompt>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force_mode: None,
            session_memory: None,
            kb_snippets: Vec::new(),
            playbook_keys: Vec::new(),
            max_iterations: 8,
            on_confirmation: None,
        }
    }
}

pub struct RunOutcome {
    pub mode: Mode,
    pub response: String,
    pub plan: Plan,
    pub tool_executions: Vec<ToolExecution>,
    pub critic: Option<CriticResult>,
    pub audit_id: i64,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn Llm>,
        venue: Arc<dyn Venue>,
        limiter: Arc<dyn Limiter>,
        journal: Arc<dyn Journal>,
        incidents: Arc<dyn IncidentLog>,
        playbooks: Arc<dyn PlaybookStore>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { llm, venue, limiter, journal, incidents, playbooks, registry, config }
    }

    pub async fn run(&self, goal: &str, options: RunOptions) -> anyhow::Result<RunOutcome> {
        let mode = detect_mode(goal, options.force_mode);
        let allowed_tools = self.registry.list_names();
        let allowed_tool_refs: Vec<&str> = allowed_tools.iter().map(|s| s.as_str()).collect();
        let mode_cfg = mode_config(mode, &allowed_tool_refs, options.max_iterations);

        let memory = assemble_memory(
            self.incidents.as_ref(),
            self.playbooks.as_ref(),
            MemoryInputs {
                session_memory: options.session_memory.as_deref(),
                kb_snippets: options.kb_snippets.clone(),
                playbook_keys: options.playbook_keys.clone(),
            },
        )
        .await?;

        let tool_ctx = ToolContext {
            venue: Some(self.venue.clone()),
            limiter: Some(self.limiter.clone()),
            on_confirmation: options.on_confirmation.clone(),
        };

        let mut tool_executions: Vec<ToolExecution> = Vec::new();

        let mut planning_context = memory.clone();
        if mode == Mode::Trade && mode_cfg.allowed_tools.iter().any(|t| t == "get_portfolio") {
            let exec = self.registry.execute("get_portfolio", serde_json::json!({}), &tool_ctx).await;
            if let Some(data) = &exec.result.data {
                planning_context.push_str(&format!("\n\n## Current portfolio\n{data}"));
            }
            tool_executions.push(exec);
        }

        let plan_outcome = create_plan(
            self.llm.as_ref(),
            goal,
            &planning_context,
            &self.config.identity_prompt,
            &mode_cfg.allowed_tools,
        )
        .await?;
        let mut plan = plan_outcome.plan;

        if mode == Mode::Trade && has_execution_intent(goal) {
            inject_terminal_contract(&mut plan, &mode_cfg.allowed_tools);
        }

        let mut hypotheses: HashMap<String, String> = HashMap::new();
        let mut assumptions: HashMap<String, String> = HashMap::new();

        let mut iterations = 0u32;
        let mut consecutive_non_terminal_tool_steps: u32 = 0;
        let mut fragility: Option<FragilityScanResult> = None;

        while !plan.complete && iterations < mode_cfg.max_iterations {
            iterations += 1;

            // Trade progress guard: too many non-terminal tool-bearing
            // steps in a row with no terminal step pending means the plan
            // is stalling short of a decision; cut it off and fall back to
            // the injected terminal contract.
            if mode == Mode::Trade
                && consecutive_non_terminal_tool_steps > TRADE_PROGRESS_GUARD_LIMIT
                && !plan.has_pending_terminal_step()
            {
                for s in plan.steps.iter_mut() {
                    if s.status == StepStatus::Pending && !s.is_terminal_trade_step() {
                        s.status = StepStatus::Skipped;
                    }
                }
                inject_terminal_contract(&mut plan, &mode_cfg.allowed_tools);
                consecutive_non_terminal_tool_steps = 0;
                plan.recompute_complete();
                continue;
            }

            let ready: Vec<PlanStep> = plan.ready_steps().into_iter().cloned().collect();
            if ready.is_empty() {
                break;
            }

            for step in ready.iter().filter(|s| !s.requires_tool) {
                if let Some(s) = plan.step_mut(&step.id) {
                    s.status = StepStatus::Complete;
                }
            }
            let tool_ready: Vec<PlanStep> = ready.into_iter().filter(|s| s.requires_tool).collect();

            // Parallel read batching: only a leading, contiguous run of
            // read-only steps (no side effects, no confirmation) is run
            // concurrently; anything after the first non-read-only step
            // waits for a later iteration's single-step path.
            let mut batch: Vec<PlanStep> = Vec::new();
            for step in &tool_ready {
                if batch.len() >= self.config.max_parallel_read_steps.max(1) {
                    break;
                }
                let tool_name = step.tool_name.clone().unwrap_or_default();
                let is_read_only = self
                    .registry
                    .get(&tool_name)
                    .map(|d| !d.side_effects && !d.requires_confirmation)
                    .unwrap_or(false);
                if !is_read_only {
                    break;
                }
                batch.push(step.clone());
            }

            if !batch.is_empty() {
                let prior_results: Vec<(String, serde_json::Value)> = plan
                    .steps
                    .iter()
                    .filter(|s| s.status == StepStatus::Complete)
                    .filter_map(|s| s.result.clone().map(|r| (s.id.clone(), r)))
                    .collect();

                let batch_results = futures_util::future::join_all(
                    batch.iter().map(|step| self.execute_read_only_step(step, &prior_results, &tool_ctx)),
                )
                .await;

                for (step_id, exec) in batch_results {
                    let success = exec.result.success;
                    let data = exec.result.data.clone();
                    let error = exec.result.error.clone();
                    tool_executions.push(exec);

                    if let Some(s) = plan.step_mut(&step_id) {
                        s.status = if success { StepStatus::Complete } else { StepStatus::Failed };
                        s.result = data;
                        s.error = error.clone();
                    }
                    if !success {
                        let blocker = classify_blocker(error.as_deref().unwrap_or(""));
                        inject_remediation(&mut plan, &step_id, blocker, &mode_cfg.allowed_tools);
                    }

                    let description =
                        plan.steps.iter().find(|s| s.id == step_id).map(|s| s.description.clone()).unwrap_or_default();
                    let reflection = reflect(
                        self.llm.as_ref(),
                        ReflectInput {
                            goal,
                            last_step_description: &description,
                            last_step_failed: !success,
                            tool_result_summary: &error.clone().unwrap_or_else(|| "ok".to_string()),
                            current_hypotheses: &hypotheses,
                            current_assumptions: &assumptions,
                            current_confidence: plan.confidence,
                        },
                    )
                    .await?;
                    merge_updates(&mut hypotheses, reflection.hypothesis_updates.clone());
                    merge_updates(&mut assumptions, reflection.assumption_updates.clone());
                    plan.confidence = (plan.confidence + reflection.confidence_change).clamp(0.0, 1.0);
                    // Plan revision is disabled for steps run inside the
                    // read-only parallel batch, to avoid cross-step
                    // revision races; `suggest_revision` is not consulted.

                    consecutive_non_terminal_tool_steps += 1;
                }
            } else if let Some(step) = tool_ready.first() {
                let prior_results: Vec<(String, serde_json::Value)> = plan
                    .steps
                    .iter()
                    .filter(|s| s.status == StepStatus::Complete)
                    .filter_map(|s| s.result.clone().map(|r| (s.id.clone(), r)))
                    .collect();

                let step_id = step.id.clone();
                let tool_name = step.tool_name.clone().unwrap_or_default();

                if mode != Mode::Trade && mode::is_mutating_trade_tool(&tool_name) {
                    if let Some(s) = plan.step_mut(&step_id) {
                        s.status = StepStatus::Skipped;
                    }
                } else {
                    let mut input = step.tool_input.clone().unwrap_or(serde_json::json!({}));
                    if tools::contains_placeholder(&input) {
                        input = resolve_dynamic_input(self.llm.as_ref(), &tool_name, &input, &prior_results).await;
                    }
                    input = apply_default_symbol_guardrail(&tool_name, input, &self.config.default_symbol);

                    if tool_name == "perp_place_order" && fragility.is_none() && self.config.fragility_scan_enabled {
                        let market_id = input
                            .get("symbol")
                            .and_then(|v| v.as_str())
                            .unwrap_or(&self.config.default_symbol)
                            .to_string();
                        fragility = Some(scan_fragility(self.venue.as_ref(), &market_id).await);
                    }

                    let (success, data, error, exec) = if tool_name == "perp_place_order" {
                        self.execute_terminal_order(input).await
                    } else {
                        let exec = self.registry.execute(&tool_name, input, &tool_ctx).await;
                        (exec.result.success, exec.result.data.clone(), exec.result.error.clone(), exec)
                    };
                    tool_executions.push(exec);

                    if let Some(s) = plan.step_mut(&step_id) {
                        s.status = if success { StepStatus::Complete } else { StepStatus::Failed };
                        s.result = data;
                        s.error = error.clone();
                    }

                    if !success {
                        let blocker = classify_blocker(error.as_deref().unwrap_or(""));
                        inject_remediation(&mut plan, &step_id, blocker, &mode_cfg.allowed_tools);
                    }

                    let reflection = reflect(
                        self.llm.as_ref(),
                        ReflectInput {
                            goal,
                            last_step_description: &step.description,
                            last_step_failed: !success,
                            tool_result_summary: &error.clone().unwrap_or_else(|| "ok".to_string()),
                            current_hypotheses: &hypotheses,
                            current_assumptions: &assumptions,
                            current_confidence: plan.confidence,
                        },
                    )
                    .await?;
                    merge_updates(&mut hypotheses, reflection.hypothesis_updates.clone());
                    merge_updates(&mut assumptions, reflection.assumption_updates.clone());
                    plan.confidence = (plan.confidence + reflection.confidence_change).clamp(0.0, 1.0);

                    if reflection.suggest_revision && plan.revision_count < MAX_REVISIONS {
                        let reason = reflection
                            .revision_reason
                            .clone()
                            .unwrap_or_else(|| "reflector requested revision".to_string());
                        let revision = revise_plan(self.llm.as_ref(), plan, &reason, &planning_context, &step_id).await?;
                        plan = revision.plan;
                    }

                    if step.is_terminal_trade_step() {
                        consecutive_non_terminal_tool_steps = 0;
                    } else {
                        consecutive_non_terminal_tool_steps += 1;
                    }
                }
            }

            plan.recompute_complete();
        }

        let mut response = synthesize(
            self.llm.as_ref(),
            SynthesisInput {
                identity_prompt: &self.config.identity_prompt,
                goal,
                memory: &memory,
                tool_executions: &tool_executions,
                hypotheses: &hypotheses,
                assumptions: &assumptions,
                temperature: mode_cfg.synthesis_temperature,
            },
        )
        .await?;

        if mode == Mode::Trade {
            response = enforce_trade_contract(&response, &tool_executions);
        }

        let ran_terminal_trade = tool_executions.iter().any(|e| e.tool_name == "perp_place_order");
        let fragility_context_line = fragility.as_ref().map(|f| f.as_context_line());
        let critic_result = if mode_cfg.requires_critic || ran_terminal_trade {
            let result = run_critic(
                self.llm.as_ref(),
                CriticContext {
                    goal,
                    response: &response,
                    tool_executions: &tool_executions,
                    fragility_context: fragility_context_line.as_deref(),
                },
            )
            .await?;
            if !result.approved {
                response = result.revised_response.clone().unwrap_or_else(|| deterministic_fallback(&tool_executions));
            }
            Some(result)
        } else {
            None
        };

        let audit = DecisionAudit {
            mode: mode.as_str().to_string(),
            goal: goal.to_string(),
            market_id: None,
            prediction_id: None,
            trade_action: ran_terminal_trade.then(|| "perp_place_order".to_string()),
            outcome: Some(if plan.complete { "executed".to_string() } else { "incomplete".to_string() }),
            amount: None,
            confidence: plan.confidence,
            critic_approved: critic_result.as_ref().map(|c| c.approved),
            critic_issues: critic_result.as_ref().map(|c| c.issues.clone()).unwrap_or_default(),
            fragility_score: fragility.as_ref().map(|f| f.score),
            tool_calls: tool_executions.len() as u32,
            iterations,
            tool_trace: serde_json::to_value(
                tool_executions
                    .iter()
                    .map(|e| serde_json::json!({"tool": e.tool_name, "success": e.result.success}))
                    .collect::<Vec<_>>(),
            )
            .unwrap_or_default(),
            plan_trace: serde_json::to_value(&plan).unwrap_or_default(),
        };
        let audit_id = self.journal.append_decision(&audit).await?;

        Ok(RunOutcome { mode, response, plan, tool_executions, critic: critic_result, audit_id })
    }

    /// Runs the terminal `perp_place_order` step through normalization,
    /// entry validation, and the retry-with-widening execution strategy,
    /// rather than through the generic tool registry.
    async fn execute_terminal_order(
        &self,
        input: serde_json::Value,
    ) -> (bool, Option<serde_json::Value>, Option<String>, ToolExecution) {
        let raw: RawOrderInput = match serde_json::from_value(input.clone()) {
            Ok(r) => r,
            Err(e) => return self.failed_order_execution(input, format!("invalid order input: {e}")),
        };
        let mut normalized = normalize_order_input(&raw);

        if let Err(violation) = validate_entry(&normalized, chrono::Utc::now().timestamp_millis()) {
            return self.failed_order_execution(input, violation.to_string());
        }

        if normalized.reduce_only {
            let state = match self.venue.get_clearinghouse_state().await {
                Ok(s) => s,
                Err(e) => return self.failed_order_execution(input, e.to_string()),
            };
            normalized = match reconcile_reduce_only(&normalized, &state, true) {
                Ok(reconciled) => reconciled,
                Err(e) => return self.failed_order_execution(input, e.to_string()),
            };
        }

        let req = OrderRequest {
            client_order_id: uuid::Uuid::new_v4().to_string(),
            symbol: normalized.symbol.clone(),
            side: normalized.side,
            size: normalized.size,
            order_type: "market".to_string(),
            reduce_only: normalized.reduce_only,
            slippage_bps: self.config.base_slippage_bps,
        };

        let retry_outcome = match submit_with_retry(
            self.venue.as_ref(),
            self.limiter.as_ref(),
            req,
            self.config.base_slippage_bps,
            self.config.max_order_retries,
            self.config.per_order_reserve_usd,
        )
        .await
        {
            Ok(o) => o,
            Err(e) => return self.failed_order_execution(input, e.to_string()),
        };

        match retry_outcome.result {
            Ok(order_result) => {
                let data = serde_json::to_value(&order_result).unwrap_or_default();
                let exec = ToolExecution {
                    tool_name: "perp_place_order".to_string(),
                    input,
                    result: ToolOutcome::ok(data.clone()),
                    timestamp: chrono::Utc::now(),
                    duration_ms: 0,
                    cached: false,
                    skipped: false,
                };
                (true, Some(data), None, exec)
            }
            Err(venue_error) => self.failed_order_execution(input, venue_error.to_string()),
        }
    }

    /// Executes a single step already known to be read-only, for use inside
    /// the concurrent parallel-read batch.
    async fn execute_read_only_step(
        &self,
        step: &PlanStep,
        prior_results: &[(String, serde_json::Value)],
        tool_ctx: &ToolContext,
    ) -> (String, ToolExecution) {
        let tool_name = step.tool_name.clone().unwrap_or_default();
        let mut input = step.tool_input.clone().unwrap_or(serde_json::json!({}));
        if tools::contains_placeholder(&input) {
            input = resolve_dynamic_input(self.llm.as_ref(), &tool_name, &input, prior_results).await;
        }
        input = apply_default_symbol_guardrail(&tool_name, input, &self.config.default_symbol);
        let exec = self.registry.execute(&tool_name, input, tool_ctx).await;
        (step.id.clone(), exec)
    }

    fn failed_order_execution(
        &self,
        input: serde_json::Value,
        error: String,
    ) -> (bool, Option<serde_json::Value>, Option<String>, ToolExecution) {
        let exec = ToolExecution {
            tool_name: "perp_place_order".to_string(),
            input,
            result: ToolOutcome::err(error.clone()),
            timestamp: chrono::Utc::now(),
            duration_ms: 0,
            cached: false,
            skipped: false,
        };
        (false, None, Some(error), exec)
    }
}
