//! End-to-end orchestrator runs against fake LLM/venue doubles: a trade
//! goal that needs the terminal order injected and submitted, and a
//! critic disapproval that falls back to the deterministic summary.

use perpsentinel::journal::SqliteJournal;
use perpsentinel::limiter::SqliteLimiter;
use perpsentinel::llm::fake::FakeLlm;
use perpsentinel::orchestrator::builtin_tools::default_registry;
use perpsentinel::orchestrator::mode::Mode;
use perpsentinel::orchestrator::{Orchestrator, OrchestratorConfig, RunOptions};
use perpsentinel::venue::fake::FakeVenue;
use std::sync::Arc;

fn build_orchestrator(llm: FakeLlm) -> Orchestrator {
    Orchestrator::new(
        Arc::new(llm),
        Arc::new(FakeVenue::new()),
        Arc::new(SqliteLimiter::open_in_memory(1000.0).unwrap()),
        Arc::new(SqliteJournal::open_in_memory().unwrap()),
        Arc::new(SqliteJournal::open_in_memory().unwrap()),
        Arc::new(SqliteJournal::open_in_memory().unwrap()),
        Arc::new(default_registry()),
        OrchestratorConfig {
            identity_prompt: "You are a disciplined, risk-aware perpetual futures trading agent.".to_string(),
            max_parallel_read_steps: 3,
            base_slippage_bps: 10,
            max_order_retries: 3,
            default_symbol: "BTC".to_string(),
            per_order_reserve_usd: 25.0,
            fragility_scan_enabled: true,
        },
    )
}

/// S1: a trade-shaped, execution-intent goal with no terminal step in the
/// LLM's plan gets one injected, resolved through the placeholder path,
/// submitted to the venue, and wrapped in the four-section contract.
#[tokio::test]
async fn execution_intent_goal_submits_injected_terminal_order() {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let time_stop = now_ms + 10 * 60 * 1000;
    let order_json = format!(
        r#"{{"symbol":"BTC","side":"buy","size":0.01,"reduce_only":false,"trade_archetype":"scalp","invalidation_type":"price_level","invalidation_price":60000,"time_stop_at_ms":{time_stop},"take_profit_r":1.5,"trail_mode":"atr"}}"#
    );

    let llm = FakeLlm::new(vec![
        r#"{"steps":[],"reasoning":"no analysis needed, go straight to execution"}"#,
        r#"{"hypothesis_updates":{},"assumption_updates":{},"confidence_change":0.0,"new_information":[],"next_step":null,"suggest_revision":false,"revision_reason":null}"#,
        r#"{"hypothesis_updates":{},"assumption_updates":{},"confidence_change":0.0,"new_information":[],"next_step":null,"suggest_revision":false,"revision_reason":null}"#,
        &order_json,
        r#"{"hypothesis_updates":{},"assumption_updates":{},"confidence_change":0.0,"new_information":[],"next_step":null,"suggest_revision":false,"revision_reason":null}"#,
        "Bought some BTC for you.",
        r#"{"approved":true,"issues":[],"revised_response":null}"#,
    ]);

    let orchestrator = build_orchestrator(llm);
    let outcome = orchestrator
        .run("Buy BTC perp autonomously", RunOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.mode, Mode::Trade);
    assert!(outcome.plan.has_any_terminal_step());
    assert!(outcome
        .tool_executions
        .iter()
        .any(|e| e.tool_name == "perp_place_order" && e.result.success));
    assert!(outcome.response.starts_with("Action: I executed 1 perp order(s)."));
    assert!(outcome.response.contains("Next Action:"));
    assert!(outcome.critic.unwrap().approved);
}

/// S6: the critic disapproves and supplies no rewrite, so the response is
/// replaced with the deterministic tool-trace summary rather than left as
/// the LLM's (now-rejected) text.
#[tokio::test]
async fn critic_disapproval_without_rewrite_falls_back_to_deterministic_summary() {
    let llm = FakeLlm::new(vec![
        r#"{"steps":[],"reasoning":"no extra analysis needed"}"#,
        "Your BTC position carries moderate risk given current funding.",
        r#"{"approved":false,"issues":["lacks risk quantification"],"revised_response":null}"#,
    ]);

    let orchestrator = build_orchestrator(llm);
    let outcome = orchestrator
        .run(
            "What's your risk assessment of my BTC perp position?",
            RunOptions { force_mode: Some(Mode::Trade), ..RunOptions::default() },
        )
        .await
        .unwrap();

    let critic = outcome.critic.unwrap();
    assert!(!critic.approved);
    assert!(outcome.response.starts_with("Action:"));
    assert!(outcome.response.contains("tool call(s) succeeded"));
}
