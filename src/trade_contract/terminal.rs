//! Terminal trade contract injection, and blocker classification with
//! remediation-step injection.

use crate::orchestrator::plan::{Plan, PlanStep};
use serde_json::json;

/// Appends read-steps (chained by `depends_on`) followed by a
/// `perp_place_order` step with placeholder fields when the plan lacks a
/// terminal trade step and no terminal tool is available to the caller
/// falls back to a warning. Returns `true` if steps were injected.
pub fn inject_terminal_contract(plan: &mut Plan, available_tools: &[String]) -> TerminalInjection {
    if plan.has_any_terminal_step() {
        return TerminalInjection::AlreadyPresent;
    }

    let terminal_available = available_tools.iter().any(|t| t == "perp_place_order");
    if !terminal_available {
        return TerminalInjection::NoTerminalToolAvailable;
    }

    let mut last_id: Option<String> = None;
    for read_tool in ["get_portfolio", "get_open_orders"] {
        if available_tools.iter().any(|t| t == read_tool) {
            let mut step = PlanStep::new_tool_step(
                format!("pre-trade check: {read_tool}"),
                read_tool,
                json!({}),
            );
            if let Some(dep) = &last_id {
                step = step.depending_on([dep.clone()]);
            }
            last_id = Some(step.id.clone());
            plan.push_step(step);
        }
    }

    let mut terminal = PlanStep::new_tool_step(
        "submit the perp order",
        "perp_place_order",
        json!({
            "symbol": "to_be_determined",
            "side": "to_be_determined",
            "size": "to_be_determined",
        }),
    );
    if let Some(dep) = &last_id {
        terminal = terminal.depending_on([dep.clone()]);
    }
    plan.push_step(terminal);

    TerminalInjection::Injected
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalInjection {
    AlreadyPresent,
    Injected,
    NoTerminalToolAvailable,
}

/// Closed blocker tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockerKind {
    HyperliquidMissingSigner,
    NetworkTransient,
    RateLimited,
    InvalidInput,
    UnknownTool,
    MarketUnavailable,
    InsufficientBalance,
    LeverageExceeded,
    ReduceOnlyImpossible,
    Unknown,
}

impl BlockerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockerKind::HyperliquidMissingSigner => "hyperliquid_missing_signer",
            BlockerKind::NetworkTransient => "network_transient",
            BlockerKind::RateLimited => "rate_limited",
            BlockerKind::InvalidInput => "invalid_input",
            BlockerKind::UnknownTool => "unknown_tool",
            BlockerKind::MarketUnavailable => "market_unavailable",
            BlockerKind::InsufficientBalance => "insufficient_balance",
            BlockerKind::LeverageExceeded => "leverage_exceeded",
            BlockerKind::ReduceOnlyImpossible => "reduce_only_impossible",
            BlockerKind::Unknown => "unknown",
        }
    }

    /// Remediation tool steps suggested for this blocker, filtered by the
    /// caller to tools actually available in the registry.
    pub fn remediation_tools(&self) -> &'static [&'static str] {
        match self {
            BlockerKind::HyperliquidMissingSigner => &["get_wallet_info"],
            BlockerKind::NetworkTransient => &["perp_market_list"],
            BlockerKind::RateLimited => &["perp_market_list"],
            BlockerKind::InvalidInput => &["perp_market_get"],
            BlockerKind::UnknownTool => &["tools.list"],
            BlockerKind::MarketUnavailable => &["perp_market_list"],
            BlockerKind::InsufficientBalance => &["get_wallet_info", "get_portfolio"],
            BlockerKind::LeverageExceeded => &["perp_market_get"],
            BlockerKind::ReduceOnlyImpossible => &["perp_positions"],
            BlockerKind::Unknown => &[],
        }
    }
}

pub fn classify_blocker(error: &str) -> BlockerKind {
    let lower = error.to_ascii_lowercase();
    if lower.contains("signer") || lower.contains("signing") {
        BlockerKind::HyperliquidMissingSigner
    } else if lower.contains("rate limit") || lower.contains("429") {
        BlockerKind::RateLimited
    } else if lower.contains("timeout") || lower.contains("connection") || lower.contains("network") {
        BlockerKind::NetworkTransient
    } else if lower.contains("unknown tool") {
        BlockerKind::UnknownTool
    } else if lower.contains("market unavailable") || lower.contains("no such market") {
        BlockerKind::MarketUnavailable
    } else if lower.contains("insufficient balance") || lower.contains("insufficient margin") {
        BlockerKind::InsufficientBalance
    } else if lower.contains("leverage") {
        BlockerKind::LeverageExceeded
    } else if lower.contains("no position") || lower.contains("would increase") {
        BlockerKind::ReduceOnlyImpossible
    } else if lower.contains("invalid") || lower.contains("missing") {
        BlockerKind::InvalidInput
    } else {
        BlockerKind::Unknown
    }
}

/// Injects remediation steps for a failed step, followed by a single
/// retry step depending on all of them.
pub fn inject_remediation(plan: &mut Plan, failed_step_id: &str, blocker: BlockerKind, available_tools: &[String]) -> bool {
    let remediation_ids: Vec<String> = blocker
        .remediation_tools()
        .iter()
        .filter(|t| available_tools.iter().any(|a| a == *t))
        .map(|tool| {
            let step = PlanStep::new_tool_step(
                format!("remediate {}: {}", blocker.as_str(), tool),
                *tool,
                json!({}),
            );
            let id = step.id.clone();
            plan.push_step(step);
            id
        })
        .collect();

    if remediation_ids.is_empty() {
        return false;
    }

    let Some(failed_step) = plan.steps.iter().find(|s| s.id == failed_step_id) else { return false };
    let retry = PlanStep::new_tool_step(
        format!("retry: {}", failed_step.description),
        failed_step.tool_name.clone().unwrap_or_default(),
        failed_step.tool_input.clone().unwrap_or(json!({})),
    )
    .depending_on(remediation_ids);
    plan.push_step(retry);
    true
}
