//! Mode detection: deterministic keyword routing from a goal string to a
//! named policy bundle (allowed tools, iteration cap, critic requirement,
//! synthesis temperature).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Trade,
    Analysis,
    Admin,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Trade => "trade",
            Mode::Analysis => "analysis",
            Mode::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModeConfig {
    pub allowed_tools: Vec<String>,
    pub max_iterations: u32,
    pub requires_critic: bool,
    pub synthesis_temperature: f64,
}

const TRADE_KEYWORDS: &[&str] =
    &["buy", "sell", "long", "short", "perp", "position", "leverage", "close the", "exit the"];
const ADMIN_KEYWORDS: &[&str] = &["cancel all orders", "reset", "shutdown", "pause autonomy", "resume autonomy"];

/// Keyword-driven mode detection, unless `force_mode` overrides it entirely.
pub fn detect_mode(goal: &str, force_mode: Option<Mode>) -> Mode {
    if let Some(m) = force_mode {
        return m;
    }
    let lower = goal.to_ascii_lowercase();
    if ADMIN_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Mode::Admin;
    }
    if TRADE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Mode::Trade;
    }
    Mode::Analysis
}

const RETROSPECTIVE_CUES: &[&str] = &["why did", "why was", "what happened to", "explain the previous"];
const LOSS_COMPLAINT_CUES: &[&str] = &["lost money", "took a loss", "why did i lose", "that trade hurt", "down on"];
const EXECUTION_CUES: &[&str] = &["buy", "sell", "open a", "place an order", "go long", "go short", "autonomously"];

/// A goal is *retrospective* or a *loss complaint* when it reads as asking
/// about a closed position rather than requesting a new one.
pub fn is_retrospective_or_loss_complaint(goal: &str) -> bool {
    let lower = goal.to_ascii_lowercase();
    RETROSPECTIVE_CUES.iter().any(|c| lower.contains(c)) || LOSS_COMPLAINT_CUES.iter().any(|c| lower.contains(c))
}

/// A goal carries *execution intent* when it asks for an action to be
/// taken now, as opposed to analysis of what already happened.
pub fn has_execution_intent(goal: &str) -> bool {
    let lower = goal.to_ascii_lowercase();
    if is_retrospective_or_loss_complaint(&lower) {
        return false;
    }
    EXECUTION_CUES.iter().any(|c| lower.contains(c))
}

pub fn mode_config(mode: Mode, allowed_tools: &[&str], max_iterations: u32) -> ModeConfig {
    match mode {
        Mode::Trade => ModeConfig {
            allowed_tools: allowed_tools.iter().map(|s| s.to_string()).collect(),
            max_iterations,
            requires_critic: true,
            synthesis_temperature: 0.3,
        },
        Mode::Analysis => ModeConfig {
            allowed_tools: allowed_tools
                .iter()
                .filter(|t| !is_mutating_trade_tool(t))
                .map(|s| s.to_string())
                .collect(),
            max_iterations,
            requires_critic: false,
            synthesis_temperature: 0.5,
        },
        Mode::Admin => ModeConfig {
            allowed_tools: allowed_tools.iter().map(|s| s.to_string()).collect(),
            max_iterations: max_iterations.min(5),
            requires_critic: false,
            synthesis_temperature: 0.2,
        },
    }
}

pub fn is_mutating_trade_tool(tool_name: &str) -> bool {
    matches!(tool_name, "perp_place_order" | "perp_cancel_order")
}
