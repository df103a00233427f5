//! Process-wide autonomy policy state and the adaptive reflection that
//! mutates it each scan tick based on a rolling journal summary.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyPolicyState {
    pub observation_only_until: Option<DateTime<Utc>>,
    pub min_edge_override: Option<f64>,
    pub max_trades_per_scan_override: Option<u32>,
    pub leverage_cap_override: Option<f64>,
    pub drawdown_cap_remaining_usd: Option<f64>,
    pub trades_remaining_today: Option<u32>,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for AutonomyPolicyState {
    fn default() -> Self {
        Self {
            observation_only_until: None,
            min_edge_override: None,
            max_trades_per_scan_override: None,
            leverage_cap_override: None,
            drawdown_cap_remaining_usd: None,
            trades_remaining_today: None,
            reason: "initial".to_string(),
            updated_at: Utc::now(),
        }
    }
}

impl AutonomyPolicyState {
    pub fn is_observation_only(&self, now: DateTime<Utc>) -> bool {
        self.observation_only_until.map(|until| until > now).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct RecentJournalSummary {
    /// Most-recent-first, matching `Journal::recent_close_pnls`.
    pub trailing_closed_pnls: Vec<f64>,
    pub loss_streak_pause_threshold: u32,
    pub loss_streak_pause_secs: i64,
    pub win_rate_last_n: Option<f64>,
}

/// Applies the adaptive reflection rules to a prior policy state, given a
/// rolling journal summary, and returns the mutated state. Pure function:
/// callers persist the result.
pub fn reflect_policy(prior: &AutonomyPolicyState, summary: &RecentJournalSummary, now: DateTime<Utc>) -> AutonomyPolicyState {
    let mut next = prior.clone();
    next.updated_at = now;

    let tail_streak = trailing_loss_streak(&summary.trailing_closed_pnls);
    if tail_streak >= summary.loss_streak_pause_threshold {
        next.observation_only_until = Some(now + Duration::seconds(summary.loss_streak_pause_secs));
        next.reason = format!("loss streak of {tail_streak} reached pause threshold");
        return next;
    }

    if let Some(win_rate) = summary.win_rate_last_n {
        if win_rate >= 0.65 {
            next.min_edge_override = Some(0.01);
            next.max_trades_per_scan_override = Some(3);
            next.reason = "recent win rate supports loosened gating".to_string();
        } else if win_rate <= 0.35 {
            next.min_edge_override = Some(0.05);
            next.max_trades_per_scan_override = Some(1);
            next.reason = "recent win rate below floor, tightening gating".to_string();
        }
    }

    if let Some(until) = next.observation_only_until {
        if until <= now {
            next.observation_only_until = None;
        }
    }

    next
}

/// The length of the trailing run of closes with P&L <= 0, counting from
/// the most recent close backward. `closed_pnls` is most-recent-first.
fn trailing_loss_streak(closed_pnls: &[f64]) -> u32 {
    closed_pnls.iter().take_while(|pnl| **pnl <= 0.0).count() as u32
}
