//! Autonomous scan loop: discovers candidate trade expressions on a
//! cadence, gates and sizes them, and submits surviving ones through the
//! same trade-contract and venue layers the orchestrator uses.

pub mod cadence;
pub mod discovery;
pub mod kelly;
pub mod policy;
pub mod risk;
pub mod session_weight;

use crate::journal::{Journal, JournalEntry, JournalOutcome};
use crate::limiter::{Limiter, ReserveOutcome};
use crate::venue::{OrderRequest, Venue};
use discovery::{filter_expressions, Discovery, ExpressionPlan, GateConfig};
use policy::{reflect_policy, AutonomyPolicyState, RecentJournalSummary};
use risk::{check_perp_risk_limits, RiskLimitInput};
use session_weight::{session_weight, LiquidityRegime};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct AutonomyConfig {
    pub gate: GateConfig,
    pub concurrent_position_cap: u32,
    pub per_trade_cap_usd: f64,
    pub min_order_notional_usd: f64,
    pub news_size_cap_fraction: f64,
    pub configured_leverage_cap: f64,
    pub max_notional_usd: f64,
    pub loss_streak_pause_threshold: u32,
    pub loss_streak_pause_secs: i64,
}

pub struct AutonomyLoop {
    discovery: Arc<dyn Discovery>,
    venue: Arc<dyn Venue>,
    limiter: Arc<dyn Limiter>,
    journal: Arc<dyn Journal>,
    config: AutonomyConfig,
    policy: Mutex<AutonomyPolicyState>,
}

#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    pub executed: u32,
    pub failed: u32,
    pub blocked: u32,
    pub lines: Vec<String>,
}

impl AutonomyLoop {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        venue: Arc<dyn Venue>,
        limiter: Arc<dyn Limiter>,
        journal: Arc<dyn Journal>,
        config: AutonomyConfig,
    ) -> Self {
        Self { discovery, venue, limiter, journal, config, policy: Mutex::new(AutonomyPolicyState::default()) }
    }

    pub async fn tick(&self) -> anyhow::Result<TickSummary> {
        let now = chrono::Utc::now();
        let mut summary = TickSummary::default();

        // 1. reflect on recent journal into policy state.
        let pnls = self.journal.recent_close_pnls(20).await.unwrap_or_default();
        let recent = self.journal.recent_summary(50).await.unwrap_or_default();
        let win_rate = win_rate_from_recent(&recent);
        let journal_summary = RecentJournalSummary {
            trailing_closed_pnls: pnls,
            loss_streak_pause_threshold: self.config.loss_streak_pause_threshold,
            loss_streak_pause_secs: self.config.loss_streak_pause_secs,
            win_rate_last_n: win_rate,
        };

        let mut policy = self.policy.lock().await;
        *policy = reflect_policy(&policy, &journal_summary, now);

        // 2. observation-only gate.
        if policy.is_observation_only(now) {
            let expressions = self.discovery.discover().await.unwrap_or_default();
            for expr in &expressions {
                self.journal
                    .append_entry(&blocked_entry(expr, "observation-only window active", now))
                    .await?;
            }
            summary.blocked = expressions.len() as u32;
            summary.lines.push(format!("observation-only until policy clears: {} candidates blocked", expressions.len()));
            return Ok(summary);
        }
        let policy_snapshot = policy.clone();
        drop(policy);

        // 3. discovery.
        let expressions = self.discovery.discover().await?;

        // 4. gating.
        let regime = LiquidityRegime::Normal;
        let weight = session_weight(now, regime);
        let mut gate = self.config.gate.clone();
        if let Some(min_edge) = policy_snapshot.min_edge_override {
            gate.adaptive_min_edge = gate.adaptive_min_edge.max(min_edge);
        }
        let mut surviving = filter_expressions(expressions, &gate, weight);
        if let Some(max_trades) = policy_snapshot.max_trades_per_scan_override {
            surviving.truncate(max_trades as usize);
        }

        let remaining_daily = self.config.max_notional_usd - self.limiter.today_spent().await.unwrap_or(0.0);
        let clearinghouse = self.venue.get_clearinghouse_state().await.ok();
        let mids = self.venue.get_all_mids().await.unwrap_or_default();

        for expr in surviving {
            // 5. sizing.
            let Some(&mark_price) = mids.get(&expr.symbol) else {
                summary.lines.push(format!("{}: no mark price available, skipping", expr.symbol));
                continue;
            };
            let kelly_fraction = kelly::compute_fractional_kelly_fraction(
                expr.expected_edge,
                expr.expected_edge,
                (expr.expected_edge.abs() + 0.01).powi(2),
                20,
                0.2,
            );
            let sizing_modifier = kelly_fraction.max(0.25 * 4.0).min(4.0) * weight;
            let mut probe_usd = expr.probe_size_usd * sizing_modifier;
            if expr.news_trigger {
                probe_usd = probe_usd.min(remaining_daily * self.config.news_size_cap_fraction);
            }
            probe_usd = probe_usd.clamp(0.0, remaining_daily.max(0.0));

            if probe_usd < self.config.min_order_notional_usd {
                self.journal.append_entry(&blocked_entry(&expr, "below minimum order notional", now)).await?;
                summary.blocked += 1;
                continue;
            }

            let size = probe_usd / mark_price;
            let has_position = clearinghouse
                .as_ref()
                .and_then(|c| c.position_for(&expr.symbol))
                .map(|p| p.szi != 0.0)
                .unwrap_or(false);

            // 6. risk check.
            let risk_input = RiskLimitInput {
                notional_usd: probe_usd,
                leverage: expr.leverage,
                configured_leverage_cap: self.config.configured_leverage_cap,
                policy_leverage_cap_override: policy_snapshot.leverage_cap_override,
                market_max_leverage: self.config.configured_leverage_cap,
                max_notional_usd: self.config.max_notional_usd,
                reduce_only: false,
                has_existing_position: has_position,
            };
            if let Err(block) = check_perp_risk_limits(&risk_input) {
                summary.lines.push(format!("{}: risk blocked ({})", expr.symbol, block.as_str()));
                self.journal.append_entry(&blocked_entry(&expr, block.as_str(), now)).await?;
                summary.blocked += 1;
                continue;
            }

            // 7. budget reservation.
            let reservation = self.limiter.check_and_reserve(probe_usd).await?;
            let reservation_id = match reservation {
                ReserveOutcome::Reserved(id) => id,
                ReserveOutcome::Blocked => {
                    summary.lines.push(format!("{}: spending limit blocked", expr.symbol));
                    self.journal.append_entry(&blocked_entry(&expr, "spending limit blocked", now)).await?;
                    summary.blocked += 1;
                    continue;
                }
            };

            // 8. submit.
            let req = OrderRequest {
                client_order_id: uuid::Uuid::new_v4().to_string(),
                symbol: expr.symbol.clone(),
                side: expr.side,
                size,
                order_type: "market".to_string(),
                reduce_only: false,
                slippage_bps: 10,
            };
            let outcome = self.venue.order(req).await;
            let (journal_outcome, line) = match &outcome {
                Ok(result) => {
                    self.limiter.confirm(reservation_id).await?;
                    summary.executed += 1;
                    (JournalOutcome::Executed, format!("{}: executed {:.4} @ {:.2}", expr.symbol, result.filled_size, result.avg_price))
                }
                Err(err) => {
                    self.limiter.release(reservation_id).await?;
                    summary.failed += 1;
                    (JournalOutcome::Failed, format!("{}: order failed: {err}", expr.symbol))
                }
            };
            summary.lines.push(line);

            // 9. journal regardless.
            self.journal
                .append_entry(&JournalEntry {
                    id: None,
                    created_at: now,
                    symbol: expr.symbol.clone(),
                    outcome: journal_outcome,
                    signal_class: expr.signal_kinds.first().map(|k| format!("{k:?}")),
                    regime: Some(format!("{:?}", expr.regime)),
                    confidence_raw: expr.confidence / weight.max(1e-9),
                    confidence_weighted: expr.confidence,
                    sizing_modifier,
                    kelly_fraction,
                    context_pack: expr.context_pack.clone(),
                    corrects: None,
                })
                .await?;
        }

        Ok(summary)
    }
}

fn win_rate_from_recent(entries: &[JournalEntry]) -> Option<f64> {
    let executed: Vec<&JournalEntry> = entries.iter().filter(|e| e.outcome == JournalOutcome::Executed).collect();
    if executed.is_empty() {
        return None;
    }
    let wins = executed
        .iter()
        .filter(|e| e.context_pack.get("close_pnl").and_then(|v| v.as_f64()).map(|p| p > 0.0).unwrap_or(false))
        .count();
    Some(wins as f64 / executed.len() as f64)
}

fn blocked_entry(expr: &ExpressionPlan, reason: &str, now: chrono::DateTime<chrono::Utc>) -> JournalEntry {
    JournalEntry {
        id: None,
        created_at: now,
        symbol: expr.symbol.clone(),
        outcome: JournalOutcome::Blocked,
        signal_class: expr.signal_kinds.first().map(|k| format!("{k:?}")),
        regime: Some(format!("{:?}", expr.regime)),
        confidence_raw: expr.confidence,
        confidence_weighted: expr.confidence,
        sizing_modifier: 0.0,
        kelly_fraction: 0.0,
        context_pack: serde_json::json!({ "reason": reason }),
        corrects: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autonomy::discovery::{MarketRegime, SignalKind};
    use crate::journal::SqliteJournal;
    use crate::limiter::SqliteLimiter;
    use crate::venue::fake::FakeVenue;
    use crate::venue::Side;

    struct FixedDiscovery(Vec<ExpressionPlan>);

    #[async_trait::async_trait]
    impl Discovery for FixedDiscovery {
        async fn discover(&self) -> anyhow::Result<Vec<ExpressionPlan>> {
            Ok(self.0.clone())
        }
    }

    fn gate_config() -> GateConfig {
        GateConfig {
            min_edge_by_signal: vec![],
            allowed_regimes_by_signal: vec![],
            news_entry_min_confidence: 0.7,
            adaptive_min_edge: 0.01,
            high_confidence_threshold: 0.8,
        }
    }

    fn config() -> AutonomyConfig {
        AutonomyConfig {
            gate: gate_config(),
            concurrent_position_cap: 5,
            per_trade_cap_usd: 100.0,
            min_order_notional_usd: 5.0,
            news_size_cap_fraction: 0.5,
            configured_leverage_cap: 5.0,
            max_notional_usd: 1000.0,
            loss_streak_pause_threshold: 4,
            loss_streak_pause_secs: 3600,
        }
    }

    #[tokio::test]
    async fn observation_only_window_blocks_all_candidates() {
        let venue = Arc::new(FakeVenue::new());
        venue.mids.lock().await.insert("BTC".to_string(), 100.0);
        let discovery = Arc::new(FixedDiscovery(vec![ExpressionPlan {
            symbol: "BTC".to_string(),
            side: Side::Buy,
            expected_edge: 0.05,
            confidence: 0.9,
            leverage: 2.0,
            probe_size_usd: 50.0,
            signal_kinds: vec![SignalKind::Technical],
            regime: MarketRegime::Trending,
            news_trigger: false,
            context_pack: serde_json::json!({}),
        }]));
        let limiter = Arc::new(SqliteLimiter::open_in_memory(1000.0).unwrap());
        let journal = Arc::new(SqliteJournal::open_in_memory().unwrap());
        let autonomy_loop = AutonomyLoop::new(discovery, venue, limiter, journal.clone(), config());

        {
            let mut policy = autonomy_loop.policy.lock().await;
            policy.observation_only_until = Some(chrono::Utc::now() + chrono::Duration::seconds(60));
        }

        let summary = autonomy_loop.tick().await.unwrap();
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.executed, 0);
    }

    #[tokio::test]
    async fn viable_expression_executes_and_journals() {
        let venue = Arc::new(FakeVenue::new());
        venue.mids.lock().await.insert("BTC".to_string(), 100.0);
        let discovery = Arc::new(FixedDiscovery(vec![ExpressionPlan {
            symbol: "BTC".to_string(),
            side: Side::Buy,
            expected_edge: 0.1,
            confidence: 0.9,
            leverage: 2.0,
            probe_size_usd: 50.0,
            signal_kinds: vec![SignalKind::Technical],
            regime: MarketRegime::Trending,
            news_trigger: false,
            context_pack: serde_json::json!({}),
        }]));
        let limiter = Arc::new(SqliteLimiter::open_in_memory(1000.0).unwrap());
        let journal = Arc::new(SqliteJournal::open_in_memory().unwrap());
        let autonomy_loop = AutonomyLoop::new(discovery, venue.clone(), limiter, journal.clone(), config());

        let summary = autonomy_loop.tick().await.unwrap();
        assert_eq!(summary.executed, 1);
        assert_eq!(venue.orders_seen.lock().await.len(), 1);

        let entries = journal.recent_summary(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, JournalOutcome::Executed);
    }
}
