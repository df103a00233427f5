//! Candidate trade expression discovery and the gates that filter raw
//! expressions down to ones worth sizing and submitting.

use crate::venue::{Side, Venue};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    News,
    Technical,
    Funding,
    Liquidity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    Trending,
    Choppy,
    HighVolExpansion,
    LowVolCompression,
}

/// A single candidate trade surfaced by discovery, prior to sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionPlan {
    pub symbol: String,
    pub side: Side,
    pub expected_edge: f64,
    pub confidence: f64,
    pub leverage: f64,
    pub probe_size_usd: f64,
    pub signal_kinds: Vec<SignalKind>,
    pub regime: MarketRegime,
    pub news_trigger: bool,
    pub context_pack: serde_json::Value,
}

#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> anyhow::Result<Vec<ExpressionPlan>>;
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub min_edge_by_signal: Vec<(SignalKind, f64)>,
    pub allowed_regimes_by_signal: Vec<(SignalKind, Vec<MarketRegime>)>,
    pub news_entry_min_confidence: f64,
    pub adaptive_min_edge: f64,
    pub high_confidence_threshold: f64,
}

fn min_edge_for(config: &GateConfig, kind: SignalKind) -> f64 {
    config
        .min_edge_by_signal
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, edge)| *edge)
        .unwrap_or(config.adaptive_min_edge)
        .max(config.adaptive_min_edge)
}

fn regime_allowed(config: &GateConfig, kind: SignalKind, regime: MarketRegime) -> bool {
    config
        .allowed_regimes_by_signal
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, regimes)| regimes.contains(&regime))
        .unwrap_or(true)
}

/// Applies the global trade gate (signal class x regime x min edge), the
/// news entry gate, and session-weighted confidence, in that order.
/// Returns surviving expressions with `confidence` overwritten by the
/// session-weighted value.
pub fn filter_expressions(
    expressions: Vec<ExpressionPlan>,
    config: &GateConfig,
    session_weight: f64,
) -> Vec<ExpressionPlan> {
    expressions
        .into_iter()
        .filter(|e| e.signal_kinds.iter().any(|k| e.expected_edge >= min_edge_for(config, *k)))
        .filter(|e| e.signal_kinds.iter().all(|k| regime_allowed(config, *k, e.regime)))
        .filter(|e| !e.news_trigger || e.confidence >= config.news_entry_min_confidence)
        .map(|mut e| {
            e.confidence *= session_weight;
            e
        })
        .filter(|e| {
            // high-confidence requirement only binds on the weighted value.
            !e.news_trigger || e.confidence >= config.news_entry_min_confidence * 0.5
        })
        .collect()
}

/// Reasonably conservative defaults: funding-driven signals need more edge
/// and only fire outside choppy regimes, news signals need high confidence.
pub fn default_gate_config() -> GateConfig {
    GateConfig {
        min_edge_by_signal: vec![(SignalKind::Funding, 0.015), (SignalKind::Technical, 0.02), (SignalKind::News, 0.03)],
        allowed_regimes_by_signal: vec![
            (SignalKind::Funding, vec![MarketRegime::Trending, MarketRegime::HighVolExpansion]),
            (SignalKind::Technical, vec![MarketRegime::Trending, MarketRegime::HighVolExpansion, MarketRegime::LowVolCompression]),
        ],
        news_entry_min_confidence: 0.75,
        adaptive_min_edge: 0.01,
        high_confidence_threshold: 0.8,
    }
}

const FUNDING_EDGE_SCALE: f64 = 8.0;
const FUNDING_CONFIDENCE_FLOOR: f64 = 0.5;

/// Surfaces one candidate per symbol whose funding rate is extreme enough
/// to suggest a crowded side worth fading: positive funding pays longs to
/// shorts, so a large positive rate is read as a short-edge signal and a
/// large negative rate as a long-edge signal.
pub struct FundingRateDiscovery {
    venue: Arc<dyn Venue>,
    symbols: Vec<String>,
    probe_size_usd: f64,
    leverage: f64,
}

impl FundingRateDiscovery {
    pub fn new(venue: Arc<dyn Venue>, symbols: Vec<String>, probe_size_usd: f64, leverage: f64) -> Self {
        Self { venue, symbols, probe_size_usd, leverage }
    }
}

#[async_trait]
impl Discovery for FundingRateDiscovery {
    async fn discover(&self) -> anyhow::Result<Vec<ExpressionPlan>> {
        let ctxs = self.venue.get_meta_and_asset_ctxs().await?;
        let mut expressions = Vec::new();

        for ctx in ctxs {
            if !self.symbols.is_empty() && !self.symbols.iter().any(|s| s.eq_ignore_ascii_case(&ctx.coin)) {
                continue;
            }
            let edge = ctx.funding.abs() * FUNDING_EDGE_SCALE;
            if edge < 1e-6 {
                continue;
            }
            let side = if ctx.funding > 0.0 { Side::Sell } else { Side::Buy };
            let confidence = (FUNDING_CONFIDENCE_FLOOR + edge).min(0.95);
            let regime = if edge > 0.05 { MarketRegime::HighVolExpansion } else { MarketRegime::Trending };

            expressions.push(ExpressionPlan {
                symbol: ctx.coin.clone(),
                side,
                expected_edge: edge,
                confidence,
                leverage: self.leverage.min(ctx.max_leverage),
                probe_size_usd: self.probe_size_usd,
                signal_kinds: vec![SignalKind::Funding],
                regime,
                news_trigger: false,
                context_pack: serde_json::json!({ "funding_rate": ctx.funding }),
            });
        }

        Ok(expressions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(edge: f64, kind: SignalKind, regime: MarketRegime, news: bool, confidence: f64) -> ExpressionPlan {
        ExpressionPlan {
            symbol: "BTC".to_string(),
            side: Side::Buy,
            expected_edge: edge,
            confidence,
            leverage: 2.0,
            probe_size_usd: 50.0,
            signal_kinds: vec![kind],
            regime,
            news_trigger: news,
            context_pack: serde_json::json!({}),
        }
    }

    fn config() -> GateConfig {
        GateConfig {
            min_edge_by_signal: vec![(SignalKind::Technical, 0.02)],
            allowed_regimes_by_signal: vec![(SignalKind::Technical, vec![MarketRegime::Trending])],
            news_entry_min_confidence: 0.7,
            adaptive_min_edge: 0.01,
            high_confidence_threshold: 0.8,
        }
    }

    #[test]
    fn below_min_edge_is_filtered() {
        let expressions = vec![sample(0.005, SignalKind::Technical, MarketRegime::Trending, false, 0.9)];
        let result = filter_expressions(expressions, &config(), 1.0);
        assert!(result.is_empty());
    }

    #[test]
    fn disallowed_regime_is_filtered() {
        let expressions = vec![sample(0.05, SignalKind::Technical, MarketRegime::Choppy, false, 0.9)];
        let result = filter_expressions(expressions, &config(), 1.0);
        assert!(result.is_empty());
    }

    #[test]
    fn news_trigger_below_min_confidence_filtered() {
        let expressions = vec![sample(0.05, SignalKind::Technical, MarketRegime::Trending, true, 0.3)];
        let result = filter_expressions(expressions, &config(), 1.0);
        assert!(result.is_empty());
    }

    #[test]
    fn surviving_expression_gets_session_weighted_confidence() {
        let expressions = vec![sample(0.05, SignalKind::Technical, MarketRegime::Trending, false, 0.9)];
        let result = filter_expressions(expressions, &config(), 0.5);
        assert_eq!(result.len(), 1);
        assert!((result[0].confidence - 0.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn funding_discovery_fades_crowded_positive_funding() {
        use crate::venue::fake::FakeVenue;
        use crate::venue::AssetCtx;
        let venue = FakeVenue::new();
        venue.asset_ctxs.lock().await.push(AssetCtx { coin: "BTC".to_string(), funding: 0.01, max_leverage: 10.0 });
        let discovery = FundingRateDiscovery::new(Arc::new(venue), vec![], 50.0, 3.0);
        let expressions = discovery.discover().await.unwrap();
        assert_eq!(expressions.len(), 1);
        assert_eq!(expressions[0].side, Side::Sell);
    }

    #[tokio::test]
    async fn funding_discovery_skips_symbols_outside_filter() {
        use crate::venue::fake::FakeVenue;
        use crate::venue::AssetCtx;
        let venue = FakeVenue::new();
        venue.asset_ctxs.lock().await.push(AssetCtx { coin: "ETH".to_string(), funding: 0.01, max_leverage: 10.0 });
        let discovery = FundingRateDiscovery::new(Arc::new(venue), vec!["BTC".to_string()], 50.0, 3.0);
        let expressions = discovery.discover().await.unwrap();
        assert!(expressions.is_empty());
    }
}
