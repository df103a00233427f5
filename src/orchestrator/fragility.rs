//! Pre-trade fragility scan: a one-shot, best-effort read of market
//! conditions for a symbol, run once per run before the first
//! `perp_place_order` execution. Never blocks or fails the run — a venue
//! error collapses to a zero score with an explanatory note.

use crate::venue::Venue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const HIGH_FUNDING_THRESHOLD: f64 = 0.02;
const THIN_LEVERAGE_CAP_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragilityScanResult {
    pub market_id: String,
    pub score: f64,
    pub ran_at: DateTime<Utc>,
    pub notes: Vec<String>,
}

impl FragilityScanResult {
    pub fn as_context_line(&self) -> String {
        format!(
            "market={} score={:.2} notes={}",
            self.market_id,
            self.score,
            self.notes.join("; ")
        )
    }
}

/// Scores `market_id` in `[0.0, 1.0]`: crowded funding and a venue leverage
/// cap tight enough to suggest thin liquidity each contribute half.
pub async fn scan_fragility(venue: &dyn Venue, market_id: &str) -> FragilityScanResult {
    let ran_at = Utc::now();
    let ctxs = match venue.get_meta_and_asset_ctxs().await {
        Ok(c) => c,
        Err(e) => {
            return FragilityScanResult {
                market_id: market_id.to_string(),
                score: 0.0,
                ran_at,
                notes: vec![format!("fragility scan failed: {e}")],
            }
        }
    };

    let Some(ctx) = ctxs.iter().find(|c| c.coin.eq_ignore_ascii_case(market_id)) else {
        return FragilityScanResult {
            market_id: market_id.to_string(),
            score: 0.0,
            ran_at,
            notes: vec!["no market context found for this symbol".to_string()],
        };
    };

    let mut score = 0.0f64;
    let mut notes = Vec::new();
    if ctx.funding.abs() >= HIGH_FUNDING_THRESHOLD {
        score += 0.5;
        notes.push(format!("funding {:.4} exceeds crowding threshold", ctx.funding));
    }
    if ctx.max_leverage <= THIN_LEVERAGE_CAP_THRESHOLD {
        score += 0.5;
        notes.push(format!("venue leverage cap {:.1}x suggests thin liquidity", ctx.max_leverage));
    }

    FragilityScanResult { market_id: market_id.to_string(), score: score.min(1.0), ran_at, notes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::fake::FakeVenue;
    use crate::venue::AssetCtx;

    #[tokio::test]
    async fn crowded_funding_and_thin_leverage_cap_score_high() {
        let venue = FakeVenue::new();
        venue.asset_ctxs.lock().await.push(AssetCtx { coin: "BTC".to_string(), funding: 0.05, max_leverage: 3.0 });
        let result = scan_fragility(&venue, "BTC").await;
        assert!((result.score - 1.0).abs() < 1e-9);
        assert_eq!(result.notes.len(), 2);
    }

    #[tokio::test]
    async fn unknown_symbol_scores_zero_with_a_note() {
        let venue = FakeVenue::new();
        let result = scan_fragility(&venue, "BTC").await;
        assert_eq!(result.score, 0.0);
        assert!(!result.notes.is_empty());
    }
}
