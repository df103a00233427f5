//! Hyperliquid-shaped REST client. Request construction, response parsing
//! into [`super::Venue`]'s types, and error classification are real; the
//! exchange endpoint's order signing is the specified external boundary
//! and is left as a `todo!`-free stub returning a network error so callers
//! exercise the same `Result` path a real deployment would.

use super::{AssetCtx, AssetPosition, ClearinghouseState, Fill, OrderRequest, OrderResult, UserFees, Venue, VenueError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

pub struct HyperliquidVenue {
    http: reqwest::Client,
    base_url: String,
    account_address: String,
}

const DEFAULT_BASE_URL: &str = "https://api.hyperliquid.xyz";

impl HyperliquidVenue {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, account_address: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into(), account_address: account_address.into() }
    }

    /// Builds a client from `HYPERLIQUID_BASE_URL` (defaults to mainnet) and
    /// the required `HYPERLIQUID_ACCOUNT_ADDRESS`.
    pub fn from_env(http: reqwest::Client) -> Result<Self> {
        let base_url = std::env::var("HYPERLIQUID_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let account_address = std::env::var("HYPERLIQUID_ACCOUNT_ADDRESS")
            .context("HYPERLIQUID_ACCOUNT_ADDRESS must be set to the wallet address to query positions for")?;
        Ok(Self::new(http, base_url, account_address))
    }

    async fn info(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(format!("{}/info", self.base_url))
            .json(&body)
            .send()
            .await
            .context("hyperliquid info request")?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow::anyhow!("hyperliquid info {}: {}", status.as_u16(), text));
        }
        serde_json::from_str(&text).context("hyperliquid info json parse")
    }
}

#[derive(Deserialize)]
struct RawPosition {
    position: RawPositionInner,
}
#[derive(Deserialize)]
struct RawPositionInner {
    coin: String,
    szi: String,
    #[serde(rename = "entryPx")]
    entry_px: Option<String>,
    #[serde(rename = "unrealizedPnl")]
    unrealized_pnl: Option<String>,
}

#[async_trait]
impl Venue for HyperliquidVenue {
    async fn get_clearinghouse_state(&self) -> Result<ClearinghouseState> {
        let body = serde_json::json!({"type": "clearinghouseState", "user": self.account_address});
        let raw = self.info(body).await?;
        let positions: Vec<RawPosition> =
            serde_json::from_value(raw.get("assetPositions").cloned().unwrap_or_default())
                .unwrap_or_default();
        let asset_positions = positions
            .into_iter()
            .map(|p| AssetPosition {
                coin: p.position.coin,
                szi: p.position.szi.parse().unwrap_or(0.0),
                entry_px: p.position.entry_px.and_then(|s| s.parse().ok()).unwrap_or(0.0),
                unrealized_pnl: p.position.unrealized_pnl.and_then(|s| s.parse().ok()).unwrap_or(0.0),
            })
            .collect();

        let withdrawable = raw
            .get("withdrawable")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok());
        let account_value = raw
            .get("marginSummary")
            .and_then(|m| m.get("accountValue"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok());

        Ok(ClearinghouseState {
            asset_positions,
            margin_summary_account_value: account_value,
            withdrawable,
        })
    }

    async fn get_all_mids(&self) -> Result<HashMap<String, f64>> {
        let raw = self.info(serde_json::json!({"type": "allMids"})).await?;
        let map: HashMap<String, String> = serde_json::from_value(raw).unwrap_or_default();
        Ok(map
            .into_iter()
            .filter_map(|(k, v)| v.parse::<f64>().ok().map(|f| (k, f)))
            .collect())
    }

    async fn get_meta_and_asset_ctxs(&self) -> Result<Vec<AssetCtx>> {
        let raw = self.info(serde_json::json!({"type": "metaAndAssetCtxs"})).await?;
        let universe = raw
            .get(0)
            .and_then(|m| m.get("universe"))
            .and_then(|u| u.as_array())
            .cloned()
            .unwrap_or_default();
        let ctxs = raw.get(1).and_then(|v| v.as_array()).cloned().unwrap_or_default();

        let mut out = Vec::new();
        for (meta, ctx) in universe.iter().zip(ctxs.iter()) {
            let coin = meta.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let max_leverage = meta.get("maxLeverage").and_then(|v| v.as_f64()).unwrap_or(1.0);
            let funding = ctx
                .get("funding")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0);
            out.push(AssetCtx { coin, funding, max_leverage });
        }
        Ok(out)
    }

    async fn get_user_fees(&self) -> Result<UserFees> {
        let body = serde_json::json!({"type": "userFees", "user": self.account_address});
        let raw = self.info(body).await?;
        Ok(UserFees {
            user_cross_rate: raw
                .get("userCrossRate")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0),
            user_add_rate: raw
                .get("userAddRate")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0),
        })
    }

    async fn get_user_fills_by_time(&self, start_time_ms: i64) -> Result<Vec<Fill>> {
        let body = serde_json::json!({
            "type": "userFillsByTime",
            "user": self.account_address,
            "startTime": start_time_ms,
        });
        let raw = self.info(body).await?;
        #[derive(Deserialize)]
        struct RawFill {
            coin: String,
            side: String,
            px: String,
            sz: String,
            time: i64,
            #[serde(rename = "closedPnl")]
            closed_pnl: Option<String>,
        }
        let fills: Vec<RawFill> = serde_json::from_value(raw).unwrap_or_default();
        Ok(fills
            .into_iter()
            .map(|f| Fill {
                coin: f.coin,
                side: f.side,
                px: f.px.parse().unwrap_or(0.0),
                sz: f.sz.parse().unwrap_or(0.0),
                time_ms: f.time,
                closed_pnl: f.closed_pnl.and_then(|s| s.parse().ok()).unwrap_or(0.0),
            })
            .collect())
    }

    async fn order(&self, _req: OrderRequest) -> Result<OrderResult, VenueError> {
        // Exchange endpoint signing (wallet key material) is outside this
        // crate's scope; a real deployment supplies a signer behind this
        // same trait method.
        Err(VenueError::Network("exchange signer not configured".to_string()))
    }

    async fn cancel(&self, _symbol: &str, _client_order_id: &str) -> Result<(), VenueError> {
        Err(VenueError::Network("exchange signer not configured".to_string()))
    }
}
