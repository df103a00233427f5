//! Concrete tool implementations backed by the venue client. Read-only
//! tools get a short cache TTL; `perp_place_order` is registered here only
//! for discovery purposes (`ToolRegistry::get`/`list_names`) — the
//! execution loop routes it through the trade-contract path directly
//! rather than calling `Tool::execute` on it.

use super::tools::{Tool, ToolContext, ToolDef, ToolOutcome, ToolRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

struct PortfolioTool;
#[async_trait]
impl Tool for PortfolioTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: "get_portfolio".to_string(),
            description: "Returns current positions and account value.".to_string(),
            category: "read".to_string(),
            side_effects: false,
            requires_confirmation: false,
            cache_ttl_ms: 10_000,
        }
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(venue) = &ctx.venue else { return ToolOutcome::err("venue not configured") };
        match venue.get_clearinghouse_state().await {
            Ok(state) => ToolOutcome::ok(serde_json::to_value(state).unwrap_or_default()),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

struct WalletInfoTool;
#[async_trait]
impl Tool for WalletInfoTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: "get_wallet_info".to_string(),
            description: "Returns withdrawable balance and fee schedule.".to_string(),
            category: "read".to_string(),
            side_effects: false,
            requires_confirmation: false,
            cache_ttl_ms: 30_000,
        }
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(venue) = &ctx.venue else { return ToolOutcome::err("venue not configured") };
        let state = venue.get_clearinghouse_state().await;
        let fees = venue.get_user_fees().await;
        match (state, fees) {
            (Ok(state), Ok(fees)) => ToolOutcome::ok(serde_json::json!({
                "withdrawable": state.withdrawable,
                "account_value": state.margin_summary_account_value,
                "fees": fees,
            })),
            (Err(e), _) | (_, Err(e)) => ToolOutcome::err(e.to_string()),
        }
    }
}

struct MarketListTool;
#[async_trait]
impl Tool for MarketListTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: "perp_market_list".to_string(),
            description: "Lists tradable perp markets with mid prices.".to_string(),
            category: "read".to_string(),
            side_effects: false,
            requires_confirmation: false,
            cache_ttl_ms: 5_000,
        }
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(venue) = &ctx.venue else { return ToolOutcome::err("venue not configured") };
        match venue.get_all_mids().await {
            Ok(mids) => ToolOutcome::ok(serde_json::to_value(mids).unwrap_or_default()),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

struct MarketGetTool;
#[async_trait]
impl Tool for MarketGetTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: "perp_market_get".to_string(),
            description: "Returns funding and max leverage for a single symbol.".to_string(),
            category: "read".to_string(),
            side_effects: false,
            requires_confirmation: false,
            cache_ttl_ms: 10_000,
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(venue) = &ctx.venue else { return ToolOutcome::err("venue not configured") };
        let symbol = input.get("symbol").and_then(|v| v.as_str()).unwrap_or("BTC").to_uppercase();
        match venue.get_meta_and_asset_ctxs().await {
            Ok(ctxs) => match ctxs.into_iter().find(|c| c.coin == symbol) {
                Some(ctx) => ToolOutcome::ok(serde_json::to_value(ctx).unwrap_or_default()),
                None => ToolOutcome::err(format!("no such market: {symbol}")),
            },
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

struct OpenOrdersTool;
#[async_trait]
impl Tool for OpenOrdersTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: "perp_open_orders".to_string(),
            description: "Placeholder open-orders listing; returns empty until resting-order tracking lands.".to_string(),
            category: "read".to_string(),
            side_effects: false,
            requires_confirmation: false,
            cache_ttl_ms: 5_000,
        }
    }

    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> ToolOutcome {
        ToolOutcome::ok(serde_json::json!([]))
    }
}

/// `get_open_orders` alias used by terminal-contract injection's pre-trade
/// check list; wired to the same handler as `perp_open_orders`.
struct OpenOrdersAliasTool;
#[async_trait]
impl Tool for OpenOrdersAliasTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: "get_open_orders".to_string(),
            description: "Alias of perp_open_orders.".to_string(),
            category: "read".to_string(),
            side_effects: false,
            requires_confirmation: false,
            cache_ttl_ms: 5_000,
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolOutcome {
        OpenOrdersTool.execute(input, ctx).await
    }
}

struct PositionsTool;
#[async_trait]
impl Tool for PositionsTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: "perp_positions".to_string(),
            description: "Lists open perp positions.".to_string(),
            category: "read".to_string(),
            side_effects: false,
            requires_confirmation: false,
            cache_ttl_ms: 5_000,
        }
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(venue) = &ctx.venue else { return ToolOutcome::err("venue not configured") };
        match venue.get_clearinghouse_state().await {
            Ok(state) => ToolOutcome::ok(serde_json::to_value(state.asset_positions).unwrap_or_default()),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

struct PlaceOrderTool;
#[async_trait]
impl Tool for PlaceOrderTool {
    fn definition(&self) -> ToolDef {
        ToolDef {
            name: "perp_place_order".to_string(),
            description: "Submits a perp order. Routed through the trade contract, not this handler.".to_string(),
            category: "trade".to_string(),
            side_effects: true,
            requires_confirmation: true,
            cache_ttl_ms: 0,
        }
    }

    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> ToolOutcome {
        ToolOutcome::err("perp_place_order must be routed through the orchestrator's trade contract path")
    }
}

/// The tool set wired into every orchestrator run.
pub fn default_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(PortfolioTool),
        Arc::new(WalletInfoTool),
        Arc::new(MarketListTool),
        Arc::new(MarketGetTool),
        Arc::new(OpenOrdersTool),
        Arc::new(OpenOrdersAliasTool),
        Arc::new(PositionsTool),
        Arc::new(PlaceOrderTool),
    ]
}

pub fn default_registry() -> ToolRegistry {
    ToolRegistry::new(default_tools())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::fake::FakeVenue;

    #[tokio::test]
    async fn market_list_reads_mids_from_venue() {
        let fake = FakeVenue::new();
        fake.mids.lock().await.insert("BTC".to_string(), 65000.0);
        let venue: Arc<dyn crate::venue::Venue> = Arc::new(fake);
        let ctx = ToolContext { venue: Some(venue), limiter: None, on_confirmation: None };
        let registry = default_registry();
        let exec = registry.execute("perp_market_list", serde_json::json!({}), &ctx).await;
        assert!(exec.result.success);
    }

    #[tokio::test]
    async fn place_order_tool_refuses_direct_execution() {
        let ctx = ToolContext { venue: None, limiter: None, on_confirmation: None };
        let registry = default_registry();
        let exec = registry.execute("perp_place_order", serde_json::json!({}), &ctx).await;
        assert!(!exec.result.success);
    }
}
