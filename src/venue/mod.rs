//! Venue interface: the perpetual-futures exchange client the
//! orchestrator reads positions/prices from and dispatches orders through.
//! Modeled on the Hyperliquid info/exchange API shape, but the core only
//! depends on the [`Venue`] trait.

pub mod hyperliquid;

pub use hyperliquid::HyperliquidVenue;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetPosition {
    pub coin: String,
    /// Signed size: positive is long, negative is short.
    pub szi: f64,
    pub entry_px: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearinghouseState {
    pub asset_positions: Vec<AssetPosition>,
    pub margin_summary_account_value: Option<f64>,
    pub withdrawable: Option<f64>,
}

impl ClearinghouseState {
    pub fn position_for(&self, symbol: &str) -> Option<&AssetPosition> {
        self.asset_positions.iter().find(|p| p.coin.eq_ignore_ascii_case(symbol))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetCtx {
    pub coin: String,
    pub funding: f64,
    pub max_leverage: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserFees {
    pub user_cross_rate: f64,
    pub user_add_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub coin: String,
    pub side: String,
    pub px: f64,
    pub sz: f64,
    pub time_ms: i64,
    pub closed_pnl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    /// Always "market" per the normalizer's forced order type.
    pub order_type: String,
    pub reduce_only: bool,
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub client_order_id: String,
    pub filled_size: f64,
    pub avg_price: f64,
}

/// Classified venue-side failure, used by the trade contract's retry/
/// blocker-detection logic. `NoImmediateMatch` is the only class that
/// triggers the retry-with-widening strategy.
#[derive(Debug, Clone)]
pub enum VenueError {
    NoImmediateMatch(String),
    Rejected(String),
    Network(String),
}

impl std::fmt::Display for VenueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VenueError::NoImmediateMatch(m) => write!(f, "no immediate match: {m}"),
            VenueError::Rejected(m) => write!(f, "rejected: {m}"),
            VenueError::Network(m) => write!(f, "network: {m}"),
        }
    }
}
impl std::error::Error for VenueError {}

#[async_trait]
pub trait Venue: Send + Sync {
    async fn get_clearinghouse_state(&self) -> Result<ClearinghouseState>;
    async fn get_all_mids(&self) -> Result<std::collections::HashMap<String, f64>>;
    async fn get_meta_and_asset_ctxs(&self) -> Result<Vec<AssetCtx>>;
    async fn get_user_fees(&self) -> Result<UserFees>;
    async fn get_user_fills_by_time(&self, start_time_ms: i64) -> Result<Vec<Fill>>;
    async fn order(&self, req: OrderRequest) -> Result<OrderResult, VenueError>;
    async fn cancel(&self, symbol: &str, client_order_id: &str) -> Result<(), VenueError>;
}

/// In-memory double for tests and dry-run demos: scripted fills, a
/// fixed position book, and a queue of failures to exercise retry/
/// reconciliation paths deterministically.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use tokio::sync::Mutex;

    pub struct FakeVenue {
        pub positions: Mutex<Vec<AssetPosition>>,
        pub mids: Mutex<std::collections::HashMap<String, f64>>,
        pub asset_ctxs: Mutex<Vec<AssetCtx>>,
        pub order_failures: Mutex<std::collections::VecDeque<VenueError>>,
        pub orders_seen: Mutex<Vec<OrderRequest>>,
    }

    impl FakeVenue {
        pub fn new() -> Self {
            Self {
                positions: Mutex::new(Vec::new()),
                mids: Mutex::new(std::collections::HashMap::new()),
                asset_ctxs: Mutex::new(Vec::new()),
                order_failures: Mutex::new(std::collections::VecDeque::new()),
                orders_seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Default for FakeVenue {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Venue for FakeVenue {
        async fn get_clearinghouse_state(&self) -> Result<ClearinghouseState> {
            Ok(ClearinghouseState {
                asset_positions: self.positions.lock().await.clone(),
                margin_summary_account_value: Some(10_000.0),
                withdrawable: Some(10_000.0),
            })
        }
        async fn get_all_mids(&self) -> Result<std::collections::HashMap<String, f64>> {
            Ok(self.mids.lock().await.clone())
        }
        async fn get_meta_and_asset_ctxs(&self) -> Result<Vec<AssetCtx>> {
            Ok(self.asset_ctxs.lock().await.clone())
        }
        async fn get_user_fees(&self) -> Result<UserFees> {
            Ok(UserFees::default())
        }
        async fn get_user_fills_by_time(&self, _start_time_ms: i64) -> Result<Vec<Fill>> {
            Ok(vec![])
        }
        async fn order(&self, req: OrderRequest) -> Result<OrderResult, VenueError> {
            self.orders_seen.lock().await.push(req.clone());
            if let Some(err) = self.order_failures.lock().await.pop_front() {
                return Err(err);
            }
            Ok(OrderResult {
                client_order_id: req.client_order_id,
                filled_size: req.size,
                avg_price: 100.0,
            })
        }
        async fn cancel(&self, _symbol: &str, _client_order_id: &str) -> Result<(), VenueError> {
            Ok(())
        }
    }
}
