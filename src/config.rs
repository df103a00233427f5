//! Environment-driven configuration.
//!
//! Mirrors the `Config::from_env` shape used throughout the rest of the
//! stack: `dotenv` loads a local `.env` first, every field has a sane
//! default, and parse failures fall back rather than aborting startup.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,

    /// OpenRouter (or compatible) model id used for planning/reflection/critic.
    pub llm_model: String,
    pub llm_timeout: Duration,

    /// Symbols the orchestrator and autonomy loop may default to when the
    /// planner omits one.
    pub default_symbols: Vec<String>,

    pub max_parallel_read_steps: usize,

    /// Autonomy scan cadence, before adaptive multipliers (seconds).
    pub autonomy_base_interval_secs: u64,
    pub autonomy_min_interval_secs: u64,
    pub autonomy_max_interval_secs: u64,
    pub autonomy_concurrent_position_cap: usize,
    pub autonomy_daily_budget_usd: f64,
    pub autonomy_per_trade_cap_usd: f64,
    pub autonomy_min_order_usd: f64,
    pub autonomy_news_size_cap_fraction: f64,
    pub autonomy_max_fraction: f64,
    pub autonomy_leverage_cap: f64,
    pub autonomy_loss_streak_threshold: Option<u32>,
    pub autonomy_loss_streak_pause_secs: u64,

    pub daily_report_time_utc: (u32, u32),

    pub base_slippage_bps: u32,
    pub max_order_retries: u32,

    pub scheduler_poll_interval: Duration,
    pub scheduler_lease: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./perpsentinel.db".to_string(),
            llm_model: "openrouter/auto".to_string(),
            llm_timeout: Duration::from_secs(30),
            default_symbols: vec!["BTC".to_string()],
            max_parallel_read_steps: 3,
            autonomy_base_interval_secs: 900,
            autonomy_min_interval_secs: 120,
            autonomy_max_interval_secs: 3600,
            autonomy_concurrent_position_cap: 3,
            autonomy_daily_budget_usd: 500.0,
            autonomy_per_trade_cap_usd: 50.0,
            autonomy_min_order_usd: 10.0,
            autonomy_news_size_cap_fraction: 0.5,
            autonomy_max_fraction: 0.20,
            autonomy_leverage_cap: 5.0,
            autonomy_loss_streak_threshold: Some(4),
            autonomy_loss_streak_pause_secs: 3600,
            daily_report_time_utc: (13, 0),
            base_slippage_bps: 10,
            max_order_retries: 3,
            scheduler_poll_interval: Duration::from_secs(1),
            scheduler_lease: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("DATABASE_PATH") {
            cfg.database_path = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            cfg.llm_model = v;
        }
        if let Ok(v) = std::env::var("LLM_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.llm_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("DEFAULT_SYMBOLS") {
            let syms: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !syms.is_empty() {
                cfg.default_symbols = syms;
            }
        }
        if let Ok(v) = std::env::var("AUTONOMY_BASE_INTERVAL_SECS") {
            cfg.autonomy_base_interval_secs = v.parse().unwrap_or(cfg.autonomy_base_interval_secs);
        }
        if let Ok(v) = std::env::var("AUTONOMY_DAILY_BUDGET_USD") {
            cfg.autonomy_daily_budget_usd = v.parse().unwrap_or(cfg.autonomy_daily_budget_usd);
        }
        if let Ok(v) = std::env::var("AUTONOMY_PER_TRADE_CAP_USD") {
            cfg.autonomy_per_trade_cap_usd =
                v.parse().unwrap_or(cfg.autonomy_per_trade_cap_usd);
        }
        if let Ok(v) = std::env::var("AUTONOMY_LEVERAGE_CAP") {
            cfg.autonomy_leverage_cap = v.parse().unwrap_or(cfg.autonomy_leverage_cap);
        }
        if let Ok(v) = std::env::var("BASE_SLIPPAGE_BPS") {
            cfg.base_slippage_bps = v.parse().unwrap_or(cfg.base_slippage_bps);
        }

        Ok(cfg)
    }

    pub fn default_symbol(&self) -> &str {
        self.default_symbols.first().map(|s| s.as_str()).unwrap_or("BTC")
    }
}
