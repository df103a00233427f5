//! Deterministic input normalizer. Alias tables are exhaustive pattern
//! matches, not runtime reflection.

use crate::venue::Side;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitMode {
    ThesisInvalidation,
    TakeProfit,
    TimeExit,
    RiskReduction,
    Manual,
}

impl ExitMode {
    fn canonicalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "invalidation" | "thesis_invalidated" | "stop_loss" | "thesis_invalidation" => {
                Some(Self::ThesisInvalidation)
            }
            "tp" | "takeprofit" | "take_profit" => Some(Self::TakeProfit),
            "time_stop" | "timeout" | "time_exit" => Some(Self::TimeExit),
            "liquidity_probe" | "emergency_override" | "liquidity" | "de_risk" | "risk_reduction" => {
                Some(Self::RiskReduction)
            }
            "manual_close" | "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitMode::ThesisInvalidation => "thesis_invalidation",
            ExitMode::TakeProfit => "take_profit",
            ExitMode::TimeExit => "time_exit",
            ExitMode::RiskReduction => "risk_reduction",
            ExitMode::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    Trending,
    Choppy,
    HighVolExpansion,
    LowVolCompression,
}

impl MarketRegime {
    fn canonicalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trending" | "trend" | "momentum" => Some(Self::Trending),
            "choppy" | "chop" | "range" | "ranging" | "mean_reverting" => Some(Self::Choppy),
            "high_vol_expansion" | "expansion" | "vol_expansion" | "breakout_vol" => {
                Some(Self::HighVolExpansion)
            }
            "low_vol_compression" | "compression" | "squeeze" | "quiet" => {
                Some(Self::LowVolCompression)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Trending => "trending",
            MarketRegime::Choppy => "choppy",
            MarketRegime::HighVolExpansion => "high_vol_expansion",
            MarketRegime::LowVolCompression => "low_vol_compression",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryTrigger {
    News,
    Technical,
    Hybrid,
}

impl EntryTrigger {
    fn canonicalize(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        match lower.as_str() {
            "news" | "headline" | "catalyst" => Some(Self::News),
            "technical" | "ta" | "imbalance" | "orderflow" | "breakout" => Some(Self::Technical),
            "hybrid" | "mixed" | "news+technical" => Some(Self::Hybrid),
            _ => {
                if ["imbalance", "orderflow", "breakout"].iter().any(|k| lower.contains(k)) {
                    Some(Self::Technical)
                } else {
                    None
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryTrigger::News => "news",
            EntryTrigger::Technical => "technical",
            EntryTrigger::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeArchetype {
    Scalp,
    Intraday,
    Swing,
}

impl TradeArchetype {
    fn canonicalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scalp" | "scalping" => Some(Self::Scalp),
            "intraday" | "day" => Some(Self::Intraday),
            "swing" | "position" => Some(Self::Swing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeArchetype::Scalp => "scalp",
            TradeArchetype::Intraday => "intraday",
            TradeArchetype::Swing => "swing",
        }
    }

    /// Minimum hold duration the entry validator enforces for `time_stop_at_ms`.
    pub fn min_hold(&self) -> chrono::Duration {
        match self {
            TradeArchetype::Scalp => chrono::Duration::minutes(3),
            TradeArchetype::Intraday => chrono::Duration::hours(1),
            TradeArchetype::Swing => chrono::Duration::hours(4),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailMode {
    Atr,
    Structure,
    None,
}

impl TrailMode {
    fn canonicalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "atr" => Some(Self::Atr),
            "structure" => Some(Self::Structure),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrailMode::Atr => "atr",
            TrailMode::Structure => "structure",
            TrailMode::None => "none",
        }
    }
}

/// Planner-produced order fields before normalization: stringly / loosely
/// typed JSON values, the way an LLM tool call actually arrives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawOrderInput {
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub size: Option<Value>,
    pub order_type: Option<String>,
    pub price: Option<Value>,
    pub reduce_only: Option<Value>,
    pub exit_mode: Option<String>,
    pub market_regime: Option<String>,
    pub entry_trigger: Option<String>,
    pub trade_archetype: Option<String>,
    pub thesis_invalidation_hit: Option<Value>,
    pub emergency_override: Option<Value>,
    pub emergency_reason: Option<String>,
    pub invalidation_type: Option<String>,
    pub invalidation_price: Option<Value>,
    pub time_stop_at_ms: Option<Value>,
    pub take_profit_r: Option<Value>,
    pub trail_mode: Option<String>,
}

/// Canonical, fully-typed order after normalization. Passing this back
/// through [`normalize_order_input`] (via [`NormalizedOrderInput::to_raw`])
/// is a fixed point: normalizing an already-normalized order is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOrderInput {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub order_type: String,
    pub reduce_only: bool,
    pub exit_mode: Option<ExitMode>,
    pub market_regime: Option<MarketRegime>,
    pub entry_trigger: Option<EntryTrigger>,
    pub trade_archetype: TradeArchetype,
    pub thesis_invalidation_hit: bool,
    pub emergency_override: bool,
    pub emergency_reason: Option<String>,
    pub invalidation_type: Option<String>,
    pub invalidation_price: Option<f64>,
    pub time_stop_at_ms: Option<i64>,
    pub take_profit_r: Option<f64>,
    pub trail_mode: Option<TrailMode>,
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn value_to_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

/// Per-field normalization: canonicalizes aliases, coerces loosely-typed
/// JSON values, and forces order_type to market.
pub fn normalize_order_input(raw: &RawOrderInput) -> NormalizedOrderInput {
    let symbol = raw.symbol.clone().unwrap_or_default().trim().to_uppercase();

    let side = match raw.side.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
        Some(s) if s == "sell" => Side::Sell,
        Some(s) if s == "buy" => Side::Buy,
        _ => Side::Buy,
    };

    let mut size = raw.size.as_ref().and_then(value_to_f64).unwrap_or(0.0);
    if size <= 0.0 || !size.is_finite() {
        size = 0.001;
    }

    // order_type is always forced to market and price dropped for
    // autonomous execution reliability.
    let order_type = "market".to_string();

    let reduce_only = raw.reduce_only.as_ref().and_then(value_to_bool).unwrap_or(false);

    let exit_mode = raw.exit_mode.as_deref().and_then(ExitMode::canonicalize);
    let market_regime = raw.market_regime.as_deref().and_then(MarketRegime::canonicalize);
    let entry_trigger = raw.entry_trigger.as_deref().and_then(EntryTrigger::canonicalize);

    let trade_archetype = raw
        .trade_archetype
        .as_deref()
        .and_then(TradeArchetype::canonicalize)
        .unwrap_or({
            if reduce_only {
                // Reduce-only exits don't get a synthesized archetype; default
                // to intraday as a harmless placeholder since archetype is
                // only binding for new entries.
                TradeArchetype::Intraday
            } else {
                TradeArchetype::Intraday
            }
        });

    let mut thesis_invalidation_hit =
        raw.thesis_invalidation_hit.as_ref().and_then(value_to_bool).unwrap_or(false);
    if reduce_only && exit_mode == Some(ExitMode::ThesisInvalidation) {
        thesis_invalidation_hit = true;
    }

    let emergency_override = raw.emergency_override.as_ref().and_then(value_to_bool).unwrap_or(false);
    let emergency_reason = raw
        .emergency_reason
        .clone()
        .filter(|s| !s.trim().is_empty());

    let trail_mode = raw.trail_mode.as_deref().and_then(TrailMode::canonicalize);

    NormalizedOrderInput {
        symbol,
        side,
        size,
        order_type,
        reduce_only,
        exit_mode,
        market_regime,
        entry_trigger,
        trade_archetype,
        thesis_invalidation_hit,
        emergency_override,
        emergency_reason,
        invalidation_type: raw.invalidation_type.clone(),
        invalidation_price: raw.invalidation_price.as_ref().and_then(value_to_f64),
        time_stop_at_ms: raw.time_stop_at_ms.as_ref().and_then(value_to_i64),
        take_profit_r: raw.take_profit_r.as_ref().and_then(value_to_f64),
        trail_mode,
    }
}

impl NormalizedOrderInput {
    /// Inverse projection used to prove the fixed-point property: running
    /// a normalized order back through [`normalize_order_input`] must
    /// reproduce it exactly.
    pub fn to_raw(&self) -> RawOrderInput {
        RawOrderInput {
            symbol: Some(self.symbol.clone()),
            side: Some(match self.side {
                Side::Buy => "buy".to_string(),
                Side::Sell => "sell".to_string(),
            }),
            size: Some(Value::from(self.size)),
            order_type: Some(self.order_type.clone()),
            price: None,
            reduce_only: Some(Value::Bool(self.reduce_only)),
            exit_mode: self.exit_mode.map(|m| m.as_str().to_string()),
            market_regime: self.market_regime.map(|m| m.as_str().to_string()),
            entry_trigger: self.entry_trigger.map(|m| m.as_str().to_string()),
            trade_archetype: Some(self.trade_archetype.as_str().to_string()),
            thesis_invalidation_hit: Some(Value::Bool(self.thesis_invalidation_hit)),
            emergency_override: Some(Value::Bool(self.emergency_override)),
            emergency_reason: self.emergency_reason.clone(),
            invalidation_type: self.invalidation_type.clone(),
            invalidation_price: self.invalidation_price.map(Value::from),
            time_stop_at_ms: self.time_stop_at_ms.map(Value::from),
            take_profit_r: self.take_profit_r.map(Value::from),
            trail_mode: self.trail_mode.map(|m| m.as_str().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_zero_and_order_type_forced_market() {
        // S3: {symbol:"BTC", side:"BUY", size:"0", order_type:"MARKET"}
        let raw = RawOrderInput {
            symbol: Some("BTC".to_string()),
            side: Some("BUY".to_string()),
            size: Some(Value::String("0".to_string())),
            order_type: Some("MARKET".to_string()),
            price: Some(Value::from(50000.0)),
            ..Default::default()
        };
        let n = normalize_order_input(&raw);
        assert_eq!(n.side, Side::Buy);
        assert_eq!(n.order_type, "market");
        assert!(n.size >= 0.001);
    }

    #[test]
    fn side_defaults_to_buy() {
        let raw = RawOrderInput { side: Some("long".to_string()), ..Default::default() };
        assert_eq!(normalize_order_input(&raw).side, Side::Buy);
    }

    #[test]
    fn exit_mode_aliases_canonicalize() {
        for (alias, expected) in [
            ("stop_loss", ExitMode::ThesisInvalidation),
            ("takeprofit", ExitMode::TakeProfit),
            ("timeout", ExitMode::TimeExit),
            ("de_risk", ExitMode::RiskReduction),
            ("manual_close", ExitMode::Manual),
        ] {
            let raw = RawOrderInput { exit_mode: Some(alias.to_string()), ..Default::default() };
            assert_eq!(normalize_order_input(&raw).exit_mode, Some(expected));
        }
    }

    #[test]
    fn reduce_only_thesis_invalidation_sets_hit_flag() {
        let raw = RawOrderInput {
            reduce_only: Some(Value::Bool(true)),
            exit_mode: Some("thesis_invalidated".to_string()),
            ..Default::default()
        };
        let n = normalize_order_input(&raw);
        assert!(n.thesis_invalidation_hit);
    }

    #[test]
    fn entry_trigger_infers_technical_from_keywords() {
        let raw = RawOrderInput {
            entry_trigger: Some("strong orderbook imbalance".to_string()),
            ..Default::default()
        };
        assert_eq!(normalize_order_input(&raw).entry_trigger, Some(EntryTrigger::Technical));
    }

    #[test]
    fn normalizing_a_normalized_input_is_a_fixed_point() {
        let raw = RawOrderInput {
            symbol: Some("eth".to_string()),
            side: Some("SELL".to_string()),
            size: Some(Value::String("2.5".to_string())),
            reduce_only: Some(Value::Bool(true)),
            exit_mode: Some("tp".to_string()),
            market_regime: Some("choppy".to_string()),
            entry_trigger: Some("news".to_string()),
            trade_archetype: Some("swing".to_string()),
            trail_mode: Some("atr".to_string()),
            take_profit_r: Some(Value::from(2.0)),
            ..Default::default()
        };
        let once = normalize_order_input(&raw);
        let twice = normalize_order_input(&once.to_raw());
        assert_eq!(once, twice);
    }
}
