//! Pre-submission risk gate for autonomy-sourced orders: notional,
//! leverage, market-imposed leverage cap, and reduce-only consistency.

#[derive(Debug, Clone)]
pub struct RiskLimitInput {
    pub notional_usd: f64,
    pub leverage: f64,
    pub configured_leverage_cap: f64,
    pub policy_leverage_cap_override: Option<f64>,
    pub market_max_leverage: f64,
    pub max_notional_usd: f64,
    pub reduce_only: bool,
    pub has_existing_position: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBlock {
    NotionalExceedsCap,
    LeverageExceedsCap,
    LeverageExceedsMarketMax,
    ReduceOnlyWithoutPosition,
}

impl RiskBlock {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBlock::NotionalExceedsCap => "notional exceeds configured cap",
            RiskBlock::LeverageExceedsCap => "leverage exceeds configured/policy cap",
            RiskBlock::LeverageExceedsMarketMax => "leverage exceeds market maximum",
            RiskBlock::ReduceOnlyWithoutPosition => "reduce-only requested with no existing position",
        }
    }
}

/// Effective leverage cap is the tightest of: configured default, a live
/// policy override (if set), and the market's own maximum.
pub fn effective_leverage_cap(input: &RiskLimitInput) -> f64 {
    let mut cap = input.configured_leverage_cap;
    if let Some(policy_cap) = input.policy_leverage_cap_override {
        cap = cap.min(policy_cap);
    }
    cap.min(input.market_max_leverage)
}

pub fn check_perp_risk_limits(input: &RiskLimitInput) -> Result<(), RiskBlock> {
    if input.notional_usd > input.max_notional_usd {
        return Err(RiskBlock::NotionalExceedsCap);
    }
    if input.leverage > input.market_max_leverage {
        return Err(RiskBlock::LeverageExceedsMarketMax);
    }
    if input.leverage > effective_leverage_cap(input) {
        return Err(RiskBlock::LeverageExceedsCap);
    }
    if input.reduce_only && !input.has_existing_position {
        return Err(RiskBlock::ReduceOnlyWithoutPosition);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RiskLimitInput {
        RiskLimitInput {
            notional_usd: 100.0,
            leverage: 3.0,
            configured_leverage_cap: 5.0,
            policy_leverage_cap_override: None,
            market_max_leverage: 10.0,
            max_notional_usd: 1000.0,
            reduce_only: false,
            has_existing_position: false,
        }
    }

    #[test]
    fn passes_within_limits() {
        assert!(check_perp_risk_limits(&base()).is_ok());
    }

    #[test]
    fn blocks_notional_over_cap() {
        let mut input = base();
        input.notional_usd = 2000.0;
        assert_eq!(check_perp_risk_limits(&input), Err(RiskBlock::NotionalExceedsCap));
    }

    #[test]
    fn policy_override_tightens_cap() {
        let mut input = base();
        input.leverage = 4.0;
        input.policy_leverage_cap_override = Some(2.0);
        assert_eq!(check_perp_risk_limits(&input), Err(RiskBlock::LeverageExceedsCap));
    }

    #[test]
    fn reduce_only_without_position_is_blocked() {
        let mut input = base();
        input.reduce_only = true;
        assert_eq!(
            check_perp_risk_limits(&input),
            Err(RiskBlock::ReduceOnlyWithoutPosition)
        );
    }
}
