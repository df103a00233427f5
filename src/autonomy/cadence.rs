//! Adaptive scan-interval calculation: the base interval is widened under
//! position/budget pressure and high volatility, narrowed when quiet, and
//! clamped to a sane operating range.

pub const BASE_INTERVAL_SECS: u64 = 900;
const MIN_INTERVAL_SECS: u64 = 120;
const MAX_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct CadenceInput {
    pub open_position_count: u32,
    pub concurrent_position_cap: u32,
    pub remaining_daily_budget_usd: f64,
    pub per_trade_cap_usd: f64,
    pub global_volatility_pct: f64,
}

pub fn next_interval_secs(base_secs: u64, input: &CadenceInput) -> u64 {
    let mut multiplier = 1.0_f64;

    if input.open_position_count >= input.concurrent_position_cap {
        multiplier *= 2.0;
    }
    if input.remaining_daily_budget_usd < input.per_trade_cap_usd {
        multiplier *= 2.0;
    }
    if input.global_volatility_pct >= 1.0 {
        multiplier *= 1.5;
    } else if input.global_volatility_pct <= 0.25 {
        multiplier *= 0.75;
    }

    let scaled = (base_secs as f64 * multiplier).round() as u64;
    scaled.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_input() -> CadenceInput {
        CadenceInput {
            open_position_count: 0,
            concurrent_position_cap: 5,
            remaining_daily_budget_usd: 1000.0,
            per_trade_cap_usd: 100.0,
            global_volatility_pct: 0.5,
        }
    }

    #[test]
    fn unconstrained_quiet_input_keeps_base() {
        assert_eq!(next_interval_secs(BASE_INTERVAL_SECS, &quiet_input()), BASE_INTERVAL_SECS);
    }

    #[test]
    fn position_cap_pressure_doubles_interval() {
        let mut input = quiet_input();
        input.open_position_count = 5;
        assert_eq!(next_interval_secs(BASE_INTERVAL_SECS, &input), BASE_INTERVAL_SECS * 2);
    }

    #[test]
    fn high_volatility_and_budget_pressure_compound_but_clamp() {
        let mut input = quiet_input();
        input.open_position_count = 5;
        input.remaining_daily_budget_usd = 10.0;
        input.global_volatility_pct = 2.0;
        // 900 * 2 * 2 * 1.5 = 5400, clamped to 3600.
        assert_eq!(next_interval_secs(BASE_INTERVAL_SECS, &input), MAX_INTERVAL_SECS);
    }

    #[test]
    fn quiet_market_shrinks_interval_but_respects_floor() {
        let mut input = quiet_input();
        input.global_volatility_pct = 0.1;
        assert_eq!(next_interval_secs(BASE_INTERVAL_SECS, &input), (BASE_INTERVAL_SECS as f64 * 0.75) as u64);

        let tiny_base = next_interval_secs(150, &input);
        assert!(tiny_base >= MIN_INTERVAL_SECS);
    }
}
