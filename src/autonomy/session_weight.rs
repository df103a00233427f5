//! Deterministic session weight: a multiplier in [0.4, 1.0] derived from
//! UTC hour (trading-session liquidity) and a coarse liquidity regime,
//! applied to both confidence and position sizing.

use chrono::{DateTime, Timelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidityRegime {
    Thin,
    Normal,
    Deep,
}

/// Hour-of-day weight: overlapping London/New York hours (roughly
/// 12:00-20:00 UTC) get full weight; the Asia-only window (00:00-06:00
/// UTC) gets the floor; everything else sits in between.
fn hour_weight(hour: u32) -> f64 {
    match hour {
        12..=20 => 1.0,
        6..=11 | 21..=23 => 0.7,
        _ => 0.4,
    }
}

fn regime_weight(regime: LiquidityRegime) -> f64 {
    match regime {
        LiquidityRegime::Deep => 1.0,
        LiquidityRegime::Normal => 0.85,
        LiquidityRegime::Thin => 0.4,
    }
}

pub fn session_weight(at: DateTime<Utc>, regime: LiquidityRegime) -> f64 {
    (hour_weight(at.hour()) * regime_weight(regime)).clamp(0.4, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn overlap_hours_with_deep_liquidity_hit_ceiling() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 15, 0, 0).unwrap();
        assert_eq!(session_weight(at, LiquidityRegime::Deep), 1.0);
    }

    #[test]
    fn quiet_hours_with_thin_liquidity_hit_floor() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap();
        assert_eq!(session_weight(at, LiquidityRegime::Thin), 0.4);
    }

    #[test]
    fn weight_always_in_bounds() {
        for hour in 0..24 {
            let at = Utc.with_ymd_and_hms(2026, 1, 1, hour, 0, 0).unwrap();
            for regime in [LiquidityRegime::Thin, LiquidityRegime::Normal, LiquidityRegime::Deep] {
                let w = session_weight(at, regime);
                assert!((0.4..=1.0).contains(&w));
            }
        }
    }
}
