//! Retry-with-widening execution strategy: on a "no immediate match"
//! venue failure class, retry up to a configured number of times with
//! slippage bps widened by +25 from a configured base. The spend
//! reservation is confirmed exactly once on the first success and
//! released only if every attempt fails.

use crate::limiter::{Limiter, ReserveOutcome};
use crate::venue::{OrderRequest, OrderResult, Venue, VenueError};

pub struct RetryOutcome {
    pub result: Result<OrderResult, VenueError>,
    pub attempts: u32,
    pub slippage_sequence_bps: Vec<u32>,
}

/// Widens slippage bps by +25 per attempt, starting from `base_bps`:
/// base 10 -> [10, 35, 60] for 3 attempts.
pub fn widened_slippage_sequence(base_bps: u32, attempts: u32) -> Vec<u32> {
    (0..attempts).map(|i| base_bps + 25 * i).collect()
}

pub async fn submit_with_retry(
    venue: &dyn Venue,
    limiter: &dyn Limiter,
    mut req: OrderRequest,
    base_slippage_bps: u32,
    max_attempts: u32,
    reserve_amount_usd: f64,
) -> anyhow::Result<RetryOutcome> {
    let reservation = limiter.check_and_reserve(reserve_amount_usd).await?;
    let reservation_id = match reservation {
        ReserveOutcome::Reserved(id) => id,
        ReserveOutcome::Blocked => {
            return Ok(RetryOutcome {
                result: Err(VenueError::Rejected("spending limit blocked".to_string())),
                attempts: 0,
                slippage_sequence_bps: vec![],
            });
        }
    };

    let sequence = widened_slippage_sequence(base_slippage_bps, max_attempts);
    let mut last_err = None;
    let mut attempts = 0;

    for slippage_bps in &sequence {
        attempts += 1;
        req.slippage_bps = *slippage_bps;
        match venue.order(req.clone()).await {
            Ok(result) => {
                limiter.confirm(reservation_id).await?;
                return Ok(RetryOutcome {
                    result: Ok(result),
                    attempts,
                    slippage_sequence_bps: sequence[..attempts as usize].to_vec(),
                });
            }
            Err(VenueError::NoImmediateMatch(msg)) => {
                last_err = Some(VenueError::NoImmediateMatch(msg));
                continue;
            }
            Err(other) => {
                limiter.release(reservation_id).await?;
                return Ok(RetryOutcome {
                    result: Err(other),
                    attempts,
                    slippage_sequence_bps: sequence[..attempts as usize].to_vec(),
                });
            }
        }
    }

    limiter.release(reservation_id).await?;
    Ok(RetryOutcome {
        result: Err(last_err.unwrap_or(VenueError::NoImmediateMatch("exhausted retries".to_string()))),
        attempts,
        slippage_sequence_bps: sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::SqliteLimiter;
    use crate::venue::{fake::FakeVenue, Side};

    #[tokio::test]
    async fn retries_with_widening_slippage_and_confirms_once() {
        // fails twice with "no immediate match", succeeds on the third.
        let venue = FakeVenue::new();
        {
            let mut failures = venue.order_failures.lock().await;
            failures.push_back(VenueError::NoImmediateMatch("no immediate match 1".to_string()));
            failures.push_back(VenueError::NoImmediateMatch("no immediate match 2".to_string()));
        }
        let limiter = SqliteLimiter::open_in_memory(1000.0).unwrap();

        let req = OrderRequest {
            client_order_id: "abc-1".to_string(),
            symbol: "BTC".to_string(),
            side: Side::Buy,
            size: 0.01,
            order_type: "market".to_string(),
            reduce_only: false,
            slippage_bps: 10,
        };

        let outcome = submit_with_retry(&venue, &limiter, req, 10, 3, 100.0).await.unwrap();
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.slippage_sequence_bps, vec![10, 35, 60]);

        let seen = venue.orders_seen.lock().await;
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].slippage_bps, 10);
        assert_eq!(seen[1].slippage_bps, 35);
        assert_eq!(seen[2].slippage_bps, 60);

        assert_eq!(limiter.today_spent().await.unwrap(), 100.0);
    }

    #[tokio::test]
    async fn all_failures_release_reservation() {
        let venue = FakeVenue::new();
        {
            let mut failures = venue.order_failures.lock().await;
            for _ in 0..3 {
                failures.push_back(VenueError::NoImmediateMatch("still no match".to_string()));
            }
        }
        let limiter = SqliteLimiter::open_in_memory(1000.0).unwrap();
        let req = OrderRequest {
            client_order_id: "abc-2".to_string(),
            symbol: "BTC".to_string(),
            side: Side::Buy,
            size: 0.01,
            order_type: "market".to_string(),
            reduce_only: false,
            slippage_bps: 10,
        };
        let outcome = submit_with_retry(&venue, &limiter, req, 10, 3, 100.0).await.unwrap();
        assert!(outcome.result.is_err());
        assert_eq!(limiter.today_spent().await.unwrap(), 0.0);
    }
}
