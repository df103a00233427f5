//! Process-wide spending limiter backed by a `spending_state` row.
//! Mutation is `check_and_reserve -> confirm | release`; reservations not
//! confirmed or released within a TTL are reclaimed on the next check,
//! using a single `Arc<Mutex<Connection>>`-guarded row rather than a
//! distributed lock.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved(u64),
    Blocked,
}

#[async_trait]
pub trait Limiter: Send + Sync {
    async fn check_and_reserve(&self, amount_usd: f64) -> Result<ReserveOutcome>;
    async fn confirm(&self, reservation_id: u64) -> Result<()>;
    async fn release(&self, reservation_id: u64) -> Result<()>;
    async fn today_spent(&self) -> Result<f64>;
    async fn today_trade_count(&self) -> Result<u32>;
}

struct Reservation {
    amount_usd: f64,
    created_at: DateTime<Utc>,
}

pub struct SqliteLimiter {
    conn: Arc<Mutex<Connection>>,
    daily_budget_usd: f64,
    reservation_ttl: ChronoDuration,
    pending: Arc<Mutex<std::collections::HashMap<u64, Reservation>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl SqliteLimiter {
    pub fn open(db_path: &str, daily_budget_usd: f64) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            daily_budget_usd,
            reservation_ttl: ChronoDuration::seconds(120),
            pending: Arc::new(Mutex::new(std::collections::HashMap::new())),
            next_id: std::sync::atomic::AtomicU64::new(1),
        })
    }

    pub fn open_in_memory(daily_budget_usd: f64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            daily_budget_usd,
            reservation_ttl: ChronoDuration::seconds(120),
            pending: Arc::new(Mutex::new(std::collections::HashMap::new())),
            next_id: std::sync::atomic::AtomicU64::new(1),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS spending_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                today_spent REAL NOT NULL DEFAULT 0.0,
                today_trade_count INTEGER NOT NULL DEFAULT 0,
                reset_at TEXT NOT NULL
            );",
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO spending_state (id, today_spent, today_trade_count, reset_at)
             VALUES (1, 0.0, 0, ?1)",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn maybe_reset(&self, conn: &Connection) -> Result<()> {
        let reset_at_raw: String =
            conn.query_row("SELECT reset_at FROM spending_state WHERE id = 1", [], |r| r.get(0))?;
        let reset_at = DateTime::parse_from_rfc3339(&reset_at_raw)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        if Utc::now().date_naive() != reset_at.date_naive() {
            conn.execute(
                "UPDATE spending_state SET today_spent = 0.0, today_trade_count = 0, reset_at = ?1 WHERE id = 1",
                params![Utc::now().to_rfc3339()],
            )?;
        }
        Ok(())
    }

    async fn reap_expired(&self) {
        let mut pending = self.pending.lock().await;
        let now = Utc::now();
        pending.retain(|_, r| now.signed_duration_since(r.created_at) < self.reservation_ttl);
    }
}

#[async_trait]
impl Limiter for SqliteLimiter {
    async fn check_and_reserve(&self, amount_usd: f64) -> Result<ReserveOutcome> {
        self.reap_expired().await;
        let conn = self.conn.lock().await;
        self.maybe_reset(&conn)?;
        let today_spent: f64 =
            conn.query_row("SELECT today_spent FROM spending_state WHERE id = 1", [], |r| r.get(0))?;
        let reserved_total: f64 = {
            let pending = self.pending.lock().await;
            pending.values().map(|r| r.amount_usd).sum()
        };
        if today_spent + reserved_total + amount_usd > self.daily_budget_usd {
            return Ok(ReserveOutcome::Blocked);
        }
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.pending
            .lock()
            .await
            .insert(id, Reservation { amount_usd, created_at: Utc::now() });
        Ok(ReserveOutcome::Reserved(id))
    }

    async fn confirm(&self, reservation_id: u64) -> Result<()> {
        let reservation = self.pending.lock().await.remove(&reservation_id);
        if let Some(r) = reservation {
            let conn = self.conn.lock().await;
            conn.execute(
                "UPDATE spending_state SET today_spent = today_spent + ?1, today_trade_count = today_trade_count + 1 WHERE id = 1",
                params![r.amount_usd],
            )?;
        }
        Ok(())
    }

    async fn release(&self, reservation_id: u64) -> Result<()> {
        self.pending.lock().await.remove(&reservation_id);
        Ok(())
    }

    async fn today_spent(&self) -> Result<f64> {
        let conn = self.conn.lock().await;
        self.maybe_reset(&conn)?;
        Ok(conn.query_row("SELECT today_spent FROM spending_state WHERE id = 1", [], |r| r.get(0))?)
    }

    async fn today_trade_count(&self) -> Result<u32> {
        let conn = self.conn.lock().await;
        Ok(conn.query_row("SELECT today_trade_count FROM spending_state WHERE id = 1", [], |r| r.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocks_when_budget_exceeded() {
        let limiter = SqliteLimiter::open_in_memory(100.0).unwrap();
        let r1 = limiter.check_and_reserve(60.0).await.unwrap();
        assert!(matches!(r1, ReserveOutcome::Reserved(_)));
        let r2 = limiter.check_and_reserve(60.0).await.unwrap();
        assert_eq!(r2, ReserveOutcome::Blocked);
    }

    #[tokio::test]
    async fn confirm_books_spend_release_does_not() {
        let limiter = SqliteLimiter::open_in_memory(100.0).unwrap();
        if let ReserveOutcome::Reserved(id) = limiter.check_and_reserve(40.0).await.unwrap() {
            limiter.confirm(id).await.unwrap();
        }
        assert_eq!(limiter.today_spent().await.unwrap(), 40.0);

        if let ReserveOutcome::Reserved(id) = limiter.check_and_reserve(40.0).await.unwrap() {
            limiter.release(id).await.unwrap();
        }
        assert_eq!(limiter.today_spent().await.unwrap(), 40.0);
    }
}
