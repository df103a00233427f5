//! Leased, single-owner job scheduler: each job has a schedule kind, a
//! lease duration, and a handler. A poller claims due jobs whose lease is
//! free or expired via compare-and-set, runs the handler, then computes
//! the job's next run time and releases the lease. Crash safety comes
//! from lease expiry, not explicit crash detection.

pub mod commands;

use crate::cancel::CancelToken;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum Schedule {
    Once(DateTime<Utc>),
    Interval(ChronoDuration),
    Daily(NaiveTime),
}

impl Schedule {
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Once(at) => {
                if *at > now {
                    Some(*at)
                } else {
                    None
                }
            }
            Schedule::Interval(d) => Some(now + *d),
            Schedule::Daily(time) => {
                let mut candidate = now.date_naive().and_time(*time).and_utc();
                if candidate <= now {
                    candidate += ChronoDuration::days(1);
                }
                Some(candidate)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerJobRow {
    pub name: String,
    pub next_run_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_until: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SchedulerStore: Send + Sync {
    async fn upsert_job(&self, name: &str, next_run_at: DateTime<Utc>) -> Result<()>;
    /// Atomically claims one due, unleased-or-expired job by name via
    /// compare-and-set; returns `false` if another owner already holds it
    /// or it isn't due yet.
    async fn try_claim(&self, name: &str, owner: &str, now: DateTime<Utc>, lease_until: DateTime<Utc>) -> Result<bool>;
    async fn due_job_names(&self, now: DateTime<Utc>) -> Result<Vec<String>>;
    async fn complete(&self, name: &str, next_run_at: Option<DateTime<Utc>>) -> Result<()>;
    async fn release(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> Result<()>;
}

pub struct ScheduledJob {
    pub name: String,
    pub schedule: Schedule,
    pub lease: ChronoDuration,
    pub handler: Arc<dyn JobHandler>,
}

pub struct Scheduler {
    store: Arc<dyn SchedulerStore>,
    owner_id: String,
    jobs: HashMap<String, ScheduledJob>,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(store: Arc<dyn SchedulerStore>, owner_id: impl Into<String>) -> Self {
        Self { store, owner_id: owner_id.into(), jobs: HashMap::new(), cancel: CancelToken::new() }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn register(&mut self, job: ScheduledJob) -> Result<()> {
        let first_run = job.schedule.next_run_after(Utc::now()).unwrap_or_else(Utc::now);
        self.store.upsert_job(&job.name, first_run).await?;
        self.jobs.insert(job.name.clone(), job);
        Ok(())
    }

    pub async fn poll_once(&self) -> Result<()> {
        let now = Utc::now();
        let due = self.store.due_job_names(now).await?;
        for name in due {
            let Some(job) = self.jobs.get(&name) else { continue };
            let lease_until = now + job.lease;
            let claimed = self.store.try_claim(&name, &self.owner_id, now, lease_until).await?;
            if !claimed {
                continue;
            }

            info!(job = %name, owner = %self.owner_id, "claimed scheduler job");
            let run_result = job.handler.run().await;
            if let Err(e) = &run_result {
                warn!(job = %name, error = %e, "scheduler job handler failed");
            }

            let next_run = job.schedule.next_run_after(Utc::now());
            self.store.complete(&name, next_run).await?;
        }
        Ok(())
    }

    /// Runs `poll_once` on the given cadence until cancelled.
    pub async fn run(&self, poll_interval: std::time::Duration) {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if self.cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "scheduler poll failed");
            }
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

pub mod store;
pub use store::SqliteSchedulerStore;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler(Arc<AtomicU32>);

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn run(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_owner_cannot_claim_an_already_leased_job() {
        let store = Arc::new(SqliteSchedulerStore::open_in_memory().unwrap());
        store.upsert_job("scan", Utc::now() - ChronoDuration::seconds(1)).await.unwrap();

        let now = Utc::now();
        let lease_until = now + ChronoDuration::seconds(30);
        let first = store.try_claim("scan", "owner-a", now, lease_until).await.unwrap();
        let second = store.try_claim("scan", "owner-b", now, lease_until).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let store = Arc::new(SqliteSchedulerStore::open_in_memory().unwrap());
        store.upsert_job("scan", Utc::now() - ChronoDuration::seconds(1)).await.unwrap();

        let now = Utc::now();
        let past_lease = now - ChronoDuration::seconds(5);
        store.try_claim("scan", "owner-a", now, past_lease).await.unwrap();

        let reclaim_now = Utc::now();
        let claimed = store
            .try_claim("scan", "owner-b", reclaim_now, reclaim_now + ChronoDuration::seconds(30))
            .await
            .unwrap();
        assert!(claimed);
    }

    #[tokio::test]
    async fn poll_once_runs_due_job_and_schedules_next() {
        let store: Arc<dyn SchedulerStore> = Arc::new(SqliteSchedulerStore::open_in_memory().unwrap());
        let mut scheduler = Scheduler::new(store, "owner-a");
        let count = Arc::new(AtomicU32::new(0));
        scheduler
            .register(ScheduledJob {
                name: "heartbeat".to_string(),
                schedule: Schedule::Interval(ChronoDuration::seconds(1)),
                lease: ChronoDuration::seconds(10),
                handler: Arc::new(CountingHandler(count.clone())),
            })
            .await
            .unwrap();

        scheduler.poll_once().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn daily_schedule_rolls_to_next_day_when_time_passed() {
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let schedule = Schedule::Daily(time);
        let now = Utc::now().date_naive().and_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap()).and_utc();
        let next = schedule.next_run_after(now).unwrap();
        assert!(next > now);
        assert_eq!(next.time(), time);
    }
}
