use super::SchedulerStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite-backed lease table: one row per job name, with `next_run_at`
/// and an optional `(lease_owner, lease_until)` pair claimed via a single
/// conditional `UPDATE`.
pub struct SqliteSchedulerStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteSchedulerStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path).context("open scheduler db")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_jobs (
                name TEXT PRIMARY KEY,
                next_run_at TEXT NOT NULL,
                lease_owner TEXT,
                lease_until TEXT
            );

            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id TEXT PRIMARY KEY,
                scheduler_job_name TEXT NOT NULL,
                channel TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                schedule_kind TEXT NOT NULL,
                run_at TEXT,
                daily_time TEXT,
                interval_minutes INTEGER,
                instruction TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );
            "#,
        )?;
        Ok(())
    }
}

fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[async_trait]
impl SchedulerStore for SqliteSchedulerStore {
    async fn upsert_job(&self, name: &str, next_run_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO scheduler_jobs (name, next_run_at, lease_owner, lease_until)
               VALUES (?1, ?2, NULL, NULL)
               ON CONFLICT(name) DO UPDATE SET next_run_at = excluded.next_run_at"#,
            params![name, to_rfc3339(next_run_at)],
        )?;
        Ok(())
    }

    async fn try_claim(&self, name: &str, owner: &str, now: DateTime<Utc>, lease_until: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            r#"UPDATE scheduler_jobs
               SET lease_owner = ?1, lease_until = ?2
               WHERE name = ?3
                 AND next_run_at <= ?4
                 AND (lease_owner IS NULL OR lease_until < ?4)"#,
            params![owner, to_rfc3339(lease_until), name, to_rfc3339(now)],
        )?;
        Ok(affected == 1)
    }

    async fn due_job_names(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT name FROM scheduler_jobs
               WHERE next_run_at <= ?1
                 AND (lease_owner IS NULL OR lease_until < ?1)"#,
        )?;
        let rows = stmt
            .query_map(params![to_rfc3339(now)], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn complete(&self, name: &str, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.conn.lock().await;
        match next_run_at {
            Some(at) => {
                conn.execute(
                    r#"UPDATE scheduler_jobs SET next_run_at = ?1, lease_owner = NULL, lease_until = NULL WHERE name = ?2"#,
                    params![to_rfc3339(at), name],
                )?;
            }
            None => {
                conn.execute("DELETE FROM scheduler_jobs WHERE name = ?1", params![name])?;
            }
        }
        Ok(())
    }

    async fn release(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE scheduler_jobs SET lease_owner = NULL, lease_until = NULL WHERE name = ?1",
            params![name],
        )?;
        Ok(())
    }
}

impl SqliteSchedulerStore {
    /// Inserts a user-facing scheduled task row alongside its backing
    /// scheduler job. Used by the `/schedule` command surface.
    pub async fn insert_task(
        &self,
        id: &str,
        scheduler_job_name: &str,
        channel: &str,
        recipient_id: &str,
        schedule_kind: &str,
        run_at: Option<DateTime<Utc>>,
        daily_time: Option<&str>,
        interval_minutes: Option<i64>,
        instruction: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO scheduled_tasks
               (id, scheduler_job_name, channel, recipient_id, schedule_kind, run_at, daily_time, interval_minutes, instruction, active)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)"#,
            params![
                id,
                scheduler_job_name,
                channel,
                recipient_id,
                schedule_kind,
                run_at.map(to_rfc3339),
                daily_time,
                interval_minutes,
                instruction,
            ],
        )?;
        Ok(())
    }

    pub async fn list_active_tasks(&self) -> Result<Vec<ScheduledTaskRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, scheduler_job_name, channel, recipient_id, schedule_kind, run_at, daily_time, interval_minutes, instruction
               FROM scheduled_tasks WHERE active = 1"#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                let run_at: Option<String> = row.get(5)?;
                Ok(ScheduledTaskRow {
                    id: row.get(0)?,
                    scheduler_job_name: row.get(1)?,
                    channel: row.get(2)?,
                    recipient_id: row.get(3)?,
                    schedule_kind: row.get(4)?,
                    run_at,
                    daily_time: row.get(6)?,
                    interval_minutes: row.get(7)?,
                    instruction: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn deactivate_task(&self, id_prefix: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let matched: Option<String> = conn
            .query_row(
                "SELECT id FROM scheduled_tasks WHERE active = 1 AND id LIKE ?1 || '%' LIMIT 1",
                params![id_prefix],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = &matched {
            conn.execute("UPDATE scheduled_tasks SET active = 0 WHERE id = ?1", params![id])?;
        }
        Ok(matched)
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledTaskRow {
    pub id: String,
    pub scheduler_job_name: String,
    pub channel: String,
    pub recipient_id: String,
    pub schedule_kind: String,
    pub run_at: Option<String>,
    pub daily_time: Option<String>,
    pub interval_minutes: Option<i64>,
    pub instruction: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn upsert_then_due_job_names_reports_due_jobs() {
        let store = SqliteSchedulerStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.upsert_job("scan", now - Duration::seconds(1)).await.unwrap();
        let due = store.due_job_names(now).await.unwrap();
        assert_eq!(due, vec!["scan".to_string()]);
    }

    #[tokio::test]
    async fn claim_then_complete_clears_lease_and_advances_run() {
        let store = SqliteSchedulerStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.upsert_job("scan", now - Duration::seconds(1)).await.unwrap();
        store.try_claim("scan", "owner-a", now, now + Duration::seconds(30)).await.unwrap();
        store.complete("scan", Some(now + Duration::hours(1))).await.unwrap();
        let due = store.due_job_names(now).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn insert_task_then_list_then_deactivate_by_prefix() {
        let store = SqliteSchedulerStore::open_in_memory().unwrap();
        store
            .insert_task("abcd1234", "scan", "telegram", "chat-1", "interval", None, None, Some(15), "run a scan")
            .await
            .unwrap();
        let active = store.list_active_tasks().await.unwrap();
        assert_eq!(active.len(), 1);

        let deactivated = store.deactivate_task("abcd").await.unwrap();
        assert_eq!(deactivated.as_deref(), Some("abcd1234"));
        assert!(store.list_active_tasks().await.unwrap().is_empty());
    }

    #[test]
    fn rfc3339_round_trips() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let parsed = parse_rfc3339(&to_rfc3339(now)).unwrap();
        assert_eq!(parsed, now);
    }
}
