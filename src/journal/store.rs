use super::{DecisionAudit, IncidentLog, IncidentRecord, Journal, JournalEntry, JournalOutcome, Playbook, PlaybookStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite-backed implementation of [`Journal`], [`IncidentLog`] and
/// [`PlaybookStore`]: one `Arc<Mutex<Connection>>` behind a small struct
/// with `async fn` methods that take the lock for the duration of one
/// statement.
pub struct SqliteJournal {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJournal {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open journal db")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS decision_artifacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS journal_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                symbol TEXT NOT NULL,
                outcome TEXT NOT NULL,
                signal_class TEXT,
                regime TEXT,
                confidence_raw REAL NOT NULL,
                confidence_weighted REAL NOT NULL,
                sizing_modifier REAL NOT NULL,
                kelly_fraction REAL NOT NULL,
                context_pack TEXT NOT NULL,
                corrects INTEGER
            );

            CREATE TABLE IF NOT EXISTS incidents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                blocker_kind TEXT NOT NULL,
                detail TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS playbooks (
                key TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl Journal for SqliteJournal {
    async fn append_decision(&self, audit: &DecisionAudit) -> Result<i64> {
        let conn = self.conn.lock().await;
        let payload = serde_json::to_string(audit)?;
        conn.execute(
            "INSERT INTO decision_artifacts (created_at, kind, payload_json) VALUES (?1, 'decision', ?2)",
            params![Utc::now().to_rfc3339(), payload],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn append_entry(&self, entry: &JournalEntry) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO journal_entries
                (created_at, symbol, outcome, signal_class, regime, confidence_raw,
                 confidence_weighted, sizing_modifier, kelly_fraction, context_pack, corrects)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.created_at.to_rfc3339(),
                entry.symbol,
                entry.outcome.as_str(),
                entry.signal_class,
                entry.regime,
                entry.confidence_raw,
                entry.confidence_weighted,
                entry.sizing_modifier,
                entry.kelly_fraction,
                entry.context_pack.to_string(),
                entry.corrects,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn recent_summary(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, symbol, outcome, signal_class, regime, confidence_raw,
                    confidence_weighted, sizing_modifier, kelly_fraction, context_pack, corrects
             FROM journal_entries ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_entry)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    async fn recent_close_pnls(&self, limit: usize) -> Result<Vec<f64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT context_pack FROM journal_entries
             WHERE outcome = 'executed' ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let raw: String = row.get(0)?;
            Ok(raw)
        })?;
        let mut out = Vec::new();
        for raw in rows.collect::<rusqlite::Result<Vec<_>>>()? {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&raw) {
                if let Some(pnl) = v.get("close_pnl").and_then(|p| p.as_f64()) {
                    out.push(pnl);
                }
            }
        }
        Ok(out)
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<JournalEntry> {
    let created_raw: String = row.get(1)?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap());
    let outcome_raw: String = row.get(3)?;
    let outcome = match outcome_raw.as_str() {
        "executed" => JournalOutcome::Executed,
        "blocked" => JournalOutcome::Blocked,
        _ => JournalOutcome::Failed,
    };
    let context_raw: String = row.get(10)?;
    Ok(JournalEntry {
        id: row.get(0)?,
        created_at,
        symbol: row.get(2)?,
        outcome,
        signal_class: row.get(4)?,
        regime: row.get(5)?,
        confidence_raw: row.get(6)?,
        confidence_weighted: row.get(7)?,
        sizing_modifier: row.get(8)?,
        kelly_fraction: row.get(9)?,
        context_pack: serde_json::from_str(&context_raw).unwrap_or(serde_json::Value::Null),
        corrects: row.get(11)?,
    })
}

#[async_trait]
impl IncidentLog for SqliteJournal {
    async fn record(&self, tool_name: &str, blocker_kind: &str, detail: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO incidents (created_at, tool_name, blocker_kind, detail) VALUES (?1, ?2, ?3, ?4)",
            params![Utc::now().to_rfc3339(), tool_name, blocker_kind, detail],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<IncidentRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, tool_name, blocker_kind, detail
             FROM incidents ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let created_raw: String = row.get(1)?;
            let created_at = DateTime::parse_from_rfc3339(&created_raw)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap());
            Ok(IncidentRecord {
                id: row.get(0)?,
                created_at,
                tool_name: row.get(2)?,
                blocker_kind: row.get(3)?,
                detail: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

#[async_trait]
impl PlaybookStore for SqliteJournal {
    async fn get(&self, key: &str) -> Result<Option<Playbook>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT key, title, content, updated_at FROM playbooks WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            let updated_raw: String = row.get(3)?;
            Ok(Some(Playbook {
                key: row.get(0)?,
                title: row.get(1)?,
                content: row.get(2)?,
                updated_at: DateTime::parse_from_rfc3339(&updated_raw)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap()),
            }))
        } else {
            Ok(None)
        }
    }

    async fn seed_if_absent(&self, key: &str, title: &str, content: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO playbooks (key, title, content, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![key, title, content, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn matching(&self, keys: &[String], limit: usize) -> Result<Vec<Playbook>> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.conn.lock().await;
        let placeholders = keys.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT key, title, content, updated_at FROM playbooks WHERE key IN ({}) LIMIT {}",
            placeholders, limit
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(keys.iter()), |row| {
            let updated_raw: String = row.get(3)?;
            Ok(Playbook {
                key: row.get(0)?,
                title: row.get(1)?,
                content: row.get(2)?,
                updated_at: DateTime::parse_from_rfc3339(&updated_raw)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap()),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decision_audit_roundtrip() {
        let j = SqliteJournal::open_in_memory().unwrap();
        let audit = DecisionAudit {
            mode: "trade".to_string(),
            goal: "buy btc".to_string(),
            market_id: Some("BTC".to_string()),
            prediction_id: None,
            trade_action: Some("perp_place_order".to_string()),
            outcome: Some("executed".to_string()),
            amount: Some(100.0),
            confidence: 0.8,
            critic_approved: Some(true),
            critic_issues: vec![],
            fragility_score: None,
            tool_calls: 2,
            iterations: 3,
            tool_trace: serde_json::json!([]),
            plan_trace: serde_json::json!([]),
        };
        let id = j.append_decision(&audit).await.unwrap();
        assert!(id > 0);
    }

    #[tokio::test]
    async fn journal_entries_append_only_and_ordered() {
        let j = SqliteJournal::open_in_memory().unwrap();
        for i in 0..3 {
            let entry = JournalEntry {
                id: None,
                created_at: Utc::now(),
                symbol: "BTC".to_string(),
                outcome: JournalOutcome::Executed,
                signal_class: None,
                regime: None,
                confidence_raw: 0.5,
                confidence_weighted: 0.5,
                sizing_modifier: 1.0,
                kelly_fraction: 0.1,
                context_pack: serde_json::json!({"i": i}),
                corrects: None,
            };
            j.append_entry(&entry).await.unwrap();
        }
        let recent = j.recent_summary(10).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].context_pack["i"], 2);
    }

    #[tokio::test]
    async fn playbook_seeds_only_once() {
        let j = SqliteJournal::open_in_memory().unwrap();
        j.seed_if_absent("k1", "t1", "c1").await.unwrap();
        j.seed_if_absent("k1", "t2", "c2").await.unwrap();
        let pb = j.get("k1").await.unwrap().unwrap();
        assert_eq!(pb.title, "t1");
    }
}
