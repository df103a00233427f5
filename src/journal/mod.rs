//! Append-only decision journal, incident log, and playbook store.
//!
//! A `rusqlite::Connection` behind `Arc<tokio::sync::Mutex<_>>`, schema
//! created with `CREATE TABLE IF NOT EXISTS` at construction, over
//! `decision_artifacts` / `journal_entries` / `incidents` / `playbooks`
//! tables. Every write is an insert; nothing here ever issues an `UPDATE`
//! against these tables.

mod store;

pub use store::SqliteJournal;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionAudit {
    pub mode: String,
    pub goal: String,
    pub market_id: Option<String>,
    pub prediction_id: Option<String>,
    pub trade_action: Option<String>,
    pub outcome: Option<String>,
    pub amount: Option<f64>,
    pub confidence: f64,
    pub critic_approved: Option<bool>,
    pub critic_issues: Vec<String>,
    pub fragility_score: Option<f64>,
    pub tool_calls: u32,
    pub iterations: u32,
    pub tool_trace: serde_json::Value,
    pub plan_trace: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalOutcome {
    Executed,
    Failed,
    Blocked,
}

impl JournalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalOutcome::Executed => "executed",
            JournalOutcome::Failed => "failed",
            JournalOutcome::Blocked => "blocked",
        }
    }
}

/// One entry per observed tool call of interest: a trade attempt, a close,
/// or a block. Immutable once written; corrections are new entries
/// carrying `corrects`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub symbol: String,
    pub outcome: JournalOutcome,
    pub signal_class: Option<String>,
    pub regime: Option<String>,
    pub confidence_raw: f64,
    pub confidence_weighted: f64,
    pub sizing_modifier: f64,
    pub kelly_fraction: f64,
    pub context_pack: serde_json::Value,
    pub corrects: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub tool_name: String,
    pub blocker_kind: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub key: String,
    pub title: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait Journal: Send + Sync {
    async fn append_decision(&self, audit: &DecisionAudit) -> Result<i64>;
    async fn append_entry(&self, entry: &JournalEntry) -> Result<i64>;
    /// Most recent entries for today, most recent first.
    async fn recent_summary(&self, limit: usize) -> Result<Vec<JournalEntry>>;
    /// Tail close P&Ls, most recent first, for loss-streak evaluation.
    async fn recent_close_pnls(&self, limit: usize) -> Result<Vec<f64>>;
}

#[async_trait]
pub trait IncidentLog: Send + Sync {
    async fn record(&self, tool_name: &str, blocker_kind: &str, detail: &str) -> Result<i64>;
    /// Most recent incidents, each truncated to `max_len` chars by the
    /// caller for memory-assembly prompts.
    async fn recent(&self, limit: usize) -> Result<Vec<IncidentRecord>>;
}

#[async_trait]
pub trait PlaybookStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Playbook>>;
    async fn seed_if_absent(&self, key: &str, title: &str, content: &str) -> Result<()>;
    async fn matching(&self, keys: &[String], limit: usize) -> Result<Vec<Playbook>>;
}
