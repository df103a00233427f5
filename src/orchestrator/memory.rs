//! Memory assembly: concatenates session memory, knowledge-base snippets,
//! recent incidents, and matching playbooks into one prompt block, in
//! that order, omitting any section that has nothing to say.

use crate::journal::{IncidentLog, PlaybookStore};
use std::sync::Arc;

const MAX_INCIDENTS: usize = 6;
const MAX_INCIDENT_CHARS: usize = 180;
const MAX_PLAYBOOKS: usize = 4;
const MAX_PLAYBOOK_CHARS: usize = 900;

pub struct MemoryInputs<'a> {
    pub session_memory: Option<&'a str>,
    pub kb_snippets: Vec<String>,
    pub playbook_keys: Vec<String>,
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Builds the memory block handed to planning and synthesis. Empty
/// sections are left out entirely rather than rendered as headers with
/// no content.
pub async fn assemble_memory(
    incidents: &dyn IncidentLog,
    playbooks: &dyn PlaybookStore,
    inputs: MemoryInputs<'_>,
) -> anyhow::Result<String> {
    let mut sections = Vec::new();

    if let Some(mem) = inputs.session_memory {
        if !mem.trim().is_empty() {
            sections.push(format!("## Session memory\n{mem}"));
        }
    }

    if !inputs.kb_snippets.is_empty() {
        let joined = inputs.kb_snippets.join("\n---\n");
        sections.push(format!("## Knowledge base\n{joined}"));
    }

    let recent = incidents.recent(MAX_INCIDENTS).await?;
    if !recent.is_empty() {
        let lines: Vec<String> = recent
            .iter()
            .map(|i| format!("- [{}] {}: {}", i.blocker_kind, i.tool_name, truncate(&i.detail, MAX_INCIDENT_CHARS)))
            .collect();
        sections.push(format!("## Recent incidents\n{}", lines.join("\n")));
    }

    if !inputs.playbook_keys.is_empty() {
        let matched = playbooks.matching(&inputs.playbook_keys, MAX_PLAYBOOKS).await?;
        if !matched.is_empty() {
            let blocks: Vec<String> = matched
                .iter()
                .map(|p| format!("### {}\n{}", p.title, truncate(&p.content, MAX_PLAYBOOK_CHARS)))
                .collect();
            sections.push(format!("## Playbooks\n{}", blocks.join("\n\n")));
        }
    }

    Ok(sections.join("\n\n"))
}

pub type ArcIncidentLog = Arc<dyn IncidentLog>;
pub type ArcPlaybookStore = Arc<dyn PlaybookStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{IncidentRecord, Playbook};
    use async_trait::async_trait;
    use chrono::Utc;

    struct FakeIncidents(Vec<IncidentRecord>);
    #[async_trait]
    impl IncidentLog for FakeIncidents {
        async fn record(&self, _tool_name: &str, _blocker_kind: &str, _detail: &str) -> anyhow::Result<i64> {
            Ok(1)
        }
        async fn recent(&self, limit: usize) -> anyhow::Result<Vec<IncidentRecord>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    struct FakePlaybooks(Vec<Playbook>);
    #[async_trait]
    impl PlaybookStore for FakePlaybooks {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<Playbook>> {
            Ok(self.0.first().cloned())
        }
        async fn seed_if_absent(&self, _key: &str, _title: &str, _content: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn matching(&self, _keys: &[String], limit: usize) -> anyhow::Result<Vec<Playbook>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    #[tokio::test]
    async fn empty_sections_are_omitted() {
        let incidents = FakeIncidents(vec![]);
        let playbooks = FakePlaybooks(vec![]);
        let memory = assemble_memory(
            &incidents,
            &playbooks,
            MemoryInputs { session_memory: None, kb_snippets: vec![], playbook_keys: vec![] },
        )
        .await
        .unwrap();
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn incidents_and_playbooks_render_when_present() {
        let incidents = FakeIncidents(vec![IncidentRecord {
            id: Some(1),
            created_at: Utc::now(),
            tool_name: "perp_place_order".to_string(),
            blocker_kind: "rejected".to_string(),
            detail: "insufficient margin".to_string(),
        }]);
        let playbooks = FakePlaybooks(vec![Playbook {
            key: "loss_streak".to_string(),
            title: "Loss streak response".to_string(),
            content: "Pause and reassess sizing.".to_string(),
            updated_at: Utc::now(),
        }]);
        let memory = assemble_memory(
            &incidents,
            &playbooks,
            MemoryInputs {
                session_memory: Some("trading BTC and ETH"),
                kb_snippets: vec![],
                playbook_keys: vec!["loss_streak".to_string()],
            },
        )
        .await
        .unwrap();
        assert!(memory.contains("Session memory"));
        assert!(memory.contains("Recent incidents"));
        assert!(memory.contains("Playbooks"));
        assert!(memory.contains("Loss streak response"));
    }
}
