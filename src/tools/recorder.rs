// ABOUTME: SourceRecorder - per-agent source attribution with a contribution cap.
// ABOUTME: Dedup-joins new sources into the run's SourceTable under its lock.

use std::sync::{Arc, Mutex};

use crate::source::{normalize_url, SourceTable};

/// Records which sources one agent contributed to the shared table.
///
/// Enforces the per-subagent source cap; sources beyond the cap are ignored
/// rather than erroring, since quality judgment belongs to the LLM.
pub struct SourceRecorder {
    table: Arc<SourceTable>,
    agent_id: String,
    cap: usize,
    contributed: Mutex<Vec<String>>,
}

impl SourceRecorder {
    pub fn new(table: Arc<SourceTable>, agent_id: impl Into<String>, cap: usize) -> Self {
        Self {
            table,
            agent_id: agent_id.into(),
            cap,
            contributed: Mutex::new(Vec::new()),
        }
    }

    /// Record one source. Returns its citation index, or None when this
    /// agent's cap is already reached.
    pub fn record(&self, url: &str, title: &str, snippet: &str) -> Option<usize> {
        let key = normalize_url(url);
        let mut contributed = self.contributed.lock().unwrap();
        if !contributed.contains(&key) {
            if contributed.len() >= self.cap {
                return None;
            }
            contributed.push(key.clone());
        }
        drop(contributed);

        let (index, _) = self.table.insert(url, title, snippet, &self.agent_id);
        Some(index)
    }

    /// Normalized URLs this agent touched, in contribution order.
    pub fn contributed(&self) -> Vec<String> {
        self.contributed.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_attributes_and_indexes() {
        let table = Arc::new(SourceTable::new());
        let recorder = SourceRecorder::new(Arc::clone(&table), "sub-1", 10);

        assert_eq!(recorder.record("https://a.example", "A", ""), Some(1));
        assert_eq!(recorder.record("https://b.example", "B", ""), Some(2));
        assert_eq!(recorder.contributed().len(), 2);
        assert_eq!(table.snapshot()[0].first_seen_by, "sub-1");
    }

    #[test]
    fn test_cap_stops_new_contributions() {
        let table = Arc::new(SourceTable::new());
        let recorder = SourceRecorder::new(Arc::clone(&table), "sub-1", 1);

        assert!(recorder.record("https://a.example", "A", "").is_some());
        assert!(recorder.record("https://b.example", "B", "").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_repeat_url_does_not_consume_cap() {
        let table = Arc::new(SourceTable::new());
        let recorder = SourceRecorder::new(Arc::clone(&table), "sub-1", 1);

        assert_eq!(recorder.record("https://a.example", "A", ""), Some(1));
        assert_eq!(recorder.record("https://a.example/#frag", "A", ""), Some(1));
        assert_eq!(recorder.contributed().len(), 1);
    }
}
