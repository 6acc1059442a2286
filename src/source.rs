// ABOUTME: Source provenance - normalized URLs, dedup, first-seen citation indices.
// ABOUTME: The SourceTable is the run-wide shared table guarded by a mutex.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Query-string keys stripped during URL normalization.
const TRACKING_KEYS: &[&str] = &["fbclid", "gclid", "msclkid", "ref", "ref_src"];

/// Normalize a URL for dedup: lowercase scheme and host, strip the fragment
/// and common tracking query keys, drop a trailing slash on the path.
pub fn normalize_url(raw: &str) -> String {
    let url = raw.trim();
    let url = match url.split_once('#') {
        Some((before, _)) => before,
        None => url,
    };

    let (head, query) = match url.split_once('?') {
        Some((h, q)) => (h, Some(q)),
        None => (url, None),
    };

    // Lowercase only scheme://host, not the path.
    let head = match head.find("://") {
        Some(pos) => {
            let after = &head[pos + 3..];
            let host_end = after.find('/').unwrap_or(after.len());
            format!(
                "{}://{}{}",
                head[..pos].to_lowercase(),
                after[..host_end].to_lowercase(),
                &after[host_end..]
            )
        }
        None => head.to_string(),
    };
    let head = head.trim_end_matches('/').to_string();

    let kept: Vec<&str> = match query {
        Some(q) => q
            .split('&')
            .filter(|pair| {
                let key = pair.split('=').next().unwrap_or("");
                let key = key.to_lowercase();
                !key.starts_with("utm_") && !TRACKING_KEYS.contains(&key.as_str())
            })
            .collect(),
        None => Vec::new(),
    };

    if kept.is_empty() {
        head
    } else {
        format!("{}?{}", head, kept.join("&"))
    }
}

/// A unique web resource referenced during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Normalized URL, the dedup key.
    pub url: String,

    /// Page or result title, best effort.
    pub title: String,

    /// Search snippet or leading text, best effort.
    pub snippet: String,

    /// Id of the agent that first contributed this source.
    pub first_seen_by: String,

    /// When the source first entered the table.
    pub first_seen_at: DateTime<Utc>,
}

struct TableInner {
    index_by_url: HashMap<String, usize>,
    entries: Vec<Source>,
}

/// The run's append-only table of sources, keyed by normalized URL.
///
/// Insertion order defines the citation index space `[1..N]`. Concurrent
/// subagents insert under the mutex; critical sections are a hash-map
/// lookup plus a push.
pub struct SourceTable {
    inner: Mutex<TableInner>,
}

impl SourceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                index_by_url: HashMap::new(),
                entries: Vec::new(),
            }),
        }
    }

    /// Insert a source, deduplicating by normalized URL.
    ///
    /// Returns the 1-based citation index and whether the entry is new.
    /// A duplicate insert keeps the original entry and its index.
    pub fn insert(
        &self,
        url: &str,
        title: &str,
        snippet: &str,
        seen_by: &str,
    ) -> (usize, bool) {
        let key = normalize_url(url);
        let mut inner = self.inner.lock().unwrap();

        if let Some(&idx) = inner.index_by_url.get(&key) {
            return (idx + 1, false);
        }

        let idx = inner.entries.len();
        inner.entries.push(Source {
            url: key.clone(),
            title: title.to_string(),
            snippet: snippet.to_string(),
            first_seen_by: seen_by.to_string(),
            first_seen_at: Utc::now(),
        });
        inner.index_by_url.insert(key, idx);
        (idx + 1, true)
    }

    /// Citation index for a URL, if present.
    pub fn index_of(&self, url: &str) -> Option<usize> {
        let key = normalize_url(url);
        let inner = self.inner.lock().unwrap();
        inner.index_by_url.get(&key).map(|i| i + 1)
    }

    /// Whether a URL is present.
    pub fn contains(&self, url: &str) -> bool {
        self.index_of(url).is_some()
    }

    /// Number of unique sources.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// True when no sources have been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all sources in first-seen order.
    pub fn snapshot(&self) -> Vec<Source> {
        self.inner.lock().unwrap().entries.clone()
    }

    /// Compact one-line-per-source summary for lead prompts.
    pub fn summary(&self) -> String {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if s.title.is_empty() {
                    format!("[{}] {}", i + 1, s.url)
                } else {
                    format!("[{}] {} - {}", i + 1, s.title, s.url)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for SourceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_host_only() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Path/To/Page"),
            "https://example.com/Path/To/Page"
        );
    }

    #[test]
    fn test_normalize_strips_fragment_and_tracking() {
        assert_eq!(
            normalize_url("https://example.com/a?utm_source=x&q=rust&fbclid=123#section"),
            "https://example.com/a?q=rust"
        );
    }

    #[test]
    fn test_normalize_strips_trailing_slash() {
        assert_eq!(normalize_url("https://example.com/"), "https://example.com");
    }

    #[test]
    fn test_insert_assigns_first_seen_indices() {
        let table = SourceTable::new();
        let (a, new_a) = table.insert("https://a.example/x", "A", "", "sub-1");
        let (b, new_b) = table.insert("https://b.example/y", "B", "", "sub-2");
        assert!(new_a && new_b);
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn test_duplicate_keeps_original_index() {
        let table = SourceTable::new();
        let (first, _) = table.insert("https://a.example/x", "A", "snippet", "sub-1");
        let (again, fresh) = table.insert("HTTPS://A.EXAMPLE/x#frag", "Other", "", "sub-2");
        assert_eq!(first, again);
        assert!(!fresh);
        assert_eq!(table.len(), 1);

        let snap = table.snapshot();
        assert_eq!(snap[0].title, "A");
        assert_eq!(snap[0].first_seen_by, "sub-1");
    }

    #[test]
    fn test_index_of_normalizes() {
        let table = SourceTable::new();
        table.insert("https://a.example/x?utm_campaign=z", "A", "", "sub-1");
        assert_eq!(table.index_of("https://a.example/x"), Some(1));
        assert!(table.contains("https://A.example/x"));
        assert_eq!(table.index_of("https://other.example"), None);
    }

    #[test]
    fn test_summary_format() {
        let table = SourceTable::new();
        table.insert("https://a.example", "Title A", "", "sub-1");
        table.insert("https://b.example", "", "", "sub-1");
        let summary = table.summary();
        assert!(summary.contains("[1] Title A - https://a.example"));
        assert!(summary.contains("[2] https://b.example"));
    }
}
