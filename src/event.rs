// ABOUTME: Structured event stream - the run's only streaming surface.
// ABOUTME: Broadcast bus with global sequence numbers; laggards get Dropped(n).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::QueryType;
use crate::subagent::SubagentStatus;

/// What happened, with the payload observers need.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted { query: String },
    QueryClassified { query_type: QueryType },
    PlanCreated { round_index: usize, task_count: usize },
    SubagentSpawned { task: String },
    ToolCallStarted { tool: String, call_id: String },
    ToolCallFinished { tool: String, call_id: String, is_error: bool },
    TokenDelta { text: String },
    SubagentFinished { status: SubagentStatus, tool_calls_made: usize },
    RoundComplete { round_index: usize, result_count: usize },
    SynthesisStarted,
    SynthesisComplete { draft_chars: usize },
    CitationComplete { total_anchors: usize, unique_anchors: usize, uncited_sources: usize },
    CitationDegraded { reason: String },
    /// Coalesced marker delivered to a subscriber that fell behind.
    Dropped { count: u64 },
    Error { message: String },
}

/// One entry on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonically increasing per-session sequence number.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub subagent_id: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

struct BusInner {
    session_id: String,
    seq: AtomicU64,
    tx: broadcast::Sender<Event>,
}

/// Broadcast-style event bus.
///
/// Publishing never blocks on subscribers; a slow subscriber that overflows
/// its queue observes a synthesized [`EventKind::Dropped`] on its next recv.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus for one session with the given per-subscriber capacity.
    pub fn new(session_id: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                session_id: session_id.into(),
                seq: AtomicU64::new(0),
                tx,
            }),
        }
    }

    /// The session this bus belongs to.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Publish an event. Dropped silently when no subscriber is attached.
    pub fn publish(&self, subagent_id: Option<&str>, kind: EventKind) {
        let event = Event {
            seq: self.inner.seq.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            session_id: self.inner.session_id.clone(),
            subagent_id: subagent_id.map(str::to_string),
            kind,
        };
        let _ = self.inner.tx.send(event);
    }

    /// Attach a new subscriber. Events published before this call are not
    /// replayed.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.inner.tx.subscribe(),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Sequence number the next published event will carry.
    pub fn next_seq(&self) -> u64 {
        self.inner.seq.load(Ordering::SeqCst)
    }
}

/// One subscriber's view of the bus.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
    inner: Arc<BusInner>,
}

impl Subscription {
    /// Receive the next event.
    ///
    /// Returns None once the bus is closed and the backlog is drained. If
    /// this subscriber lagged, a synthesized `Dropped { count }` event is
    /// delivered before the stream resumes.
    pub async fn recv(&mut self) -> Option<Event> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(count)) => Some(Event {
                seq: self.inner.seq.load(Ordering::SeqCst),
                timestamp: Utc::now(),
                session_id: self.inner.session_id.clone(),
                subagent_id: None,
                kind: EventKind::Dropped { count },
            }),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking receive; None when no event is ready.
    pub fn try_recv(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(count)) => Some(Event {
                seq: self.inner.seq.load(Ordering::SeqCst),
                timestamp: Utc::now(),
                session_id: self.inner.session_id.clone(),
                subagent_id: None,
                kind: EventKind::Dropped { count },
            }),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_carry_increasing_seq() {
        let bus = EventBus::new("sess-1", 16);
        let mut sub = bus.subscribe();

        bus.publish(None, EventKind::SessionStarted { query: "q".into() });
        bus.publish(Some("sub-1"), EventKind::SynthesisStarted);

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(second.subagent_id.as_deref(), Some("sub-1"));
        assert_eq!(first.session_id, "sess-1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new("sess-1", 4);
        bus.publish(None, EventKind::SynthesisStarted);
        assert_eq!(bus.next_seq(), 1);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_sees_dropped() {
        let bus = EventBus::new("sess-1", 2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.publish(None, EventKind::TokenDelta { text: format!("t{}", i) });
        }

        let event = sub.recv().await.unwrap();
        match event.kind {
            EventKind::Dropped { count } => assert_eq!(count, 3),
            other => panic!("expected Dropped, got {:?}", other),
        }
        // Stream resumes with the oldest retained event.
        let next = sub.recv().await.unwrap();
        assert!(matches!(next.kind, EventKind::TokenDelta { .. }));
    }

    #[tokio::test]
    async fn test_multiple_subscribers_independent() {
        let bus = EventBus::new("sess-1", 16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(None, EventKind::SynthesisStarted);

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[test]
    fn test_event_serializes_with_flattened_kind() {
        let event = Event {
            seq: 3,
            timestamp: Utc::now(),
            session_id: "s".into(),
            subagent_id: None,
            kind: EventKind::PlanCreated { round_index: 1, task_count: 4 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "plan_created");
        assert_eq!(json["task_count"], 4);
    }
}
