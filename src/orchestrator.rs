// ABOUTME: Orchestrator - wires config, models, providers, and the bus into a run.
// ABOUTME: The crate's entry point: run(query) drives a session to a cited output.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::citation::CitationProcessor;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::{EventBus, EventKind, Subscription};
use crate::lead::LeadController;
use crate::llm::ChatModel;
use crate::provider::{FetchProvider, SearchProvider};
use crate::session::{Session, SessionStatus};
use crate::source::SourceTable;

const EVENT_BUS_CAPACITY: usize = 1024;

/// Owns one research run end to end.
///
/// Holds the external collaborators (models, providers), the event bus,
/// and the run's cancellation root. Observers subscribe before calling
/// [`run`](Self::run); cancelling the token cancels the lead, which
/// cancels every active subagent.
pub struct Orchestrator {
    config: Arc<SessionConfig>,
    lead_model: Arc<dyn ChatModel>,
    subagent_model: Arc<dyn ChatModel>,
    citation_model: Arc<dyn ChatModel>,
    search: Arc<dyn SearchProvider>,
    fetch: Arc<dyn FetchProvider>,
    bus: EventBus,
    cancel: CancellationToken,
    session_id: String,
}

impl Orchestrator {
    /// Create an orchestrator for one run. The subagent model doubles as
    /// the citation model unless overridden.
    pub fn new(
        config: SessionConfig,
        lead_model: Arc<dyn ChatModel>,
        subagent_model: Arc<dyn ChatModel>,
        search: Arc<dyn SearchProvider>,
        fetch: Arc<dyn FetchProvider>,
    ) -> Self {
        let session_id = format!("sess-{}", &Uuid::new_v4().simple().to_string()[..12]);
        let bus = EventBus::new(session_id.clone(), EVENT_BUS_CAPACITY);
        Self {
            config: Arc::new(config),
            lead_model,
            citation_model: Arc::clone(&subagent_model),
            subagent_model,
            search,
            fetch,
            bus,
            cancel: CancellationToken::new(),
            session_id,
        }
    }

    /// Use a distinct model for the citation pass.
    pub fn citation_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.citation_model = model;
        self
    }

    /// This run's session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Subscribe to the run's event stream.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// The run's root cancellation token. Cancelling it propagates to the
    /// lead loop and all active subagents; cancellation is idempotent.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a research session for a query.
    ///
    /// Returns `Ok(Session)` for completed, partially failed, and cancelled
    /// runs alike; per-task failures live in the session's metadata. The
    /// only `Err` outcomes are an unreachable ChatModel and a deadline that
    /// expired before any draft existed.
    pub async fn run(&self, query: impl Into<String>) -> Result<Session, SessionError> {
        let query = query.into();
        self.config
            .validate()
            .map_err(SessionError::Configuration)?;

        let mut session = Session::new(
            self.session_id.clone(),
            query.clone(),
            (*self.config).clone(),
        );
        self.bus
            .publish(None, EventKind::SessionStarted { query: query.clone() });
        info!(session = %self.session_id, "session started");

        let table = Arc::new(SourceTable::new());
        let controller = LeadController::new(
            Arc::clone(&self.lead_model),
            Arc::clone(&self.subagent_model),
            Arc::clone(&self.search),
            Arc::clone(&self.fetch),
            Arc::clone(&table),
            self.bus.clone(),
            self.cancel.clone(),
            Arc::clone(&self.config),
        )
        .await;

        let outcome = controller.run(&mut session).await;
        session.sources = table.snapshot();

        match outcome {
            Err(e) => {
                self.bus
                    .publish(None, EventKind::Error { message: e.to_string() });
                session.status = SessionStatus::Failed { message: e.to_string() };
                session.finished_at = Some(chrono::Utc::now());
                return Err(e);
            }
            Ok(()) => {}
        }

        if session.status == SessionStatus::Cancelled {
            // Preserve whatever was gathered; no citation pass.
            session.finished_at = Some(chrono::Utc::now());
            info!(session = %self.session_id, "session cancelled");
            return Ok(session);
        }

        if let Some(draft) = session.draft.clone() {
            let processor = CitationProcessor::new(
                Arc::clone(&self.citation_model),
                Arc::clone(&self.config),
                self.bus.clone(),
            );
            session.cited = Some(processor.cite(&draft, &session.sources).await);
        }

        session.status = SessionStatus::Completed;
        session.finished_at = Some(chrono::Utc::now());
        info!(session = %self.session_id, sources = session.sources.len(), "session completed");
        Ok(session)
    }
}
