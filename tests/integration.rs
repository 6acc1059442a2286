// ABOUTME: End-to-end orchestration scenarios with scripted models and providers.
// ABOUTME: Covers the seed scenarios: trivial, breadth, depth, failure, budget, cancel.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::Stream;

use delve::citation::strip_anchors;
use delve::error::{LlmError, ProviderError};
use delve::prelude::*;

// ---------------------------------------------------------------------------
// Scripted ChatModel
// ---------------------------------------------------------------------------

fn text_response(text: &str) -> Response {
    Response {
        id: "msg".into(),
        content: vec![ContentBlock::text(text)],
        stop_reason: StopReason::EndTurn,
        model: "scripted".into(),
        usage: Usage { input_tokens: 10, output_tokens: 10 },
    }
}

fn tool_response(name: &str, input: serde_json::Value) -> Response {
    Response {
        id: "msg".into(),
        content: vec![ContentBlock::ToolUse {
            id: format!("call-{}", name),
            name: name.into(),
            input,
        }],
        stop_reason: StopReason::ToolUse,
        model: "scripted".into(),
        usage: Usage { input_tokens: 10, output_tokens: 10 },
    }
}

fn complete_response(report: &str) -> Response {
    tool_response("complete_task", serde_json::json!({ "report": report }))
}

fn search_response(query: &str) -> Response {
    tool_response("web_search", serde_json::json!({ "query": query }))
}

fn run_subagents_response(tasks: &[&str]) -> Response {
    tool_response("run_subagents", serde_json::json!({ "tasks": tasks }))
}

fn response_to_events(response: Response) -> Vec<Result<StreamEvent, LlmError>> {
    let mut events = vec![Ok(StreamEvent::MessageStart {
        id: response.id.clone(),
        model: response.model.clone(),
    })];
    for (index, block) in response.content.iter().enumerate() {
        match block {
            ContentBlock::Text { text } => {
                events.push(Ok(StreamEvent::ContentBlockStart {
                    index,
                    block: ContentBlock::text(""),
                }));
                events.push(Ok(StreamEvent::ContentBlockDelta { index, text: text.clone() }));
                events.push(Ok(StreamEvent::ContentBlockStop { index }));
            }
            ContentBlock::ToolUse { id, name, input } => {
                events.push(Ok(StreamEvent::ContentBlockStart {
                    index,
                    block: ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: serde_json::json!({}),
                    },
                }));
                events.push(Ok(StreamEvent::InputJsonDelta {
                    index,
                    partial_json: input.to_string(),
                }));
                events.push(Ok(StreamEvent::ContentBlockStop { index }));
            }
            ContentBlock::ToolResult { .. } => {}
        }
    }
    events.push(Ok(StreamEvent::MessageDelta {
        stop_reason: Some(response.stop_reason),
        usage: response.usage.clone(),
    }));
    events.push(Ok(StreamEvent::MessageStop));
    events
}

/// Pops queued responses in call order; shared by complete and streaming.
struct ScriptedModel {
    responses: Mutex<VecDeque<Response>>,
}

impl ScriptedModel {
    fn new(responses: Vec<Response>) -> Arc<Self> {
        Arc::new(Self { responses: Mutex::new(responses.into()) })
    }

    fn pop(&self) -> Result<Response, LlmError> {
        self.responses.lock().unwrap().pop_front().ok_or(LlmError::Api {
            status: 0,
            message: "script exhausted".into(),
        })
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, _req: &Request) -> Result<Response, LlmError> {
        self.pop()
    }

    fn stream_completion(
        &self,
        _req: &Request,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        match self.pop() {
            Ok(response) => Box::pin(futures::stream::iter(response_to_events(response))),
            Err(e) => Box::pin(futures::stream::iter(vec![Err(e)])),
        }
    }
}

/// Routes to a per-task script by substring-matching the task prompt,
/// so concurrent subagents stay deterministic.
struct KeyedModel {
    rules: Vec<(&'static str, Mutex<VecDeque<Response>>)>,
}

impl KeyedModel {
    fn new(rules: Vec<(&'static str, Vec<Response>)>) -> Arc<Self> {
        Arc::new(Self {
            rules: rules
                .into_iter()
                .map(|(key, responses)| (key, Mutex::new(responses.into())))
                .collect(),
        })
    }

    fn pop_for(&self, req: &Request) -> Result<Response, LlmError> {
        let task = req
            .messages
            .first()
            .map(|m| m.text())
            .unwrap_or_default();
        for (key, queue) in &self.rules {
            if task.contains(key) {
                return queue.lock().unwrap().pop_front().ok_or(LlmError::Api {
                    status: 0,
                    message: format!("script for '{}' exhausted", key),
                });
            }
        }
        Err(LlmError::Api { status: 0, message: format!("no script for task: {}", task) })
    }
}

#[async_trait]
impl ChatModel for KeyedModel {
    async fn complete(&self, req: &Request) -> Result<Response, LlmError> {
        self.pop_for(req)
    }

    fn stream_completion(
        &self,
        req: &Request,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        match self.pop_for(req) {
            Ok(response) => Box::pin(futures::stream::iter(response_to_events(response))),
            Err(e) => Box::pin(futures::stream::iter(vec![Err(e)])),
        }
    }
}

/// A model whose stream never produces anything, for cancellation tests.
struct HangingModel;

#[async_trait]
impl ChatModel for HangingModel {
    async fn complete(&self, _req: &Request) -> Result<Response, LlmError> {
        futures::future::pending().await
    }

    fn stream_completion(
        &self,
        _req: &Request,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        Box::pin(futures::stream::pending())
    }
}

/// Citation model that echoes the draft with a `[^1]` anchor appended.
struct AnchoringCitationModel;

#[async_trait]
impl ChatModel for AnchoringCitationModel {
    async fn complete(&self, req: &Request) -> Result<Response, LlmError> {
        let prompt = req.messages.first().map(|m| m.text()).unwrap_or_default();
        let start = prompt.find("<synthesized_text>\n").map(|p| p + 19).unwrap_or(0);
        let end = prompt.find("\n</synthesized_text>").unwrap_or(prompt.len());
        let draft = &prompt[start..end];
        Ok(text_response(&format!(
            "<exact_text_with_citation>{}[^1]</exact_text_with_citation>",
            draft
        )))
    }

    fn stream_completion(
        &self,
        _req: &Request,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        Box::pin(futures::stream::empty())
    }
}

// ---------------------------------------------------------------------------
// Canned providers
// ---------------------------------------------------------------------------

/// Returns a hit derived from the query's first keyword rule that matches.
struct KeyedSearch {
    rules: Vec<(&'static str, SearchHit)>,
}

#[async_trait]
impl SearchProvider for KeyedSearch {
    async fn search(
        &self,
        query: &str,
        _max_results: usize,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let lower = query.to_lowercase();
        Ok(self
            .rules
            .iter()
            .filter(|(key, _)| lower.contains(&key.to_lowercase()))
            .map(|(_, hit)| hit.clone())
            .collect())
    }
}

fn hit(url: &str, title: &str, snippet: &str) -> SearchHit {
    SearchHit { url: url.into(), title: title.into(), snippet: snippet.into() }
}

struct CannedFetch {
    text: String,
}

#[async_trait]
impl FetchProvider for CannedFetch {
    async fn fetch(&self, _url: &str) -> Result<FetchedPage, ProviderError> {
        Ok(FetchedPage {
            title: "Page".into(),
            text: self.text.clone(),
            fetched_at: chrono::Utc::now(),
        })
    }
}

/// Fails every fetch with a permanent error.
struct BrokenFetch;

#[async_trait]
impl FetchProvider for BrokenFetch {
    async fn fetch(&self, _url: &str) -> Result<FetchedPage, ProviderError> {
        Err(ProviderError::Http { status: 403, message: "Forbidden".into() })
    }
}

fn classify_response(query_type: &str) -> Response {
    text_response(&format!(
        "{{\"query_type\": \"{}\", \"rationale\": \"scripted\"}}",
        query_type
    ))
}

fn orchestrator(
    config: SessionConfig,
    lead: Arc<dyn ChatModel>,
    sub: Arc<dyn ChatModel>,
    search: Arc<dyn SearchProvider>,
    fetch: Arc<dyn FetchProvider>,
) -> Orchestrator {
    Orchestrator::new(config, lead, sub, search, fetch)
        .citation_model(Arc::new(AnchoringCitationModel))
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trivial_factual_query_produces_cited_answer() {
    let lead = ScriptedModel::new(vec![
        classify_response("straightforward"),
        run_subagents_response(&["Find the capital of France and verify it"]),
        complete_response("The capital of France is Paris."),
    ]);
    let sub = ScriptedModel::new(vec![
        search_response("capital of France"),
        complete_response("Paris is the capital of France."),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![(
            "capital",
            hit("https://en.wikipedia.org/wiki/Paris", "Paris", "Capital of France"),
        )],
    });
    let fetch = Arc::new(CannedFetch { text: "Paris is the capital of France.".into() });

    let orch = orchestrator(SessionConfig::default(), lead, sub, search, fetch);
    let session = orch.run("What is the capital of France?").await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.query_type, Some(QueryType::Straightforward));
    assert_eq!(session.rounds.len(), 1);

    let result = &session.rounds[0].results[0];
    assert_eq!(result.status, SubagentStatus::Ok);
    assert!(result.tool_calls_made <= 3);
    assert_eq!(result.sources.len(), 1);

    let draft = session.draft.as_deref().unwrap();
    assert!(draft.contains("Paris"));

    let cited = session.cited.as_ref().unwrap();
    assert!(!cited.degraded);
    assert!(cited.stats.total_anchors >= 1);
    assert!(cited.references.contains("en.wikipedia.org"));
    // Identity invariant: anchors removed gives back the draft.
    assert_eq!(strip_anchors(&cited.body, cited.style), draft);
}

#[tokio::test]
async fn breadth_first_query_fans_out_one_task_per_company() {
    let lead = ScriptedModel::new(vec![
        classify_response("breadth_first"),
        run_subagents_response(&[
            "Research Alphabet latest quarter revenue",
            "Research Microsoft latest quarter revenue",
            "Research Amazon latest quarter revenue",
        ]),
        complete_response(
            "Alphabet reported $96B, Microsoft reported $76B, and Amazon reported $180B.",
        ),
    ]);
    let sub = KeyedModel::new(vec![
        (
            "Alphabet",
            vec![search_response("Alphabet revenue"), complete_response("Alphabet: $96B")],
        ),
        (
            "Microsoft",
            vec![search_response("Microsoft revenue"), complete_response("Microsoft: $76B")],
        ),
        (
            "Amazon",
            vec![search_response("Amazon revenue"), complete_response("Amazon: $180B")],
        ),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![
            ("alphabet", hit("https://abc.xyz/earnings", "Alphabet Q2", "Revenue $96B")),
            ("microsoft", hit("https://microsoft.com/earnings", "MSFT Q2", "Revenue $76B")),
            ("amazon", hit("https://amazon.com/earnings", "AMZN Q2", "Revenue $180B")),
        ],
    });
    let fetch = Arc::new(CannedFetch { text: "earnings".into() });

    let orch = orchestrator(SessionConfig::default(), lead, sub, search, fetch);
    let session = orch
        .run("Compare the latest-quarter revenue of Alphabet, Microsoft, and Amazon")
        .await
        .unwrap();

    assert_eq!(session.query_type, Some(QueryType::BreadthFirst));
    assert_eq!(session.rounds[0].plan.tasks.len(), 3);

    let results = &session.rounds[0].results;
    assert_eq!(results.len(), 3);
    for result in results {
        assert_eq!(result.status, SubagentStatus::Ok);
        assert!(!result.sources.is_empty());
        // Each subagent stayed on its own company.
        assert_eq!(result.sources.len(), 1);
    }
    // Dispatch-order aggregation regardless of completion order.
    assert!(results[0].task.contains("Alphabet"));
    assert!(results[1].task.contains("Microsoft"));
    assert!(results[2].task.contains("Amazon"));

    assert!(session.sources.len() >= 3);
    let draft = session.draft.as_deref().unwrap();
    for name in ["Alphabet", "Microsoft", "Amazon"] {
        assert!(draft.contains(name));
    }
}

#[tokio::test]
async fn depth_first_query_covers_both_positions() {
    let lead = ScriptedModel::new(vec![
        classify_response("depth_first"),
        run_subagents_response(&[
            "Gather the strongest evidence supporting intermittent fasting",
            "Gather the strongest evidence against intermittent fasting",
        ]),
        complete_response(
            "Evidence in favor includes metabolic improvements; evidence against includes \
             adherence problems and muscle loss.",
        ),
    ]);
    let sub = KeyedModel::new(vec![
        (
            "supporting",
            vec![
                search_response("intermittent fasting benefits"),
                complete_response("Supports metabolic health."),
            ],
        ),
        (
            "against",
            vec![
                search_response("intermittent fasting risks"),
                complete_response("Adherence problems, muscle loss."),
            ],
        ),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![
            ("benefits", hit("https://journal.example/pro", "IF benefits", "")),
            ("risks", hit("https://journal.example/contra", "IF risks", "")),
        ],
    });
    let fetch = Arc::new(CannedFetch { text: "study".into() });

    let orch = orchestrator(SessionConfig::default(), lead, sub, search, fetch);
    let session = orch
        .run("Evaluate the evidence for and against intermittent fasting")
        .await
        .unwrap();

    let plan = &session.rounds[0].plan;
    assert!(plan.tasks.len() >= 2 && plan.tasks.len() <= 5);

    let draft = session.draft.as_deref().unwrap();
    assert!(draft.contains("favor"));
    assert!(draft.contains("against"));
}

#[tokio::test]
async fn partial_failure_still_produces_cited_output() {
    let lead = ScriptedModel::new(vec![
        classify_response("breadth_first"),
        run_subagents_response(&["Research topic alpha", "Research topic beta"]),
        complete_response("Alpha findings stand; beta could not be researched."),
    ]);
    // Alpha succeeds despite its fetch failing; beta's model errors out.
    let sub = KeyedModel::new(vec![
        (
            "alpha",
            vec![
                search_response("alpha facts"),
                tool_response("web_fetch", serde_json::json!({"url": "https://a.example/deep"})),
                complete_response("Alpha is well documented."),
            ],
        ),
        ("beta", vec![]),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![("alpha", hit("https://a.example", "Alpha", "about alpha"))],
    });

    let orch = orchestrator(SessionConfig::default(), lead, sub, search, Arc::new(BrokenFetch));
    let session = orch.run("Research alpha and beta").await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);

    let results = &session.rounds[0].results;
    assert_eq!(results[0].status, SubagentStatus::Ok);
    assert_eq!(results[1].status, SubagentStatus::Error);

    // The failed task is flagged in session metadata.
    assert_eq!(session.failed_tasks.len(), 1);
    assert!(session.failed_tasks[0].task.contains("beta"));

    let cited = session.cited.as_ref().unwrap();
    assert!(cited.references.contains("a.example"));
}

#[tokio::test]
async fn budget_exhaustion_forces_finalize_and_lead_still_synthesizes() {
    let mut config = SessionConfig::default();
    config.default_budget_light = 2;

    let lead = ScriptedModel::new(vec![
        classify_response("straightforward"),
        run_subagents_response(&["Find everything about the hard question"]),
        complete_response("Best available answer from partial findings."),
    ]);
    // Three searches against a budget of two, then a clean finalize.
    let sub = ScriptedModel::new(vec![
        search_response("hard question"),
        search_response("hard question details"),
        search_response("hard question more"),
        complete_response("Partial findings gathered before budget ran out."),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![("hard", hit("https://h.example", "Hard", ""))],
    });
    let fetch = Arc::new(CannedFetch { text: "hard".into() });

    let orch = orchestrator(config, lead, sub, search, fetch);
    let session = orch.run("A very hard question").await.unwrap();

    let result = &session.rounds[0].results[0];
    assert_eq!(result.status, SubagentStatus::BudgetExhausted);
    assert!(result.tool_calls_made <= 2);
    assert!(result.has_findings());

    assert!(session.draft.is_some());
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn cancellation_mid_flight_reaches_terminal_state_quickly() {
    let lead = ScriptedModel::new(vec![
        classify_response("straightforward"),
        run_subagents_response(&["Research something slowly"]),
        complete_response("never reached"),
    ]);
    let search = Arc::new(KeyedSearch { rules: vec![] });
    let fetch = Arc::new(CannedFetch { text: String::new() });

    let orch = Arc::new(orchestrator(
        SessionConfig::default(),
        lead,
        Arc::new(HangingModel),
        search,
        fetch,
    ));
    let mut events = orch.subscribe();
    let token = orch.cancellation_token();

    let run = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.run("slow query").await }
    });

    // Cancel shortly after the first subagent spawns.
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("expected events before timeout")
            .expect("bus closed early");
        if matches!(event.kind, EventKind::SubagentSpawned { .. }) {
            break;
        }
    }
    let cancelled_at = Instant::now();
    token.cancel();

    let session = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run did not settle after cancel")
        .unwrap()
        .unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_secs(3));
    assert_eq!(session.status, SessionStatus::Cancelled);
    for result in session.all_findings() {
        assert_eq!(result.status, SubagentStatus::Cancelled);
    }
}

// ---------------------------------------------------------------------------
// Policies and laws
// ---------------------------------------------------------------------------

#[tokio::test]
async fn minimum_effort_floor_rejects_searchless_completion() {
    let lead = ScriptedModel::new(vec![
        classify_response("straightforward"),
        run_subagents_response(&["Check the obvious thing"]),
        complete_response("done"),
    ]);
    // Tries to complete immediately, gets pushed back, searches, completes.
    let sub = ScriptedModel::new(vec![
        complete_response("I already know this."),
        search_response("the obvious thing"),
        complete_response("Verified the obvious thing."),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![("obvious", hit("https://o.example", "Obvious", ""))],
    });
    let fetch = Arc::new(CannedFetch { text: String::new() });

    let orch = orchestrator(SessionConfig::default(), lead, sub, search, fetch);
    let session = orch.run("obvious question").await.unwrap();

    let result = &session.rounds[0].results[0];
    assert_eq!(result.status, SubagentStatus::Ok);
    assert_eq!(result.findings_text, "Verified the obvious thing.");
    assert_eq!(result.tool_calls_made, 1);
}

#[tokio::test]
async fn no_search_needed_flag_allows_direct_completion() {
    let lead = ScriptedModel::new(vec![
        classify_response("straightforward"),
        run_subagents_response(&["State the definition of a prime number"]),
        complete_response("A prime has exactly two divisors."),
    ]);
    let sub = ScriptedModel::new(vec![tool_response(
        "complete_task",
        serde_json::json!({
            "report": "A prime has exactly two divisors.",
            "no_search_needed": true
        }),
    )]);
    let search = Arc::new(KeyedSearch { rules: vec![] });
    let fetch = Arc::new(CannedFetch { text: String::new() });

    let orch = orchestrator(SessionConfig::default(), lead, sub, search, fetch);
    let session = orch.run("what is a prime").await.unwrap();

    let result = &session.rounds[0].results[0];
    assert_eq!(result.status, SubagentStatus::Ok);
    assert_eq!(result.tool_calls_made, 0);
}

#[tokio::test]
async fn duplicate_queries_consume_no_budget() {
    let lead = ScriptedModel::new(vec![
        classify_response("straightforward"),
        run_subagents_response(&["Look up the one fact"]),
        complete_response("done"),
    ]);
    let sub = ScriptedModel::new(vec![
        search_response("the one fact"),
        search_response("THE ONE   FACT"),
        complete_response("Found it once."),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![("fact", hit("https://f.example", "Fact", ""))],
    });
    let fetch = Arc::new(CannedFetch { text: String::new() });

    let orch = orchestrator(SessionConfig::default(), lead, sub, search, fetch);
    let session = orch.run("one fact").await.unwrap();

    let result = &session.rounds[0].results[0];
    assert_eq!(result.tool_calls_made, 1);
    assert_eq!(result.status, SubagentStatus::Ok);
}

#[tokio::test]
async fn serial_execution_with_max_concurrent_one_is_correct() {
    let mut config = SessionConfig::default();
    config.max_concurrent = 1;

    let lead = ScriptedModel::new(vec![
        classify_response("breadth_first"),
        run_subagents_response(&["Task one alpha", "Task two beta", "Task three gamma"]),
        complete_response("All three done."),
    ]);
    let sub = KeyedModel::new(vec![
        ("alpha", vec![search_response("alpha"), complete_response("a")]),
        ("beta", vec![search_response("beta"), complete_response("b")]),
        ("gamma", vec![search_response("gamma"), complete_response("c")]),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![
            ("alpha", hit("https://a.example", "A", "")),
            ("beta", hit("https://b.example", "B", "")),
            ("gamma", hit("https://c.example", "C", "")),
        ],
    });
    let fetch = Arc::new(CannedFetch { text: String::new() });

    let orch = orchestrator(config, lead, sub, search, fetch);
    let session = orch.run("three tasks").await.unwrap();

    let results = &session.rounds[0].results;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.status == SubagentStatus::Ok));
    assert_eq!(session.sources.len(), 3);
}

#[tokio::test]
async fn replay_with_identical_scripts_is_deterministic() {
    async fn run_once() -> Session {
        let lead = ScriptedModel::new(vec![
            classify_response("straightforward"),
            run_subagents_response(&["Find the capital of France"]),
            complete_response("The capital of France is Paris."),
        ]);
        let sub = ScriptedModel::new(vec![
            search_response("capital of France"),
            complete_response("Paris."),
        ]);
        let search = Arc::new(KeyedSearch {
            rules: vec![("capital", hit("https://en.wikipedia.org/wiki/Paris", "Paris", ""))],
        });
        let fetch = Arc::new(CannedFetch { text: String::new() });
        let orch = orchestrator(SessionConfig::default(), lead, sub, search, fetch);
        orch.run("What is the capital of France?").await.unwrap()
    }

    let first = run_once().await;
    let second = run_once().await;

    assert_eq!(first.draft, second.draft);
    assert_eq!(first.query_type, second.query_type);
    assert_eq!(first.rounds.len(), second.rounds.len());
    assert_eq!(
        first.sources.iter().map(|s| &s.url).collect::<Vec<_>>(),
        second.sources.iter().map(|s| &s.url).collect::<Vec<_>>()
    );
    assert_eq!(
        first.cited.as_ref().unwrap().body,
        second.cited.as_ref().unwrap().body
    );
    assert_eq!(
        first.rounds[0].results[0].status,
        second.rounds[0].results[0].status
    );
}

#[tokio::test]
async fn cancelling_twice_is_idempotent() {
    let lead = ScriptedModel::new(vec![
        classify_response("straightforward"),
        run_subagents_response(&["Research something slowly"]),
    ]);
    let search = Arc::new(KeyedSearch { rules: vec![] });
    let fetch = Arc::new(CannedFetch { text: String::new() });

    let orch = Arc::new(orchestrator(
        SessionConfig::default(),
        lead,
        Arc::new(HangingModel),
        search,
        fetch,
    ));
    let token = orch.cancellation_token();

    let run = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.run("anything").await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    token.cancel();

    let session = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run hung after double cancel")
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn event_stream_carries_ordered_session_timeline() {
    let lead = ScriptedModel::new(vec![
        classify_response("straightforward"),
        run_subagents_response(&["Find the capital of France"]),
        complete_response("Paris."),
    ]);
    let sub = ScriptedModel::new(vec![
        search_response("capital of France"),
        complete_response("Paris."),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![("capital", hit("https://en.wikipedia.org/wiki/Paris", "Paris", ""))],
    });
    let fetch = Arc::new(CannedFetch { text: String::new() });

    let orch = orchestrator(SessionConfig::default(), lead, sub, search, fetch);
    let mut events = orch.subscribe();
    let session = orch.run("capital?").await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    let mut kinds = Vec::new();
    let mut last_seq = None;
    while let Some(event) = events.try_recv() {
        if let Some(prev) = last_seq {
            assert!(event.seq > prev, "sequence numbers must increase");
        }
        last_seq = Some(event.seq);
        kinds.push(event.kind);
    }

    assert!(matches!(kinds.first(), Some(EventKind::SessionStarted { .. })));
    assert!(kinds.iter().any(|k| matches!(k, EventKind::QueryClassified { .. })));
    assert!(kinds.iter().any(|k| matches!(k, EventKind::PlanCreated { task_count: 1, .. })));
    assert!(kinds.iter().any(|k| matches!(k, EventKind::SubagentSpawned { .. })));
    assert!(kinds.iter().any(|k| matches!(k, EventKind::ToolCallStarted { .. })));
    assert!(kinds.iter().any(|k| matches!(k, EventKind::SubagentFinished { .. })));
    assert!(kinds.iter().any(|k| matches!(k, EventKind::RoundComplete { .. })));
    assert!(kinds.iter().any(|k| matches!(k, EventKind::SynthesisComplete { .. })));
    assert!(kinds.iter().any(|k| matches!(k, EventKind::CitationComplete { .. })));
}

#[tokio::test]
async fn max_rounds_triggers_forced_synthesis_with_tools_disabled() {
    let mut config = SessionConfig::default();
    config.max_rounds = 1;

    // With the cap at one, the round-one reflection never happens; the
    // next lead turn is the forced tools-disabled synthesis.
    let lead = ScriptedModel::new(vec![
        classify_response("straightforward"),
        run_subagents_response(&["Dig into the topic"]),
        text_response("Final report assembled from round one."),
    ]);
    let sub = ScriptedModel::new(vec![
        search_response("the topic"),
        complete_response("Round one findings."),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![("topic", hit("https://t.example", "Topic", ""))],
    });
    let fetch = Arc::new(CannedFetch { text: String::new() });

    let orch = orchestrator(config, lead, sub, search, fetch);
    let session = orch.run("the topic").await.unwrap();

    assert_eq!(session.rounds.len(), 1);
    assert_eq!(
        session.draft.as_deref(),
        Some("Final report assembled from round one.")
    );
}

/// Citation model that rewrites the prose, violating the identity invariant.
struct MangledCitationModel;

#[async_trait]
impl ChatModel for MangledCitationModel {
    async fn complete(&self, _req: &Request) -> Result<Response, LlmError> {
        Ok(text_response(
            "<exact_text_with_citation>Completely rewritten prose[^1].</exact_text_with_citation>",
        ))
    }

    fn stream_completion(
        &self,
        _req: &Request,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        Box::pin(futures::stream::empty())
    }
}

#[tokio::test]
async fn citation_identity_violation_degrades_to_uncited_draft() {
    let lead = ScriptedModel::new(vec![
        classify_response("straightforward"),
        run_subagents_response(&["Find the capital of France"]),
        complete_response("The capital of France is Paris."),
    ]);
    let sub = ScriptedModel::new(vec![
        search_response("capital of France"),
        complete_response("Paris."),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![("capital", hit("https://en.wikipedia.org/wiki/Paris", "Paris", ""))],
    });
    let fetch = Arc::new(CannedFetch { text: String::new() });

    let orch = Orchestrator::new(SessionConfig::default(), lead, sub, search, fetch)
        .citation_model(Arc::new(MangledCitationModel));
    let mut events = orch.subscribe();
    let session = orch.run("capital?").await.unwrap();

    let cited = session.cited.as_ref().unwrap();
    assert!(cited.degraded);
    // The uncited draft is emitted untouched, references still attached.
    assert_eq!(cited.body, session.draft.as_deref().unwrap());
    assert!(cited.references.contains("en.wikipedia.org"));
    assert_eq!(cited.stats.total_anchors, 0);

    let mut saw_degraded = false;
    while let Some(event) = events.try_recv() {
        if matches!(event.kind, EventKind::CitationDegraded { .. }) {
            saw_degraded = true;
        }
    }
    assert!(saw_degraded);
}

#[tokio::test]
async fn session_record_round_trips_after_run() {
    let lead = ScriptedModel::new(vec![
        classify_response("straightforward"),
        run_subagents_response(&["Find the capital of France"]),
        complete_response("Paris."),
    ]);
    let sub = ScriptedModel::new(vec![
        search_response("capital of France"),
        complete_response("Paris."),
    ]);
    let search = Arc::new(KeyedSearch {
        rules: vec![("capital", hit("https://en.wikipedia.org/wiki/Paris", "Paris", ""))],
    });
    let fetch = Arc::new(CannedFetch { text: String::new() });

    let orch = orchestrator(SessionConfig::default(), lead, sub, search, fetch);
    let session = orch.run("capital?").await.unwrap();

    let record = session.to_record();
    let restored = Session::from_record(&record).unwrap();
    assert_eq!(restored.id, session.id);
    assert_eq!(restored.draft, session.draft);
    assert_eq!(restored.sources.len(), session.sources.len());
    assert_eq!(restored.rounds.len(), session.rounds.len());
    // Transcript isolation survives persistence: one transcript per agent.
    assert_eq!(restored.transcripts.len(), 1);
}
