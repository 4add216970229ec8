use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use scribe_core::{decode, AgentRuntime, Message, RuntimeRequest, SessionId, TerminalInfo};
use scribe_relay::{DoneSummary, StreamRelay};
use scribe_store::SessionStore;

use crate::accumulator::TranscriptAccumulator;
use crate::error::EngineError;
use crate::title::{spawn_title_task, TitleGenerator};

/// One chat turn to reconcile.
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    /// Existing session to continue. A new one is created when absent.
    pub session_id: Option<SessionId>,
    /// Title for a newly created session.
    pub title: Option<String>,
    pub prompt: String,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// What happened during one run.
#[derive(Debug)]
pub struct RunOutcome {
    pub session_id: SessionId,
    /// The finalized assistant message, if anything was produced.
    pub message: Option<Message>,
    /// Whether `message` reached the store.
    pub persisted: bool,
    pub terminal: Option<TerminalInfo>,
    /// Human-readable reason the run ended early, as sent to the client.
    pub error: Option<String>,
    /// Background title generation, if one was started.
    pub title_task: Option<JoinHandle<()>>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives one upstream stream into the transcript and the live relay.
///
/// Callers hold at most one active run per session (see
/// [`crate::gate::SessionGate`]).
pub struct Reconciler {
    store: Arc<dyn SessionStore>,
    runtime: Arc<dyn AgentRuntime>,
    relay: Arc<StreamRelay>,
    titler: Option<Arc<dyn TitleGenerator>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn SessionStore>,
        runtime: Arc<dyn AgentRuntime>,
        relay: Arc<StreamRelay>,
    ) -> Self {
        Self {
            store,
            runtime,
            relay,
            titler: None,
        }
    }

    pub fn with_titler(mut self, titler: Arc<dyn TitleGenerator>) -> Self {
        self.titler = Some(titler);
        self
    }

    pub fn relay(&self) -> &Arc<StreamRelay> {
        &self.relay
    }

    /// Run one chat turn.
    ///
    /// Errors are returned only when the session cannot be resolved or the
    /// user message cannot be recorded. Everything after that, including
    /// upstream failures and cancellation, ends with a terminal relay event
    /// and an `Ok` outcome.
    #[instrument(skip_all, fields(runtime = self.runtime.name(), session_id = tracing::field::Empty))]
    pub async fn run(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let session = match &request.session_id {
            Some(id) => self.store.get(id)?,
            None => self.store.create(request.title.as_deref())?,
        };
        let session_id = session.id.clone();
        tracing::Span::current().record("session_id", tracing::field::display(&session_id));

        self.store
            .append_message(&session_id, &Message::user_text(request.prompt.clone()))?;

        let title_task = match &self.titler {
            Some(titler) if session.has_default_title() => Some(spawn_title_task(
                Arc::clone(&self.store),
                Arc::clone(titler),
                session_id.clone(),
                request.prompt.clone(),
            )),
            _ => None,
        };

        self.relay.connected(&session_id, &session.title);

        let runtime_request = RuntimeRequest {
            session_id: session_id.clone(),
            prompt: request.prompt,
            resume: session.runtime_session_id.clone(),
        };

        let mut acc = TranscriptAccumulator::new();
        self.consume(&runtime_request, &mut acc, cancel).await;

        let message = acc.finalize();
        let persisted = self.persist(
            &session_id,
            session.runtime_session_id.as_deref(),
            &acc,
            message.as_ref(),
        );

        let error = acc.failure().map(String::from);
        match &error {
            Some(reason) => {
                self.relay.error(&session_id, reason.clone());
            }
            None => {
                if let Some(t) = acc.terminal() {
                    info!(
                        subtype = t.outcome.subtype(),
                        num_turns = ?t.num_turns,
                        cost_usd = ?t.total_cost_usd,
                        duration_ms = ?t.duration_ms,
                        "run completed"
                    );
                }
                let message_id = message.as_ref().filter(|_| persisted).map(|m| m.id.clone());
                self.relay
                    .done(&session_id, DoneSummary::new(message_id, acc.terminal()));
            }
        }

        Ok(RunOutcome {
            session_id,
            message,
            persisted,
            terminal: acc.terminal().cloned(),
            error,
            title_task,
        })
    }

    /// Pull upstream events until the stream closes, settles, fails, or the
    /// request is cancelled. Every event is relayed before it is applied.
    async fn consume(
        &self,
        request: &RuntimeRequest,
        acc: &mut TranscriptAccumulator,
        cancel: &CancellationToken,
    ) {
        let session_id = &request.session_id;

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                acc.fail(EngineError::Aborted.to_string());
                return;
            }
            result = self.runtime.query(request) => match result {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, kind = e.error_kind(), "runtime query failed");
                    acc.fail(format!("agent runtime failed to start: {e}"));
                    return;
                }
            },
        };

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("run cancelled");
                    acc.fail(EngineError::Aborted.to_string());
                    break;
                }
                item = stream.next() => item,
            };

            match item {
                None => break,
                Some(Ok(raw)) => {
                    self.relay.upstream(session_id, &raw);
                    acc.apply(&decode(&raw));
                    if acc.is_settled() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, kind = e.error_kind(), "upstream stream failed");
                    acc.fail(format!("agent runtime stream failed: {e}"));
                    break;
                }
            }
        }
    }

    /// Store the finalized message and the runtime token. Failures are
    /// logged and reported through the return value only.
    fn persist(
        &self,
        session_id: &SessionId,
        previous_token: Option<&str>,
        acc: &TranscriptAccumulator,
        message: Option<&Message>,
    ) -> bool {
        let mut persisted = false;
        if let Some(message) = message {
            match self.store.append_message(session_id, message) {
                Ok(_) => persisted = true,
                Err(e) => error!(
                    message_id = %message.id,
                    error = %e,
                    "failed to persist assistant message"
                ),
            }
        }

        if let Some(token) = acc.runtime_session_id() {
            if previous_token != Some(token) {
                if let Err(e) = self.store.set_runtime_session(session_id, token) {
                    error!(error = %e, "failed to persist runtime session token");
                }
            }
        }
        persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{events, Script, ScriptedRuntime};
    use crate::title::FirstLineTitler;
    use assert_matches::assert_matches;
    use scribe_core::transcript::NO_OUTPUT_RESULT;
    use scribe_core::{Role, RuntimeError, Session, TerminalOutcome};
    use scribe_relay::{create_bridge, RelayBody, RelayEvent, RelayHub};
    use scribe_store::{Database, SqliteSessionStore, StoreError};
    use serde_json::json;
    use tokio::sync::broadcast;

    struct Harness {
        store: Arc<dyn SessionStore>,
        runtime: Arc<ScriptedRuntime>,
        reconciler: Reconciler,
        rx: broadcast::Receiver<RelayEvent>,
    }

    fn harness(scripts: Vec<Script>) -> Harness {
        let store: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::new(Database::in_memory().unwrap()));
        harness_with_store(store, scripts)
    }

    fn harness_with_store(store: Arc<dyn SessionStore>, scripts: Vec<Script>) -> Harness {
        let runtime = Arc::new(ScriptedRuntime::new(scripts));
        let relay = Arc::new(StreamRelay::new(256));
        let rx = relay.subscribe();
        let reconciler = Reconciler::new(Arc::clone(&store), runtime.clone(), relay);
        Harness {
            store,
            runtime,
            reconciler,
            rx,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<RelayEvent>) -> Vec<RelayEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn assistant(session: &Session) -> &Message {
        session
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .unwrap()
    }

    #[tokio::test]
    async fn read_scenario_persists_resolved_tool_part() {
        let mut h = harness(vec![Script::events(vec![
            events::tool_use("t1", "Read", json!({"path": "a"})),
            events::tool_result(Some("t1"), "hello", false),
            events::result("success"),
        ])]);

        let outcome = h
            .reconciler
            .run(ChatRequest::new("read a"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert!(outcome.persisted);

        let session = h.store.get(&outcome.session_id).unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[0].content, "read a");

        let msg = assistant(&session);
        assert_eq!(msg.parts.len(), 1);
        let tool = msg.tool_part(0).unwrap();
        assert_eq!(tool.name, "Read");
        assert_eq!(tool.result.as_deref(), Some("hello"));
        assert!(!tool.is_error);
        assert!(!tool.in_progress);

        let kinds: Vec<&str> = drain(&mut h.rx).iter().map(RelayEvent::kind).collect();
        assert_eq!(kinds, vec!["connected", "upstream", "upstream", "upstream", "done"]);
    }

    #[tokio::test]
    async fn max_turns_scenario_forces_completion_with_notice() {
        let mut h = harness(vec![Script::events(vec![
            events::text("Hi"),
            events::tool_use("t2", "Write", json!({})),
            events::result("error_max_turns"),
        ])]);

        let outcome = h
            .reconciler
            .run(ChatRequest::new("write it"), &CancellationToken::new())
            .await
            .unwrap();

        let session = h.store.get(&outcome.session_id).unwrap();
        let msg = assistant(&session);
        let write = msg.tool_part(1).unwrap();
        assert_eq!(write.name, "Write");
        assert!(!write.in_progress);
        assert_eq!(write.result.as_deref(), Some(NO_OUTPUT_RESULT));
        assert_eq!(
            msg.parts.last().and_then(|p| p.as_text()),
            TerminalOutcome::MaxTurns.notice().as_deref()
        );

        let last = drain(&mut h.rx).pop().unwrap();
        match last.body {
            RelayBody::Done(summary) => {
                assert_eq!(summary.subtype.as_deref(), Some("error_max_turns"));
                assert_eq!(summary.message_id, Some(msg.id.clone()));
                assert_eq!(summary.num_turns, Some(2));
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_failure_keeps_partial_progress_and_reports_error() {
        let mut h = harness(vec![Script::interrupted(
            vec![
                events::text("Starting"),
                events::tool_use("t1", "Read", json!({"path": "x"})),
                events::tool_result(Some("t1"), "contents", false),
                events::tool_use("t2", "Bash", json!({"command": "make"})),
            ],
            RuntimeError::StreamInterrupted("connection reset".into()),
        )]);

        let outcome = h
            .reconciler
            .run(ChatRequest::new("go"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.is_success());

        let session = h.store.get(&outcome.session_id).unwrap();
        let msg = assistant(&session);
        assert_eq!(msg.content, "Starting");
        assert_eq!(msg.tool_part(1).unwrap().result.as_deref(), Some("contents"));
        assert_eq!(msg.tool_part(2).unwrap().result.as_deref(), Some(NO_OUTPUT_RESULT));
        assert!(msg.tool_parts().all(|t| !t.in_progress));

        let events = drain(&mut h.rx);
        assert_eq!(events.len(), 6);
        match &events[5].body {
            RelayBody::Error { message } => assert!(message.contains("connection reset")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_run_persists_only_the_user_message() {
        let mut h = harness(vec![Script::events(vec![
            events::init("rt-1"),
            events::result("success"),
        ])]);
        let outcome = h
            .reconciler
            .run(ChatRequest::new("anything?"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.message.is_none());
        assert!(!outcome.persisted);
        let session = h.store.get(&outcome.session_id).unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.runtime_session_id.as_deref(), Some("rt-1"));

        match &drain(&mut h.rx).last().unwrap().body {
            RelayBody::Done(summary) => assert!(summary.message_id.is_none()),
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_failure_ends_with_error_event() {
        let mut h = harness(vec![Script::Fail(RuntimeError::Spawn("no binary".into()))]);
        let outcome = h
            .reconciler
            .run(ChatRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.error.as_deref().unwrap().contains("no binary"));

        let kinds: Vec<&str> = drain(&mut h.rx).iter().map(RelayEvent::kind).collect();
        assert_eq!(kinds, vec!["connected", "error"]);
        assert_eq!(h.store.get(&outcome.session_id).unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn upstream_error_event_is_relayed_then_reported() {
        let mut h = harness(vec![Script::events(vec![
            events::text("partial"),
            events::error("overloaded"),
            events::text("never applied"),
        ])]);
        let outcome = h
            .reconciler
            .run(ChatRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.error.as_deref(), Some("overloaded"));
        assert_eq!(outcome.message.unwrap().content, "partial");

        let kinds: Vec<&str> = drain(&mut h.rx).iter().map(RelayEvent::kind).collect();
        assert_eq!(kinds, vec!["connected", "upstream", "upstream", "error"]);
    }

    #[tokio::test]
    async fn cancellation_finalizes_before_returning() {
        let mut h = harness(vec![Script::Hang(vec![
            events::text("thinking"),
            events::tool_use("t1", "Bash", json!({"command": "sleep 100"})),
        ])]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = h.reconciler.run(ChatRequest::new("hi"), &cancel).await.unwrap();
        let cancelled = EngineError::Aborted.to_string();
        assert_eq!(outcome.error.as_deref(), Some(cancelled.as_str()));

        let session = h.store.get(&outcome.session_id).unwrap();
        let msg = assistant(&session);
        let bash = msg.tool_part(1).unwrap();
        assert!(!bash.in_progress);
        assert_eq!(bash.result.as_deref(), Some(NO_OUTPUT_RESULT));

        match &drain(&mut h.rx).last().unwrap().body {
            RelayBody::Error { message } => assert_eq!(message, &cancelled),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resume_token_round_trips_to_next_request() {
        let h = harness(vec![
            Script::events(vec![events::init("rt-abc"), events::text("one"), events::result("success")]),
            Script::events(vec![events::text("two"), events::result("success")]),
        ]);
        let cancel = CancellationToken::new();

        let first = h.reconciler.run(ChatRequest::new("first"), &cancel).await.unwrap();
        let second = h
            .reconciler
            .run(ChatRequest::new("second").in_session(first.session_id.clone()), &cancel)
            .await
            .unwrap();
        assert_eq!(second.session_id, first.session_id);

        let requests = h.runtime.requests();
        assert_eq!(requests[0].resume, None);
        assert_eq!(requests[1].resume.as_deref(), Some("rt-abc"));

        let session = h.store.get(&first.session_id).unwrap();
        let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let h = harness(Vec::new());
        let err = h
            .reconciler
            .run(
                ChatRequest::new("hi").in_session(SessionId::from_raw("sess_missing")),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(h.runtime.call_count(), 0);
    }

    #[tokio::test]
    async fn title_generated_for_untitled_session_only() {
        let store: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::new(Database::in_memory().unwrap()));
        let runtime = Arc::new(ScriptedRuntime::new(vec![
            Script::events(vec![events::text("ok"), events::result("success")]),
            Script::events(vec![events::text("ok"), events::result("success")]),
        ]));
        let reconciler = Reconciler::new(Arc::clone(&store), runtime, Arc::new(StreamRelay::new(16)))
            .with_titler(Arc::new(FirstLineTitler::new(40)));
        let cancel = CancellationToken::new();

        let untitled = reconciler
            .run(ChatRequest::new("Quarterly review deck\nwith charts"), &cancel)
            .await
            .unwrap();
        untitled.title_task.unwrap().await.unwrap();
        assert_eq!(store.get(&untitled.session_id).unwrap().title, "Quarterly review deck");
        assert_eq!(store.get(&untitled.session_id).unwrap().messages.len(), 2);

        let titled = reconciler
            .run(ChatRequest::new("anything").with_title("Fixed"), &cancel)
            .await
            .unwrap();
        assert!(titled.title_task.is_none());
        assert_eq!(store.get(&titled.session_id).unwrap().title, "Fixed");
    }

    #[tokio::test]
    async fn unknown_event_kinds_are_relayed_but_not_transcribed() {
        let mut h = harness(vec![Script::events(vec![
            events::text("kept"),
            json!({"type": "stream_event", "event": {"delta": "ignored"}}),
            events::result("success"),
        ])]);

        let outcome = h
            .reconciler
            .run(ChatRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());

        let session = h.store.get(&outcome.session_id).unwrap();
        let msg = assistant(&session);
        assert_eq!(msg.content, "kept");
        assert_eq!(msg.parts.len(), 1);

        let events = drain(&mut h.rx);
        let kinds: Vec<&str> = events.iter().map(RelayEvent::kind).collect();
        assert_eq!(kinds, vec!["connected", "upstream", "upstream", "upstream", "done"]);
        match &events[2].body {
            RelayBody::Upstream { kind, event } => {
                assert_eq!(kind.as_deref(), Some("stream_event"));
                assert_eq!(event["event"]["delta"], "ignored");
            }
            other => panic!("expected upstream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_subscriber_receives_every_event_of_a_long_run() {
        let store: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::new(Database::in_memory().unwrap()));
        let mut script: Vec<serde_json::Value> =
            (0..300).map(|i| events::text(&format!("chunk {i} "))).collect();
        script.push(events::result("success"));
        let runtime = Arc::new(ScriptedRuntime::new(vec![Script::events(script)]));

        let session = store.create(None).unwrap();
        let relay = Arc::new(StreamRelay::new(1024));
        let hub = Arc::new(RelayHub::new(16));
        let (_subscriber, mut lines) = hub.subscribe(session.id.clone());
        let bridge = create_bridge(Arc::clone(&hub), relay.subscribe());

        let reconciler = Reconciler::new(Arc::clone(&store), runtime, relay);
        let outcome = reconciler
            .run(
                ChatRequest::new("go").in_session(session.id.clone()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.persisted);
        drop(reconciler);

        let mut received = Vec::new();
        while let Some(line) = lines.recv().await {
            let event: RelayEvent = serde_json::from_str(&line).unwrap();
            let terminal = event.is_terminal();
            received.push(event);
            if terminal {
                break;
            }
        }
        bridge.await.unwrap();

        assert_eq!(received.len(), 303);
        assert_matches!(&received[302].body, RelayBody::Done(s) if s.message_id.is_some());
    }

    /// Store whose assistant-message writes always fail.
    struct FailingAppends {
        inner: SqliteSessionStore,
    }

    impl SessionStore for FailingAppends {
        fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
            self.inner.get(id)
        }
        fn create(&self, title: Option<&str>) -> Result<Session, StoreError> {
            self.inner.create(title)
        }
        fn append_message(&self, id: &SessionId, message: &Message) -> Result<Message, StoreError> {
            if message.role == Role::Assistant {
                return Err(StoreError::Database("disk full".into()));
            }
            self.inner.append_message(id, message)
        }
        fn save(&self, session: &Session) -> Result<(), StoreError> {
            self.inner.save(session)
        }
        fn delete(&self, id: &SessionId) -> Result<bool, StoreError> {
            self.inner.delete(id)
        }
        fn list(&self) -> Result<Vec<Session>, StoreError> {
            self.inner.list()
        }
        fn search(&self, term: &str) -> Result<Vec<Session>, StoreError> {
            self.inner.search(term)
        }
        fn rename(&self, id: &SessionId, title: &str) -> Result<(), StoreError> {
            self.inner.rename(id, title)
        }
        fn rename_if_title(&self, id: &SessionId, expected: &str, title: &str) -> Result<bool, StoreError> {
            self.inner.rename_if_title(id, expected, title)
        }
        fn set_runtime_session(&self, id: &SessionId, token: &str) -> Result<(), StoreError> {
            self.inner.set_runtime_session(id, token)
        }
    }

    #[tokio::test]
    async fn persistence_failure_does_not_interrupt_relay() {
        let store: Arc<dyn SessionStore> = Arc::new(FailingAppends {
            inner: SqliteSessionStore::new(Database::in_memory().unwrap()),
        });
        let mut h = harness_with_store(
            store,
            vec![Script::events(vec![
                events::text("a"),
                events::text("b"),
                events::result("success"),
            ])],
        );

        let outcome = h
            .reconciler
            .run(ChatRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.persisted);
        assert_eq!(outcome.message.as_ref().unwrap().content, "ab");

        let events = drain(&mut h.rx);
        assert_eq!(events.len(), 5);
        assert_matches!(&events[4].body, RelayBody::Done(s) if s.message_id.is_none());
    }

    #[tokio::test]
    async fn relay_without_subscribers_still_persists() {
        let store: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::new(Database::in_memory().unwrap()));
        let runtime = Arc::new(ScriptedRuntime::new(vec![Script::events(vec![
            events::text("saved anyway"),
            events::result("success"),
        ])]));
        let reconciler = Reconciler::new(Arc::clone(&store), runtime, Arc::new(StreamRelay::new(4)));

        let outcome = reconciler
            .run(ChatRequest::new("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.persisted);
        assert_eq!(
            assistant(&store.get(&outcome.session_id).unwrap()).content,
            "saved anyway"
        );
    }

    #[tokio::test]
    async fn concurrent_sessions_are_independent() {
        let store: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::new(Database::in_memory().unwrap()));
        let relay = Arc::new(StreamRelay::new(64));
        let make = |text: &'static str| {
            Reconciler::new(
                Arc::clone(&store),
                Arc::new(ScriptedRuntime::new(vec![Script::events(vec![
                    events::text(text),
                    events::result("success"),
                ])])),
                Arc::clone(&relay),
            )
        };
        let (a, b) = (make("alpha"), make("beta"));
        let cancel = CancellationToken::new();

        let (ra, rb) = tokio::join!(
            a.run(ChatRequest::new("a"), &cancel),
            b.run(ChatRequest::new("b"), &cancel)
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert_ne!(ra.session_id, rb.session_id);
        assert_eq!(assistant(&store.get(&ra.session_id).unwrap()).content, "alpha");
        assert_eq!(assistant(&store.get(&rb.session_id).unwrap()).content, "beta");
        assert_eq!(store.list().unwrap().len(), 2);
    }
}
