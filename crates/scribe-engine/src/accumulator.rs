use tracing::{debug, warn};

use scribe_core::{AssistantBlock, DecodedEvent, Message, TerminalInfo, ToolResultBlock};

use crate::correlation::{CorrelationTable, Resolution};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccumulatorState {
    Idle,
    Accumulating,
    Finalizing,
    Done,
    Errored,
}

/// Builds the assistant message of one request from decoded upstream events.
///
/// `apply` feeds events in arrival order. `fail` records an upstream
/// failure. `finalize` closes every running tool call and hands back the
/// message, or `None` when nothing was produced. Finalization runs on the
/// error path too, so partial progress is kept.
#[derive(Debug)]
pub struct TranscriptAccumulator {
    state: AccumulatorState,
    message: Option<Message>,
    table: CorrelationTable,
    runtime_session_id: Option<String>,
    terminal: Option<TerminalInfo>,
    failure: Option<String>,
    dropped_results: usize,
}

impl Default for TranscriptAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self {
            state: AccumulatorState::Idle,
            message: None,
            table: CorrelationTable::new(),
            runtime_session_id: None,
            terminal: None,
            failure: None,
            dropped_results: 0,
        }
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// True once no further events will be accepted.
    pub fn is_settled(&self) -> bool {
        !matches!(
            self.state,
            AccumulatorState::Idle | AccumulatorState::Accumulating
        )
    }

    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    pub fn runtime_session_id(&self) -> Option<&str> {
        self.runtime_session_id.as_deref()
    }

    pub fn terminal(&self) -> Option<&TerminalInfo> {
        self.terminal.as_ref()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Tool results that matched no call and were discarded.
    pub fn dropped_results(&self) -> usize {
        self.dropped_results
    }

    pub fn apply(&mut self, event: &DecodedEvent) {
        if self.is_settled() {
            debug!(state = ?self.state, "event after settlement ignored");
            return;
        }

        match event {
            DecodedEvent::Init {
                runtime_session_id, ..
            } => {
                if let Some(token) = runtime_session_id {
                    self.runtime_session_id = Some(token.clone());
                }
            }
            DecodedEvent::AssistantContent(blocks) => {
                self.open();
                let message = self.message.get_or_insert_with(Message::assistant);
                for block in blocks {
                    match block {
                        AssistantBlock::Text { text } => {
                            message.push_text(text.clone());
                        }
                        AssistantBlock::ToolCall {
                            call_id,
                            name,
                            input,
                        } => {
                            let index =
                                message.push_tool_call(call_id.clone(), name.clone(), input.clone());
                            self.table.register(call_id.clone(), index);
                        }
                    }
                }
            }
            DecodedEvent::ToolResults(results) => {
                for result in results {
                    self.apply_result(result);
                }
            }
            DecodedEvent::Terminal(info) => {
                if let Some(notice) = info.outcome.notice() {
                    self.open();
                    self.message
                        .get_or_insert_with(Message::assistant)
                        .push_text(notice);
                }
                self.terminal = Some(info.clone());
                self.state = AccumulatorState::Finalizing;
            }
            DecodedEvent::Error { message } => {
                self.fail(message.clone());
            }
            DecodedEvent::Malformed { kind, detail } => {
                warn!(kind = %kind, detail = %detail, "malformed upstream event ignored");
            }
            DecodedEvent::Unclassified { .. } => {}
        }
    }

    fn apply_result(&mut self, result: &ToolResultBlock) {
        let resolution = self.table.resolve(result.call_id.as_deref());
        let part = resolution.and_then(|r| {
            self.message
                .as_mut()
                .and_then(|m| m.tool_part_mut(r.part_index()))
        });

        match part {
            Some(tool) => {
                if let Some(Resolution::Fallback(_)) = resolution {
                    debug!(
                        call_id = ?result.call_id,
                        tool = %tool.name,
                        "tool result matched by fallback"
                    );
                }
                tool.resolve(result.content.clone(), result.is_error);
            }
            None => {
                self.dropped_results += 1;
                warn!(
                    call_id = ?result.call_id,
                    "tool result matched no pending tool call, dropped"
                );
            }
        }
    }

    fn open(&mut self) {
        if self.state == AccumulatorState::Idle {
            self.state = AccumulatorState::Accumulating;
        }
    }

    /// Record an upstream failure. Later events are ignored.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.state == AccumulatorState::Done {
            return;
        }
        if self.failure.is_none() {
            self.failure = Some(reason.into());
        }
        self.state = AccumulatorState::Errored;
    }

    /// Close every running tool call and take the message. Returns `None`
    /// for an empty message and on every call after the first.
    pub fn finalize(&mut self) -> Option<Message> {
        let message = self.message.take().map(|mut message| {
            let forced = message.complete_pending_tools();
            if forced > 0 {
                debug!(forced, "closed tool calls that never reported a result");
            }
            message
        });

        if self.state != AccumulatorState::Errored {
            self.state = AccumulatorState::Done;
        }

        message.filter(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use scribe_core::transcript::NO_OUTPUT_RESULT;
    use scribe_core::{decode, PartBody, TerminalOutcome};
    use serde_json::json;

    fn text(t: &str) -> DecodedEvent {
        DecodedEvent::AssistantContent(vec![AssistantBlock::Text { text: t.into() }])
    }

    fn call(id: Option<&str>, name: &str) -> DecodedEvent {
        DecodedEvent::AssistantContent(vec![AssistantBlock::ToolCall {
            call_id: id.map(String::from),
            name: name.into(),
            input: json!({}),
        }])
    }

    fn result(id: Option<&str>, content: &str) -> DecodedEvent {
        DecodedEvent::ToolResults(vec![ToolResultBlock {
            call_id: id.map(String::from),
            is_error: false,
            content: content.into(),
        }])
    }

    fn terminal(outcome: TerminalOutcome) -> DecodedEvent {
        DecodedEvent::Terminal(TerminalInfo {
            is_error: outcome.is_early_termination(),
            outcome,
            result: None,
            num_turns: None,
            total_cost_usd: None,
            duration_ms: None,
        })
    }

    #[test]
    fn state_transitions() {
        let mut acc = TranscriptAccumulator::new();
        assert_eq!(acc.state(), AccumulatorState::Idle);

        acc.apply(&DecodedEvent::Init {
            runtime_session_id: Some("rt-1".into()),
            model: None,
        });
        assert_eq!(acc.state(), AccumulatorState::Idle);
        assert_eq!(acc.runtime_session_id(), Some("rt-1"));

        acc.apply(&text("hi"));
        assert_eq!(acc.state(), AccumulatorState::Accumulating);

        acc.apply(&terminal(TerminalOutcome::Success));
        assert_eq!(acc.state(), AccumulatorState::Finalizing);
        assert!(acc.is_settled());

        assert!(acc.finalize().is_some());
        assert_eq!(acc.state(), AccumulatorState::Done);
        assert!(acc.finalize().is_none());
    }

    #[test]
    fn read_call_resolved_by_id() {
        let events = [
            json!({"type": "assistant", "message": {"content": [
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {"path": "a"}}
            ]}}),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "hello"}
            ]}}),
            json!({"type": "result", "subtype": "success"}),
        ];
        let mut acc = TranscriptAccumulator::new();
        for raw in &events {
            acc.apply(&decode(raw));
        }
        let msg = acc.finalize().unwrap();

        assert_eq!(msg.parts.len(), 1);
        let tool = msg.tool_part(0).unwrap();
        assert_eq!(tool.name, "Read");
        assert_eq!(tool.input, json!({"path": "a"}));
        assert_eq!(tool.result.as_deref(), Some("hello"));
        assert!(!tool.is_error);
        assert!(!tool.in_progress);
    }

    #[test]
    fn max_turns_forces_completion_and_appends_notice() {
        let events = [
            json!({"type": "assistant", "message": {"content": [{"type": "text", "text": "Hi"}]}}),
            json!({"type": "assistant", "message": {"content": [
                {"type": "tool_use", "id": "t2", "name": "Write", "input": {}}
            ]}}),
            json!({"type": "result", "subtype": "error_max_turns"}),
        ];
        let mut acc = TranscriptAccumulator::new();
        for raw in &events {
            acc.apply(&decode(raw));
        }
        let msg = acc.finalize().unwrap();

        assert_eq!(msg.parts.len(), 3);
        let tool = msg.tool_part(1).unwrap();
        assert_eq!(tool.name, "Write");
        assert!(!tool.in_progress);
        assert_eq!(tool.result.as_deref(), Some(NO_OUTPUT_RESULT));

        let notice = TerminalOutcome::MaxTurns.notice().unwrap();
        assert_eq!(msg.parts[2].as_text(), Some(notice.as_str()));
        assert_eq!(msg.content, format!("Hi{notice}"));
    }

    #[test]
    fn fallback_attaches_to_latest_pending_call() {
        let mut acc = TranscriptAccumulator::new();
        acc.apply(&call(Some("a"), "Read"));
        acc.apply(&result(Some("a"), "first"));
        acc.apply(&call(Some("b"), "Grep"));
        acc.apply(&call(Some("c"), "Bash"));
        acc.apply(&result(None, "anonymous"));

        let msg = acc.finalize().unwrap();
        assert_eq!(msg.tool_part(0).unwrap().result.as_deref(), Some("first"));
        assert_eq!(msg.tool_part(1).unwrap().result.as_deref(), Some(NO_OUTPUT_RESULT));
        assert_eq!(msg.tool_part(2).unwrap().result.as_deref(), Some("anonymous"));
    }

    #[test]
    fn result_mutates_in_place() {
        let mut acc = TranscriptAccumulator::new();
        acc.apply(&call(Some("t1"), "Bash"));
        acc.apply(&DecodedEvent::ToolResults(vec![ToolResultBlock {
            call_id: Some("t1".into()),
            is_error: true,
            content: "exit 1".into(),
        }]));
        let msg = acc.message().unwrap();
        assert_eq!(msg.parts.len(), 1);
        let tool = msg.tool_part(0).unwrap();
        assert!(tool.is_error);
        assert_eq!(tool.result.as_deref(), Some("exit 1"));
    }

    #[test]
    fn undeliverable_result_is_dropped() {
        let mut acc = TranscriptAccumulator::new();
        acc.apply(&result(Some("ghost"), "nobody home"));
        assert_eq!(acc.dropped_results(), 1);
        assert_eq!(acc.state(), AccumulatorState::Idle);

        acc.apply(&text("ok"));
        acc.apply(&result(None, "still nobody"));
        assert_eq!(acc.dropped_results(), 2);
        let msg = acc.finalize().unwrap();
        assert_eq!(msg.parts.len(), 1);
    }

    #[test]
    fn empty_run_produces_nothing() {
        let mut acc = TranscriptAccumulator::new();
        acc.apply(&DecodedEvent::Unclassified { kind: Some("system".into()) });
        acc.apply(&terminal(TerminalOutcome::Success));
        assert!(acc.finalize().is_none());
        assert_eq!(acc.state(), AccumulatorState::Done);
    }

    #[test]
    fn empty_assistant_event_still_produces_nothing() {
        let mut acc = TranscriptAccumulator::new();
        acc.apply(&DecodedEvent::AssistantContent(Vec::new()));
        assert!(acc.finalize().is_none());
    }

    #[test]
    fn failure_keeps_partial_progress() {
        let mut acc = TranscriptAccumulator::new();
        acc.apply(&text("Working"));
        acc.apply(&call(Some("t1"), "Read"));
        acc.apply(&result(Some("t1"), "done"));
        acc.apply(&call(Some("t2"), "Write"));
        acc.fail("stream interrupted: reset");

        assert_eq!(acc.state(), AccumulatorState::Errored);
        acc.apply(&text("ignored"));

        let msg = acc.finalize().unwrap();
        assert_eq!(acc.state(), AccumulatorState::Errored);
        assert_eq!(acc.failure(), Some("stream interrupted: reset"));
        assert_eq!(msg.content, "Working");
        assert_eq!(msg.tool_part(1).unwrap().result.as_deref(), Some("done"));
        assert_eq!(msg.tool_part(2).unwrap().result.as_deref(), Some(NO_OUTPUT_RESULT));
        assert!(!msg.has_pending_tools());
    }

    #[test]
    fn upstream_error_event_fails_the_run() {
        let mut acc = TranscriptAccumulator::new();
        acc.apply(&text("partial"));
        acc.apply(&DecodedEvent::Error {
            message: "overloaded".into(),
        });
        assert_eq!(acc.state(), AccumulatorState::Errored);
        assert_eq!(acc.failure(), Some("overloaded"));
        assert_eq!(acc.finalize().unwrap().content, "partial");
    }

    #[test]
    fn early_termination_without_content_records_notice() {
        let mut acc = TranscriptAccumulator::new();
        acc.apply(&terminal(TerminalOutcome::ExecutionError));
        let msg = acc.finalize().unwrap();
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(
            msg.content,
            TerminalOutcome::ExecutionError.notice().unwrap()
        );
    }

    #[derive(Clone, Debug)]
    enum Step {
        Text(String),
        Call(u8),
        Result(Option<u8>),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            "[a-z ]{0,12}".prop_map(Step::Text),
            (0u8..6).prop_map(Step::Call),
            proptest::option::of(0u8..6).prop_map(Step::Result),
        ]
    }

    fn run(steps: &[Step], fail: bool) -> Option<Message> {
        let mut acc = TranscriptAccumulator::new();
        for s in steps {
            match s {
                Step::Text(t) => acc.apply(&text(t)),
                Step::Call(id) => acc.apply(&call(Some(&format!("t{id}")), "Tool")),
                Step::Result(id) => {
                    let id = id.map(|i| format!("t{i}"));
                    acc.apply(&result(id.as_deref(), "out"))
                }
            }
        }
        if fail {
            acc.fail("boom");
        } else {
            acc.apply(&terminal(TerminalOutcome::Success));
        }
        acc.finalize()
    }

    proptest! {
        #[test]
        fn content_is_concatenation_of_text_parts(steps in proptest::collection::vec(step(), 0..40)) {
            if let Some(msg) = run(&steps, false) {
                let joined: String = msg
                    .parts
                    .iter()
                    .filter_map(|p| match &p.body {
                        PartBody::Text { text } => Some(text.as_str()),
                        PartBody::Tool(_) => None,
                    })
                    .collect();
                prop_assert_eq!(msg.content, joined);
            }
        }

        #[test]
        fn nothing_left_in_progress(steps in proptest::collection::vec(step(), 0..40), fail in any::<bool>()) {
            if let Some(msg) = run(&steps, fail) {
                prop_assert!(msg.tool_parts().all(|t| !t.in_progress && t.result.is_some()));
                let orders: Vec<u32> = msg.parts.iter().map(|p| p.order).collect();
                let expected: Vec<u32> = (0..msg.parts.len() as u32).collect();
                prop_assert_eq!(orders, expected);
            }
        }

        #[test]
        fn paired_results_win_over_interleaving(noise in 0usize..5) {
            let mut acc = TranscriptAccumulator::new();
            acc.apply(&call(Some("target"), "Read"));
            for i in 0..noise {
                acc.apply(&call(Some(&format!("n{i}")), "Noise"));
            }
            acc.apply(&result(Some("target"), "payload"));
            acc.apply(&terminal(TerminalOutcome::Success));
            let msg = acc.finalize().unwrap();
            let tool = msg.tool_part(0).unwrap();
            prop_assert!(!tool.in_progress);
            prop_assert_eq!(tool.result.as_deref(), Some("payload"));
        }
    }
}
