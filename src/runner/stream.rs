//! Event stream between an evaluation run and its caller.
//!
//! Single producer (the orchestrator, through [`EventSink`]), at most
//! one consumer (the caller, through [`EvaluationStream`]). The sink
//! guarantees exactly one terminal event on every exit path; the
//! stream can be dropped at any point without affecting the run, which
//! finishes unobserved.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

use super::TestOutcome;

/// Lifecycle events of one evaluation run, in emission order:
/// `Queued`, `Processing`, zero or more `TestCaseCompleted`, then
/// exactly one of `Completed` or `Error`.
///
/// Serializes with a `status` tag (`queued`, `processing`,
/// `test_case_completed`, `completed`, `error`); transport framing is
/// the caller's concern.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunEvent {
    Queued,
    Processing,
    TestCaseCompleted {
        index: usize,
        outcome: TestOutcome,
    },
    Completed {
        all_passed: bool,
        outcomes: Vec<TestOutcome>,
    },
    Error {
        message: String,
    },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Completed { .. } | RunEvent::Error { .. })
    }
}

/// Producer half of a run's event channel.
///
/// Terminal events consume the sink (`completed`/`error`), so a branch
/// cannot emit two of them. If the sink is dropped without either —
/// a panic inside the run, or the task being discarded before it ran —
/// `Drop` emits an `Error` terminal instead of silently closing the
/// channel, so the caller never hangs waiting for an ending.
pub struct EventSink {
    tx: mpsc::UnboundedSender<RunEvent>,
    terminal_sent: bool,
}

impl EventSink {
    pub fn channel() -> (EventSink, EvaluationStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            EventSink {
                tx,
                terminal_sent: false,
            },
            EvaluationStream { rx },
        )
    }

    /// Emits a progress event. A detached consumer is not an error;
    /// the send result is deliberately ignored.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    /// Terminal: the run finished. `all_passed` is the conjunction of
    /// every outcome.
    pub fn completed(mut self, outcomes: Vec<TestOutcome>) {
        let all_passed = outcomes.iter().all(|o| o.passed);
        self.terminal_sent = true;
        let _ = self.tx.send(RunEvent::Completed {
            all_passed,
            outcomes,
        });
    }

    /// Terminal: the run aborted. Outcomes already emitted remain
    /// valid to the caller.
    pub fn error(mut self, message: impl Into<String>) {
        self.terminal_sent = true;
        let _ = self.tx.send(RunEvent::Error {
            message: message.into(),
        });
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        if !self.terminal_sent {
            let _ = self.tx.send(RunEvent::Error {
                message: "evaluation aborted before completion".to_string(),
            });
        }
    }
}

/// Consumer half: a lazy, push-based sequence of [`RunEvent`]s,
/// ending naturally after the terminal event.
pub struct EvaluationStream {
    rx: mpsc::UnboundedReceiver<RunEvent>,
}

impl EvaluationStream {
    /// Next event, or `None` once the terminal event has been
    /// delivered and the producer is gone.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    /// Drains the stream to completion. Mostly useful for callers that
    /// only care about the terminal event.
    pub async fn collect_events(mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EvaluationStream {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RunEvent>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(passed: bool) -> TestOutcome {
        TestOutcome {
            input: "in".to_string(),
            expected: "out".to_string(),
            actual: "out".to_string(),
            error: None,
            passed,
        }
    }

    #[tokio::test]
    async fn test_completed_closes_stream() {
        let (sink, mut stream) = EventSink::channel();
        sink.emit(RunEvent::Queued);
        sink.completed(vec![outcome(true)]);

        assert!(matches!(stream.next_event().await, Some(RunEvent::Queued)));
        match stream.next_event().await {
            Some(RunEvent::Completed { all_passed, outcomes }) => {
                assert!(all_passed);
                assert_eq!(outcomes.len(), 1);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_all_passed_is_conjunction() {
        let (sink, stream) = EventSink::channel();
        sink.completed(vec![outcome(true), outcome(false)]);

        let events = stream.collect_events().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            RunEvent::Completed { all_passed, .. } => assert!(!all_passed),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drop_without_terminal_emits_error() {
        let (sink, stream) = EventSink::channel();
        sink.emit(RunEvent::Queued);
        drop(sink);

        let events = stream.collect_events().await;
        assert_eq!(events.len(), 2);
        match &events[1] {
            RunEvent::Error { message } => assert!(message.contains("aborted")),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_explicit_error_is_the_only_terminal() {
        let (sink, stream) = EventSink::channel();
        sink.error("backend fell over");
        // Drop runs after error(); it must not add a second terminal.
        let events = stream.collect_events().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_emit_to_detached_consumer_is_silent() {
        let (sink, stream) = EventSink::channel();
        drop(stream);
        sink.emit(RunEvent::Processing);
        sink.completed(vec![]);
        // reaching here without a panic is the assertion
    }

    #[test]
    fn test_event_serialization_tags() {
        let json = serde_json::to_value(RunEvent::Queued).unwrap();
        assert_eq!(json["status"], "queued");

        let json = serde_json::to_value(RunEvent::TestCaseCompleted {
            index: 2,
            outcome: outcome(true),
        })
        .unwrap();
        assert_eq!(json["status"], "test_case_completed");
        assert_eq!(json["index"], 2);
        assert_eq!(json["outcome"]["passed"], true);

        let json = serde_json::to_value(RunEvent::Completed {
            all_passed: true,
            outcomes: vec![],
        })
        .unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["all_passed"], true);

        let json = serde_json::to_value(RunEvent::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "boom");
    }
}
