use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{PageletError, Result, ScriptError};

/// Terminal outcome of a session. Exactly one is ever recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed(i32),
    Errored,
}

/// Turns the stream of sandbox signals into a single resolution.
///
/// State machine per session: `Running -> {Completed | Errored} -> Reported`.
/// The first terminal signal wins; anything arriving afterwards is logged to
/// the diagnostic stream instead of changing the outcome, so cosmetic
/// post-completion errors never turn into false failures.
#[derive(Clone)]
pub struct CompletionEngine {
    state: Arc<Mutex<EngineState>>,
}

struct EngineState {
    terminal: Option<TerminalOutcome>,
    responder: Option<oneshot::Sender<std::result::Result<i32, ScriptError>>>,
}

impl CompletionEngine {
    pub fn new() -> (Self, ExitFuture) {
        let (responder, receiver) = oneshot::channel();
        let engine = Self {
            state: Arc::new(Mutex::new(EngineState {
                terminal: None,
                responder: Some(responder),
            })),
        };
        (engine, ExitFuture(receiver))
    }

    /// Record an `Exit` control message. Returns whether it became the
    /// terminal outcome; repeated exits are no-ops keeping the first code.
    pub fn record_exit(&self, code: i32) -> bool {
        let mut state = self.state.lock().expect("completion state poisoned");
        if state.terminal.is_some() {
            debug!(code = code, "Ignoring exit signal after terminal outcome");
            return false;
        }
        state.terminal = Some(TerminalOutcome::Completed(code));
        if let Some(responder) = state.responder.take() {
            let _ = responder.send(Ok(code));
        }
        true
    }

    /// Atomically claim the terminal slot for an error. Returns `false` when
    /// a terminal outcome already exists; the caller then logs the error
    /// instead of failing the run.
    pub fn begin_error(&self) -> bool {
        let mut state = self.state.lock().expect("completion state poisoned");
        if state.terminal.is_some() {
            return false;
        }
        state.terminal = Some(TerminalOutcome::Errored);
        true
    }

    /// Deliver the resolved error for a previously claimed error slot.
    pub fn resolve_error(&self, error: ScriptError) {
        let mut state = self.state.lock().expect("completion state poisoned");
        match state.responder.take() {
            Some(responder) => {
                let _ = responder.send(Err(error));
            }
            None => warn!(error = %error, "Error resolved after the outcome was reported"),
        }
    }

    pub fn terminal(&self) -> Option<TerminalOutcome> {
        self.state.lock().expect("completion state poisoned").terminal
    }
}

/// The engine's sole observable: one await yielding the exit code, or the
/// sandbox error that terminated the run.
pub struct ExitFuture(oneshot::Receiver<std::result::Result<i32, ScriptError>>);

impl ExitFuture {
    pub async fn wait(self) -> Result<i32> {
        match self.0.await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(script_error)) => Err(PageletError::Script(script_error)),
            Err(_) => Err(PageletError::SandboxClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exit_resolves_the_future() {
        let (engine, future) = CompletionEngine::new();
        assert!(engine.record_exit(4));
        assert_eq!(future.wait().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn first_exit_wins() {
        let (engine, future) = CompletionEngine::new();
        assert!(engine.record_exit(0));
        assert!(!engine.record_exit(7));
        assert_eq!(engine.terminal(), Some(TerminalOutcome::Completed(0)));
        assert_eq!(future.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn error_after_exit_is_not_terminal() {
        let (engine, future) = CompletionEngine::new();
        assert!(engine.record_exit(2));
        assert!(!engine.begin_error());
        assert_eq!(future.wait().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn exit_after_error_claim_is_ignored() {
        let (engine, future) = CompletionEngine::new();
        assert!(engine.begin_error());
        assert!(!engine.record_exit(0));
        engine.resolve_error(ScriptError::new("boom"));

        let err = future.wait().await.unwrap_err();
        assert!(matches!(err, PageletError::Script(ref s) if s.message == "boom"));
    }

    #[tokio::test]
    async fn dropped_engine_reports_a_closed_sandbox() {
        let (engine, future) = CompletionEngine::new();
        drop(engine);
        assert!(matches!(
            future.wait().await.unwrap_err(),
            PageletError::SandboxClosed
        ));
    }
}
