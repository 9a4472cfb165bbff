//! The client side of one console page.
//!
//! A [`ConsoleSession`] owns the output area, the in-flight request handle and
//! the auto-scroll flag. Each run rebuilds the buffer from scratch and repaints
//! it in full after every chunk.
//!
//! ```text
//! run() ─► handle stored ─► chunk ─► Reconstructor ─► paint (+ scroll) ─┐
//!                             ▲                                         │
//!                             └─────────────────────────────────────────┘
//!          end / stop() / error ─► append "Done!" ─► paint ─► clear own handle
//! ```
//!
//! Only the newest run paints. A run that was superseded keeps going until it
//! ends or is stopped, but its output no longer reaches the output area.

use crate::client::RoutinesClient;
use crate::error::ConsoleError;
use crate::output::OutputArea;
use futures::StreamExt;
use routines_common::StateMachine;
use routines_protocol::Reconstructor;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Appended to the buffer when a run ends, however it ends.
pub const DONE_TRAILER: &str = "\nDone!\n\n";

/// Handle to one in-flight request. Cancelling it aborts the transfer.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: u64,
    token: CancellationToken,
}

impl RequestHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Stopped,
    Failed(ConsoleError),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Debug)]
struct SessionState {
    in_flight: Option<RequestHandle>,
    auto_scroll: bool,
    next_id: u64,
}

/// A console session. Clones share the same state and output.
pub struct ConsoleSession<O> {
    client: RoutinesClient,
    state: Arc<StateMachine<SessionState>>,
    output: Arc<Mutex<O>>,
}

impl<O> Clone for ConsoleSession<O> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            state: self.state.clone(),
            output: self.output.clone(),
        }
    }
}

impl<O: OutputArea> ConsoleSession<O> {
    pub fn new(client: RoutinesClient, output: O) -> Self {
        Self {
            client,
            state: Arc::new(StateMachine::new(SessionState {
                in_flight: None,
                auto_scroll: true,
                next_id: 0,
            })),
            output: Arc::new(Mutex::new(output)),
        }
    }

    pub fn client(&self) -> &RoutinesClient {
        &self.client
    }

    /// Locks the output area, for drawing or reading it.
    pub fn output(&self) -> MutexGuard<'_, O> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `action` and paints its output until the response ends.
    ///
    /// Becomes the session's in-flight request. A request already in flight
    /// keeps running; only [`stop`](Self::stop) cancels anything.
    pub async fn run(&self, action: &str, args: &[Value]) -> RunOutcome {
        let handle = self.state.transition(|state| {
            state.next_id += 1;
            let handle = RequestHandle::new(state.next_id);
            state.in_flight = Some(handle.clone());
            handle
        });
        info!(action, request = handle.id(), "Run started");

        let mut console = Reconstructor::new();
        self.paint(handle.id, &console);

        let outcome = tokio::select! {
            biased;
            _ = handle.token.cancelled() => RunOutcome::Stopped,
            outcome = self.consume(handle.id, action, args, &mut console) => outcome,
        };

        console.finish();
        console.append_literal(DONE_TRAILER);
        self.paint(handle.id, &console);

        self.state.transition(|state| {
            if state.in_flight.as_ref().is_some_and(|h| h.id == handle.id) {
                state.in_flight = None;
            }
        });
        match &outcome {
            RunOutcome::Completed => info!(action, request = handle.id(), "Run finished"),
            RunOutcome::Stopped => info!(action, request = handle.id(), "Run stopped"),
            RunOutcome::Failed(e) => warn!(action, request = handle.id(), "Run failed: {}", e),
        }
        outcome
    }

    async fn consume(
        &self,
        id: u64,
        action: &str,
        args: &[Value],
        console: &mut Reconstructor,
    ) -> RunOutcome {
        let mut body = match self.client.run(action, args).await {
            Ok(body) => body,
            Err(e) => {
                if let ConsoleError::Status { body, .. } = &e {
                    console.append_literal(body);
                }
                return RunOutcome::Failed(e);
            }
        };
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    console.push(&bytes);
                    self.paint(id, console);
                }
                Err(e) => return RunOutcome::Failed(e),
            }
        }
        RunOutcome::Completed
    }

    /// Cancels the latest request, if any. Returns whether one was in flight.
    pub fn stop(&self) -> bool {
        match self.state.transition(|state| state.in_flight.take()) {
            Some(handle) => {
                debug!(request = handle.id(), "Stopping run");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().in_flight.is_some()
    }

    pub fn auto_scroll(&self) -> bool {
        self.state.lock().auto_scroll
    }

    /// The user took over scrolling.
    pub fn pause_scroll(&self) {
        self.state.transition(|state| state.auto_scroll = false);
    }

    /// Turns auto-scroll back on and jumps to the end.
    pub fn scroll_to_end(&self) {
        self.state.transition(|state| state.auto_scroll = true);
        self.output().scroll_to_bottom();
    }

    /// Paints for run `id`, unless a newer run has started since. The output
    /// lock is held across the check so a superseded run cannot paint last.
    fn paint(&self, id: u64, console: &Reconstructor) {
        let mut output = self.output();
        let (latest, auto_scroll) = {
            let state = self.state.lock();
            (state.next_id, state.auto_scroll)
        };
        if latest != id {
            return;
        }
        output.paint(&console.text());
        if auto_scroll {
            output.scroll_to_bottom();
        }
    }
}
