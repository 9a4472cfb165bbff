//! One guarded invocation of a task.
//!
//! ```text
//! ParseArgs ─► ResolveLimits ─► Start ─► RunCallback ─► Stop ─► Done
//! ```
//!
//! There are no retries. If the callback fails the guard stays in
//! `RunCallback` and returns the error. The [`Stream`] is dropped on the way
//! out, which ends the response without the closing banner.

use crate::args::RequestParams;
use crate::config::RoutineSettings;
use crate::limits::{AmbientLimits, MemoryProbe, ProcessMemory};
use crate::registry::Task;
use crate::stream::{Sink, Stream};
use anyhow::Context;
use routines_common::StateMachine;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    ParseArgs,
    ResolveLimits,
    Start,
    RunCallback,
    Stop,
    Done,
}

pub struct ExecutionGuard {
    task: Arc<Task>,
    settings: RoutineSettings,
    ambient: Arc<AmbientLimits>,
    probe: Arc<dyn MemoryProbe>,
    started_at: Instant,
    run_id: String,
    phase: StateMachine<GuardPhase>,
}

impl ExecutionGuard {
    /// `settings` is the task's merged override chain; anything it leaves unset
    /// comes from the ambient limits.
    pub fn new(task: Arc<Task>, settings: RoutineSettings) -> Self {
        Self {
            task,
            settings,
            ambient: Arc::new(AmbientLimits::default()),
            probe: Arc::new(ProcessMemory),
            started_at: Instant::now(),
            run_id: String::new(),
            phase: StateMachine::new(GuardPhase::ParseArgs),
        }
    }

    pub fn with_ambient(mut self, ambient: Arc<AmbientLimits>) -> Self {
        self.ambient = ambient;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_start_time(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn phase(&self) -> GuardPhase {
        *self.phase.lock()
    }

    /// Runs the task to completion on the calling thread, writing to `sink`.
    ///
    /// Blocks on every send, so call it from a blocking context.
    pub fn run(&self, params: &RequestParams, sink: Sink) -> anyhow::Result<()> {
        let span = info_span!("routine", action = self.task.action(), run_id = %self.run_id);
        let _entered = span.enter();

        let args = params.args();
        debug!(arg_count = args.len(), "Arguments parsed");

        self.enter(GuardPhase::ResolveLimits);
        let resolved = self.settings.resolve(&self.ambient);

        self.enter(GuardPhase::Start);
        let mut stream = Stream::new(sink, resolved.exec_time_secs, resolved.memory_limit)
            .with_ambient(self.ambient.clone())
            .with_probe(self.probe.clone())
            .with_start_time(self.started_at);
        stream.start(resolved.show_start_banner);

        self.enter(GuardPhase::RunCallback);
        self.task
            .call(&mut stream, &args)
            .with_context(|| format!("routine '{}' failed", self.task.action()))?;

        self.enter(GuardPhase::Stop);
        stream.stop(resolved.show_stop_banner);

        self.enter(GuardPhase::Done);
        Ok(())
    }

    fn enter(&self, next: GuardPhase) {
        self.phase.transition(|phase| {
            debug!(from = ?*phase, to = ?next, "Guard phase");
            *phase = next;
        });
    }
}
