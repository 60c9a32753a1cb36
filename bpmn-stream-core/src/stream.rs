//! Single-writer loop around the engine: an append-only log, a queue of
//! commands waiting to be processed, and the channel scheduled work writes to.

use crate::engine::Engine;
use crate::scheduled::{LifecyclePhase, StreamProcessorLifecycleAware};
use crate::timer::DueDateCheckerHandle;
use crate::types::*;
use crate::writers::ProcessingResult;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A record and where it sits in the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggedRecord {
    pub position: u64,
    /// Position of the command this record was produced by.
    pub source_position: Option<u64>,
    pub record: Record,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPhase {
    Created,
    Processing,
    Paused,
    Closed,
    Failed,
}

pub struct StreamProcessor {
    engine: Engine,
    log: Vec<LoggedRecord>,
    pending: VecDeque<(Record, Option<u64>)>,
    responses: Vec<Record>,
    scheduled_tx: mpsc::UnboundedSender<Record>,
    scheduled_rx: mpsc::UnboundedReceiver<Record>,
    timer_checker: Option<DueDateCheckerHandle>,
    listeners: Vec<Arc<dyn StreamProcessorLifecycleAware>>,
    phase: StreamPhase,
}

impl StreamProcessor {
    pub fn new(engine: Engine) -> Self {
        let (scheduled_tx, scheduled_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            log: Vec::new(),
            pending: VecDeque::new(),
            responses: Vec::new(),
            scheduled_tx,
            scheduled_rx,
            timer_checker: None,
            listeners: Vec::new(),
            phase: StreamPhase::Created,
        }
    }

    /// Where scheduled work (the due-date checker) sends its commands.
    pub fn scheduled_commands(&self) -> mpsc::UnboundedSender<Record> {
        self.scheduled_tx.clone()
    }

    /// Routes TIMER CREATED events to the checker and lifecycle changes to it.
    pub fn attach_timer_checker(&mut self, handle: DueDateCheckerHandle) {
        self.listeners.push(Arc::new(handle.clone()));
        self.timer_checker = Some(handle);
    }

    pub fn add_lifecycle_listener(&mut self, listener: Arc<dyn StreamProcessorLifecycleAware>) {
        self.listeners.push(listener);
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn log(&self) -> &[LoggedRecord] {
        &self.log
    }

    pub fn responses(&self) -> &[Record] {
        &self.responses
    }

    pub fn take_responses(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.responses)
    }

    /// Rebuilds state from an existing log, then starts processing.
    ///
    /// Events are applied through the engine's appliers; commands and
    /// rejections are kept in the log but not re-run.
    pub fn recover(&mut self, log: Vec<LoggedRecord>) -> Result<()> {
        if self.phase != StreamPhase::Created {
            return Err(anyhow!("Expected to recover a new stream processor, but it is {:?}", self.phase));
        }
        for logged in &log {
            self.engine.apply(&logged.record)?;
        }
        tracing::info!(records = log.len(), "stream processor recovered");
        self.log = log;
        self.phase = StreamPhase::Processing;
        self.notify(LifecyclePhase::Recovered);
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.phase == StreamPhase::Processing {
            self.phase = StreamPhase::Paused;
            self.notify(LifecyclePhase::Paused);
        }
    }

    pub fn resume(&mut self) {
        if self.phase == StreamPhase::Paused {
            self.phase = StreamPhase::Processing;
            self.notify(LifecyclePhase::Resumed);
        }
    }

    pub fn close(&mut self) {
        if !matches!(self.phase, StreamPhase::Closed | StreamPhase::Failed) {
            self.phase = StreamPhase::Closed;
            self.notify(LifecyclePhase::Closed);
        }
    }

    fn fail(&mut self) {
        self.phase = StreamPhase::Failed;
        self.notify(LifecyclePhase::Failed);
    }

    /// Queues a client command.
    pub fn submit(&mut self, command: Record) {
        self.pending.push_back((command, None));
    }

    /// Moves commands from scheduled work onto the queue without blocking.
    fn collect_scheduled(&mut self) {
        while let Ok(command) = self.scheduled_rx.try_recv() {
            self.pending.push_back((command, None));
        }
    }

    /// Waits until scheduled work sends a command, then queues it.
    /// Returns `false` once no sender is left.
    pub async fn wait_for_scheduled(&mut self) -> bool {
        match self.scheduled_rx.recv().await {
            Some(command) => {
                self.pending.push_back((command, None));
                true
            }
            None => false,
        }
    }

    /// Processes queued commands, including the follow-ups they produce,
    /// until nothing processable is left. Returns how many were processed.
    ///
    /// Follow-up commands no processor is registered for are logged and left
    /// for the host.
    pub fn drain(&mut self) -> Result<usize> {
        if self.phase != StreamPhase::Processing {
            return Ok(0);
        }

        let mut processed = 0;
        loop {
            self.collect_scheduled();
            let Some((command, source)) = self.pending.pop_front() else {
                return Ok(processed);
            };

            if !self.engine.handles(&command.intent) {
                tracing::debug!(key = command.key, intent = %command.intent, "no processor, leaving command for the host");
                self.append(command, source);
                continue;
            }

            let position = self.append(command.clone(), source);
            let result = match self.engine.process(&command) {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(position, error = %format!("{e:#}"), "stream processor failed");
                    self.fail();
                    return Err(e);
                }
            };
            self.write_result(result, position);
            processed += 1;
        }
    }

    fn write_result(&mut self, result: ProcessingResult, position: u64) {
        let ProcessingResult { records, response } = result;
        for record in records {
            if record.is_command() && self.engine.handles(&record.intent) {
                self.pending.push_back((record, Some(position)));
                continue;
            }
            if record.is_event() {
                self.on_event(&record);
            }
            self.append(record, Some(position));
        }
        if let Some(response) = response {
            self.responses.push(response);
        }
    }

    fn on_event(&self, event: &Record) {
        if let (Intent::Timer(TimerIntent::Created), RecordPayload::Timer(timer)) =
            (&event.intent, &event.value)
        {
            if let Some(checker) = &self.timer_checker {
                checker.schedule_timer(timer.due_date);
            }
        }
    }

    fn append(&mut self, record: Record, source_position: Option<u64>) -> u64 {
        let position = self.log.last().map_or(1, |last| last.position + 1);
        self.log.push(LoggedRecord {
            position,
            source_position,
            record,
        });
        position
    }

    fn notify(&self, phase: LifecyclePhase) {
        for listener in &self.listeners {
            match phase {
                LifecyclePhase::Recovered => listener.on_recovered(),
                LifecyclePhase::Paused => listener.on_paused(),
                LifecyclePhase::Resumed => listener.on_resumed(),
                LifecyclePhase::Closed => listener.on_closed(),
                LifecyclePhase::Failed => listener.on_failed(),
            }
        }
    }

    /// SHA-256 over the serialized log.
    pub fn log_digest(&self) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        for logged in &self.log {
            hasher.update(serde_json::to_vec(logged)?);
        }
        Ok(hasher.finalize().into())
    }
}
