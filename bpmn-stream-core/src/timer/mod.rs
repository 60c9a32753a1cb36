//! Due-date timers: the checker that turns due timers into TRIGGER commands,
//! the tokio task that drives it, and the TRIGGER processor.
//!
//! The checker never writes to the log. It appends commands to a bounded
//! batch, the driver hands the batch to the stream processor, and only the
//! TRIGGER processor removes a timer from state. The one exception is a timer
//! whose process instance is banned: nobody will ever trigger it, so the
//! checker drops it directly.

mod driver;
mod trigger;

pub use driver::{spawn_due_date_checker, DueDateCheckerHandle};
pub use trigger::TimerTriggerProcessor;

use crate::clock::ActorClock;
use crate::config::EngineConfig;
use crate::scheduled::{LifecyclePhase, TaskResultBuilder};
use crate::state::*;
use crate::types::*;
use anyhow::Result;
use std::sync::Arc;

/// What one scan produced.
#[derive(Debug, Default)]
pub struct TimerCheckOutcome {
    pub commands: Vec<Record>,
    /// When the checker wants to run next, if at all.
    pub next_wakeup: Option<Timestamp>,
    pub yielded: bool,
    pub batch_full: bool,
}

/// Scans due timers and emits TRIGGER commands for them.
///
/// A scan resumes strictly after the last timer it emitted a command for, so
/// a timer whose TRIGGER has not been processed yet is not emitted twice.
/// Scheduling a timer behind that cursor rewinds it; recovery clears it.
pub struct DueDateTimerChecker {
    state: SharedState,
    clock: Arc<dyn ActorClock>,
    resolution_ms: i64,
    yield_budget_ms: i64,
    yielding: bool,
    max_commands_in_batch: usize,
    cursor: Option<(Timestamp, Key)>,
    next_wakeup: Option<Timestamp>,
    active: bool,
}

impl DueDateTimerChecker {
    /// Inactive until the stream processor reports it has recovered.
    pub fn new(state: SharedState, clock: Arc<dyn ActorClock>, config: &EngineConfig) -> Self {
        Self {
            state,
            clock,
            resolution_ms: config.timer_resolution_ms as i64,
            yield_budget_ms: config.yield_budget_ms(),
            yielding: config.yielding_due_date_checker,
            max_commands_in_batch: config.max_commands_in_batch,
            cursor: None,
            next_wakeup: None,
            active: false,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now_millis()
    }

    pub fn next_wakeup(&self) -> Option<Timestamp> {
        self.next_wakeup
    }

    pub fn cursor(&self) -> Option<(Timestamp, Key)> {
        self.cursor
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Asks for a wake-up at `due_date`. Returns whether the pending wake-up moved.
    ///
    /// Wake-ups coalesce: a new due date only re-arms when nothing is pending
    /// or when it is earlier than the pending one by more than the resolution.
    pub fn schedule_timer(&mut self, due_date: Timestamp) -> bool {
        if !self.active {
            return false;
        }

        if let Some((cursor_due, _)) = self.cursor {
            if due_date <= cursor_due {
                self.cursor = Some((due_date - 1, Key::MAX));
            }
        }

        match self.next_wakeup {
            Some(pending) if due_date >= pending - self.resolution_ms => false,
            _ => {
                self.next_wakeup = Some(due_date);
                true
            }
        }
    }

    pub fn on_phase(&mut self, phase: LifecyclePhase) {
        match phase {
            LifecyclePhase::Recovered | LifecyclePhase::Resumed => {
                self.active = true;
                self.cursor = None;
                self.next_wakeup = Some(self.now());
            }
            LifecyclePhase::Paused | LifecyclePhase::Closed | LifecyclePhase::Failed => {
                self.active = false;
                self.next_wakeup = None;
            }
        }
        tracing::info!(phase = %phase, active = self.active, "due date checker lifecycle");
    }

    /// Retry one resolution from now after a failed scan.
    pub fn reschedule_after_failure(&mut self) {
        if self.active {
            self.next_wakeup = Some(self.now() + self.resolution_ms);
        }
    }

    /// Runs one scan over the timers due now.
    pub fn check_due_timers(&mut self) -> Result<TimerCheckOutcome> {
        self.next_wakeup = None;
        if !self.active {
            return Ok(TimerCheckOutcome::default());
        }

        let now = self.now();
        let mut builder = TaskResultBuilder::new(self.max_commands_in_batch);
        let mut writer = WriteTriggerTimerCommandVisitor::new(self.state.as_ref(), &mut builder);

        let (stopped_at, yielded) = if self.yielding {
            let yield_after = now + self.yield_budget_ms;
            let mut visitor = YieldingDecorator::new(self.clock.as_ref(), yield_after, &mut writer);
            let stopped_at = self
                .state
                .process_timers_due_after(self.cursor, now, &mut visitor)?;
            (stopped_at, visitor.yielded)
        } else {
            let stopped_at = self
                .state
                .process_timers_due_after(self.cursor, now, &mut writer)?;
            (stopped_at, false)
        };

        let last_emitted = writer.last_emitted;
        let batch_full = writer.batch_full;
        let commands = builder.build();

        if last_emitted.is_some() {
            self.cursor = last_emitted;
        }
        // Stopped at a timer that is already due: come back right away.
        self.next_wakeup = stopped_at.map(|due| due.max(now));

        tracing::debug!(
            now,
            emitted = commands.len(),
            yielded,
            batch_full,
            next_wakeup = ?self.next_wakeup,
            "due date check finished"
        );

        Ok(TimerCheckOutcome {
            commands,
            next_wakeup: self.next_wakeup,
            yielded,
            batch_full,
        })
    }
}

/// Appends a TRIGGER command per due timer; drops timers of banned instances.
struct WriteTriggerTimerCommandVisitor<'a> {
    state: &'a dyn MutableProcessingState,
    builder: &'a mut TaskResultBuilder,
    last_emitted: Option<(Timestamp, Key)>,
    batch_full: bool,
}

impl<'a> WriteTriggerTimerCommandVisitor<'a> {
    fn new(state: &'a dyn MutableProcessingState, builder: &'a mut TaskResultBuilder) -> Self {
        Self {
            state,
            builder,
            last_emitted: None,
            batch_full: false,
        }
    }
}

impl TimerVisitor for WriteTriggerTimerCommandVisitor<'_> {
    fn visit(&mut self, timer: &TimerInstance) -> Result<bool> {
        if self.state.is_banned_instance(timer.process_instance_key)? {
            tracing::info!(
                timer_key = timer.key,
                process_instance_key = timer.process_instance_key,
                "The instance of the timer is banned, removing timer from the state."
            );
            // Not part of any stream transaction and not logged; a later
            // scan repeats it if a rollback restores the timer.
            self.state.remove_timer(timer.key)?;
            return Ok(true);
        }

        if !self
            .builder
            .append_command(timer.key, TimerIntent::Trigger, timer.to_record())
        {
            self.batch_full = true;
            return Ok(false);
        }
        self.last_emitted = Some((timer.due_date, timer.key));
        Ok(true)
    }
}

/// Stops the scan once the clock passes `yield_after`. The first timer of a
/// scan is always passed through, so a scan makes progress.
struct YieldingDecorator<'a> {
    clock: &'a dyn ActorClock,
    yield_after: Timestamp,
    delegate: &'a mut dyn TimerVisitor,
    visited: usize,
    yielded: bool,
}

impl<'a> YieldingDecorator<'a> {
    fn new(clock: &'a dyn ActorClock, yield_after: Timestamp, delegate: &'a mut dyn TimerVisitor) -> Self {
        Self {
            clock,
            yield_after,
            delegate,
            visited: 0,
            yielded: false,
        }
    }
}

impl TimerVisitor for YieldingDecorator<'_> {
    fn visit(&mut self, timer: &TimerInstance) -> Result<bool> {
        if self.visited > 0 && self.clock.now_millis() >= self.yield_after {
            self.yielded = true;
            return Ok(false);
        }
        self.visited += 1;
        self.delegate.visit(timer)
    }
}

#[cfg(test)]
mod tests;
