//! Plumbing shared by work scheduled outside command processing.

use crate::types::*;
use std::fmt;

/// Collects the commands one scheduled task produces, up to a fixed batch size.
#[derive(Debug)]
pub struct TaskResultBuilder {
    capacity: usize,
    records: Vec<Record>,
}

impl TaskResultBuilder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Vec::new(),
        }
    }

    /// Returns `false`, without appending, once the batch is full.
    pub fn append_command<V: RecordValue>(&mut self, key: Key, intent: V::Intent, value: V) -> bool {
        if self.is_full() {
            return false;
        }
        self.records.push(Record::command(key, intent, value));
        true
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn build(self) -> Vec<Record> {
        self.records
    }
}

/// Stream processor lifecycle transitions, as seen by scheduled work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecyclePhase {
    Recovered,
    Paused,
    Resumed,
    Closed,
    Failed,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Recovered => "recovered",
            LifecyclePhase::Paused => "paused",
            LifecyclePhase::Resumed => "resumed",
            LifecyclePhase::Closed => "closed",
            LifecyclePhase::Failed => "failed",
        }
    }

    /// Closed and failed are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecyclePhase::Closed | LifecyclePhase::Failed)
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notified by the stream processor on every lifecycle transition.
///
/// Implementors override either the per-phase hooks or [`on_phase`] alone.
///
/// [`on_phase`]: StreamProcessorLifecycleAware::on_phase
pub trait StreamProcessorLifecycleAware: Send + Sync {
    fn on_phase(&self, _phase: LifecyclePhase) {}

    fn on_recovered(&self) {
        self.on_phase(LifecyclePhase::Recovered)
    }

    fn on_paused(&self) {
        self.on_phase(LifecyclePhase::Paused)
    }

    fn on_resumed(&self) {
        self.on_phase(LifecyclePhase::Resumed)
    }

    fn on_closed(&self) {
        self.on_phase(LifecyclePhase::Closed)
    }

    fn on_failed(&self) {
        self.on_phase(LifecyclePhase::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_refuses_past_capacity() {
        let mut builder = TaskResultBuilder::new(2);
        assert!(builder.append_command(1, TimerIntent::Trigger, TimerRecord::default()));
        assert!(builder.append_command(2, TimerIntent::Trigger, TimerRecord::default()));
        assert!(!builder.append_command(3, TimerIntent::Trigger, TimerRecord::default()));

        let records = builder.build();
        assert_eq!(records.iter().map(|r| r.key).collect::<Vec<_>>(), vec![1, 2]);
        assert!(records.iter().all(Record::is_command));
    }

    #[test]
    fn terminal_phases() {
        assert!(LifecyclePhase::Closed.is_terminal());
        assert!(LifecyclePhase::Failed.is_terminal());
        assert!(!LifecyclePhase::Paused.is_terminal());
    }
}
