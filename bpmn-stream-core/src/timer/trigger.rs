use crate::processor::TypedRecordProcessor;
use crate::state::*;
use crate::types::*;
use crate::writers::Writers;
use anyhow::Result;

/// TIMER TRIGGER. A timer fires at most once: a second TRIGGER for the same
/// key finds nothing and is rejected.
pub struct TimerTriggerProcessor {
    state: SharedState,
}

impl TimerTriggerProcessor {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl TypedRecordProcessor<TimerRecord> for TimerTriggerProcessor {
    fn process_record(&self, command: &TypedRecord<TimerRecord>, writers: &mut Writers) -> Result<()> {
        let key = command.key;
        let Some(timer) = self.state.get_timer(key)? else {
            let rejection = Rejection::new(
                RejectionType::NotFound,
                format!("Expected to trigger timer with key '{key}', but no such timer was found"),
            );
            writers.reject(command, &rejection);
            return Ok(());
        };

        let record = timer.to_record();
        writers
            .state()
            .append_follow_up_event(key, TimerIntent::Triggered, record.clone())?;
        writers
            .response()
            .write_event_on_command(key, TimerIntent::Triggered, record, command);

        // The catching element continues in the host; hand it the element back.
        if let Some(element) = self.state.get_instance(timer.element_instance_key)? {
            writers.command().append_follow_up_command(
                element.key,
                ProcessInstanceIntent::CompleteElement,
                element.value,
            );
        }
        Ok(())
    }
}
