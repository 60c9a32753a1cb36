use super::preconditions::{
    action_of, check_user_task, finalize_transition, RESTING_STATES,
};
use super::registry::UserTaskCommandProcessor;
use crate::error::EngineError;
use crate::state::SharedState;
use crate::types::*;
use crate::writers::Writers;
use anyhow::Result;

const DEFAULT_ACTION: &str = "complete";

/// Completes a task and hands the element back to the process via COMPLETE_ELEMENT.
pub struct UserTaskCompleteProcessor {
    state: SharedState,
}

impl UserTaskCompleteProcessor {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl UserTaskCommandProcessor for UserTaskCompleteProcessor {
    fn check(&self, command: &TypedRecord<UserTaskRecord>) -> Result<Checked<UserTaskRecord>> {
        let action = action_of(command, DEFAULT_ACTION);
        check_user_task(&self.state, command, &action, RESTING_STATES)
    }

    fn on_command(
        &self,
        command: &TypedRecord<UserTaskRecord>,
        mut persisted: UserTaskRecord,
        writers: &mut Writers,
    ) -> Result<UserTaskRecord> {
        persisted.variables = command.value.variables.clone();
        persisted.action = action_of(command, DEFAULT_ACTION);

        writers.state().append_follow_up_event_on_command(
            command.key,
            UserTaskIntent::Completing,
            persisted.clone(),
            command,
        )?;
        Ok(persisted)
    }

    fn on_finalize_command(
        &self,
        command: &TypedRecord<UserTaskRecord>,
        pending: &UserTaskRecord,
        writers: &mut Writers,
    ) -> Result<()> {
        finalize_transition(&self.state, command, UserTaskIntent::Completed, pending, writers)?;

        let element_instance_key = pending.element_instance_key;
        let element = self
            .state
            .get_instance(element_instance_key)?
            .ok_or(EngineError::MissingElementInstance(element_instance_key))?;
        writers.command().append_follow_up_command(
            element_instance_key,
            ProcessInstanceIntent::CompleteElement,
            element.value,
        );
        Ok(())
    }
}
