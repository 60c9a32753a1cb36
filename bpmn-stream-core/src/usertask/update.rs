use super::preconditions::{
    action_of, check_user_task, finalize_transition, RESTING_STATES,
};
use super::registry::UserTaskCommandProcessor;
use crate::state::SharedState;
use crate::types::*;
use crate::writers::Writers;
use anyhow::Result;

const DEFAULT_ACTION: &str = "update";

pub struct UserTaskUpdateProcessor {
    state: SharedState,
}

impl UserTaskUpdateProcessor {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl UserTaskCommandProcessor for UserTaskUpdateProcessor {
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
        persisted.apply_changed_attributes(&command.value);
        persisted.action = action_of(command, DEFAULT_ACTION);

        writers.state().append_follow_up_event_on_command(
            command.key,
            UserTaskIntent::Updating,
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
        finalize_transition(&self.state, command, UserTaskIntent::Updated, pending, writers)
    }
}
