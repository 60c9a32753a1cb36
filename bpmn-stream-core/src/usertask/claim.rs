use super::preconditions::{
    action_of, check_user_task, finalize_transition, RESTING_STATES,
};
use super::registry::UserTaskCommandProcessor;
use crate::state::SharedState;
use crate::types::*;
use crate::writers::Writers;
use anyhow::Result;

const DEFAULT_ACTION: &str = "claim";

/// Assigns a task to the caller, unless someone else already holds it.
pub struct UserTaskClaimProcessor {
    state: SharedState,
}

impl UserTaskClaimProcessor {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl UserTaskCommandProcessor for UserTaskClaimProcessor {
    fn check(&self, command: &TypedRecord<UserTaskRecord>) -> Result<Checked<UserTaskRecord>> {
        let action = action_of(command, DEFAULT_ACTION);
        let persisted = match check_user_task(&self.state, command, &action, RESTING_STATES)? {
            Ok(persisted) => persisted,
            Err(rejection) => return Ok(Err(rejection)),
        };

        // Claiming your own task again is fine.
        if !persisted.assignee.is_empty() && persisted.assignee != command.value.assignee {
            return Ok(Err(Rejection::new(
                RejectionType::InvalidState,
                format!(
                    "Expected to claim user task with key '{}', but it has already been assigned",
                    command.key
                ),
            )));
        }
        Ok(Ok(persisted))
    }

    fn on_command(
        &self,
        command: &TypedRecord<UserTaskRecord>,
        mut persisted: UserTaskRecord,
        writers: &mut Writers,
    ) -> Result<UserTaskRecord> {
        persisted.assignee = command.value.assignee.clone();
        persisted.action = action_of(command, DEFAULT_ACTION);
        persisted.changed_attributes = vec![attributes::ASSIGNEE.to_string()];

        writers.state().append_follow_up_event_on_command(
            command.key,
            UserTaskIntent::Assigning,
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
        finalize_transition(&self.state, command, UserTaskIntent::Assigned, pending, writers)
    }
}
