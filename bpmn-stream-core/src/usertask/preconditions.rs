use crate::authorization::TenantAuthorizationChecker;
use crate::state::SharedState;
use crate::types::*;
use crate::writers::Writers;
use anyhow::Result;

/// States from which an operation may start.
pub(crate) const RESTING_STATES: &[LifecycleState] =
    &[LifecycleState::Created, LifecycleState::Assigned];

/// The command's `action`, or the operation's default name.
pub(crate) fn action_of(command: &TypedRecord<UserTaskRecord>, default: &str) -> String {
    if command.value.action.is_empty() {
        default.to_string()
    } else {
        command.value.action.clone()
    }
}

/// Existence, lifecycle and tenant checks shared by every operation.
pub(crate) fn check_user_task(
    state: &SharedState,
    command: &TypedRecord<UserTaskRecord>,
    action: &str,
    valid_states: &[LifecycleState],
) -> Result<Checked<UserTaskRecord>> {
    let key = command.key;
    let not_found = || {
        Rejection::new(
            RejectionType::NotFound,
            format!("Expected to {action} user task with key '{key}', but no such user task was found"),
        )
    };

    let (Some(persisted), Some(lifecycle_state)) =
        (state.get_user_task(key)?, state.get_lifecycle_state(key)?)
    else {
        return Ok(Err(not_found()));
    };

    if !valid_states.contains(&lifecycle_state) {
        return Ok(Err(Rejection::new(
            RejectionType::InvalidState,
            format!("Expected to {action} user task with key '{key}', but it is in state '{lifecycle_state}'"),
        )));
    }

    // Tasks of other tenants are reported as absent.
    if !TenantAuthorizationChecker::from_authorizations(&command.authorizations)
        .is_authorized(&persisted.tenant_id)
    {
        return Ok(Err(not_found()));
    }

    Ok(Ok(persisted))
}

/// Writes the committing event and answers the original request, whether it
/// arrived on this command or was stored while listeners ran.
pub(crate) fn finalize_transition(
    state: &SharedState,
    command: &TypedRecord<UserTaskRecord>,
    event: UserTaskIntent,
    record: &UserTaskRecord,
    writers: &mut Writers,
) -> Result<()> {
    let key = command.key;
    // The committing event's applier drops the stored request.
    let stored = state.find_request_metadata(key)?;

    writers
        .state()
        .append_follow_up_event(key, event, record.clone())?;

    if command.intent != UserTaskIntent::CompleteTaskListener && command.has_request_metadata() {
        writers
            .response()
            .write_event_on_command(key, event, record.clone(), command);
    } else if let Some(metadata) = stored {
        writers.response().write_response(
            key,
            event,
            record.clone(),
            metadata.request_id,
            metadata.request_stream_id,
        );
    }
    Ok(())
}
