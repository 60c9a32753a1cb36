//! User task lifecycle: operation commands, task-listener chains and the
//! listener-completion pseudo-command.
//!
//! ```text
//! CREATING → CREATED
//! CREATED|ASSIGNED → ASSIGNING → ASSIGNED (CREATED when unassigned)
//! CREATED|ASSIGNED → UPDATING → ASSIGNED|CREATED
//! CREATED|ASSIGNED → COMPLETING → COMPLETED
//! * → CANCELING → CANCELED
//! ```
//!
//! Each "-ing" state waits for the listeners of its event type to run, one
//! job at a time, before the committing event is written.

mod assign;
mod claim;
mod complete;
mod listener;
mod preconditions;
mod registry;
mod update;

pub use listener::TaskListenerBehavior;
pub use registry::{UserTaskCommandProcessor, UserTaskCommandProcessors};

use crate::authorization::{AuthorizationRequest, PermissionType, ResourceType};
use crate::error::EngineError;
use crate::processor::{Authorizable, TypedRecordProcessor};
use crate::state::*;
use crate::types::*;
use crate::writers::Writers;
use anyhow::Result;

pub struct UserTaskProcessor {
    state: SharedState,
    command_processors: UserTaskCommandProcessors,
    listener_behavior: TaskListenerBehavior,
}

impl UserTaskProcessor {
    pub fn new(
        state: SharedState,
        command_processors: UserTaskCommandProcessors,
        listener_behavior: TaskListenerBehavior,
    ) -> Self {
        Self {
            state,
            command_processors,
            listener_behavior,
        }
    }

    fn process_operation_command(
        &self,
        command: &TypedRecord<UserTaskRecord>,
        writers: &mut Writers,
    ) -> Result<()> {
        let intent = command.intent;
        let processor = self.command_processors.get(intent)?;

        let persisted = match processor.check(command)? {
            Ok(persisted) => persisted,
            Err(rejection) => {
                writers.reject(command, &rejection);
                return Ok(());
            }
        };

        let pending = processor.on_command(command, persisted, writers)?;
        let event_type = map_intent_to_event_type(intent)?;
        let element = self.user_task_element(&pending)?;

        let first = element.task_listeners(event_type).next();
        match first {
            Some(first) => self
                .listener_behavior
                .create_task_listener_job(first, &pending, writers),
            None => processor.on_finalize_command(command, &pending, writers),
        }
    }

    fn process_complete_task_listener(
        &self,
        command: &TypedRecord<UserTaskRecord>,
        writers: &mut Writers,
    ) -> Result<()> {
        let lifecycle_state = self
            .state
            .get_lifecycle_state(command.key)?
            .ok_or(EngineError::MissingLifecycleState(command.key))?;
        let intent = map_lifecycle_state_to_intent(lifecycle_state)?;
        let processor = self.command_processors.get(intent)?;

        let element_instance_key = command.value.element_instance_key;
        let element_instance = self
            .state
            .get_instance(element_instance_key)?
            .ok_or(EngineError::MissingElementInstance(element_instance_key))?;

        let event_type = map_lifecycle_state_to_event_type(lifecycle_state)?;
        let element = self.user_task_element(&command.value)?;
        let next_index = element_instance.task_listener_index(event_type);

        let next = element.task_listeners(event_type).nth(next_index);
        match next {
            Some(next) => {
                self.listener_behavior
                    .create_task_listener_job(next, &command.value, writers)
            }
            None => {
                tracing::debug!(
                    user_task_key = command.key,
                    %intent,
                    "task listener chain exhausted, finalizing"
                );
                processor.on_finalize_command(command, &command.value, writers)
            }
        }
    }

    fn user_task_element(&self, record: &UserTaskRecord) -> Result<ExecutableUserTask> {
        self.state
            .get_user_task_element(
                record.process_definition_key,
                &record.tenant_id,
                &record.element_id,
            )?
            .ok_or_else(|| {
                EngineError::MissingUserTaskElement {
                    process_definition_key: record.process_definition_key,
                    element_id: record.element_id.clone(),
                }
                .into()
            })
    }
}

/// Client-issued operations are authorized against the task's process.
impl Authorizable<UserTaskRecord> for UserTaskProcessor {
    type Resource = UserTaskRecord;

    fn get_authorization_request(
        &self,
        command: &TypedRecord<UserTaskRecord>,
    ) -> Result<Checked<AuthorizationRequest<UserTaskRecord>>> {
        let Some(persisted) = self.state.get_user_task(command.key)? else {
            let action = if command.value.action.is_empty() {
                command.intent.as_str().to_lowercase()
            } else {
                command.value.action.clone()
            };
            return Ok(Err(Rejection::new(
                RejectionType::NotFound,
                format!(
                    "Expected to {action} user task with key '{}', but no such user task was found",
                    command.key
                ),
            )));
        };

        let bpmn_process_id = persisted.bpmn_process_id.clone();
        Ok(Ok(AuthorizationRequest::new(
            ResourceType::ProcessDefinition,
            PermissionType::UpdateUserTask,
        )
        .with_resource(persisted)
        .add_resource_id(bpmn_process_id)))
    }

    fn process_record(
        &self,
        command: &TypedRecord<UserTaskRecord>,
        _persisted: UserTaskRecord,
        writers: &mut Writers,
    ) -> Result<()> {
        // The processor re-reads the task in `check`; the resolved record only fed authorization.
        self.process_operation_command(command, writers)
    }
}

/// Unwrapped entry point; the engine registers it for COMPLETE_TASK_LISTENER.
impl TypedRecordProcessor<UserTaskRecord> for UserTaskProcessor {
    fn process_record(
        &self,
        command: &TypedRecord<UserTaskRecord>,
        writers: &mut Writers,
    ) -> Result<()> {
        if command.intent == UserTaskIntent::CompleteTaskListener {
            self.process_complete_task_listener(command, writers)
        } else {
            self.process_operation_command(command, writers)
        }
    }
}

fn map_intent_to_event_type(intent: UserTaskIntent) -> Result<TaskListenerEventType> {
    match intent {
        UserTaskIntent::Assign | UserTaskIntent::Claim => Ok(TaskListenerEventType::Assignment),
        UserTaskIntent::Update => Ok(TaskListenerEventType::Update),
        UserTaskIntent::Complete => Ok(TaskListenerEventType::Complete),
        other => Err(EngineError::UnexpectedIntent(other).into()),
    }
}

fn map_lifecycle_state_to_event_type(state: LifecycleState) -> Result<TaskListenerEventType> {
    match state {
        LifecycleState::Creating => Ok(TaskListenerEventType::Create),
        LifecycleState::Assigning => Ok(TaskListenerEventType::Assignment),
        LifecycleState::Updating => Ok(TaskListenerEventType::Update),
        LifecycleState::Completing => Ok(TaskListenerEventType::Complete),
        LifecycleState::Canceling => Ok(TaskListenerEventType::Cancel),
        other => Err(EngineError::UnexpectedLifecycleState(other).into()),
    }
}

/// The operation a transition in flight will resume with.
pub fn map_lifecycle_state_to_intent(state: LifecycleState) -> Result<UserTaskIntent> {
    match state {
        LifecycleState::Assigning => Ok(UserTaskIntent::Assign),
        LifecycleState::Updating => Ok(UserTaskIntent::Update),
        LifecycleState::Completing => Ok(UserTaskIntent::Complete),
        LifecycleState::Creating | LifecycleState::Canceling => {
            Err(EngineError::UnsupportedLifecycleConversion(state).into())
        }
        other => Err(EngineError::UnexpectedLifecycleState(other).into()),
    }
}
