use crate::types::{Intent, Key, LifecycleState, Rejection, UserTaskIntent};
use thiserror::Error;

/// Defects in engine wiring or in the persisted state. Never a client error.
///
/// These travel inside `anyhow::Error`; callers that need to tell them apart
/// use `downcast_ref::<EngineError>()`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No processors defined for the following UserTask commands: {}", format_intents(.0))]
    MissingProcessors(Vec<UserTaskIntent>),

    #[error("Expected a command, but received an event: '{0}'. Valid UserTask commands are: {commands}", commands = format_intents(&UserTaskIntent::commands()))]
    NotACommand(UserTaskIntent),

    #[error("No processor found for the '{0}' UserTask command")]
    NoProcessor(UserTaskIntent),

    #[error("Conversion from '{0}' user task lifecycle state to a user task command is not yet supported")]
    UnsupportedLifecycleConversion(LifecycleState),

    #[error("Unexpected user task lifecycle state: '{0}'")]
    UnexpectedLifecycleState(LifecycleState),

    #[error("Unexpected user task intent: '{0}'")]
    UnexpectedIntent(UserTaskIntent),

    #[error("Expected user task with key '{0}' to have a lifecycle state, but none was found")]
    MissingLifecycleState(Key),

    #[error("Expected to find the root of process instance '{key}' within {max_depth} parent links, but the chain is longer or cyclic")]
    RootLookupExceeded { key: Key, max_depth: usize },

    #[error("No record processor registered for intent '{0}'")]
    NoRecordProcessor(Intent),

    #[error("Expected the authorization request for '{0}' to carry a resolved resource")]
    MissingResource(Intent),

    #[error("Expected to find user task element '{element_id}' in process definition '{process_definition_key}', but it was not deployed")]
    MissingUserTaskElement {
        process_definition_key: Key,
        element_id: String,
    },

    #[error("Expected element instance '{0}' to exist")]
    MissingElementInstance(Key),
}

fn format_intents(intents: &[UserTaskIntent]) -> String {
    let names: Vec<&str> = intents.iter().map(|i| i.as_str()).collect();
    format!("[{}]", names.join(", "))
}

/// How a processor classifies an error raised while processing a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessingError {
    /// Client-caused; the rejection is written and the instance keeps running.
    Expected(Rejection),
    /// Anything else; the engine writes a processing-error rejection and bans the instance.
    Unexpected,
}
