use super::assign::UserTaskAssignProcessor;
use super::claim::UserTaskClaimProcessor;
use super::complete::UserTaskCompleteProcessor;
use super::update::UserTaskUpdateProcessor;
use crate::error::EngineError;
use crate::state::SharedState;
use crate::types::*;
use crate::writers::Writers;
use anyhow::Result;
use std::collections::BTreeMap;

/// One user task operation (assign, claim, update, complete).
pub trait UserTaskCommandProcessor: Send + Sync {
    /// Validates the command against the persisted task. No mutation.
    fn check(&self, command: &TypedRecord<UserTaskRecord>) -> Result<Checked<UserTaskRecord>>;

    /// Starts the transition and returns the record it is waiting to commit.
    fn on_command(
        &self,
        command: &TypedRecord<UserTaskRecord>,
        persisted: UserTaskRecord,
        writers: &mut Writers,
    ) -> Result<UserTaskRecord>;

    /// Commits the transition once every listener has run.
    fn on_finalize_command(
        &self,
        command: &TypedRecord<UserTaskRecord>,
        pending: &UserTaskRecord,
        writers: &mut Writers,
    ) -> Result<()>;
}

/// Command intent → processor. Complete at construction or not built at all.
pub struct UserTaskCommandProcessors {
    processors: BTreeMap<UserTaskIntent, Box<dyn UserTaskCommandProcessor>>,
}

impl UserTaskCommandProcessors {
    pub fn new(state: SharedState) -> Result<Self> {
        let mut processors: BTreeMap<UserTaskIntent, Box<dyn UserTaskCommandProcessor>> =
            BTreeMap::new();
        processors.insert(
            UserTaskIntent::Assign,
            Box::new(UserTaskAssignProcessor::new(state.clone())),
        );
        processors.insert(
            UserTaskIntent::Claim,
            Box::new(UserTaskClaimProcessor::new(state.clone())),
        );
        processors.insert(
            UserTaskIntent::Update,
            Box::new(UserTaskUpdateProcessor::new(state.clone())),
        );
        processors.insert(
            UserTaskIntent::Complete,
            Box::new(UserTaskCompleteProcessor::new(state)),
        );
        Self::from_processors(processors)
    }

    /// Fails unless every command intent except COMPLETE_TASK_LISTENER has a processor.
    pub fn from_processors(
        processors: BTreeMap<UserTaskIntent, Box<dyn UserTaskCommandProcessor>>,
    ) -> Result<Self> {
        let missing: Vec<UserTaskIntent> = UserTaskIntent::commands()
            .into_iter()
            // Listener completion is handled by the lifecycle dispatcher itself.
            .filter(|intent| *intent != UserTaskIntent::CompleteTaskListener)
            .filter(|intent| !processors.contains_key(intent))
            .collect();

        if !missing.is_empty() {
            return Err(EngineError::MissingProcessors(missing).into());
        }
        Ok(Self { processors })
    }

    pub fn get(&self, intent: UserTaskIntent) -> Result<&dyn UserTaskCommandProcessor> {
        if intent.is_event() {
            return Err(EngineError::NotACommand(intent).into());
        }
        self.processors
            .get(&intent)
            .map(|p| p.as_ref())
            .ok_or_else(|| EngineError::NoProcessor(intent).into())
    }
}
