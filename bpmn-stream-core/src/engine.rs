//! The engine: processor registry plus the per-command transaction.

use crate::appliers::EventAppliers;
use crate::authorization::AuthorizationCheckBehavior;
use crate::cancel::ProcessInstanceCancelProcessor;
use crate::config::EngineConfig;
use crate::error::ProcessingError;
use crate::job::JobCompleteProcessor;
use crate::processor::{AuthorizableProcessor, RecordProcessors};
use crate::state::*;
use crate::timer::TimerTriggerProcessor;
use crate::types::*;
use crate::usertask::{TaskListenerBehavior, UserTaskCommandProcessors, UserTaskProcessor};
use crate::writers::{ProcessingResult, Writers};
use anyhow::{anyhow, Result};
use std::sync::Arc;

pub struct Engine {
    state: SharedState,
    config: EngineConfig,
    processors: RecordProcessors,
    appliers: Arc<EventAppliers>,
    writers: Writers,
}

impl Engine {
    /// Builds every processor. Fails if a registry is incomplete.
    pub fn new(state: SharedState, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let appliers = Arc::new(EventAppliers::new(state.clone()));
        let authorization = || AuthorizationCheckBehavior::new(state.clone(), &config);

        let user_tasks = Arc::new(UserTaskProcessor::new(
            state.clone(),
            UserTaskCommandProcessors::new(state.clone())?,
            TaskListenerBehavior::new(state.clone(), config.max_variable_scope_depth),
        ));

        let mut processors = RecordProcessors::new();
        processors
            .register::<ProcessInstanceRecord, _>(
                &[ProcessInstanceIntent::Cancel],
                AuthorizableProcessor::new(
                    authorization(),
                    Arc::new(ProcessInstanceCancelProcessor::new(
                        state.clone(),
                        config.max_root_lookup_depth,
                    )),
                ),
            )
            .register::<UserTaskRecord, _>(
                &[
                    UserTaskIntent::Assign,
                    UserTaskIntent::Claim,
                    UserTaskIntent::Update,
                    UserTaskIntent::Complete,
                ],
                AuthorizableProcessor::new(authorization(), user_tasks.clone()),
            )
            // Engine-internal: no client, nothing to authorize.
            .register::<UserTaskRecord, _>(&[UserTaskIntent::CompleteTaskListener], user_tasks)
            .register::<JobRecord, _>(
                &[JobIntent::Complete],
                JobCompleteProcessor::new(state.clone()),
            )
            .register::<TimerRecord, _>(
                &[TimerIntent::Trigger],
                TimerTriggerProcessor::new(state.clone()),
            );

        tracing::info!(
            partition_id = config.partition_id,
            intents = processors.intents().count(),
            authorization = config.enable_authorization,
            "engine ready"
        );

        Ok(Self {
            writers: Writers::new(appliers.clone()),
            state,
            config,
            processors,
            appliers,
        })
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handles(&self, intent: &Intent) -> bool {
        self.processors.handles(intent)
    }

    /// Replays one logged event into state.
    pub fn apply(&self, record: &Record) -> Result<()> {
        self.appliers.apply(record)
    }

    /// Processes one command atomically.
    ///
    /// Either every mutation and record of the command lands, or none does.
    /// Commands of banned process instances are skipped.
    pub fn process(&mut self, command: &Record) -> Result<ProcessingResult> {
        if !command.is_command() {
            return Err(anyhow!(
                "Expected a command, but got a {:?} with intent '{}'",
                command.record_type,
                command.intent
            ));
        }
        if self.state.is_banned(command)? {
            tracing::debug!(key = command.key, intent = %command.intent, "skipping command of banned instance");
            return Ok(ProcessingResult::default());
        }

        let processor = self.processors.get(&command.intent)?.clone();
        tracing::debug!(key = command.key, intent = %command.intent, "processing command");

        self.writers.reset();
        self.state.begin()?;
        let error = match processor.process(command, &mut self.writers) {
            Ok(()) => {
                self.state.commit()?;
                return Ok(self.writers.take_result());
            }
            Err(error) => error,
        };

        self.state.rollback()?;
        self.writers.reset();

        match processor.try_handle_error(command, &error) {
            ProcessingError::Expected(rejection) => {
                tracing::warn!(
                    key = command.key,
                    intent = %command.intent,
                    rejection_type = %rejection.rejection_type,
                    reason = %rejection.reason,
                    "command rejected after error"
                );
                self.writers.reject_record(command, &rejection);
                Ok(self.writers.take_result())
            }
            ProcessingError::Unexpected => self.on_processing_error(command, &error),
        }
    }

    /// PROCESSING_ERROR rejection plus an ERROR event that bans the instance.
    fn on_processing_error(&mut self, command: &Record, error: &anyhow::Error) -> Result<ProcessingResult> {
        tracing::error!(
            key = command.key,
            intent = %command.intent,
            error = %format!("{error:#}"),
            "unexpected error while processing command"
        );

        let reason = format!(
            "Expected to process record '{}' with key '{}' without errors, but exception occurred with message '{}'",
            command.intent, command.key, error
        );

        self.state.begin()?;
        match self.write_processing_error(command, reason, error) {
            Ok(()) => {
                self.state.commit()?;
                Ok(self.writers.take_result())
            }
            Err(e) => {
                self.state.rollback()?;
                self.writers.reset();
                Err(e.context("failed to write processing error"))
            }
        }
    }

    fn write_processing_error(
        &mut self,
        command: &Record,
        reason: String,
        error: &anyhow::Error,
    ) -> Result<()> {
        self.writers
            .reject_record(command, &Rejection::new(RejectionType::ProcessingError, reason));
        let error_key = self.state.next_key()?;
        self.writers.state().append_follow_up_event(
            error_key,
            ErrorIntent::Created,
            ErrorRecord {
                process_instance_key: command.process_instance_key(),
                exception_message: format!("{error:#}"),
            },
        )
    }
}
