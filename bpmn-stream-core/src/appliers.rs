//! Event appliers: the only code that turns events into state.
//!
//! Processing and replay both go through [`EventAppliers::apply`], which is
//! what makes a replayed log rebuild the same state.

use crate::state::*;
use crate::types::*;
use anyhow::Result;

pub struct EventAppliers {
    state: SharedState,
}

impl EventAppliers {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Applies an event. Commands and rejections leave state untouched.
    pub fn apply(&self, record: &Record) -> Result<()> {
        if !record.is_event() {
            return Ok(());
        }
        self.state.advance_key(record.key)?;

        match (&record.intent, &record.value) {
            (Intent::ProcessInstance(intent), RecordPayload::ProcessInstance(value)) => {
                self.apply_process_instance(record.key, *intent, value)
            }
            (Intent::UserTask(intent), RecordPayload::UserTask(value)) => {
                self.apply_user_task(record, *intent, value)
            }
            (Intent::Timer(intent), RecordPayload::Timer(value)) => {
                self.apply_timer(record.key, *intent, value)
            }
            (Intent::Job(intent), RecordPayload::Job(value)) => {
                self.apply_job(record.key, *intent, value)
            }
            (Intent::Incident(IncidentIntent::Created), RecordPayload::Incident(value)) => {
                self.state.put_incident(record.key, value.clone())
            }
            (Intent::Error(ErrorIntent::Created), RecordPayload::Error(value)) => {
                if let Some(key) = value.process_instance_key {
                    tracing::info!(process_instance_key = key, "banning process instance");
                    self.state.ban_instance(key)?;
                }
                Ok(())
            }
            (intent, value) => Err(anyhow::anyhow!(
                "Event intent {:?} does not match value type {:?}",
                intent,
                value.value_type()
            )),
        }
    }

    fn apply_process_instance(
        &self,
        key: Key,
        intent: ProcessInstanceIntent,
        value: &ProcessInstanceRecord,
    ) -> Result<()> {
        use ProcessInstanceIntent::*;
        match intent {
            ElementActivating => self
                .state
                .put_instance(ElementInstance::new(key, intent, value.clone())),
            ElementActivated | ElementCompleting | ElementTerminating => {
                self.state.update_instance_state(key, intent)
            }
            ElementCompleted | ElementTerminated => self.state.remove_instance(key),
            Cancel | TerminateElement | CompleteElement => Ok(()),
        }
    }

    fn apply_user_task(
        &self,
        record: &Record,
        intent: UserTaskIntent,
        value: &UserTaskRecord,
    ) -> Result<()> {
        use UserTaskIntent::*;
        let key = record.key;
        match intent {
            Creating => self
                .state
                .create_user_task(value.clone(), LifecycleState::Creating),
            Created => {
                self.state.update_user_task(value.clone())?;
                self.state.update_lifecycle_state(key, LifecycleState::Created)
            }
            Assigning => self.begin_transition(record, value, LifecycleState::Assigning),
            Updating => self.begin_transition(record, value, LifecycleState::Updating),
            Completing => self.begin_transition(record, value, LifecycleState::Completing),
            Canceling => self.begin_transition(record, value, LifecycleState::Canceling),
            Assigned | Updated => {
                self.state.update_user_task(value.clone())?;
                let resting = if value.assignee.is_empty() {
                    LifecycleState::Created
                } else {
                    LifecycleState::Assigned
                };
                self.state.update_lifecycle_state(key, resting)?;
                self.end_transition(key, value.element_instance_key)
            }
            Completed | Canceled => {
                self.end_transition(key, value.element_instance_key)?;
                self.state.delete_user_task(key)
            }
            Assign | Claim | Update | Complete | CompleteTaskListener => Ok(()),
        }
    }

    /// Enters an "-ing" state. A request carried on the event is kept until
    /// the committing event answers it.
    fn begin_transition(
        &self,
        record: &Record,
        value: &UserTaskRecord,
        state: LifecycleState,
    ) -> Result<()> {
        let key = record.key;
        self.state.store_intermediate_state(value.clone())?;
        self.state.update_lifecycle_state(key, state)?;
        match (record.intent, record.request_id, record.request_stream_id) {
            (Intent::UserTask(intent), Some(request_id), Some(request_stream_id)) => {
                self.state.store_request_metadata(
                    key,
                    RequestMetadata {
                        intent,
                        request_id,
                        request_stream_id,
                    },
                )
            }
            _ => Ok(()),
        }
    }

    fn end_transition(&self, key: Key, element_instance_key: Key) -> Result<()> {
        self.state.delete_intermediate_state(key)?;
        self.state.delete_request_metadata(key)?;
        self.state.reset_task_listener_indices(element_instance_key)
    }

    fn apply_timer(&self, key: Key, intent: TimerIntent, value: &TimerRecord) -> Result<()> {
        match intent {
            TimerIntent::Created => self.state.put_timer(TimerInstance::from_record(key, value)),
            TimerIntent::Triggered | TimerIntent::Canceled => self.state.remove_timer(key),
            TimerIntent::Trigger => Ok(()),
        }
    }

    fn apply_job(&self, key: Key, intent: JobIntent, value: &JobRecord) -> Result<()> {
        match intent {
            JobIntent::Created => self.state.put_job(key, value.clone()),
            JobIntent::Completed => {
                self.state.remove_job(key)?;
                if let (JobKind::TaskListener, Some(event_type)) =
                    (value.kind, value.listener_event_type)
                {
                    self.state
                        .increment_task_listener_index(value.element_instance_key, event_type)?;
                }
                Ok(())
            }
            JobIntent::Complete => Ok(()),
        }
    }
}
