use crate::processor::TypedRecordProcessor;
use crate::state::*;
use crate::types::*;
use crate::writers::Writers;
use anyhow::Result;

/// JOB COMPLETE. Task-listener jobs resume their user task via COMPLETE_TASK_LISTENER.
pub struct JobCompleteProcessor {
    state: SharedState,
}

impl JobCompleteProcessor {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl TypedRecordProcessor<JobRecord> for JobCompleteProcessor {
    fn process_record(&self, command: &TypedRecord<JobRecord>, writers: &mut Writers) -> Result<()> {
        let key = command.key;
        let Some(mut job) = self.state.get_job(key)? else {
            let rejection = Rejection::new(
                RejectionType::NotFound,
                format!("Expected to complete job with key '{key}', but no such job was found"),
            );
            writers.reject(command, &rejection);
            return Ok(());
        };

        job.variables.extend(command.value.variables.clone());
        writers
            .state()
            .append_follow_up_event(key, JobIntent::Completed, job.clone())?;
        writers
            .response()
            .write_event_on_command(key, JobIntent::Completed, job.clone(), command);

        if job.kind != JobKind::TaskListener {
            return Ok(());
        }
        let Some(user_task_key) = job.user_task_key else {
            return Ok(());
        };
        match self.state.get_intermediate_state(user_task_key)? {
            Some(pending) => writers.command().append_follow_up_command(
                user_task_key,
                UserTaskIntent::CompleteTaskListener,
                pending,
            ),
            None => tracing::warn!(
                job_key = key,
                user_task_key,
                "task listener job completed, but the user task has no transition in flight"
            ),
        }
        Ok(())
    }
}
