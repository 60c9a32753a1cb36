use crate::state::*;
use crate::types::*;
use crate::writers::Writers;
use anyhow::Result;
use serde_json::Value;

/// Creates the job for one task listener, or an incident if its job-worker
/// properties cannot be evaluated.
pub struct TaskListenerBehavior {
    state: SharedState,
    max_scope_depth: usize,
}

/// Evaluated job-worker properties.
#[derive(Debug, PartialEq)]
struct ListenerJobProperties {
    job_type: String,
    retries: i32,
}

impl TaskListenerBehavior {
    pub fn new(state: SharedState, max_scope_depth: usize) -> Self {
        Self {
            state,
            max_scope_depth,
        }
    }

    pub fn create_task_listener_job(
        &self,
        listener: &TaskListener,
        record: &UserTaskRecord,
        writers: &mut Writers,
    ) -> Result<()> {
        match self.evaluate_job_expressions(listener, record.element_instance_key)? {
            Ok(properties) => {
                let job_key = self.state.next_key()?;
                tracing::debug!(
                    job_key,
                    user_task_key = record.user_task_key,
                    job_type = %properties.job_type,
                    event_type = %listener.event_type,
                    "creating task listener job"
                );
                let job = JobRecord {
                    job_type: properties.job_type,
                    retries: properties.retries,
                    kind: JobKind::TaskListener,
                    listener_event_type: Some(listener.event_type),
                    user_task_key: Some(record.user_task_key),
                    element_id: record.element_id.clone(),
                    element_instance_key: record.element_instance_key,
                    process_instance_key: record.process_instance_key,
                    process_definition_key: record.process_definition_key,
                    bpmn_process_id: record.bpmn_process_id.clone(),
                    tenant_id: record.tenant_id.clone(),
                    variables: record.variables.clone(),
                };
                writers
                    .state()
                    .append_follow_up_event(job_key, JobIntent::Created, job)
            }
            Err(message) => {
                let incident_key = self.state.next_key()?;
                tracing::info!(
                    incident_key,
                    user_task_key = record.user_task_key,
                    %message,
                    "task listener expression failed, raising incident"
                );
                let incident = IncidentRecord {
                    error_type: ErrorType::ExtractValueError,
                    error_message: message,
                    bpmn_process_id: record.bpmn_process_id.clone(),
                    process_definition_key: record.process_definition_key,
                    process_instance_key: record.process_instance_key,
                    element_id: record.element_id.clone(),
                    element_instance_key: record.element_instance_key,
                    job_key: None,
                    tenant_id: record.tenant_id.clone(),
                };
                writers
                    .state()
                    .append_follow_up_event(incident_key, IncidentIntent::Created, incident)
            }
        }
    }

    fn evaluate_job_expressions(
        &self,
        listener: &TaskListener,
        scope_key: Key,
    ) -> Result<std::result::Result<ListenerJobProperties, String>> {
        let job_type = match self.evaluate(&listener.job_type, scope_key)? {
            Ok(Value::String(s)) if !s.is_empty() => s,
            Ok(other) => {
                return Ok(Err(format!(
                    "Expected result of the expression '{}' to be 'STRING', but was '{}'.",
                    String::from(listener.job_type.clone()),
                    type_name(&other)
                )))
            }
            Err(message) => return Ok(Err(message)),
        };

        let retries = match self.evaluate(&listener.retries, scope_key)? {
            Ok(value) => match as_retries(&value) {
                Some(retries) => retries,
                None => {
                    return Ok(Err(format!(
                        "Expected result of the expression '{}' to be 'NUMBER', but was '{}'.",
                        String::from(listener.retries.clone()),
                        type_name(&value)
                    )))
                }
            },
            Err(message) => return Ok(Err(message)),
        };

        Ok(Ok(ListenerJobProperties { job_type, retries }))
    }

    /// Literal, or a variable looked up from `scope_key` outward.
    fn evaluate(
        &self,
        expression: &Expression,
        scope_key: Key,
    ) -> Result<std::result::Result<Value, String>> {
        let name = match expression {
            Expression::Static(literal) => return Ok(Ok(Value::String(literal.clone()))),
            Expression::Variable(name) => name,
        };

        let mut scope = Some(scope_key);
        let mut depth = 0;
        while let Some(key) = scope {
            if depth > self.max_scope_depth {
                break;
            }
            if let Some(value) = self.state.get_variable(key, name)? {
                return Ok(Ok(value));
            }
            scope = self.state.get_instance(key)?.and_then(|i| i.parent_key);
            depth += 1;
        }

        Ok(Err(format!(
            "Failed to evaluate expression '{name}': no variable found with name '{name}'"
        )))
    }
}

/// Literals arrive as strings, so numeric strings count as numbers.
fn as_retries(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NULL",
        Value::Bool(_) => "BOOLEAN",
        Value::Number(_) => "NUMBER",
        Value::String(_) => "STRING",
        Value::Array(_) => "ARRAY",
        Value::Object(_) => "CONTEXT",
    }
}
