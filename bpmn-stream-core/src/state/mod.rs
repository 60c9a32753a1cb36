//! State-store contracts consumed by the processors.
//!
//! Read traits are used by every processor; the `Mutable*` counterparts are
//! only called by event appliers and by the processor that owns the entity.
//! All stores are single-writer: the stream processor applies one command at
//! a time, so no method needs to be atomic across calls beyond the
//! transaction boundary in [`TransactionContext`].

mod memory;

pub use memory::MemoryState;

use crate::authorization::{PermissionType, ResourceType};
use crate::types::*;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Handle the processors share. Single writer: only the stream processor mutates it.
pub type SharedState = Arc<dyn MutableProcessingState>;

// ── Entities ──

/// A running BPMN element (process, sub-process, user task, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementInstance {
    pub key: Key,
    /// Last lifecycle event applied to the element.
    pub state: ProcessInstanceIntent,
    pub value: ProcessInstanceRecord,
    /// Enclosing element instance. `None` for a process instance.
    pub parent_key: Option<Key>,
    /// Next listener to run, per event type.
    #[serde(default)]
    pub task_listener_indices: BTreeMap<TaskListenerEventType, usize>,
}

impl ElementInstance {
    pub fn new(key: Key, state: ProcessInstanceIntent, value: ProcessInstanceRecord) -> Self {
        Self {
            key,
            state,
            parent_key: value.flow_scope_key.filter(|k| *k > 0),
            value,
            task_listener_indices: BTreeMap::new(),
        }
    }

    pub fn can_terminate(&self) -> bool {
        matches!(
            self.state,
            ProcessInstanceIntent::ElementActivating
                | ProcessInstanceIntent::ElementActivated
                | ProcessInstanceIntent::ElementCompleting
        )
    }

    pub fn task_listener_index(&self, event_type: TaskListenerEventType) -> usize {
        self.task_listener_indices
            .get(&event_type)
            .copied()
            .unwrap_or(0)
    }
}

/// Request correlation kept while a user task transition waits on listeners.
/// Rebuilt from the "-ing" event that carried it, so it survives recovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// The "-ing" event that started the transition.
    pub intent: UserTaskIntent,
    pub request_id: i64,
    pub request_stream_id: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimerInstance {
    pub key: Key,
    pub due_date: Timestamp,
    pub element_instance_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub tenant_id: String,
    pub repetitions: i32,
    pub handler_node_id: String,
}

impl TimerInstance {
    pub fn from_record(key: Key, record: &TimerRecord) -> Self {
        Self {
            key,
            due_date: record.due_date,
            element_instance_key: record.element_instance_key,
            process_instance_key: record.process_instance_key,
            process_definition_key: record.process_definition_key,
            tenant_id: record.tenant_id.clone(),
            repetitions: record.repetitions,
            handler_node_id: record.target_element_id.clone(),
        }
    }

    pub fn to_record(&self) -> TimerRecord {
        TimerRecord {
            element_instance_key: self.element_instance_key,
            process_instance_key: self.process_instance_key,
            process_definition_key: self.process_definition_key,
            due_date: self.due_date,
            target_element_id: self.handler_node_id.clone(),
            repetitions: self.repetitions,
            tenant_id: self.tenant_id.clone(),
        }
    }
}

/// A job-worker property: either a literal or an `=name` variable reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Expression {
    Static(String),
    Variable(String),
}

impl From<String> for Expression {
    fn from(raw: String) -> Self {
        match raw.strip_prefix('=') {
            Some(name) => Expression::Variable(name.trim().to_string()),
            None => Expression::Static(raw),
        }
    }
}

impl From<Expression> for String {
    fn from(expr: Expression) -> Self {
        match expr {
            Expression::Static(s) => s,
            Expression::Variable(name) => format!("={name}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskListener {
    pub event_type: TaskListenerEventType,
    pub job_type: Expression,
    pub retries: Expression,
}

/// Deployed user task element with its listener chains.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutableUserTask {
    pub element_id: String,
    /// In configured order; the order within one event type is the run order.
    #[serde(default)]
    pub task_listeners: Vec<TaskListener>,
}

impl ExecutableUserTask {
    pub fn task_listeners(
        &self,
        event_type: TaskListenerEventType,
    ) -> impl Iterator<Item = &TaskListener> {
        self.task_listeners
            .iter()
            .filter(move |l| l.event_type == event_type)
    }

    pub fn has_task_listeners(&self, event_type: TaskListenerEventType) -> bool {
        self.task_listeners(event_type).next().is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeployedProcess {
    pub key: Key,
    pub bpmn_process_id: String,
    #[serde(default = "default_version")]
    pub version: i32,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    #[serde(default)]
    pub user_tasks: BTreeMap<String, ExecutableUserTask>,
}

fn default_version() -> i32 {
    1
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserType {
    /// Built-in identity holding every permission.
    Default,
    Regular,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedUser {
    pub key: Key,
    pub username: String,
    pub user_type: UserType,
}

/// Granted resource ids: owner → resource type → permission → ids.
pub type Grants = BTreeMap<ResourceType, BTreeMap<PermissionType, BTreeSet<String>>>;

// ── Read contracts ──

pub trait ElementInstanceState: Send + Sync {
    fn get_instance(&self, key: Key) -> Result<Option<ElementInstance>>;
}

pub trait UserTaskState: Send + Sync {
    fn get_lifecycle_state(&self, key: Key) -> Result<Option<LifecycleState>>;
    fn get_user_task(&self, key: Key) -> Result<Option<UserTaskRecord>>;
    /// Record held while a transition is in flight.
    fn get_intermediate_state(&self, key: Key) -> Result<Option<UserTaskRecord>>;
    fn find_request_metadata(&self, key: Key) -> Result<Option<RequestMetadata>>;
}

/// Visits due timers in ascending `(due_date, key)` order.
/// Returning `false` stops the scan at this timer.
pub trait TimerVisitor {
    fn visit(&mut self, timer: &TimerInstance) -> Result<bool>;
}

pub trait TimerInstanceState: Send + Sync {
    fn get_timer(&self, key: Key) -> Result<Option<TimerInstance>>;

    /// Visits timers due at or before `timestamp`, strictly after `after` when
    /// given. Returns the due date the scan stopped at: the first timer left
    /// unvisited or refused by the visitor, or `None` if nothing remains.
    fn process_timers_due_after(
        &self,
        after: Option<(Timestamp, Key)>,
        timestamp: Timestamp,
        visitor: &mut dyn TimerVisitor,
    ) -> Result<Option<Timestamp>>;

    fn process_timers_with_due_date_before(
        &self,
        timestamp: Timestamp,
        visitor: &mut dyn TimerVisitor,
    ) -> Result<Option<Timestamp>> {
        self.process_timers_due_after(None, timestamp, visitor)
    }

    /// Earliest due date across all timers.
    fn next_due_date(&self) -> Result<Option<Timestamp>>;
}

pub trait AuthorizationState: Send + Sync {
    fn get_resource_identifiers(
        &self,
        owner_key: Key,
        resource_type: ResourceType,
        permission_type: PermissionType,
    ) -> Result<BTreeSet<String>>;
}

pub trait UserState: Send + Sync {
    fn get_user(&self, key: Key) -> Result<Option<PersistedUser>>;
}

pub trait BannedInstanceState: Send + Sync {
    fn is_banned_instance(&self, process_instance_key: Key) -> Result<bool>;

    /// True if the record belongs to a banned process instance.
    fn is_banned(&self, record: &Record) -> Result<bool> {
        match record.process_instance_key() {
            Some(key) => self.is_banned_instance(key),
            None => Ok(false),
        }
    }
}

pub trait ProcessState: Send + Sync {
    fn get_process(&self, process_definition_key: Key) -> Result<Option<DeployedProcess>>;

    fn get_user_task_element(
        &self,
        process_definition_key: Key,
        tenant_id: &str,
        element_id: &str,
    ) -> Result<Option<ExecutableUserTask>> {
        Ok(self
            .get_process(process_definition_key)?
            .filter(|p| p.tenant_id == tenant_id)
            .and_then(|p| p.user_tasks.get(element_id).cloned()))
    }
}

pub trait VariableState: Send + Sync {
    fn get_variable(&self, scope_key: Key, name: &str) -> Result<Option<serde_json::Value>>;
}

pub trait JobState: Send + Sync {
    fn get_job(&self, key: Key) -> Result<Option<JobRecord>>;
}

pub trait IncidentState: Send + Sync {
    fn get_incident(&self, key: Key) -> Result<Option<IncidentRecord>>;
    fn incidents_for_element(&self, element_instance_key: Key) -> Result<Vec<Key>>;
}

// ── Write contracts ──

pub trait MutableElementInstanceState: ElementInstanceState {
    fn put_instance(&self, instance: ElementInstance) -> Result<()>;
    fn update_instance_state(&self, key: Key, state: ProcessInstanceIntent) -> Result<()>;
    fn remove_instance(&self, key: Key) -> Result<()>;
    fn increment_task_listener_index(
        &self,
        key: Key,
        event_type: TaskListenerEventType,
    ) -> Result<()>;
    fn reset_task_listener_indices(&self, key: Key) -> Result<()>;
}

pub trait MutableUserTaskState: UserTaskState {
    fn create_user_task(&self, record: UserTaskRecord, state: LifecycleState) -> Result<()>;
    fn update_user_task(&self, record: UserTaskRecord) -> Result<()>;
    fn update_lifecycle_state(&self, key: Key, state: LifecycleState) -> Result<()>;
    fn store_intermediate_state(&self, record: UserTaskRecord) -> Result<()>;
    fn delete_intermediate_state(&self, key: Key) -> Result<()>;
    fn delete_user_task(&self, key: Key) -> Result<()>;
    fn store_request_metadata(&self, key: Key, metadata: RequestMetadata) -> Result<()>;
    fn delete_request_metadata(&self, key: Key) -> Result<()>;
}

pub trait MutableTimerInstanceState: TimerInstanceState {
    fn put_timer(&self, timer: TimerInstance) -> Result<()>;
    fn remove_timer(&self, key: Key) -> Result<()>;
}

pub trait MutableAuthorizationState: AuthorizationState {
    fn grant(
        &self,
        owner_key: Key,
        resource_type: ResourceType,
        permission_type: PermissionType,
        resource_ids: &[String],
    ) -> Result<()>;
}

pub trait MutableUserState: UserState {
    fn put_user(&self, user: PersistedUser) -> Result<()>;
}

pub trait MutableBannedInstanceState: BannedInstanceState {
    fn ban_instance(&self, process_instance_key: Key) -> Result<()>;
}

pub trait MutableProcessState: ProcessState {
    fn put_process(&self, process: DeployedProcess) -> Result<()>;
}

pub trait MutableVariableState: VariableState {
    fn set_variable(&self, scope_key: Key, name: &str, value: serde_json::Value) -> Result<()>;
}

pub trait MutableJobState: JobState {
    fn put_job(&self, key: Key, job: JobRecord) -> Result<()>;
    fn remove_job(&self, key: Key) -> Result<()>;
}

pub trait MutableIncidentState: IncidentState {
    fn put_incident(&self, key: Key, incident: IncidentRecord) -> Result<()>;
}

pub trait KeyGenerator: Send + Sync {
    fn next_key(&self) -> Result<Key>;
    /// Moves the counter up to a key this partition already handed out, so
    /// keys generated after replay never repeat one from the log. Keys of
    /// other partitions and keys below the counter are ignored.
    fn advance_key(&self, key: Key) -> Result<()>;
}

/// All-or-nothing boundary around one command.
pub trait TransactionContext: Send + Sync {
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    /// Discards every mutation since `begin`.
    fn rollback(&self) -> Result<()>;
}

/// Everything a processor may read.
pub trait ProcessingState:
    ElementInstanceState
    + UserTaskState
    + TimerInstanceState
    + AuthorizationState
    + UserState
    + BannedInstanceState
    + ProcessState
    + VariableState
    + JobState
    + IncidentState
{
}

/// Everything the engine may mutate.
pub trait MutableProcessingState:
    ProcessingState
    + MutableElementInstanceState
    + MutableUserTaskState
    + MutableTimerInstanceState
    + MutableAuthorizationState
    + MutableUserState
    + MutableBannedInstanceState
    + MutableProcessState
    + MutableVariableState
    + MutableJobState
    + MutableIncidentState
    + KeyGenerator
    + TransactionContext
{
}
