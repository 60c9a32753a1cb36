use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ─── Scalar aliases ───────────────────────────────────────────

/// Entity key. Unique per partition.
pub type Key = i64;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

/// Variable document: name → JSON value. Ordered so serialization is stable.
pub type Variables = BTreeMap<String, serde_json::Value>;

/// Authorization metadata attached to a command by the gateway.
pub type Authorizations = BTreeMap<String, serde_json::Value>;

pub const DEFAULT_TENANT: &str = "<default>";

/// Authorizations map entry holding the acting identity's key.
pub const AUTHORIZED_USER_KEY: &str = "authorized_user_key";

/// Authorizations map entry holding the tenant ids the caller may access.
pub const AUTHORIZED_TENANTS: &str = "authorized_tenants";

// ─── Keys ─────────────────────────────────────────────────────

/// Number of low bits reserved for the per-partition counter.
pub const PARTITION_BIT_OFFSET: u32 = 51;

pub fn encode_partition_id(partition_id: i32, counter: i64) -> Key {
    ((partition_id as i64) << PARTITION_BIT_OFFSET) + counter
}

pub fn decode_partition_id(key: Key) -> i32 {
    (key >> PARTITION_BIT_OFFSET) as i32
}

// ─── Record kinds ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Command,
    Event,
    CommandRejection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    ProcessInstance,
    UserTask,
    Timer,
    Job,
    Incident,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionType {
    NotFound,
    InvalidState,
    Unauthorized,
    InvalidArgument,
    AlreadyExists,
    ProcessingError,
}

impl RejectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidState => "INVALID_STATE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::ProcessingError => "PROCESSING_ERROR",
        }
    }
}

impl fmt::Display for RejectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, reasoned refusal to apply a command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub rejection_type: RejectionType,
    pub reason: String,
}

impl Rejection {
    pub fn new(rejection_type: RejectionType, reason: impl Into<String>) -> Self {
        Self {
            rejection_type,
            reason: reason.into(),
        }
    }
}

/// Outcome of a validation step: either the validated value or a rejection.
pub type Checked<T> = std::result::Result<T, Rejection>;

// ─── Intents ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessInstanceIntent {
    Cancel,
    TerminateElement,
    CompleteElement,
    ElementActivating,
    ElementActivated,
    ElementCompleting,
    ElementCompleted,
    ElementTerminating,
    ElementTerminated,
}

impl ProcessInstanceIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancel => "CANCEL",
            Self::TerminateElement => "TERMINATE_ELEMENT",
            Self::CompleteElement => "COMPLETE_ELEMENT",
            Self::ElementActivating => "ELEMENT_ACTIVATING",
            Self::ElementActivated => "ELEMENT_ACTIVATED",
            Self::ElementCompleting => "ELEMENT_COMPLETING",
            Self::ElementCompleted => "ELEMENT_COMPLETED",
            Self::ElementTerminating => "ELEMENT_TERMINATING",
            Self::ElementTerminated => "ELEMENT_TERMINATED",
        }
    }

    pub fn is_event(&self) -> bool {
        !matches!(
            self,
            Self::Cancel | Self::TerminateElement | Self::CompleteElement
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserTaskIntent {
    Creating,
    Created,
    Assign,
    Assigning,
    Assigned,
    Claim,
    Update,
    Updating,
    Updated,
    Complete,
    Completing,
    Completed,
    Canceling,
    Canceled,
    /// Internal: a task listener job finished, resume the pending transition.
    CompleteTaskListener,
}

impl UserTaskIntent {
    pub const ALL: [UserTaskIntent; 15] = [
        Self::Creating,
        Self::Created,
        Self::Assign,
        Self::Assigning,
        Self::Assigned,
        Self::Claim,
        Self::Update,
        Self::Updating,
        Self::Updated,
        Self::Complete,
        Self::Completing,
        Self::Completed,
        Self::Canceling,
        Self::Canceled,
        Self::CompleteTaskListener,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Created => "CREATED",
            Self::Assign => "ASSIGN",
            Self::Assigning => "ASSIGNING",
            Self::Assigned => "ASSIGNED",
            Self::Claim => "CLAIM",
            Self::Update => "UPDATE",
            Self::Updating => "UPDATING",
            Self::Updated => "UPDATED",
            Self::Complete => "COMPLETE",
            Self::Completing => "COMPLETING",
            Self::Completed => "COMPLETED",
            Self::Canceling => "CANCELING",
            Self::Canceled => "CANCELED",
            Self::CompleteTaskListener => "COMPLETE_TASK_LISTENER",
        }
    }

    pub fn is_event(&self) -> bool {
        !matches!(
            self,
            Self::Assign | Self::Claim | Self::Update | Self::Complete | Self::CompleteTaskListener
        )
    }

    /// Every command intent, in declaration order.
    pub fn commands() -> Vec<UserTaskIntent> {
        Self::ALL.into_iter().filter(|i| !i.is_event()).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerIntent {
    Created,
    Trigger,
    Triggered,
    Canceled,
}

impl TimerIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Trigger => "TRIGGER",
            Self::Triggered => "TRIGGERED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn is_event(&self) -> bool {
        !matches!(self, Self::Trigger)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobIntent {
    Created,
    Complete,
    Completed,
}

impl JobIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Complete => "COMPLETE",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn is_event(&self) -> bool {
        !matches!(self, Self::Complete)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentIntent {
    Created,
}

impl IncidentIntent {
    pub fn as_str(&self) -> &'static str {
        "CREATED"
    }

    pub fn is_event(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorIntent {
    Created,
}

impl ErrorIntent {
    pub fn as_str(&self) -> &'static str {
        "CREATED"
    }

    pub fn is_event(&self) -> bool {
        true
    }
}

/// Any intent, tagged by the value type it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    ProcessInstance(ProcessInstanceIntent),
    UserTask(UserTaskIntent),
    Timer(TimerIntent),
    Job(JobIntent),
    Incident(IncidentIntent),
    Error(ErrorIntent),
}

impl Intent {
    pub fn value_type(&self) -> ValueType {
        match self {
            Intent::ProcessInstance(_) => ValueType::ProcessInstance,
            Intent::UserTask(_) => ValueType::UserTask,
            Intent::Timer(_) => ValueType::Timer,
            Intent::Job(_) => ValueType::Job,
            Intent::Incident(_) => ValueType::Incident,
            Intent::Error(_) => ValueType::Error,
        }
    }

    pub fn is_event(&self) -> bool {
        match self {
            Intent::ProcessInstance(i) => i.is_event(),
            Intent::UserTask(i) => i.is_event(),
            Intent::Timer(i) => i.is_event(),
            Intent::Job(i) => i.is_event(),
            Intent::Incident(i) => i.is_event(),
            Intent::Error(i) => i.is_event(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::ProcessInstance(i) => i.as_str(),
            Intent::UserTask(i) => i.as_str(),
            Intent::Timer(i) => i.as_str(),
            Intent::Job(i) => i.as_str(),
            Intent::Incident(i) => i.as_str(),
            Intent::Error(i) => i.as_str(),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

display_as_str!(
    ProcessInstanceIntent,
    UserTaskIntent,
    TimerIntent,
    JobIntent,
    IncidentIntent,
    ErrorIntent,
    Intent,
);

// ─── Task listeners & lifecycle ───────────────────────────────

/// Point in a user task's lifecycle at which listeners run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskListenerEventType {
    Create,
    Assignment,
    Update,
    Complete,
    Cancel,
}

impl fmt::Display for TaskListenerEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Assignment => "assignment",
            Self::Update => "update",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

/// Current phase of a user task. The "-ing" states mark a transition in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Creating,
    Created,
    Assigning,
    Assigned,
    Updating,
    Completing,
    Completed,
    Canceling,
    Canceled,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Created => "CREATED",
            Self::Assigning => "ASSIGNING",
            Self::Assigned => "ASSIGNED",
            Self::Updating => "UPDATING",
            Self::Completing => "COMPLETING",
            Self::Completed => "COMPLETED",
            Self::Canceling => "CANCELING",
            Self::Canceled => "CANCELED",
        }
    }

    /// True while a transition is in flight.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Assigning | Self::Updating | Self::Completing | Self::Canceling
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Record values ────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BpmnElementType {
    #[default]
    Unspecified,
    Process,
    SubProcess,
    CallActivity,
    UserTask,
    ServiceTask,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessInstanceRecord {
    pub bpmn_process_id: String,
    pub version: i32,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub element_id: String,
    pub bpmn_element_type: BpmnElementType,
    /// Enclosing element instance; `None` for the process element itself.
    pub flow_scope_key: Option<Key>,
    /// Set when the instance was started by a call activity.
    pub parent_process_instance_key: Option<Key>,
    pub parent_element_instance_key: Option<Key>,
    pub tenant_id: String,
}

impl Default for ProcessInstanceRecord {
    fn default() -> Self {
        Self {
            bpmn_process_id: String::new(),
            version: 1,
            process_definition_key: 0,
            process_instance_key: 0,
            element_id: String::new(),
            bpmn_element_type: BpmnElementType::Unspecified,
            flow_scope_key: None,
            parent_process_instance_key: None,
            parent_element_instance_key: None,
            tenant_id: DEFAULT_TENANT.to_string(),
        }
    }
}

/// Attribute names accepted in `UserTaskRecord::changed_attributes`.
pub mod attributes {
    pub const ASSIGNEE: &str = "assignee";
    pub const CANDIDATE_GROUPS: &str = "candidateGroupsList";
    pub const CANDIDATE_USERS: &str = "candidateUsersList";
    pub const DUE_DATE: &str = "dueDate";
    pub const FOLLOW_UP_DATE: &str = "followUpDate";
    pub const PRIORITY: &str = "priority";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserTaskRecord {
    pub user_task_key: Key,
    pub assignee: String,
    pub candidate_groups: Vec<String>,
    pub candidate_users: Vec<String>,
    pub due_date: String,
    pub follow_up_date: String,
    pub priority: i32,
    pub variables: Variables,
    pub changed_attributes: Vec<String>,
    pub action: String,
    pub element_id: String,
    pub element_instance_key: Key,
    pub bpmn_process_id: String,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub tenant_id: String,
}

impl Default for UserTaskRecord {
    fn default() -> Self {
        Self {
            user_task_key: 0,
            assignee: String::new(),
            candidate_groups: Vec::new(),
            candidate_users: Vec::new(),
            due_date: String::new(),
            follow_up_date: String::new(),
            priority: 50,
            variables: Variables::new(),
            changed_attributes: Vec::new(),
            action: String::new(),
            element_id: String::new(),
            element_instance_key: 0,
            bpmn_process_id: String::new(),
            process_definition_key: 0,
            process_instance_key: 0,
            tenant_id: DEFAULT_TENANT.to_string(),
        }
    }
}

impl UserTaskRecord {
    /// Copy the attributes named in `changes.changed_attributes` onto `self`.
    /// Unknown attribute names are ignored.
    pub fn apply_changed_attributes(&mut self, changes: &UserTaskRecord) {
        for attribute in &changes.changed_attributes {
            match attribute.as_str() {
                attributes::CANDIDATE_GROUPS => {
                    self.candidate_groups = changes.candidate_groups.clone()
                }
                attributes::CANDIDATE_USERS => {
                    self.candidate_users = changes.candidate_users.clone()
                }
                attributes::DUE_DATE => self.due_date = changes.due_date.clone(),
                attributes::FOLLOW_UP_DATE => self.follow_up_date = changes.follow_up_date.clone(),
                attributes::PRIORITY => self.priority = changes.priority,
                _ => {}
            }
        }
        self.changed_attributes = changes.changed_attributes.clone();
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerRecord {
    pub element_instance_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub due_date: Timestamp,
    pub target_element_id: String,
    pub repetitions: i32,
    pub tenant_id: String,
}

impl Default for TimerRecord {
    fn default() -> Self {
        Self {
            element_instance_key: 0,
            process_instance_key: 0,
            process_definition_key: 0,
            due_date: 0,
            target_element_id: String::new(),
            repetitions: 1,
            tenant_id: DEFAULT_TENANT.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    #[default]
    BpmnElement,
    TaskListener,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRecord {
    pub job_type: String,
    pub retries: i32,
    pub kind: JobKind,
    pub listener_event_type: Option<TaskListenerEventType>,
    pub user_task_key: Option<Key>,
    pub element_id: String,
    pub element_instance_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    pub tenant_id: String,
    pub variables: Variables,
}

impl Default for JobRecord {
    fn default() -> Self {
        Self {
            job_type: String::new(),
            retries: 3,
            kind: JobKind::BpmnElement,
            listener_event_type: None,
            user_task_key: None,
            element_id: String::new(),
            element_instance_key: 0,
            process_instance_key: 0,
            process_definition_key: 0,
            bpmn_process_id: String::new(),
            tenant_id: DEFAULT_TENANT.to_string(),
            variables: Variables::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    #[default]
    Unknown,
    ExtractValueError,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentRecord {
    pub error_type: ErrorType,
    pub error_message: String,
    pub bpmn_process_id: String,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub element_id: String,
    pub element_instance_key: Key,
    pub job_key: Option<Key>,
    pub tenant_id: String,
}

impl Default for IncidentRecord {
    fn default() -> Self {
        Self {
            error_type: ErrorType::Unknown,
            error_message: String::new(),
            bpmn_process_id: String::new(),
            process_definition_key: 0,
            process_instance_key: 0,
            element_id: String::new(),
            element_instance_key: 0,
            job_key: None,
            tenant_id: DEFAULT_TENANT.to_string(),
        }
    }
}

/// Written by the engine when a command failed unexpectedly. Bans the instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorRecord {
    pub process_instance_key: Option<Key>,
    pub exception_message: String,
}

/// Untyped record value as it travels on the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordPayload {
    ProcessInstance(ProcessInstanceRecord),
    UserTask(UserTaskRecord),
    Timer(TimerRecord),
    Job(JobRecord),
    Incident(IncidentRecord),
    Error(ErrorRecord),
}

impl RecordPayload {
    pub fn value_type(&self) -> ValueType {
        match self {
            RecordPayload::ProcessInstance(_) => ValueType::ProcessInstance,
            RecordPayload::UserTask(_) => ValueType::UserTask,
            RecordPayload::Timer(_) => ValueType::Timer,
            RecordPayload::Job(_) => ValueType::Job,
            RecordPayload::Incident(_) => ValueType::Incident,
            RecordPayload::Error(_) => ValueType::Error,
        }
    }

    /// Process instance the value belongs to, if any.
    pub fn process_instance_key(&self) -> Option<Key> {
        match self {
            RecordPayload::ProcessInstance(v) => Some(v.process_instance_key),
            RecordPayload::UserTask(v) => Some(v.process_instance_key),
            RecordPayload::Timer(v) => Some(v.process_instance_key),
            RecordPayload::Job(v) => Some(v.process_instance_key),
            RecordPayload::Incident(v) => Some(v.process_instance_key),
            RecordPayload::Error(v) => v.process_instance_key,
        }
        .filter(|key| *key > 0)
    }
}

/// Binds a record value struct to its intent enum and its payload variant.
pub trait RecordValue: Clone + fmt::Debug + Send + Sync + 'static {
    type Intent: Copy + fmt::Debug + fmt::Display + PartialEq + Send + Sync + 'static;

    const VALUE_TYPE: ValueType;

    fn wrap_intent(intent: Self::Intent) -> Intent;
    fn unwrap_intent(intent: Intent) -> Option<Self::Intent>;
    fn into_payload(self) -> RecordPayload;
    fn from_payload(payload: &RecordPayload) -> Option<&Self>;
}

macro_rules! record_value {
    ($value:ty, $intent:ty, $variant:ident) => {
        impl RecordValue for $value {
            type Intent = $intent;

            const VALUE_TYPE: ValueType = ValueType::$variant;

            fn wrap_intent(intent: Self::Intent) -> Intent {
                Intent::$variant(intent)
            }

            fn unwrap_intent(intent: Intent) -> Option<Self::Intent> {
                match intent {
                    Intent::$variant(i) => Some(i),
                    _ => None,
                }
            }

            fn into_payload(self) -> RecordPayload {
                RecordPayload::$variant(self)
            }

            fn from_payload(payload: &RecordPayload) -> Option<&Self> {
                match payload {
                    RecordPayload::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

record_value!(ProcessInstanceRecord, ProcessInstanceIntent, ProcessInstance);
record_value!(UserTaskRecord, UserTaskIntent, UserTask);
record_value!(TimerRecord, TimerIntent, Timer);
record_value!(JobRecord, JobIntent, Job);
record_value!(IncidentRecord, IncidentIntent, Incident);
record_value!(ErrorRecord, ErrorIntent, Error);

// ─── Records ──────────────────────────────────────────────────

/// A record on the log: command, event or command rejection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: Key,
    pub record_type: RecordType,
    pub intent: Intent,
    pub value: RecordPayload,
    #[serde(default)]
    pub authorizations: Authorizations,
    #[serde(default)]
    pub request_id: Option<i64>,
    #[serde(default)]
    pub request_stream_id: Option<i32>,
    #[serde(default)]
    pub rejection: Option<Rejection>,
}

impl Record {
    fn new<V: RecordValue>(record_type: RecordType, key: Key, intent: V::Intent, value: V) -> Self {
        Self {
            key,
            record_type,
            intent: V::wrap_intent(intent),
            value: value.into_payload(),
            authorizations: Authorizations::new(),
            request_id: None,
            request_stream_id: None,
            rejection: None,
        }
    }

    pub fn command<V: RecordValue>(key: Key, intent: V::Intent, value: V) -> Self {
        Self::new(RecordType::Command, key, intent, value)
    }

    pub fn event<V: RecordValue>(key: Key, intent: V::Intent, value: V) -> Self {
        Self::new(RecordType::Event, key, intent, value)
    }

    pub fn with_request(mut self, request_id: i64, request_stream_id: i32) -> Self {
        self.request_id = Some(request_id);
        self.request_stream_id = Some(request_stream_id);
        self
    }

    pub fn with_user(mut self, user_key: Key) -> Self {
        self.authorizations
            .insert(AUTHORIZED_USER_KEY.to_string(), serde_json::json!(user_key));
        self
    }

    pub fn with_tenants<I, S>(mut self, tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tenants: Vec<String> = tenants.into_iter().map(Into::into).collect();
        self.authorizations
            .insert(AUTHORIZED_TENANTS.to_string(), serde_json::json!(tenants));
        self
    }

    pub fn is_command(&self) -> bool {
        self.record_type == RecordType::Command
    }

    pub fn is_event(&self) -> bool {
        self.record_type == RecordType::Event
    }

    pub fn process_instance_key(&self) -> Option<Key> {
        self.value.process_instance_key()
    }

    /// Typed view of this record, if its value is a `V`.
    pub fn typed<V: RecordValue>(&self) -> Option<TypedRecord<V>> {
        TypedRecord::from_record(self)
    }
}

/// A record whose value and intent are known statically.
#[derive(Clone, Debug)]
pub struct TypedRecord<V: RecordValue> {
    pub key: Key,
    pub record_type: RecordType,
    pub intent: V::Intent,
    pub value: V,
    pub authorizations: Authorizations,
    pub request_id: Option<i64>,
    pub request_stream_id: Option<i32>,
}

impl<V: RecordValue> TypedRecord<V> {
    pub fn from_record(record: &Record) -> Option<Self> {
        let intent = V::unwrap_intent(record.intent)?;
        let value = V::from_payload(&record.value)?.clone();
        Some(Self {
            key: record.key,
            record_type: record.record_type,
            intent,
            value,
            authorizations: record.authorizations.clone(),
            request_id: record.request_id,
            request_stream_id: record.request_stream_id,
        })
    }

    pub fn has_request_metadata(&self) -> bool {
        self.request_id.is_some() && self.request_stream_id.is_some()
    }

    pub fn to_record(&self) -> Record {
        Record {
            key: self.key,
            record_type: self.record_type,
            intent: V::wrap_intent(self.intent),
            value: self.value.clone().into_payload(),
            authorizations: self.authorizations.clone(),
            request_id: self.request_id,
            request_stream_id: self.request_stream_id,
            rejection: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_id_round_trips_through_key() {
        let key = encode_partition_id(3, 42);
        assert_eq!(decode_partition_id(key), 3);
        assert_eq!(key - encode_partition_id(3, 0), 42);
    }

    #[test]
    fn user_task_commands_exclude_events() {
        assert_eq!(
            UserTaskIntent::commands(),
            vec![
                UserTaskIntent::Assign,
                UserTaskIntent::Claim,
                UserTaskIntent::Update,
                UserTaskIntent::Complete,
                UserTaskIntent::CompleteTaskListener,
            ]
        );
    }

    #[test]
    fn typed_view_requires_matching_value_type() {
        let record = Record::command(7, TimerIntent::Trigger, TimerRecord::default());
        assert!(record.typed::<TimerRecord>().is_some());
        assert!(record.typed::<UserTaskRecord>().is_none());
    }

    #[test]
    fn record_yaml_uses_screaming_tags() {
        let yaml = r#"
key: 12
record_type: COMMAND
intent:
  USER_TASK: ASSIGN
value:
  USER_TASK:
    user_task_key: 12
    assignee: demo
"#;
        let record: Record = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str(yaml),
        )
        .unwrap();
        assert_eq!(record.intent, Intent::UserTask(UserTaskIntent::Assign));
        assert_eq!(record.record_type, RecordType::Command);
        let typed = record.typed::<UserTaskRecord>().unwrap();
        assert_eq!(typed.value.assignee, "demo");
        assert_eq!(typed.value.tenant_id, DEFAULT_TENANT);
    }

    #[test]
    fn changed_attributes_only_copy_named_fields() {
        let mut persisted = UserTaskRecord {
            priority: 10,
            due_date: "2024-01-01".into(),
            ..Default::default()
        };
        let changes = UserTaskRecord {
            priority: 90,
            due_date: "2030-01-01".into(),
            changed_attributes: vec![attributes::PRIORITY.to_string()],
            ..Default::default()
        };
        persisted.apply_changed_attributes(&changes);
        assert_eq!(persisted.priority, 90);
        assert_eq!(persisted.due_date, "2024-01-01");
    }
}
