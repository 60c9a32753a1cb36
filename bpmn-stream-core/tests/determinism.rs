//! Two cores fed the same log and commands must end up byte-identical, and a
//! third core recovering from the resulting log must rebuild the same state.

use bpmn_stream_core::state::*;
use bpmn_stream_core::types::*;
use bpmn_stream_core::{Engine, EngineConfig, LoggedRecord, MemoryState, StreamProcessor};
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFINITION: Key = 100;
const INSTANCE: Key = 1;
const USER_TASK_ELEMENT: Key = 2;
const USER_TASK: Key = 3;
const TIMER: Key = 10;
const OTHER_INSTANCE: Key = 20;

fn deployed(listeners: &[&str]) -> DeployedProcess {
    DeployedProcess {
        key: DEFINITION,
        bpmn_process_id: "invoice".into(),
        version: 1,
        tenant_id: DEFAULT_TENANT.into(),
        user_tasks: BTreeMap::from([(
            "approve".to_string(),
            ExecutableUserTask {
                element_id: "approve".into(),
                task_listeners: listeners
                    .iter()
                    .map(|job_type| TaskListener {
                        event_type: TaskListenerEventType::Complete,
                        job_type: Expression::from(job_type.to_string()),
                        retries: Expression::from("3".to_string()),
                    })
                    .collect(),
            },
        )]),
    }
}

fn element(
    process_instance_key: Key,
    element_id: &str,
    flow_scope_key: Option<Key>,
    kind: BpmnElementType,
) -> ProcessInstanceRecord {
    ProcessInstanceRecord {
        bpmn_process_id: "invoice".into(),
        process_definition_key: DEFINITION,
        process_instance_key,
        element_id: element_id.into(),
        bpmn_element_type: kind,
        flow_scope_key,
        ..Default::default()
    }
}

/// Events that put one waiting user task with a reminder timer on the log,
/// plus a second, untouched process instance.
fn seed_log() -> Vec<LoggedRecord> {
    let process = element(INSTANCE, "invoice", None, BpmnElementType::Process);
    let user_task = element(INSTANCE, "approve", Some(INSTANCE), BpmnElementType::UserTask);
    let other = element(OTHER_INSTANCE, "invoice", None, BpmnElementType::Process);
    let task = UserTaskRecord {
        user_task_key: USER_TASK,
        element_id: "approve".into(),
        element_instance_key: USER_TASK_ELEMENT,
        bpmn_process_id: "invoice".into(),
        process_definition_key: DEFINITION,
        process_instance_key: INSTANCE,
        ..Default::default()
    };
    let reminder = TimerRecord {
        element_instance_key: USER_TASK_ELEMENT,
        process_instance_key: INSTANCE,
        process_definition_key: DEFINITION,
        due_date: 1_000,
        target_element_id: "reminder".into(),
        ..Default::default()
    };

    [
        Record::event(INSTANCE, ProcessInstanceIntent::ElementActivating, process.clone()),
        Record::event(INSTANCE, ProcessInstanceIntent::ElementActivated, process),
        Record::event(USER_TASK_ELEMENT, ProcessInstanceIntent::ElementActivating, user_task.clone()),
        Record::event(USER_TASK_ELEMENT, ProcessInstanceIntent::ElementActivated, user_task),
        Record::event(USER_TASK, UserTaskIntent::Creating, task.clone()),
        Record::event(USER_TASK, UserTaskIntent::Created, task),
        Record::event(TIMER, TimerIntent::Created, reminder),
        Record::event(OTHER_INSTANCE, ProcessInstanceIntent::ElementActivating, other.clone()),
        Record::event(OTHER_INSTANCE, ProcessInstanceIntent::ElementActivated, other),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, record)| LoggedRecord {
        position: i as u64 + 1,
        source_position: None,
        record,
    })
    .collect()
}

fn core(log: Vec<LoggedRecord>) -> (Arc<MemoryState>, StreamProcessor) {
    core_with(&["audit"], log)
}

fn core_with(listeners: &[&str], log: Vec<LoggedRecord>) -> (Arc<MemoryState>, StreamProcessor) {
    let state = Arc::new(MemoryState::default());
    state.put_process(deployed(listeners)).unwrap();
    let engine = Engine::new(state.clone(), EngineConfig::default()).unwrap();
    let mut stream = StreamProcessor::new(engine);
    stream.recover(log).unwrap();
    (state, stream)
}

fn user_task_command(intent: UserTaskIntent, value: UserTaskRecord) -> Record {
    Record::command(USER_TASK, intent, value)
}

/// The same client traffic for every core; the listener job's key is read
/// back from the core's own log.
fn drive(stream: &mut StreamProcessor) {
    stream.submit(
        user_task_command(
            UserTaskIntent::Assign,
            UserTaskRecord {
                assignee: "alice".into(),
                ..Default::default()
            },
        )
        .with_request(1, 1),
    );
    stream.submit(user_task_command(
        UserTaskIntent::Update,
        UserTaskRecord {
            priority: 90,
            changed_attributes: vec![attributes::PRIORITY.into()],
            ..Default::default()
        },
    ));
    stream.submit(Record::command(TIMER, TimerIntent::Trigger, TimerRecord::default()));
    stream.submit(
        Record::command(OTHER_INSTANCE, ProcessInstanceIntent::Cancel, ProcessInstanceRecord::default())
            .with_request(2, 1),
    );
    stream.submit(user_task_command(UserTaskIntent::Complete, UserTaskRecord::default()).with_request(3, 1));
    stream.drain().unwrap();

    let job_key = stream
        .log()
        .iter()
        .find(|logged| logged.record.intent == Intent::Job(JobIntent::Created))
        .map(|logged| logged.record.key)
        .expect("complete listener job");
    stream.submit(Record::command(job_key, JobIntent::Complete, JobRecord::default()));
    stream.drain().unwrap();
}

fn job_keys(stream: &StreamProcessor) -> Vec<Key> {
    stream
        .log()
        .iter()
        .filter(|logged| logged.record.intent == Intent::Job(JobIntent::Created))
        .map(|logged| logged.record.key)
        .collect()
}

/// Completes the newest listener job on the core's log.
fn complete_latest_job(stream: &mut StreamProcessor) {
    let job_key = *job_keys(stream).last().expect("a listener job");
    stream.submit(Record::command(job_key, JobIntent::Complete, JobRecord::default()));
    stream.drain().unwrap();
}

fn start_completion(stream: &mut StreamProcessor) {
    stream.submit(user_task_command(UserTaskIntent::Complete, UserTaskRecord::default()).with_request(7, 4));
    stream.drain().unwrap();
}

#[test]
fn identical_input_gives_identical_log_and_state() {
    let (state_a, mut a) = core(seed_log());
    let (state_b, mut b) = core(seed_log());

    drive(&mut a);
    drive(&mut b);

    assert_eq!(a.log(), b.log());
    assert_eq!(a.log_digest().unwrap(), b.log_digest().unwrap());
    assert_eq!(state_a.fingerprint().unwrap(), state_b.fingerprint().unwrap());
    assert_eq!(a.responses(), b.responses());
}

#[test]
fn scenario_runs_to_completion() {
    let (state, mut stream) = core(seed_log());
    drive(&mut stream);

    assert!(state.get_user_task(USER_TASK).unwrap().is_none());
    assert!(state.get_timer(TIMER).unwrap().is_none());
    assert!(state.banned_instances().unwrap().is_empty());

    let host_commands: Vec<_> = stream
        .log()
        .iter()
        .map(|logged| &logged.record)
        .filter(|record| record.is_command() && !stream.engine().handles(&record.intent))
        .map(|record| (record.key, record.intent))
        .collect();
    assert_eq!(
        host_commands,
        vec![
            (USER_TASK_ELEMENT, Intent::ProcessInstance(ProcessInstanceIntent::CompleteElement)),
            (OTHER_INSTANCE, Intent::ProcessInstance(ProcessInstanceIntent::TerminateElement)),
            (USER_TASK_ELEMENT, Intent::ProcessInstance(ProcessInstanceIntent::CompleteElement)),
        ]
    );

    let answered: Vec<_> = stream
        .responses()
        .iter()
        .map(|r| (r.request_id, r.intent))
        .collect();
    assert_eq!(
        answered,
        vec![
            (Some(1), Intent::UserTask(UserTaskIntent::Assigned)),
            (Some(2), Intent::ProcessInstance(ProcessInstanceIntent::ElementTerminating)),
            (Some(3), Intent::UserTask(UserTaskIntent::Completed)),
        ]
    );
}

#[test]
fn recovering_from_the_log_rebuilds_the_state() {
    let (live_state, mut live) = core(seed_log());
    drive(&mut live);

    let (replayed_state, replayed) = core(live.log().to_vec());

    assert_eq!(replayed.log(), live.log());
    assert_eq!(replayed_state.to_json().unwrap(), live_state.to_json().unwrap());
    assert_eq!(replayed_state.fingerprint().unwrap(), live_state.fingerprint().unwrap());
}

#[test]
fn keys_generated_after_recovery_do_not_repeat_logged_keys() {
    let (_, mut live) = core_with(&["audit", "archive"], seed_log());
    start_completion(&mut live);

    let (_, mut recovered) = core_with(&["audit", "archive"], live.log().to_vec());
    let logged_keys: Vec<Key> = recovered.log().iter().map(|l| l.record.key).collect();
    complete_latest_job(&mut recovered);

    let jobs = job_keys(&recovered);
    assert_eq!(jobs.len(), 2);
    assert_ne!(jobs[0], jobs[1]);
    assert!(!logged_keys.contains(&jobs[1]));
}

#[test]
fn recovery_in_the_middle_of_a_listener_chain_matches_an_uninterrupted_run() {
    let listeners = ["audit", "archive"];

    let (uninterrupted_state, mut uninterrupted) = core_with(&listeners, seed_log());
    start_completion(&mut uninterrupted);
    complete_latest_job(&mut uninterrupted);
    complete_latest_job(&mut uninterrupted);

    let (before_state, mut before) = core_with(&listeners, seed_log());
    start_completion(&mut before);

    // Completing, one pending job and the stored request all come back.
    let (recovered_state, mut recovered) = core_with(&listeners, before.log().to_vec());
    assert_eq!(recovered_state.to_json().unwrap(), before_state.to_json().unwrap());
    assert_eq!(
        recovered_state.get_lifecycle_state(USER_TASK).unwrap(),
        Some(LifecycleState::Completing)
    );
    assert_eq!(
        recovered_state
            .find_request_metadata(USER_TASK)
            .unwrap()
            .map(|m| (m.request_id, m.request_stream_id)),
        Some((7, 4))
    );
    assert!(recovered_state.get_job(job_keys(&recovered)[0]).unwrap().is_some());

    complete_latest_job(&mut recovered);
    complete_latest_job(&mut recovered);

    assert_eq!(recovered.log(), uninterrupted.log());
    assert_eq!(
        recovered_state.to_json().unwrap(),
        uninterrupted_state.to_json().unwrap()
    );
    assert_eq!(
        recovered_state.fingerprint().unwrap(),
        uninterrupted_state.fingerprint().unwrap()
    );

    let completed = recovered
        .responses()
        .iter()
        .find(|r| r.intent == Intent::UserTask(UserTaskIntent::Completed))
        .expect("the deferred completion answer");
    assert_eq!(completed.request_id, Some(7));
    assert_eq!(completed.request_stream_id, Some(4));
    assert!(recovered_state.get_user_task(USER_TASK).unwrap().is_none());
}

#[test]
fn log_positions_are_dense_and_sources_point_backwards() {
    let (_, mut stream) = core(seed_log());
    drive(&mut stream);

    for (i, logged) in stream.log().iter().enumerate() {
        assert_eq!(logged.position, i as u64 + 1);
        if let Some(source) = logged.source_position {
            assert!(source < logged.position);
        }
    }
}
