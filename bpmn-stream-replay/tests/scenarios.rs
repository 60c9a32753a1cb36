use bpmn_stream_core::types::*;
use bpmn_stream_core::EngineConfig;
use bpmn_stream_replay::{replay, run_once, Scenario, Step};

const INVOICE: &str = include_str!("../scenarios/invoice.yaml");

#[test]
fn invoice_scenario_is_deterministic() {
    let scenario = Scenario::from_yaml(INVOICE).unwrap();
    let report = replay(&scenario).unwrap();

    assert_eq!(report.runs.len(), 3);
    assert!(report.deterministic);

    let run = &report.runs[0];
    assert_eq!(run.records, 31);
    assert_eq!(run.rejections, 1);
    assert_eq!(run.responses, 4);
    assert_eq!(run.host_commands, 3);
    assert!(run.banned_instances.is_empty());
    assert_eq!(run.log_digest.len(), 64);
}

#[test]
fn invoice_scenario_runs_both_listeners_then_completes() {
    let scenario = Scenario::from_yaml(INVOICE).unwrap();
    let config = scenario.config.clone().unwrap();
    let (_, log) = run_once(&scenario, config).unwrap();

    let job_types: Vec<_> = log
        .iter()
        .filter(|l| l.record.intent == Intent::Job(JobIntent::Created))
        .filter_map(|l| match &l.record.value {
            RecordPayload::Job(job) => Some(job.job_type.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(job_types, vec!["audit", "archive"]);

    let completed = log
        .iter()
        .position(|l| l.record.intent == Intent::UserTask(UserTaskIntent::Completed))
        .unwrap();
    let last_job = log
        .iter()
        .rposition(|l| l.record.intent == Intent::Job(JobIntent::Completed))
        .unwrap();
    assert!(last_job < completed);
}

#[test]
fn unauthorized_cancel_is_rejected() {
    let scenario = Scenario::from_yaml(INVOICE).unwrap();
    let (_, log) = run_once(&scenario, scenario.config.clone().unwrap()).unwrap();

    let rejection = log
        .iter()
        .find_map(|l| l.record.rejection.as_ref())
        .unwrap();
    assert_eq!(rejection.rejection_type, RejectionType::Unauthorized);
    assert_eq!(
        rejection.reason,
        "Unauthorized to perform operation 'UPDATE' on resource 'PROCESS_DEFINITION'"
    );
}

#[test]
fn timer_fires_only_once_it_is_due() {
    let scenario = Scenario::from_yaml(INVOICE).unwrap();
    let (_, log) = run_once(&scenario, scenario.config.clone().unwrap()).unwrap();

    let triggers: Vec<_> = log
        .iter()
        .filter(|l| l.record.intent == Intent::Timer(TimerIntent::Trigger))
        .collect();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].record.key, 10);

    // Fired by the 6000 check, after both cancels.
    let cancel = log
        .iter()
        .rposition(|l| l.record.intent == Intent::ProcessInstance(ProcessInstanceIntent::Cancel))
        .unwrap();
    assert!(log.iter().position(|l| l.record.key == 10 && l.record.is_command()).unwrap() > cancel);
}

#[test]
fn invoice_log_and_seeds_parse_from_maps() {
    let scenario = Scenario::load(std::path::Path::new(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/scenarios/invoice.yaml"
    )))
    .unwrap();

    assert_eq!(scenario.log.len(), 9);
    assert_eq!(
        scenario.log[4].intent,
        Intent::UserTask(UserTaskIntent::Creating)
    );
    assert!(matches!(scenario.log[6].value, RecordPayload::Timer(_)));
    assert_eq!(scenario.users.len(), 2);
    assert_eq!(scenario.steps.len(), 8);
    match &scenario.steps[5] {
        Step::Command(record) => {
            assert_eq!(record.intent, Intent::UserTask(UserTaskIntent::Complete));
            assert_eq!(record.request_id, Some(4));
        }
        other => panic!("unexpected step {other:?}"),
    }
}

#[test]
fn steps_parse_from_yaml() {
    let scenario = Scenario::from_yaml(
        r#"
steps:
  - check_timers_at: 250
  - complete_open_jobs
  - command:
      key: 7
      record_type: COMMAND
      intent: { TIMER: TRIGGER }
      value: { TIMER: {} }
"#,
    )
    .unwrap();

    assert_eq!(scenario.runs, 2);
    assert!(scenario.config.is_none());
    assert!(matches!(scenario.steps[0], Step::CheckTimersAt(250)));
    assert!(matches!(scenario.steps[1], Step::CompleteOpenJobs));
    match &scenario.steps[2] {
        Step::Command(record) => assert_eq!(record.intent, Intent::Timer(TimerIntent::Trigger)),
        other => panic!("unexpected step {other:?}"),
    }
}

#[test]
fn unknown_timer_trigger_is_rejected_not_fatal() {
    let scenario = Scenario::from_yaml(
        r#"
runs: 2
config: { partition_id: 2 }
steps:
  - command:
      key: 7
      record_type: COMMAND
      intent: { TIMER: TRIGGER }
      value: { TIMER: {} }
"#,
    )
    .unwrap();

    let report = replay(&scenario).unwrap();
    assert!(report.deterministic);
    assert_eq!(report.runs[0].records, 2);
    assert_eq!(report.runs[0].rejections, 1);
}

#[test]
fn invalid_config_is_refused() {
    let scenario = Scenario {
        config: Some(EngineConfig {
            max_commands_in_batch: 0,
            ..Default::default()
        }),
        ..Scenario::from_yaml("{}").unwrap()
    };
    assert!(replay(&scenario).is_err());
}
