//! Scenario replay for the stream core.
//!
//! A scenario seeds deployed processes, users, grants and variables, puts a
//! log of events in front of the stream processor, then plays a list of
//! steps against it. Every run starts from a fresh core; the report says
//! whether all runs produced the same log digest and state fingerprint.
//!
//! ```yaml
//! runs: 2
//! processes: [...]
//! log:
//!   - { key: 1, record_type: EVENT, intent: { TIMER: CREATED }, value: { TIMER: { due_date: 500 } } }
//! steps:
//!   - check_timers_at: 1000
//!   - command: { key: 3, record_type: COMMAND, intent: { USER_TASK: ASSIGN }, value: { USER_TASK: { assignee: demo } } }
//!   - complete_open_jobs
//! ```

use anyhow::{Context, Result};
use bpmn_stream_core::authorization::{PermissionType, ResourceType};
use bpmn_stream_core::clock::ControlledClock;
use bpmn_stream_core::scheduled::LifecyclePhase;
use bpmn_stream_core::state::*;
use bpmn_stream_core::timer::DueDateTimerChecker;
use bpmn_stream_core::types::*;
use bpmn_stream_core::{Engine, EngineConfig, LoggedRecord, MemoryState, StreamProcessor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug, Deserialize)]
pub struct GrantSeed {
    pub owner: Key,
    pub resource_type: ResourceType,
    pub permission_type: PermissionType,
    pub resource_ids: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VariableSeed {
    pub scope_key: Key,
    pub name: String,
    pub value: serde_json::Value,
}

/// One thing that happens to the core after recovery.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Submit a client command and process everything it leads to.
    Command(Record),
    /// Set the clock and let the due-date checker fire whatever is due.
    CheckTimersAt(Timestamp),
    /// Complete every job that is open on the log right now.
    CompleteOpenJobs,
}

fn default_runs() -> usize {
    2
}

#[derive(Clone, Debug, Deserialize)]
pub struct Scenario {
    /// Falls back to `BPMN_STREAM_*` environment settings when absent.
    #[serde(default)]
    pub config: Option<EngineConfig>,
    #[serde(default = "default_runs")]
    pub runs: usize,
    #[serde(default)]
    pub start_time: Timestamp,
    #[serde(default)]
    pub processes: Vec<DeployedProcess>,
    #[serde(default)]
    pub users: Vec<PersistedUser>,
    #[serde(default)]
    pub grants: Vec<GrantSeed>,
    #[serde(default)]
    pub variables: Vec<VariableSeed>,
    /// Events the core recovers from.
    #[serde(default)]
    pub log: Vec<Record>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Intents, values and steps are written as `{ VARIANT: value }` maps
    /// rather than YAML tags.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let scenario: Self = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str(yaml),
        )
        .context("invalid scenario")?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_yaml(&yaml)
    }

    fn engine_config(&self) -> Result<EngineConfig> {
        match &self.config {
            Some(config) => {
                config.validate()?;
                Ok(config.clone())
            }
            None => EngineConfig::from_env(),
        }
    }
}

/// What one run left behind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub log_digest: String,
    pub state_fingerprint: String,
    pub records: usize,
    pub responses: usize,
    pub rejections: usize,
    /// Commands no processor is registered for, left for the host.
    pub host_commands: usize,
    pub banned_instances: Vec<Key>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReplayReport {
    pub runs: Vec<RunSummary>,
    pub deterministic: bool,
}

/// Runs the scenario `scenario.runs` times, each on a fresh core.
pub fn replay(scenario: &Scenario) -> Result<ReplayReport> {
    let config = scenario.engine_config()?;
    let mut runs = Vec::with_capacity(scenario.runs);
    for run in 0..scenario.runs.max(1) {
        let (summary, _) = run_once(scenario, config.clone())
            .with_context(|| format!("run {} failed", run + 1))?;
        tracing::info!(
            run = run + 1,
            log_digest = %summary.log_digest,
            state_fingerprint = %summary.state_fingerprint,
            records = summary.records,
            "run finished"
        );
        runs.push(summary);
    }
    let deterministic = runs.windows(2).all(|pair| pair[0] == pair[1]);
    Ok(ReplayReport {
        runs,
        deterministic,
    })
}

/// One run; also hands back the final log.
pub fn run_once(scenario: &Scenario, config: EngineConfig) -> Result<(RunSummary, Vec<LoggedRecord>)> {
    let mut run = Run::new(scenario, config)?;
    for (i, step) in scenario.steps.iter().enumerate() {
        run.step(step)
            .with_context(|| format!("step {} failed", i + 1))?;
    }
    let summary = run.summary()?;
    Ok((summary, run.stream.log().to_vec()))
}

struct Run {
    state: Arc<MemoryState>,
    stream: StreamProcessor,
    clock: Arc<ControlledClock>,
    checker: DueDateTimerChecker,
    /// Log records already looked at for new timers.
    scanned: usize,
}

impl Run {
    fn new(scenario: &Scenario, config: EngineConfig) -> Result<Self> {
        let state = Arc::new(MemoryState::new(config.partition_id));
        for process in &scenario.processes {
            state.put_process(process.clone())?;
        }
        for user in &scenario.users {
            state.put_user(user.clone())?;
        }
        for grant in &scenario.grants {
            state.grant(
                grant.owner,
                grant.resource_type,
                grant.permission_type,
                &grant.resource_ids,
            )?;
        }
        for variable in &scenario.variables {
            state.set_variable(variable.scope_key, &variable.name, variable.value.clone())?;
        }

        let clock = Arc::new(ControlledClock::new(scenario.start_time));
        let checker = DueDateTimerChecker::new(state.clone(), clock.clone(), &config);
        let engine = Engine::new(state.clone(), config)?;
        let mut stream = StreamProcessor::new(engine);

        let log = scenario
            .log
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, record)| LoggedRecord {
                position: i as u64 + 1,
                source_position: None,
                record,
            })
            .collect();
        stream.recover(log)?;

        let mut run = Self {
            scanned: stream.log().len(),
            state,
            stream,
            clock,
            checker,
        };
        run.checker.on_phase(LifecyclePhase::Recovered);
        Ok(run)
    }

    fn step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Command(command) => {
                self.stream.submit(command.clone());
                self.drain()
            }
            Step::CheckTimersAt(now) => {
                self.clock.set(*now);
                loop {
                    let outcome = self.checker.check_due_timers()?;
                    let more = outcome.yielded || outcome.batch_full;
                    for command in outcome.commands {
                        self.stream.submit(command);
                    }
                    self.drain()?;
                    if !more {
                        return Ok(());
                    }
                }
            }
            Step::CompleteOpenJobs => {
                for job_key in self.open_jobs() {
                    self.stream
                        .submit(Record::command(job_key, JobIntent::Complete, JobRecord::default()));
                }
                self.drain()
            }
        }
    }

    /// Processes the queue, then tells the checker about timers it created.
    fn drain(&mut self) -> Result<()> {
        self.stream.drain()?;
        for logged in &self.stream.log()[self.scanned..] {
            if let (Intent::Timer(TimerIntent::Created), RecordPayload::Timer(timer)) =
                (&logged.record.intent, &logged.record.value)
            {
                self.checker.schedule_timer(timer.due_date);
            }
        }
        self.scanned = self.stream.log().len();
        Ok(())
    }

    /// Jobs created on the log and not completed yet, in creation order.
    fn open_jobs(&self) -> Vec<Key> {
        let completed: BTreeSet<Key> = self
            .stream
            .log()
            .iter()
            .filter(|l| l.record.intent == Intent::Job(JobIntent::Completed))
            .map(|l| l.record.key)
            .collect();
        self.stream
            .log()
            .iter()
            .filter(|l| l.record.intent == Intent::Job(JobIntent::Created))
            .map(|l| l.record.key)
            .filter(|key| !completed.contains(key))
            .collect()
    }

    fn summary(&self) -> Result<RunSummary> {
        let log = self.stream.log();
        Ok(RunSummary {
            log_digest: hex::encode(self.stream.log_digest()?),
            state_fingerprint: hex::encode(self.state.fingerprint()?),
            records: log.len(),
            responses: self.stream.responses().len(),
            rejections: log.iter().filter(|l| l.record.rejection.is_some()).count(),
            host_commands: log
                .iter()
                .filter(|l| l.record.is_command() && !self.stream.engine().handles(&l.record.intent))
                .count(),
            banned_instances: self.state.banned_instances()?,
        })
    }
}
