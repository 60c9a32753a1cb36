use super::DueDateTimerChecker;
use crate::scheduled::{LifecyclePhase, StreamProcessorLifecycleAware};
use crate::types::*;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
enum Control {
    Schedule(Timestamp),
    Phase(LifecyclePhase),
}

/// Cheap handle to a running checker task.
#[derive(Clone, Debug)]
pub struct DueDateCheckerHandle {
    control: mpsc::UnboundedSender<Control>,
}

impl DueDateCheckerHandle {
    pub fn schedule_timer(&self, due_date: Timestamp) {
        if self.control.send(Control::Schedule(due_date)).is_err() {
            debug!(due_date, "due date checker stopped, schedule ignored");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

impl StreamProcessorLifecycleAware for DueDateCheckerHandle {
    fn on_phase(&self, phase: LifecyclePhase) {
        if self.control.send(Control::Phase(phase)).is_err() {
            debug!(phase = %phase, "due date checker stopped, lifecycle ignored");
        }
    }
}

/// Spawns the checker on its own tokio task. TRIGGER commands go to `sink`.
///
/// The task ends when the stream processor closes or fails, when every
/// handle is dropped, or when `sink` is closed.
pub fn spawn_due_date_checker(
    checker: DueDateTimerChecker,
    sink: mpsc::UnboundedSender<Record>,
) -> (DueDateCheckerHandle, JoinHandle<()>) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(checker, control_rx, sink));
    (
        DueDateCheckerHandle {
            control: control_tx,
        },
        task,
    )
}

async fn run(
    mut checker: DueDateTimerChecker,
    mut control: mpsc::UnboundedReceiver<Control>,
    sink: mpsc::UnboundedSender<Record>,
) {
    info!("due date checker started");

    loop {
        let deadline = checker.next_wakeup().map(|due| {
            let delay = (due - checker.now()).max(0) as u64;
            Instant::now() + Duration::from_millis(delay)
        });

        tokio::select! {
            biased;

            message = control.recv() => match message {
                Some(Control::Schedule(due_date)) => {
                    if checker.schedule_timer(due_date) {
                        debug!(due_date, "due date checker re-armed");
                    }
                }
                Some(Control::Phase(phase)) => {
                    checker.on_phase(phase);
                    if phase.is_terminal() {
                        break;
                    }
                }
                None => break,
            },

            _ = wait_for(deadline) => match checker.check_due_timers() {
                Ok(outcome) => {
                    for command in outcome.commands {
                        if sink.send(command).is_err() {
                            warn!("command channel closed, stopping due date checker");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "due date check failed, retrying after one resolution");
                    checker.reschedule_after_failure();
                }
            },
        }
    }

    info!("due date checker stopped");
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ControlledClock;
    use crate::config::EngineConfig;
    use crate::state::*;
    use std::sync::Arc;

    fn timer(state: &MemoryState, key: Key, due_date: Timestamp) {
        state
            .put_timer(TimerInstance {
                key,
                due_date,
                element_instance_key: 10,
                process_instance_key: 1,
                process_definition_key: 5,
                tenant_id: DEFAULT_TENANT.to_string(),
                repetitions: 1,
                handler_node_id: "wait".into(),
            })
            .unwrap();
    }

    fn spawn(
        state: Arc<MemoryState>,
        clock: Arc<ControlledClock>,
    ) -> (
        DueDateCheckerHandle,
        JoinHandle<()>,
        mpsc::UnboundedReceiver<Record>,
    ) {
        let checker = DueDateTimerChecker::new(state, clock, &EngineConfig::default());
        let (sink, commands) = mpsc::unbounded_channel();
        let (handle, task) = spawn_due_date_checker(checker, sink);
        (handle, task, commands)
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_checker_triggers_due_timers() {
        let state = Arc::new(MemoryState::default());
        let clock = Arc::new(ControlledClock::new(1_000));
        timer(&state, 7, 900);
        timer(&state, 8, 950);

        let (handle, task, mut commands) = spawn(state, clock);
        handle.on_recovered();

        let first = commands.recv().await.unwrap();
        let second = commands.recv().await.unwrap();
        assert_eq!((first.key, second.key), (7, 8));
        assert_eq!(first.intent, Intent::Timer(TimerIntent::Trigger));

        handle.on_closed();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_timer_fires_once_clock_reaches_it() {
        let state = Arc::new(MemoryState::default());
        let clock = Arc::new(ControlledClock::new(1_000));
        let (handle, task, mut commands) = spawn(state.clone(), clock.clone());
        handle.on_recovered();
        tokio::task::yield_now().await;

        timer(&state, 9, 1_500);
        handle.schedule_timer(1_500);
        tokio::task::yield_now().await;
        assert!(commands.try_recv().is_err());

        clock.set(1_500);
        tokio::time::advance(Duration::from_millis(500)).await;
        let fired = commands.recv().await.unwrap();
        assert_eq!(fired.key, 9);

        handle.on_closed();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn paused_checker_stays_quiet_until_resumed() {
        let state = Arc::new(MemoryState::default());
        let clock = Arc::new(ControlledClock::new(1_000));
        let (handle, task, mut commands) = spawn(state.clone(), clock);
        handle.on_recovered();
        handle.on_paused();
        timer(&state, 3, 100);
        handle.schedule_timer(100);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(commands.try_recv().is_err());

        handle.on_resumed();
        assert_eq!(commands.recv().await.unwrap().key, 3);

        handle.on_failed();
        task.await.unwrap();
        assert!(handle.is_closed());
    }
}
