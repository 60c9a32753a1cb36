use super::*;
use crate::clock::ControlledClock;
use std::sync::atomic::{AtomicI64, Ordering};

/// Moves forward by `step` every time it is read.
struct SteppingClock {
    now: AtomicI64,
    step: i64,
}

impl ActorClock for SteppingClock {
    fn now_millis(&self) -> Timestamp {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}

fn timer(state: &MemoryState, key: Key, due_date: Timestamp, process_instance_key: Key) {
    state
        .put_timer(TimerInstance {
            key,
            due_date,
            element_instance_key: key + 1_000,
            process_instance_key,
            process_definition_key: 5,
            tenant_id: DEFAULT_TENANT.to_string(),
            repetitions: 1,
            handler_node_id: "wait".into(),
        })
        .unwrap();
}

fn checker(state: &Arc<MemoryState>, clock: Arc<dyn ActorClock>, config: EngineConfig) -> DueDateTimerChecker {
    let mut checker = DueDateTimerChecker::new(state.clone(), clock, &config);
    checker.on_phase(LifecyclePhase::Recovered);
    checker
}

fn keys(outcome: &TimerCheckOutcome) -> Vec<Key> {
    outcome.commands.iter().map(|c| c.key).collect()
}

#[test]
fn due_timers_fire_in_due_order_and_future_ones_wait() {
    let state = Arc::new(MemoryState::default());
    timer(&state, 3, 300, 1);
    timer(&state, 1, 100, 1);
    timer(&state, 2, 100, 1);
    timer(&state, 4, 5_000, 1);
    let clock = Arc::new(ControlledClock::new(1_000));
    let mut checker = checker(&state, clock, EngineConfig::default());

    let outcome = checker.check_due_timers().unwrap();
    assert_eq!(keys(&outcome), vec![1, 2, 3]);
    assert!(outcome
        .commands
        .iter()
        .all(|c| c.intent == Intent::Timer(TimerIntent::Trigger)));
    assert_eq!(outcome.next_wakeup, Some(5_000));
    assert!(!outcome.yielded);
    assert_eq!(checker.cursor(), Some((300, 3)));
}

#[test]
fn trigger_command_carries_the_timer() {
    let state = Arc::new(MemoryState::default());
    timer(&state, 1, 100, 77);
    let mut checker = checker(&state, Arc::new(ControlledClock::new(1_000)), EngineConfig::default());

    let outcome = checker.check_due_timers().unwrap();
    let RecordPayload::Timer(value) = &outcome.commands[0].value else {
        panic!("expected a timer value");
    };
    assert_eq!(value.process_instance_key, 77);
    assert_eq!(value.element_instance_key, 1_001);
    assert_eq!(value.target_element_id, "wait");
    assert_eq!(value.due_date, 100);
}

#[test]
fn yielding_scans_cover_every_timer_exactly_once() {
    let state = Arc::new(MemoryState::default());
    for key in 1..=10 {
        timer(&state, key, key * 100, 1);
    }
    // 30 ms per clock read against a 50 ms budget: two timers per scan.
    let clock = Arc::new(SteppingClock {
        now: AtomicI64::new(1_000),
        step: 30,
    });
    let mut checker = checker(&state, clock, EngineConfig::default());

    let mut fired = Vec::new();
    let mut scans = 0;
    loop {
        let outcome = checker.check_due_timers().unwrap();
        scans += 1;
        fired.extend(keys(&outcome));
        if !outcome.yielded {
            assert_eq!(outcome.next_wakeup, None);
            break;
        }
        assert!(outcome.next_wakeup.is_some());
        assert!(scans < 20, "scan never finished");
    }

    assert_eq!(fired, (1..=10).collect::<Vec<_>>());
    assert!(scans > 1);
}

#[test]
fn yield_always_lets_the_first_timer_through() {
    let state = Arc::new(MemoryState::default());
    timer(&state, 1, 100, 1);
    timer(&state, 2, 200, 1);
    let clock = Arc::new(SteppingClock {
        now: AtomicI64::new(1_000),
        step: 1_000,
    });
    let mut checker = checker(&state, clock, EngineConfig::default());

    let outcome = checker.check_due_timers().unwrap();
    assert_eq!(keys(&outcome), vec![1]);
    assert!(outcome.yielded);
}

#[test]
fn non_yielding_checker_ignores_the_clock() {
    let state = Arc::new(MemoryState::default());
    for key in 1..=5 {
        timer(&state, key, key, 1);
    }
    let clock = Arc::new(SteppingClock {
        now: AtomicI64::new(1_000),
        step: 1_000,
    });
    let config = EngineConfig {
        yielding_due_date_checker: false,
        ..Default::default()
    };
    let mut checker = checker(&state, clock, config);

    let outcome = checker.check_due_timers().unwrap();
    assert_eq!(keys(&outcome), vec![1, 2, 3, 4, 5]);
}

#[test]
fn full_batch_stops_the_scan_and_resumes_next_time() {
    let state = Arc::new(MemoryState::default());
    for key in 1..=5 {
        timer(&state, key, key * 10, 1);
    }
    let config = EngineConfig {
        max_commands_in_batch: 3,
        ..Default::default()
    };
    let mut checker = checker(&state, Arc::new(ControlledClock::new(1_000)), config);

    let first = checker.check_due_timers().unwrap();
    assert_eq!(keys(&first), vec![1, 2, 3]);
    assert!(first.batch_full);
    assert_eq!(first.next_wakeup, Some(1_000));

    let second = checker.check_due_timers().unwrap();
    assert_eq!(keys(&second), vec![4, 5]);
    assert!(!second.batch_full);
}

#[test]
fn banned_instance_timers_are_dropped_without_a_command() {
    let state = Arc::new(MemoryState::default());
    timer(&state, 1, 100, 66);
    timer(&state, 2, 200, 67);
    state.ban_instance(66).unwrap();
    let mut checker = checker(&state, Arc::new(ControlledClock::new(1_000)), EngineConfig::default());

    let outcome = checker.check_due_timers().unwrap();
    assert_eq!(keys(&outcome), vec![2]);
    assert!(state.get_timer(1).unwrap().is_none());
    assert!(state.get_timer(2).unwrap().is_some());
}

#[test]
fn banned_timer_restored_by_a_rollback_is_dropped_again() {
    let state = Arc::new(MemoryState::default());
    timer(&state, 1, 100, 66);
    state.ban_instance(66).unwrap();
    let mut checker = checker(&state, Arc::new(ControlledClock::new(1_000)), EngineConfig::default());

    state.begin().unwrap();
    assert!(checker.check_due_timers().unwrap().commands.is_empty());
    assert!(state.get_timer(1).unwrap().is_none());
    state.rollback().unwrap();
    assert!(state.get_timer(1).unwrap().is_some());

    assert!(checker.check_due_timers().unwrap().commands.is_empty());
    assert!(state.get_timer(1).unwrap().is_none());
    assert_eq!(state.next_due_date().unwrap(), None);
}

#[test]
fn wakeups_coalesce_within_the_resolution() {
    let state = Arc::new(MemoryState::default());
    let mut checker = checker(&state, Arc::new(ControlledClock::new(1_000)), EngineConfig::default());
    checker.check_due_timers().unwrap();
    assert_eq!(checker.next_wakeup(), None);

    assert!(checker.schedule_timer(5_000));
    assert!(!checker.schedule_timer(6_000));
    assert!(!checker.schedule_timer(4_950));
    assert_eq!(checker.next_wakeup(), Some(5_000));
    assert!(checker.schedule_timer(4_899));
    assert_eq!(checker.next_wakeup(), Some(4_899));
}

#[test]
fn timer_scheduled_behind_the_cursor_is_not_skipped() {
    let state = Arc::new(MemoryState::default());
    timer(&state, 1, 100, 1);
    timer(&state, 2, 200, 1);
    let clock = Arc::new(ControlledClock::new(1_000));
    let mut checker = checker(&state, clock, EngineConfig::default());
    assert_eq!(keys(&checker.check_due_timers().unwrap()), vec![1, 2]);

    // Both TRIGGERs are still in flight; a late timer lands before them.
    timer(&state, 3, 150, 1);
    checker.schedule_timer(150);

    let outcome = checker.check_due_timers().unwrap();
    assert_eq!(keys(&outcome).first(), Some(&3));
}

#[test]
fn already_emitted_timers_are_not_emitted_again() {
    let state = Arc::new(MemoryState::default());
    timer(&state, 1, 100, 1);
    let clock = Arc::new(ControlledClock::new(1_000));
    let mut checker = checker(&state, clock.clone(), EngineConfig::default());

    assert_eq!(keys(&checker.check_due_timers().unwrap()), vec![1]);
    clock.advance(100);
    assert!(checker.check_due_timers().unwrap().commands.is_empty());
}

#[test]
fn inactive_checker_does_nothing() {
    let state = Arc::new(MemoryState::default());
    timer(&state, 1, 100, 1);
    let mut checker = DueDateTimerChecker::new(
        state.clone(),
        Arc::new(ControlledClock::new(1_000)),
        &EngineConfig::default(),
    );

    assert!(!checker.is_active());
    assert!(!checker.schedule_timer(100));
    assert!(checker.check_due_timers().unwrap().commands.is_empty());

    checker.on_phase(LifecyclePhase::Recovered);
    assert_eq!(checker.next_wakeup(), Some(1_000));
    checker.on_phase(LifecyclePhase::Paused);
    assert_eq!(checker.next_wakeup(), None);
    assert!(checker.check_due_timers().unwrap().commands.is_empty());

    checker.on_phase(LifecyclePhase::Resumed);
    assert_eq!(keys(&checker.check_due_timers().unwrap()), vec![1]);
}

#[test]
fn recovery_clears_the_cursor() {
    let state = Arc::new(MemoryState::default());
    timer(&state, 1, 100, 1);
    let mut checker = checker(&state, Arc::new(ControlledClock::new(1_000)), EngineConfig::default());
    checker.check_due_timers().unwrap();
    assert!(checker.cursor().is_some());

    checker.on_phase(LifecyclePhase::Recovered);
    assert_eq!(checker.cursor(), None);
    assert_eq!(keys(&checker.check_due_timers().unwrap()), vec![1]);
}
