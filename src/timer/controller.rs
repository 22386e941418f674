use std::{
    cell::RefCell,
    rc::{Rc, Weak},
    time::Duration,
};

use crate::{
    error::{FocusError, FocusResult},
    events::EventChannel,
    log_debug, log_info,
    scheduler::{CancellationHandle, Clock, Scheduler},
};

use super::{ClockState, TimerState};

const ENABLE_LOGS: bool = true;

struct ClockTimerInner {
    state: RefCell<ClockState>,
    clock: Rc<dyn Clock>,
    scheduler: Rc<dyn Scheduler>,
    tick_interval: Duration,
    ticker: RefCell<Option<CancellationHandle>>,
    state_changed: EventChannel<TimerState>,
    ticked: EventChannel<u64>,
}

/// Resumable stopwatch that publishes `stateChanged` and `ticked` events.
///
/// Cheap to clone; clones share the same timer. Starting, pausing, resuming or
/// stopping from a state that forbids it returns [`FocusError::InvalidState`]
/// and leaves the timer untouched.
#[derive(Clone)]
pub struct ClockTimer {
    inner: Rc<ClockTimerInner>,
}

impl ClockTimer {
    pub fn new(clock: Rc<dyn Clock>, scheduler: Rc<dyn Scheduler>, tick_interval: Duration) -> Self {
        Self {
            inner: Rc::new(ClockTimerInner {
                state: RefCell::new(ClockState::new()),
                clock,
                scheduler,
                tick_interval,
                ticker: RefCell::new(None),
                state_changed: EventChannel::new(),
                ticked: EventChannel::new(),
            }),
        }
    }

    pub fn state(&self) -> TimerState {
        self.inner.state.borrow().status
    }

    /// Elapsed seconds, recomputed from the wall clock while running.
    pub fn elapsed_seconds(&self) -> u64 {
        let now = self.inner.clock.now();
        self.inner.state.borrow_mut().sync_elapsed(now)
    }

    pub fn snapshot(&self) -> ClockState {
        let now = self.inner.clock.now();
        let mut guard = self.inner.state.borrow_mut();
        guard.sync_elapsed(now);
        guard.clone()
    }

    pub fn state_changed(&self) -> &EventChannel<TimerState> {
        &self.inner.state_changed
    }

    pub fn ticked(&self) -> &EventChannel<u64> {
        &self.inner.ticked
    }

    pub fn start(&self, initial_seconds: u64) -> FocusResult<()> {
        self.ensure_state("start", TimerState::Idle)?;

        let now = self.inner.clock.now();
        self.inner.state.borrow_mut().begin(initial_seconds, now);
        self.spawn_ticker();

        log_info!("Timer started from {}s", initial_seconds);
        self.inner.state_changed.emit(&TimerState::Running);
        self.inner.ticked.emit(&initial_seconds);
        Ok(())
    }

    pub fn pause(&self) -> FocusResult<()> {
        self.ensure_state("pause", TimerState::Running)?;

        let now = self.inner.clock.now();
        let elapsed = {
            let mut guard = self.inner.state.borrow_mut();
            guard.freeze(now);
            guard.elapsed_seconds
        };
        self.cancel_ticker();

        log_info!("Timer paused at {}s", elapsed);
        self.inner.state_changed.emit(&TimerState::Paused);
        Ok(())
    }

    pub fn resume(&self) -> FocusResult<()> {
        self.ensure_state("resume", TimerState::Paused)?;

        let now = self.inner.clock.now();
        let elapsed = {
            let mut guard = self.inner.state.borrow_mut();
            guard.resume(now);
            guard.sync_elapsed(now)
        };
        self.spawn_ticker();

        log_info!("Timer resumed at {}s", elapsed);
        self.inner.state_changed.emit(&TimerState::Running);
        self.inner.ticked.emit(&elapsed);
        Ok(())
    }

    /// Stops from running or paused and returns the final elapsed seconds.
    pub fn stop(&self) -> FocusResult<u64> {
        let current = self.state();
        if current == TimerState::Idle {
            return Err(FocusError::InvalidState {
                action: "stop",
                state: current.as_str(),
            });
        }

        let now = self.inner.clock.now();
        let total = self.inner.state.borrow_mut().finish(now);
        self.cancel_ticker();

        log_info!("Timer stopped at {}s", total);
        self.inner.state_changed.emit(&TimerState::Idle);
        Ok(total)
    }

    /// Back to idle at zero from any state.
    pub fn reset(&self) {
        self.cancel_ticker();
        self.inner.state.borrow_mut().reset();

        log_info!("Timer reset");
        self.inner.state_changed.emit(&TimerState::Idle);
        self.inner.ticked.emit(&0);
    }

    /// The process is about to be suspended. Ticks stop, but the anchor and
    /// banked time stay, so the wall-clock formula covers the gap.
    pub fn handle_suspend(&self) {
        if self.state() != TimerState::Running {
            return;
        }
        self.cancel_ticker();
        log_info!("Timer ticks suspended");
    }

    /// The process is back. Recomputes once, publishes, restarts ticks.
    pub fn handle_resume_from_suspend(&self) {
        if self.state() != TimerState::Running {
            return;
        }
        let elapsed = self.elapsed_seconds();
        self.spawn_ticker();

        log_info!("Timer ticks restored at {}s", elapsed);
        self.inner.ticked.emit(&elapsed);
    }

    fn ensure_state(&self, action: &'static str, required: TimerState) -> FocusResult<()> {
        let current = self.state();
        if current != required {
            return Err(FocusError::InvalidState {
                action,
                state: current.as_str(),
            });
        }
        Ok(())
    }

    fn spawn_ticker(&self) {
        self.cancel_ticker();

        let weak: Weak<ClockTimerInner> = Rc::downgrade(&self.inner);
        let handle = self.inner.scheduler.schedule_repeating(
            self.inner.tick_interval,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    on_tick(&inner);
                }
            }),
        );

        *self.inner.ticker.borrow_mut() = Some(handle);
    }

    fn cancel_ticker(&self) {
        // Take first so the handle drops outside the borrow.
        let handle = self.inner.ticker.borrow_mut().take();
        if let Some(mut handle) = handle {
            handle.cancel();
        }
    }
}

fn on_tick(inner: &ClockTimerInner) {
    let now = inner.clock.now();
    let elapsed = {
        let mut guard = inner.state.borrow_mut();
        if guard.status != TimerState::Running {
            return;
        }
        guard.sync_elapsed(now)
    };

    log_debug!("Timer tick {}s", elapsed);
    inner.ticked.emit(&elapsed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ManualClock, ManualScheduler};

    struct Harness {
        clock: ManualClock,
        scheduler: ManualScheduler,
        timer: ClockTimer,
        ticks: Rc<RefCell<Vec<u64>>>,
        states: Rc<RefCell<Vec<TimerState>>>,
    }

    fn harness() -> Harness {
        let clock = ManualClock::at_epoch_day();
        let scheduler = ManualScheduler::new(clock.clone());
        let timer = ClockTimer::new(
            Rc::new(clock.clone()),
            Rc::new(scheduler.clone()),
            Duration::from_secs(1),
        );

        let ticks = Rc::new(RefCell::new(Vec::new()));
        let tick_log = ticks.clone();
        timer.ticked().subscribe(move |elapsed| tick_log.borrow_mut().push(*elapsed));

        let states = Rc::new(RefCell::new(Vec::new()));
        let state_log = states.clone();
        timer
            .state_changed()
            .subscribe(move |state| state_log.borrow_mut().push(*state));

        Harness {
            clock,
            scheduler,
            timer,
            ticks,
            states,
        }
    }

    #[test]
    fn start_emits_immediate_tick_then_every_second() {
        let h = harness();
        h.timer.start(0).unwrap();

        assert_eq!(*h.ticks.borrow(), vec![0]);
        assert_eq!(*h.states.borrow(), vec![TimerState::Running]);

        h.scheduler.advance(Duration::from_secs(3));
        assert_eq!(*h.ticks.borrow(), vec![0, 1, 2, 3]);
        assert_eq!(h.timer.elapsed_seconds(), 3);
    }

    #[test]
    fn start_from_offset() {
        let h = harness();
        h.timer.start(350).unwrap();
        h.scheduler.advance(Duration::from_secs(2));

        assert_eq!(*h.ticks.borrow(), vec![350, 351, 352]);
    }

    #[test]
    fn start_while_running_is_rejected() {
        let h = harness();
        h.timer.start(0).unwrap();

        let err = h.timer.start(100).unwrap_err();
        assert_eq!(
            err,
            FocusError::InvalidState {
                action: "start",
                state: "running"
            }
        );
        assert_eq!(h.timer.elapsed_seconds(), 0);
    }

    #[test]
    fn pause_while_idle_changes_nothing() {
        let h = harness();

        let err = h.timer.pause().unwrap_err();

        assert!(matches!(err, FocusError::InvalidState { action: "pause", .. }));
        assert_eq!(h.timer.state(), TimerState::Idle);
        assert_eq!(h.timer.elapsed_seconds(), 0);
        assert!(h.ticks.borrow().is_empty());
        assert!(h.states.borrow().is_empty());
    }

    #[test]
    fn resume_requires_paused() {
        let h = harness();
        assert!(h.timer.resume().is_err());
        h.timer.start(0).unwrap();
        assert!(h.timer.resume().is_err());
    }

    #[test]
    fn pause_cancels_ticks_and_freezes_elapsed() {
        let h = harness();
        h.timer.start(0).unwrap();
        h.scheduler.advance(Duration::from_secs(5));
        h.timer.pause().unwrap();

        let ticks_at_pause = h.ticks.borrow().len();
        h.scheduler.advance(Duration::from_secs(30));

        assert_eq!(h.ticks.borrow().len(), ticks_at_pause);
        assert_eq!(h.timer.elapsed_seconds(), 5);
        assert_eq!(h.scheduler.active_count(), 0);
    }

    #[test]
    fn resume_emits_immediately_and_keeps_banked_time() {
        let h = harness();
        h.timer.start(0).unwrap();
        h.scheduler.advance(Duration::from_secs(10));
        h.timer.pause().unwrap();
        h.scheduler.advance(Duration::from_secs(60));
        h.timer.resume().unwrap();

        assert_eq!(h.ticks.borrow().last().copied(), Some(10));
        h.scheduler.advance(Duration::from_secs(5));
        assert_eq!(h.timer.elapsed_seconds(), 15);
        assert_eq!(
            *h.states.borrow(),
            vec![TimerState::Running, TimerState::Paused, TimerState::Running]
        );
    }

    #[test]
    fn stop_returns_total_and_goes_idle() {
        let h = harness();
        h.timer.start(100).unwrap();
        h.scheduler.advance(Duration::from_secs(20));
        h.timer.pause().unwrap();

        let total = h.timer.stop().unwrap();

        assert_eq!(total, 120);
        assert_eq!(h.timer.state(), TimerState::Idle);
        assert_eq!(h.timer.elapsed_seconds(), 0);
        assert_eq!(h.scheduler.active_count(), 0);
        assert!(h.timer.stop().is_err());
    }

    #[test]
    fn reset_emits_zero_tick_from_any_state() {
        let h = harness();
        h.timer.start(42).unwrap();
        h.scheduler.advance(Duration::from_secs(2));

        h.timer.reset();

        assert_eq!(h.ticks.borrow().last().copied(), Some(0));
        assert_eq!(h.states.borrow().last().copied(), Some(TimerState::Idle));
        assert_eq!(h.timer.elapsed_seconds(), 0);
        assert_eq!(h.scheduler.active_count(), 0);
    }

    #[test]
    fn suspension_does_not_lose_time() {
        let h = harness();
        h.timer.start(0).unwrap();

        h.timer.handle_suspend();
        assert_eq!(h.scheduler.active_count(), 0);

        // Suspended: wall clock moves, nothing fires.
        h.clock.advance(Duration::from_secs(600));
        assert_eq!(*h.ticks.borrow(), vec![0]);

        h.timer.handle_resume_from_suspend();
        assert_eq!(h.ticks.borrow().last().copied(), Some(600));

        h.timer.pause().unwrap();
        assert_eq!(h.timer.elapsed_seconds(), 600);
    }

    #[test]
    fn suspend_notifications_ignored_when_not_running() {
        let h = harness();
        h.timer.handle_suspend();
        h.timer.handle_resume_from_suspend();
        assert!(h.ticks.borrow().is_empty());

        h.timer.start(0).unwrap();
        h.timer.pause().unwrap();
        h.timer.handle_resume_from_suspend();
        assert_eq!(h.scheduler.active_count(), 0);
        assert_eq!(h.timer.state(), TimerState::Paused);
    }

    #[test]
    fn subscriber_pausing_on_tick_sees_no_stale_tick() {
        let h = harness();
        let pauser = h.timer.clone();
        h.timer.ticked().subscribe(move |elapsed| {
            if *elapsed == 2 {
                let _ = pauser.pause();
            }
        });

        h.timer.start(0).unwrap();
        h.scheduler.advance(Duration::from_secs(10));

        assert_eq!(*h.ticks.borrow(), vec![0, 1, 2]);
        assert_eq!(h.timer.state(), TimerState::Paused);
    }
}
