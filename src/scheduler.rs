//! Wall clock and repeating-callback scheduling.
//!
//! The timer and the crossfade ramp both run on a [`Scheduler`], so tests drive
//! them with [`ManualScheduler`] instead of sleeping. Everything here lives on a
//! single logical thread; callbacks are not `Send`.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Stops a repeating callback. Cancelling twice is harmless, and dropping the
/// handle cancels as well.
pub struct CancellationHandle {
    cancelled: Rc<Cell<bool>>,
    abort: Option<tokio::task::AbortHandle>,
}

impl CancellationHandle {
    fn new(cancelled: Rc<Cell<bool>>, abort: Option<tokio::task::AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    pub fn cancel(&mut self) {
        self.cancelled.set(true);
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

impl Drop for CancellationHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub type RepeatingCallback = Box<dyn FnMut()>;

pub trait Scheduler {
    /// Runs `callback` every `interval`, first one interval from now.
    fn schedule_repeating(&self, interval: Duration, callback: RepeatingCallback)
        -> CancellationHandle;
}

/// Repeating callbacks on the current tokio `LocalSet`.
///
/// Must be used from inside `LocalSet::run_until` (or `block_on`), since the
/// callbacks are spawned with `spawn_local`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule_repeating(
        &self,
        interval: Duration,
        mut callback: RepeatingCallback,
    ) -> CancellationHandle {
        let cancelled = Rc::new(Cell::new(false));
        let flag = cancelled.clone();

        let handle = tokio::task::spawn_local(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if flag.get() {
                    break;
                }
                callback();
            }
        });

        CancellationHandle::new(cancelled, Some(handle.abort_handle()))
    }
}

/// Clock whose time only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    /// Monday 2025-01-06 09:00 UTC, a readable starting point for tests.
    pub fn at_epoch_day() -> Self {
        Self::new(
            Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0)
                .single()
                .unwrap_or_default(),
        )
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }

    /// Moves time forward without firing anything, which is what an OS
    /// suspension looks like to the process.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        self.now.set(self.now.get() + delta);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

struct ManualEntry {
    interval: chrono::Duration,
    next_due: Cell<DateTime<Utc>>,
    cancelled: Rc<Cell<bool>>,
    callback: RefCell<RepeatingCallback>,
}

/// Deterministic scheduler bound to a [`ManualClock`].
#[derive(Clone)]
pub struct ManualScheduler {
    clock: ManualClock,
    entries: Rc<RefCell<Vec<Rc<ManualEntry>>>>,
}

impl ManualScheduler {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            entries: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Live (not cancelled) repeating callbacks.
    pub fn active_count(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| !entry.cancelled.get())
            .count()
    }

    /// Advances the clock by `by`, firing every callback that comes due, in
    /// due-time order. Callbacks see the clock set to their own due time.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let target = self.clock.now() + by;

        loop {
            self.entries
                .borrow_mut()
                .retain(|entry| !entry.cancelled.get());

            let next = self
                .entries
                .borrow()
                .iter()
                .filter(|entry| entry.next_due.get() <= target)
                .min_by_key(|entry| entry.next_due.get())
                .cloned();

            let Some(entry) = next else {
                self.clock.set(target);
                break;
            };

            let due = entry.next_due.get();
            if due > self.clock.now() {
                self.clock.set(due);
            }
            entry.next_due.set(due + entry.interval);
            if let Ok(mut callback) = entry.callback.try_borrow_mut() {
                (*callback)();
            };
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(
        &self,
        interval: Duration,
        callback: RepeatingCallback,
    ) -> CancellationHandle {
        let cancelled = Rc::new(Cell::new(false));
        let interval = chrono::Duration::from_std(interval)
            .ok()
            .filter(|interval| *interval > chrono::Duration::zero())
            .unwrap_or_else(|| chrono::Duration::milliseconds(1));

        self.entries.borrow_mut().push(Rc::new(ManualEntry {
            interval,
            next_due: Cell::new(self.clock.now() + interval),
            cancelled: cancelled.clone(),
            callback: RefCell::new(callback),
        }));

        CancellationHandle::new(cancelled, None)
    }
}
