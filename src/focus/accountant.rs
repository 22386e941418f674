use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::{
    db::FocusRepository,
    error::{FocusError, FocusResult},
    events::{EventChannel, SubscriptionId},
    log_debug, log_error, log_info, log_warn,
    models::{Session, SessionStatus, Task},
    scheduler::Clock,
    settings::{EngineConfig, SettingsStore, SoundSettings},
    sound::{AmbientSound, CrossfadeScheduler},
    timer::{ClockTimer, TimerState},
};

use super::accounting::{completed_seconds_excluding, session_delta};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Insert,
    Update,
}

/// A ledger write that has not reached the repository yet.
#[derive(Debug, Clone)]
struct LedgerWrite {
    kind: WriteKind,
    task_id: String,
    session: Session,
}

#[derive(Default)]
struct LedgerState {
    current_task: Option<Task>,
    active_session_id: Option<String>,
    /// Writes that failed, oldest first. At most one entry per session.
    pending: Vec<LedgerWrite>,
    ticks_since_save: u32,
}

impl LedgerState {
    fn active_session_mut(&mut self) -> Option<(&mut Task, String)> {
        let id = self.active_session_id.clone()?;
        let task = self.current_task.as_mut()?;
        Some((task, id))
    }
}

struct AccountantInner {
    repo: Rc<dyn FocusRepository>,
    clock: Rc<dyn Clock>,
    timer: ClockTimer,
    sound: CrossfadeScheduler,
    settings: RefCell<Option<Rc<SettingsStore>>>,
    config: EngineConfig,
    ledger: RefCell<LedgerState>,
    task_loaded: EventChannel<Option<Task>>,
    ledger_changed: EventChannel<Task>,
    error: EventChannel<FocusError>,
    tick_subscription: Cell<Option<SubscriptionId>>,
}

impl Drop for AccountantInner {
    fn drop(&mut self) {
        if let Some(id) = self.tick_subscription.take() {
            self.timer.ticked().unsubscribe(id);
        }
    }
}

/// Binds a [`ClockTimer`] to the session ledger of the current task.
///
/// The timer runs on the task's cumulative focus time, so each session only
/// records `timer elapsed - other completed sessions`. Every error is both
/// returned and published on [`SessionAccountant::error`]. Persistence
/// failures never roll back the timer; the failed write is retried before the
/// next one.
#[derive(Clone)]
pub struct SessionAccountant {
    inner: Rc<AccountantInner>,
}

impl SessionAccountant {
    pub fn new(
        repo: Rc<dyn FocusRepository>,
        clock: Rc<dyn Clock>,
        timer: ClockTimer,
        sound: CrossfadeScheduler,
        config: EngineConfig,
    ) -> Self {
        let inner = Rc::new(AccountantInner {
            repo,
            clock,
            timer,
            sound,
            settings: RefCell::new(None),
            config,
            ledger: RefCell::new(LedgerState::default()),
            task_loaded: EventChannel::new(),
            ledger_changed: EventChannel::new(),
            error: EventChannel::new(),
            tick_subscription: Cell::new(None),
        });

        let weak: Weak<AccountantInner> = Rc::downgrade(&inner);
        let id = inner.timer.ticked().subscribe(move |elapsed| {
            if let Some(inner) = weak.upgrade() {
                SessionAccountant { inner }.on_tick(*elapsed);
            }
        });
        inner.tick_subscription.set(Some(id));

        Self { inner }
    }

    /// Persist sound choices through `store` from now on.
    pub fn attach_settings(&self, store: Rc<SettingsStore>) {
        *self.inner.settings.borrow_mut() = Some(store);
    }

    pub fn timer(&self) -> &ClockTimer {
        &self.inner.timer
    }

    pub fn sound(&self) -> &CrossfadeScheduler {
        &self.inner.sound
    }

    pub fn task_loaded(&self) -> &EventChannel<Option<Task>> {
        &self.inner.task_loaded
    }

    /// The current task after start, pause, resume, stop or recovery changed
    /// its sessions. Heartbeats are not published here.
    pub fn ledger_changed(&self) -> &EventChannel<Task> {
        &self.inner.ledger_changed
    }

    pub fn error(&self) -> &EventChannel<FocusError> {
        &self.inner.error
    }

    pub fn current_task(&self) -> Option<Task> {
        self.inner.ledger.borrow().current_task.clone()
    }

    pub fn active_session(&self) -> Option<Session> {
        let ledger = self.inner.ledger.borrow();
        let id = ledger.active_session_id.as_deref()?;
        ledger
            .current_task
            .as_ref()?
            .sessions
            .iter()
            .find(|session| session.id == id)
            .cloned()
    }

    pub fn pending_write_count(&self) -> usize {
        self.inner.ledger.borrow().pending.len()
    }

    pub fn start_focus(&self) -> FocusResult<()> {
        let timer_state = self.inner.timer.state();
        if timer_state != TimerState::Idle {
            return self.fail(FocusError::InvalidState {
                action: "start",
                state: timer_state.as_str(),
            });
        }

        let now = self.inner.clock.now();
        let prepared = {
            let mut ledger = self.inner.ledger.borrow_mut();
            ledger.current_task.as_mut().map(|task| {
                let mut writes = Vec::new();
                // Leftovers from an earlier run would break the one-active-session rule.
                for stale in task.sessions.iter_mut().filter(|s| s.status.is_active()) {
                    stale.complete(now);
                    writes.push(LedgerWrite {
                        kind: WriteKind::Update,
                        task_id: task.id.clone(),
                        session: stale.clone(),
                    });
                }

                let baseline = completed_seconds_excluding(task, None);
                let session = Session::begin(now);
                log_info!(
                    "Starting session {} on task {} from {}s",
                    session.id,
                    task.id,
                    baseline
                );
                writes.push(LedgerWrite {
                    kind: WriteKind::Insert,
                    task_id: task.id.clone(),
                    session: session.clone(),
                });
                let session_id = session.id.clone();
                task.sessions.push(session);
                (baseline, writes, session_id)
            })
        };
        let Some((baseline, writes, session_id)) = prepared else {
            return self.fail(FocusError::NoActiveTask);
        };
        {
            let mut ledger = self.inner.ledger.borrow_mut();
            ledger.active_session_id = Some(session_id);
            ledger.ticks_since_save = 0;
        }

        let saved = self.persist_all(writes);

        if let Err(err) = self.inner.timer.start(baseline) {
            log_error!("Timer refused to start: {}", err);
            return self.fail(err);
        }
        self.resume_selected_sound();
        self.publish_ledger();

        saved
    }

    pub fn pause_focus(&self) -> FocusResult<()> {
        if !self.has_active_session() {
            return self.fail(FocusError::NoActiveSession);
        }
        if let Err(err) = self.inner.timer.pause() {
            return self.fail(err);
        }
        self.inner.sound.pause();

        let elapsed = self.inner.timer.elapsed_seconds();
        let write = self.update_active_session(elapsed, |session, delta| {
            session.elapsed_seconds = delta;
            session.pause();
        });
        self.publish_ledger();

        match write {
            Some(write) => {
                log_info!(
                    "Paused session {} at {}s",
                    write.session.id,
                    write.session.elapsed_seconds
                );
                self.persist(write)
            }
            None => Ok(()),
        }
    }

    pub fn resume_focus(&self) -> FocusResult<()> {
        if !self.has_active_session() {
            return self.fail(FocusError::NoActiveSession);
        }
        if let Err(err) = self.inner.timer.resume() {
            return self.fail(err);
        }

        let elapsed = self.inner.timer.elapsed_seconds();
        let write = self.update_active_session(elapsed, |session, _| {
            session.resume();
        });
        self.resume_selected_sound();
        self.publish_ledger();

        match write {
            Some(write) => {
                log_info!("Resumed session {}", write.session.id);
                self.persist(write)
            }
            None => Ok(()),
        }
    }

    /// Completes the active session and returns the timer's final cumulative
    /// seconds.
    pub fn stop_focus(&self) -> FocusResult<u64> {
        if !self.has_active_session() {
            return self.fail(FocusError::NoActiveSession);
        }

        let total = match self.inner.timer.state() {
            TimerState::Idle => self.ledger_total(),
            _ => match self.inner.timer.stop() {
                Ok(total) => total,
                Err(err) => return self.fail(err),
            },
        };
        self.inner.sound.pause();

        let now = self.inner.clock.now();
        let write = self.update_active_session(total, |session, delta| {
            session.elapsed_seconds = delta;
            session.complete(now);
        });
        {
            let mut ledger = self.inner.ledger.borrow_mut();
            ledger.active_session_id = None;
            ledger.ticks_since_save = 0;
        }
        self.publish_ledger();

        match write {
            Some(write) => {
                log_info!(
                    "Completed session {} with {}s (task total {}s)",
                    write.session.id,
                    write.session.elapsed_seconds,
                    total
                );
                self.persist(write).map(|_| total)
            }
            None => Ok(total),
        }
    }

    /// Hands focus over to `task`. A running or paused session on the
    /// previous task is stopped first; the switch happens even if saving
    /// that session fails.
    pub fn switch_active_task(&self, task: Option<Task>) -> FocusResult<()> {
        let stopped = if self.has_active_session() {
            self.stop_focus().map(|_| ())
        } else {
            Ok(())
        };

        let previous = self
            .inner
            .ledger
            .borrow()
            .current_task
            .as_ref()
            .map(|task| task.id.clone());
        let next = task.as_ref().map(|task| task.id.clone());
        if previous != next {
            log_info!("Active task changed from {:?} to {:?}", previous, next);
        }

        self.inner.ledger.borrow_mut().current_task = task.clone();
        self.inner.task_loaded.emit(&task);
        stopped
    }

    /// Loads the task scheduled for now, with its sessions, and makes it the
    /// active task. A failed read clears the active task.
    pub fn load_current_task(&self) -> FocusResult<Option<Task>> {
        match self.fetch_task_for_now() {
            Ok(task) => {
                self.switch_active_task(task.clone())?;
                Ok(task)
            }
            Err(err) => {
                log_error!("Failed to load current task: {}", err);
                // Whatever the switch reports, the fetch failure is the headline.
                let _ = self.switch_active_task(None);
                self.fail(err)
            }
        }
    }

    /// Switches tasks when the schedule has moved on. Returns whether a
    /// switch happened. A failed read keeps the current task.
    pub fn check_task_boundary(&self) -> FocusResult<bool> {
        let now = self.inner.clock.now();
        let scheduled = match self.inner.repo.fetch_active_task_for_now(now) {
            Ok(task) => task,
            Err(err) => return self.fail(FocusError::fetch_failed(&err)),
        };

        let current = self
            .inner
            .ledger
            .borrow()
            .current_task
            .as_ref()
            .map(|task| task.id.clone());
        if current == scheduled.as_ref().map(|task| task.id.clone()) {
            return Ok(false);
        }

        let next = match scheduled {
            Some(task) => match self.with_sessions(task) {
                Ok(task) => Some(task),
                Err(err) => return self.fail(err),
            },
            None => None,
        };
        log_info!("Task boundary passed");
        self.switch_active_task(next)?;
        Ok(true)
    }

    /// Completes sessions that an earlier process left running or paused,
    /// keeping their last persisted seconds. Returns how many were closed.
    pub fn recover_interrupted_sessions(&self) -> FocusResult<usize> {
        let orphans = match self.inner.repo.fetch_incomplete_sessions() {
            Ok(orphans) => orphans,
            Err(err) => return self.fail(FocusError::fetch_failed(&err)),
        };

        let active = self.inner.ledger.borrow().active_session_id.clone();
        let now = self.inner.clock.now();
        let mut recovered = 0;
        for mut orphan in orphans {
            if active.as_deref() == Some(orphan.session.id.as_str()) {
                continue;
            }
            orphan.session.complete(now);
            if let Err(err) = self.inner.repo.save(&orphan.session) {
                log_error!("Failed to recover session {}: {:#}", orphan.session.id, err);
                return self.fail(FocusError::save_failed(&err));
            }

            let mut ledger = self.inner.ledger.borrow_mut();
            if let Some(task) = ledger
                .current_task
                .as_mut()
                .filter(|task| task.id == orphan.task_id)
            {
                if let Some(session) = task.session_mut(&orphan.session.id) {
                    *session = orphan.session.clone();
                }
            }
            recovered += 1;
        }

        if recovered > 0 {
            log_warn!("Recovered {} interrupted session(s)", recovered);
            self.publish_ledger();
        }
        Ok(recovered)
    }

    /// Retries writes that failed earlier.
    pub fn flush_pending_writes(&self) -> FocusResult<()> {
        self.persist_all(Vec::new())
    }

    pub fn select_sound(&self, sound: AmbientSound) -> FocusResult<()> {
        if let Err(err) = self.inner.sound.play(sound) {
            return self.fail(err);
        }
        self.remember_sound()
    }

    /// Returns the new playing flag.
    pub fn toggle_sound_playback(&self) -> bool {
        self.inner.sound.toggle_playback()
    }

    pub fn set_volume(&self, level: f32) -> FocusResult<f32> {
        let applied = self.inner.sound.set_volume(level);
        self.remember_sound().map(|_| applied)
    }

    /// Applies the persisted volume and selects the persisted sound without
    /// starting playback; it starts with the next focus run.
    pub fn restore_sound_settings(&self) -> FocusResult<()> {
        let Some(store) = self.inner.settings.borrow().clone() else {
            return Ok(());
        };
        let saved = match store.sound() {
            Ok(saved) => saved,
            Err(err) => return self.fail(FocusError::fetch_failed(&err)),
        };

        self.inner.sound.set_volume(saved.volume);
        if !saved.sound.is_silent() {
            if let Err(err) = self.inner.sound.play(saved.sound) {
                return self.fail(err);
            }
            if self.inner.timer.state() != TimerState::Running {
                self.inner.sound.pause();
            }
        }
        Ok(())
    }

    /// Stops ticking before the process is suspended and saves the running
    /// session so a killed process loses as little as possible.
    pub fn handle_suspend(&self) -> FocusResult<()> {
        self.inner.timer.handle_suspend();
        let snapshot = {
            let ledger = self.inner.ledger.borrow();
            let id = ledger.active_session_id.as_deref();
            ledger.current_task.as_ref().and_then(|task| {
                task.sessions
                    .iter()
                    .find(|session| Some(session.id.as_str()) == id)
                    .map(|session| LedgerWrite {
                        kind: WriteKind::Update,
                        task_id: task.id.clone(),
                        session: session.clone(),
                    })
            })
        };
        match snapshot {
            Some(write) => self.persist(write),
            None => Ok(()),
        }
    }

    pub fn handle_resume_from_suspend(&self) {
        self.inner.timer.handle_resume_from_suspend();
    }

    fn on_tick(&self, elapsed: u64) {
        if self.inner.timer.state() != TimerState::Running {
            return;
        }

        let heartbeat = self.inner.config.heartbeat_every_ticks.max(1);
        let write = {
            let mut ledger = self.inner.ledger.borrow_mut();
            let Some((task, id)) = ledger.active_session_mut() else {
                return;
            };
            let delta = session_delta(elapsed, completed_seconds_excluding(task, Some(id.as_str())));
            let task_id = task.id.clone();
            let Some(session) = task.session_mut(&id) else {
                return;
            };
            if session.status != SessionStatus::InProgress {
                return;
            }
            session.elapsed_seconds = delta;
            let snapshot = session.clone();

            ledger.ticks_since_save += 1;
            if ledger.ticks_since_save < heartbeat {
                return;
            }
            ledger.ticks_since_save = 0;
            LedgerWrite {
                kind: WriteKind::Update,
                task_id,
                session: snapshot,
            }
        };

        log_debug!(
            "Heartbeat for session {} at {}s",
            write.session.id,
            write.session.elapsed_seconds
        );
        // Reported on the error channel; ticks have no caller to return to.
        let _ = self.persist(write);
    }

    fn publish_ledger(&self) {
        let task = self.inner.ledger.borrow().current_task.clone();
        if let Some(task) = task {
            self.inner.ledger_changed.emit(&task);
        }
    }

    fn has_active_session(&self) -> bool {
        self.inner.ledger.borrow().active_session_id.is_some()
    }

    /// Completed history plus the active session's last known seconds.
    fn ledger_total(&self) -> u64 {
        let ledger = self.inner.ledger.borrow();
        let id = ledger.active_session_id.as_deref();
        ledger
            .current_task
            .as_ref()
            .map(|task| {
                task.sessions
                    .iter()
                    .filter(|s| s.status == SessionStatus::Completed || Some(s.id.as_str()) == id)
                    .map(|s| s.elapsed_seconds)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Applies `change` to the active session with its delta for the given
    /// cumulative seconds and returns the write to persist.
    fn update_active_session<F>(&self, cumulative: u64, change: F) -> Option<LedgerWrite>
    where
        F: FnOnce(&mut Session, u64),
    {
        let mut ledger = self.inner.ledger.borrow_mut();
        let (task, id) = ledger.active_session_mut()?;
        let delta = session_delta(cumulative, completed_seconds_excluding(task, Some(id.as_str())));
        let task_id = task.id.clone();
        let session = task.session_mut(&id)?;
        change(&mut *session, delta);
        Some(LedgerWrite {
            kind: WriteKind::Update,
            task_id,
            session: session.clone(),
        })
    }

    fn persist(&self, write: LedgerWrite) -> FocusResult<()> {
        self.persist_all(vec![write])
    }

    /// Writes queued failures first, then `writes`, in order. Stops at the
    /// first failure and keeps it and everything after it for later.
    fn persist_all(&self, writes: Vec<LedgerWrite>) -> FocusResult<()> {
        let queue = {
            let mut ledger = self.inner.ledger.borrow_mut();
            let mut queue = std::mem::take(&mut ledger.pending);
            for write in writes {
                enqueue(&mut queue, write);
            }
            queue
        };

        let mut remaining = queue.into_iter();
        while let Some(write) = remaining.next() {
            if let Err(err) = self.apply(&write) {
                log_error!("Failed to write session {}: {:#}", write.session.id, err);
                let mut ledger = self.inner.ledger.borrow_mut();
                let newer = std::mem::take(&mut ledger.pending);
                ledger.pending.push(write);
                ledger.pending.extend(remaining);
                for write in newer {
                    enqueue(&mut ledger.pending, write);
                }
                drop(ledger);
                return self.fail(FocusError::save_failed(&err));
            }
        }
        Ok(())
    }

    fn apply(&self, write: &LedgerWrite) -> anyhow::Result<()> {
        match write.kind {
            WriteKind::Insert => self.inner.repo.insert(&write.task_id, &write.session),
            WriteKind::Update => self.inner.repo.save(&write.session),
        }
    }

    fn fetch_task_for_now(&self) -> FocusResult<Option<Task>> {
        let now = self.inner.clock.now();
        match self.inner.repo.fetch_active_task_for_now(now) {
            Ok(Some(task)) => self.with_sessions(task).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(FocusError::fetch_failed(&err)),
        }
    }

    fn with_sessions(&self, mut task: Task) -> FocusResult<Task> {
        task.sessions = self
            .inner
            .repo
            .fetch_all_sessions_for_task(&task.id)
            .map_err(|err| FocusError::fetch_failed(&err))?;
        Ok(task)
    }

    fn resume_selected_sound(&self) {
        if !self.inner.sound.current_sound().is_silent() {
            self.inner.sound.resume();
        }
    }

    fn remember_sound(&self) -> FocusResult<()> {
        let Some(store) = self.inner.settings.borrow().clone() else {
            return Ok(());
        };
        let settings = SoundSettings {
            sound: self.inner.sound.current_sound(),
            volume: self.inner.sound.volume(),
        };
        if let Err(err) = store.update_sound(settings) {
            log_warn!("Failed to remember sound choice: {:#}", err);
            return self.fail(FocusError::save_failed(&err));
        }
        Ok(())
    }

    fn fail<T>(&self, err: FocusError) -> FocusResult<T> {
        self.inner.error.emit(&err);
        Err(err)
    }
}

/// Queues `write`, folding it into an earlier write for the same session.
fn enqueue(queue: &mut Vec<LedgerWrite>, write: LedgerWrite) {
    match queue
        .iter_mut()
        .find(|queued| queued.session.id == write.session.id)
    {
        Some(queued) => queued.session = write.session,
        None => queue.push(write),
    }
}
