use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use chrono::FixedOffset;

use crate::{
    error::FocusError,
    events::{EventChannel, SubscriptionId},
    focus::SessionAccountant,
    models::Task,
    sound::AmbientSound,
    timer::TimerState,
};

use super::{
    format::{format_clock, format_planned_duration, format_short_time, format_window},
    view_models::{
        button_title, ErrorNotice, FocusViewState, SoundViewModel, TaskCardViewModel,
        TimerViewModel,
    },
};

struct Subscriptions {
    state: SubscriptionId,
    tick: SubscriptionId,
    task: SubscriptionId,
    ledger: SubscriptionId,
    error: SubscriptionId,
    sound: SubscriptionId,
    playing: SubscriptionId,
}

struct PresenterInner {
    accountant: SessionAccountant,
    offset: FixedOffset,
    view: RefCell<FocusViewState>,
    changed: EventChannel<FocusViewState>,
    subscriptions: RefCell<Option<Subscriptions>>,
}

impl Drop for PresenterInner {
    fn drop(&mut self) {
        if let Some(ids) = self.subscriptions.get_mut().take() {
            let timer = self.accountant.timer();
            let sound = self.accountant.sound();
            timer.state_changed().unsubscribe(ids.state);
            timer.ticked().unsubscribe(ids.tick);
            self.accountant.task_loaded().unsubscribe(ids.task);
            self.accountant.ledger_changed().unsubscribe(ids.ledger);
            self.accountant.error().unsubscribe(ids.error);
            sound.current_sound_changed().unsubscribe(ids.sound);
            sound.is_playing_changed().unsubscribe(ids.playing);
        }
    }
}

/// Turns engine events into display-ready view state and republishes it on
/// [`FocusPresenter::changed`].
#[derive(Clone)]
pub struct FocusPresenter {
    inner: Rc<PresenterInner>,
}

impl FocusPresenter {
    /// `offset` is the local UTC offset used for task window times.
    pub fn new(accountant: SessionAccountant, offset: FixedOffset) -> Self {
        let inner = Rc::new(PresenterInner {
            accountant,
            offset,
            view: RefCell::new(FocusViewState::default()),
            changed: EventChannel::new(),
            subscriptions: RefCell::new(None),
        });

        let accountant = &inner.accountant;
        let timer = accountant.timer();
        let sound = accountant.sound();
        let ids = Subscriptions {
            state: timer
                .state_changed()
                .subscribe(listener(&inner, |presenter, _: &TimerState| {
                    presenter.rebuild(None)
                })),
            tick: timer
                .ticked()
                .subscribe(listener(&inner, |presenter, elapsed: &u64| {
                    presenter.rebuild(Some(*elapsed))
                })),
            task: accountant
                .task_loaded()
                .subscribe(listener(&inner, |presenter, _: &Option<Task>| {
                    presenter.rebuild(None)
                })),
            ledger: accountant
                .ledger_changed()
                .subscribe(listener(&inner, |presenter, _: &Task| presenter.rebuild(None))),
            error: accountant
                .error()
                .subscribe(listener(&inner, |presenter, err: &FocusError| {
                    presenter.show_error(err.clone())
                })),
            sound: sound
                .current_sound_changed()
                .subscribe(listener(&inner, |presenter, _: &AmbientSound| {
                    presenter.rebuild(None)
                })),
            playing: sound
                .is_playing_changed()
                .subscribe(listener(&inner, |presenter, _: &bool| {
                    presenter.rebuild(None)
                })),
        };
        *inner.subscriptions.borrow_mut() = Some(ids);

        let presenter = Self { inner };
        presenter.rebuild(None);
        presenter
    }

    pub fn view(&self) -> FocusViewState {
        self.inner.view.borrow().clone()
    }

    pub fn changed(&self) -> &EventChannel<FocusViewState> {
        &self.inner.changed
    }

    /// Rebuilds from the current engine state.
    pub fn refresh(&self) {
        self.rebuild(None);
    }

    pub fn dismiss_error(&self) {
        self.inner.view.borrow_mut().error = None;
        self.publish();
    }

    fn show_error(&self, err: FocusError) {
        self.inner.view.borrow_mut().error = Some(ErrorNotice::from(err));
        self.publish();
    }

    fn rebuild(&self, ticked: Option<u64>) {
        let accountant = &self.inner.accountant;
        let timer = accountant.timer();
        let state = timer.state();
        let elapsed = ticked.unwrap_or_else(|| timer.elapsed_seconds());
        let task = accountant.current_task();

        // The timer already carries the task's earlier sessions while it runs.
        let focused = match (&task, state) {
            (Some(task), TimerState::Idle) => task.total_focused_seconds(),
            _ => elapsed,
        };
        let progress = task
            .as_ref()
            .map(|task| progress_ratio(focused, task.planned_duration_secs()))
            .unwrap_or(0.0);

        let timer_view = TimerViewModel {
            display: format_clock(focused),
            elapsed_seconds: focused,
            progress,
            state,
            button_title: button_title(state).to_string(),
        };
        let task_view = task.as_ref().map(|task| TaskCardViewModel {
            task_id: task.id.clone(),
            title: task.title.clone(),
            window: format_window(task, self.inner.offset),
            planned_duration: format_planned_duration(task),
            focused_time: format_short_time(focused as i64),
            progress,
        });
        let sound = accountant.sound();
        let current_sound = sound.current_sound();
        let sound_view = SoundViewModel {
            sound: current_sound,
            display_name: current_sound.display_name().to_string(),
            is_playing: sound.is_playing(),
        };

        {
            let mut view = self.inner.view.borrow_mut();
            view.timer = timer_view;
            view.task = task_view;
            view.sound = sound_view;
        }
        self.publish();
    }

    fn publish(&self) {
        let snapshot = self.view();
        self.inner.changed.emit(&snapshot);
    }
}

/// `focused / planned`, capped at 1.0; 0.0 without a planned window.
fn progress_ratio(focused: u64, planned: u64) -> f64 {
    if planned == 0 {
        return 0.0;
    }
    (focused as f64 / planned as f64).min(1.0)
}

fn listener<T, F>(inner: &Rc<PresenterInner>, handler: F) -> impl FnMut(&T) + 'static
where
    T: 'static,
    F: Fn(&FocusPresenter, &T) + 'static,
{
    let weak: Weak<PresenterInner> = Rc::downgrade(inner);
    move |event: &T| {
        if let Some(inner) = weak.upgrade() {
            handler(&FocusPresenter { inner }, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_capped() {
        assert_eq!(progress_ratio(0, 0), 0.0);
        assert_eq!(progress_ratio(1800, 3600), 0.5);
        assert_eq!(progress_ratio(7200, 3600), 1.0);
    }
}
