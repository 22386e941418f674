use serde::Serialize;

use crate::{error::FocusError, sound::AmbientSound, timer::TimerState};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerViewModel {
    pub display: String,
    pub elapsed_seconds: u64,
    pub progress: f64,
    pub state: TimerState,
    pub button_title: String,
}

impl Default for TimerViewModel {
    fn default() -> Self {
        Self {
            display: "00:00".to_string(),
            elapsed_seconds: 0,
            progress: 0.0,
            state: TimerState::Idle,
            button_title: button_title(TimerState::Idle).to_string(),
        }
    }
}

pub fn button_title(state: TimerState) -> &'static str {
    match state {
        TimerState::Idle => "Start Focus",
        TimerState::Running => "Pause",
        TimerState::Paused => "Resume",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCardViewModel {
    pub task_id: String,
    pub title: String,
    pub window: String,
    pub planned_duration: String,
    pub focused_time: String,
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundViewModel {
    pub sound: AmbientSound,
    pub display_name: String,
    pub is_playing: bool,
}

impl Default for SoundViewModel {
    fn default() -> Self {
        Self {
            sound: AmbientSound::None,
            display_name: AmbientSound::None.display_name().to_string(),
            is_playing: false,
        }
    }
}

/// A dismissible notice for the last error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    pub error: FocusError,
    pub message: String,
}

impl From<FocusError> for ErrorNotice {
    fn from(error: FocusError) -> Self {
        let message = error.to_string();
        Self { error, message }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusViewState {
    pub timer: TimerViewModel,
    pub task: Option<TaskCardViewModel>,
    pub sound: SoundViewModel,
    pub error: Option<ErrorNotice>,
}
