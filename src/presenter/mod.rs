pub mod format;
mod adapter;
pub mod view_models;

pub use format::{format_clock, format_short_time, format_total_time};
pub use adapter::FocusPresenter;
pub use view_models::{
    ErrorNotice, FocusViewState, SoundViewModel, TaskCardViewModel, TimerViewModel,
};
