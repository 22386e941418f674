pub mod controller;
pub mod state;

pub use controller::ClockTimer;
pub use state::{ClockState, TimerState};
