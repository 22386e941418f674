mod accountant;
pub mod accounting;

pub use accountant::SessionAccountant;
pub use accounting::{completed_seconds_excluding, session_delta};
