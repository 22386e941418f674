mod session;
mod task;

pub use session::{Session, SessionStatus};
pub use task::Task;
