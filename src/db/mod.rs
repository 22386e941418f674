mod helpers;
mod memory;
mod migrations;
mod repository;
mod sqlite;

pub use memory::InMemoryRepository;
pub use repository::{FocusRepository, OwnedSession};
pub use sqlite::Database;
