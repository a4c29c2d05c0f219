pub mod connection;
pub mod feed;
pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use connection::{connect, DbPool};
pub use feed::{ChangeEvent, ChangeKind};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
