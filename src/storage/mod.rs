pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use sqlite::{OpenMode, SqliteStore};
pub use traits::{Constraint, RuleStore, StoreError, StoreResult};
