pub mod hot_reload;
pub mod loader;

pub use hot_reload::{PolicyHandle, PolicyWatcher};
pub use loader::{load_policy, PolicyError, PolicyLoader};
