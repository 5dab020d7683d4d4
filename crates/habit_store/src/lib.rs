//! Durable [`HabitStore`](habit_core::HabitStore) backends.

pub mod json_dir;
pub mod timeout;

pub use crate::json_dir::JsonDirStore;
pub use crate::timeout::{StoreSettings, TimedStore, DEFAULT_REQUEST_TIMEOUT};
