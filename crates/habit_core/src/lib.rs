pub mod calendar;
pub mod color;
pub mod date_key;
pub mod engine;
pub mod habit;
pub mod profile;
pub mod service;
pub mod store;
pub mod streak;
pub mod sync;

pub use crate::date_key::DateKey;
pub use crate::engine::{CompletionEngine, CompletionView, EngineSettings};
pub use crate::habit::{Habit, HabitDraft, HabitDuration, HabitId, SubtaskId};
pub use crate::service::{HabitTracker, HabitTrackerBuilder};
pub use crate::store::{HabitStore, IdentityProvider, OwnerId, StoreError};
