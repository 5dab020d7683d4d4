use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    calendar,
    engine::{CompletionEngine, CompletionView, EngineError, EngineSettings},
    habit::{Habit, HabitDraft, HabitError, HabitId, SubtaskId},
    profile::{ProfileSummary, UserProfile},
    store::{DecodeFailure, HabitStore, IdentityProvider, MemoryStore, OwnerId, SessionIdentity, StoreError},
    sync::{self, FlushReport, WriteQueue},
};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("habit `{0}` is not loaded")]
    UnknownHabit(HabitId),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Habit(#[from] HabitError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A value that is already applied locally, plus how the durable write went.
///
/// `write` is `Err(StoreError::NotAuthenticated)` when nobody is signed in and
/// `Err(StoreError::WriteFailure { .. })` when the write was queued for retry.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub write: Result<(), StoreError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: Vec<DecodeFailure>,
    /// Set when the read failed; the previous list is kept in that case.
    pub error: Option<StoreError>,
}

/// Local cache of the signed-in user's habits in front of a [`HabitStore`].
pub struct HabitTracker {
    store: Box<dyn HabitStore>,
    identity: Box<dyn IdentityProvider>,
    settings: EngineSettings,
    habits: RwLock<Vec<Habit>>,
    pending: Mutex<WriteQueue>,
}

pub struct HabitTrackerBuilder {
    store: Option<Box<dyn HabitStore>>,
    identity: Option<Box<dyn IdentityProvider>>,
    settings: EngineSettings,
}

impl HabitTrackerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            identity: None,
            settings: EngineSettings::default(),
        }
    }

    pub fn with_store(mut self, store: impl HabitStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn with_identity(mut self, identity: impl IdentityProvider + 'static) -> Self {
        self.identity = Some(Box::new(identity));
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Defaults to an in-memory store and a signed-out session.
    pub fn build(self) -> HabitTracker {
        HabitTracker {
            store: self
                .store
                .unwrap_or_else(|| Box::new(MemoryStore::new())),
            identity: self
                .identity
                .unwrap_or_else(|| Box::new(SessionIdentity::default())),
            settings: self.settings,
            habits: RwLock::new(Vec::new()),
            pending: Mutex::new(WriteQueue::new()),
        }
    }
}

impl Default for HabitTrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HabitTracker {
    pub fn builder() -> HabitTrackerBuilder {
        HabitTrackerBuilder::new()
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub fn current_owner(&self) -> Option<OwnerId> {
        self.identity.current_owner()
    }

    /// One-shot fetch of the owner's collection, replacing the local list.
    #[instrument(skip(self))]
    pub fn load(&self) -> LoadReport {
        let Some(owner) = self.identity.current_owner() else {
            warn!("not signed in, skipping habit load");
            return LoadReport {
                error: Some(StoreError::NotAuthenticated),
                ..LoadReport::default()
            };
        };

        if self.pending_writes() > 0 {
            let flushed = self.flush();
            debug!(delivered = flushed.written.len(), still_pending = flushed.still_pending, "retried queued writes before load");
        }

        match self.store.fetch_all(&owner) {
            Ok(report) => {
                info!(%owner, loaded = report.habits.len(), skipped = report.skipped.len(), "habits loaded");
                let loaded = report.habits.len();
                let mut habits = report.habits;
                // Writes still queued are newer than what the store returned.
                let queued: Vec<Habit> = self
                    .pending
                    .lock()
                    .queued_habits(&owner)
                    .cloned()
                    .collect();
                for queued in queued {
                    match habits.iter_mut().find(|habit| habit.id == queued.id) {
                        Some(stored) if stored.revision <= queued.revision => *stored = queued,
                        Some(_) => {}
                        None => habits.push(queued),
                    }
                }
                *self.habits.write() = habits;
                LoadReport {
                    loaded,
                    skipped: report.skipped,
                    error: None,
                }
            }
            Err(err) => {
                warn!(%owner, %err, "habit load failed, keeping last known list");
                LoadReport {
                    loaded: 0,
                    skipped: Vec::new(),
                    error: Some(err),
                }
            }
        }
    }

    pub fn habits(&self) -> Vec<Habit> {
        self.habits.read().clone()
    }

    pub fn habit(&self, id: &HabitId) -> Option<Habit> {
        self.habits.read().iter().find(|habit| &habit.id == id).cloned()
    }

    /// Habits active on `day`, in collection order.
    pub fn habits_for(&self, day: NaiveDate) -> Vec<Habit> {
        let habits = self.habits.read();
        calendar::active_habits(&habits, day)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Create a habit from the form, show it immediately and persist it.
    #[instrument(skip(self, draft))]
    pub fn add_habit(&self, draft: HabitDraft) -> Result<Outcome<Habit>, TrackerError> {
        let habit = draft.into_habit()?;
        self.habits.write().push(habit.clone());
        info!(habit_id = %habit.id, name = %habit.name, "habit created");
        let write = self.persist(&habit);
        Ok(Outcome { value: habit, write })
    }

    /// Engine for one habit on one day, over the current local copy.
    pub fn engine(&self, id: &HabitId, day: NaiveDate) -> Result<CompletionEngine, TrackerError> {
        let habit = self
            .habit(id)
            .ok_or_else(|| TrackerError::UnknownHabit(id.clone()))?;
        Ok(CompletionEngine::new(habit, day, self.settings))
    }

    pub fn view(&self, id: &HabitId, day: NaiveDate) -> Result<CompletionView, TrackerError> {
        Ok(self.engine(id, day)?.view())
    }

    #[instrument(skip(self))]
    pub fn toggle_subtask(
        &self,
        id: &HabitId,
        day: NaiveDate,
        subtask: &SubtaskId,
    ) -> Result<Outcome<CompletionView>, TrackerError> {
        let mut engine = self.engine(id, day)?;
        let view = engine.toggle_subtask(subtask)?;
        let write = self.commit(engine.habit());
        Ok(Outcome { value: view, write })
    }

    #[instrument(skip(self))]
    pub fn toggle_completion(
        &self,
        id: &HabitId,
        day: NaiveDate,
    ) -> Result<Outcome<CompletionView>, TrackerError> {
        let mut engine = self.engine(id, day)?;
        let view = engine.toggle_completion();
        let write = self.commit(engine.habit());
        Ok(Outcome { value: view, write })
    }

    /// Replace the local copy of `habit` under the next revision and send it
    /// to the store. Concurrent commits of the same habit are last-write-wins.
    pub fn commit(&self, habit: &Habit) -> Result<(), StoreError> {
        let mut habit = habit.clone();
        {
            let mut habits = self.habits.write();
            match habits.iter_mut().find(|existing| existing.id == habit.id) {
                Some(existing) => {
                    habit.revision = existing.revision.max(habit.revision) + 1;
                    *existing = habit.clone();
                }
                None => {
                    habit.revision += 1;
                    habits.push(habit.clone());
                }
            }
        }
        self.persist(&habit)
    }

    pub fn profile(&self) -> Result<ProfileSummary, StoreError> {
        let owner = self
            .identity
            .current_owner()
            .ok_or(StoreError::NotAuthenticated)?;
        let profile = self.store.fetch_profile(&owner)?;
        Ok(ProfileSummary::new(profile, &self.habits.read()))
    }

    /// Write the user document for a freshly registered account.
    pub fn create_profile(
        &self,
        name: &str,
        email: &str,
        joined: DateTime<Utc>,
    ) -> Result<UserProfile, StoreError> {
        let owner = self
            .identity
            .current_owner()
            .ok_or(StoreError::NotAuthenticated)?;
        let profile = UserProfile {
            id: owner.as_str().to_string(),
            name: name.trim().to_string(),
            email: email.trim().to_string(),
            joined: joined.timestamp(),
        };
        self.store.put_profile(&owner, &profile)?;
        Ok(profile)
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.lock().len()
    }

    /// Retry queued writes now instead of waiting for the next mutation.
    /// The queue lock is released while the store is called.
    pub fn flush(&self) -> FlushReport {
        let jobs = self.pending.lock().take_all();
        let delivery = sync::deliver(self.store.as_ref(), jobs);
        let mut pending = self.pending.lock();
        for job in delivery.failed {
            pending.requeue(job);
        }
        FlushReport {
            written: delivery.written,
            still_pending: pending.len(),
            last_error: delivery.last_error,
        }
    }

    fn persist(&self, habit: &Habit) -> Result<(), StoreError> {
        let Some(owner) = self.identity.current_owner() else {
            warn!(habit_id = %habit.id, "not signed in, change kept locally");
            return Err(StoreError::NotAuthenticated);
        };

        let backlog = {
            let mut pending = self.pending.lock();
            pending.discard(&owner, &habit.id);
            !pending.is_empty()
        };
        if backlog {
            let report = self.flush();
            debug!(
                delivered = report.written.len(),
                still_pending = report.still_pending,
                "retried queued writes"
            );
        }

        match self.store.upsert(&owner, habit) {
            Ok(()) => {
                debug!(%owner, habit_id = %habit.id, revision = habit.revision, "habit persisted");
                Ok(())
            }
            Err(err) => {
                warn!(%owner, habit_id = %habit.id, %err, "habit write failed, queued for retry");
                self.pending.lock().enqueue(owner, habit.clone(), err.clone());
                Err(err)
            }
        }
    }
}
