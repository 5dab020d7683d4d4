use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use habit_core::habit::Habit;
use habit_core::profile::UserProfile;
use habit_core::store::{FetchReport, HabitStore, OwnerId, StoreError};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub request_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Bounds every call on the wrapped store by `request_timeout`.
///
/// A call that overruns is reported as a read or write failure. Its worker
/// thread is left to finish in the background and its result is dropped.
#[derive(Debug)]
pub struct TimedStore<S> {
    inner: Arc<S>,
    timeout: Duration,
}

impl<S> Clone for TimedStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            timeout: self.timeout,
        }
    }
}

impl<S: HabitStore + 'static> TimedStore<S> {
    pub fn new(inner: S, settings: StoreSettings) -> Self {
        Self::from_arc(Arc::new(inner), settings)
    }

    pub fn from_arc(inner: Arc<S>, settings: StoreSettings) -> Self {
        Self {
            inner,
            timeout: settings.request_timeout,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn call<T, J, F>(&self, job: J, failure: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        J: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
        F: FnOnce(String) -> StoreError,
    {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("habit-store-call".into())
            .spawn(move || {
                let _ = tx.send(job(&inner));
            });
        if let Err(err) = spawned {
            return Err(failure(format!("could not start store call: {err}")));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                Err(failure(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(failure("store call ended without a result".to_string()))
            }
        }
    }
}

impl<S: HabitStore + 'static> HabitStore for TimedStore<S> {
    fn fetch_all(&self, owner: &OwnerId) -> Result<FetchReport, StoreError> {
        let who = owner.clone();
        self.call(
            move |store| store.fetch_all(&who),
            |reason| StoreError::read(owner, "habits", reason),
        )
    }

    fn upsert(&self, owner: &OwnerId, habit: &Habit) -> Result<(), StoreError> {
        let (who, doc) = (owner.clone(), habit.clone());
        self.call(
            move |store| store.upsert(&who, &doc),
            |reason| StoreError::write(owner, format!("habit `{}`", habit.id), reason),
        )
    }

    fn fetch_profile(&self, owner: &OwnerId) -> Result<UserProfile, StoreError> {
        let who = owner.clone();
        self.call(
            move |store| store.fetch_profile(&who),
            |reason| StoreError::read(owner, "profile", reason),
        )
    }

    fn put_profile(&self, owner: &OwnerId, profile: &UserProfile) -> Result<(), StoreError> {
        let (who, doc) = (owner.clone(), profile.clone());
        self.call(
            move |store| store.put_profile(&who, &doc),
            |reason| StoreError::write(owner, "profile", reason),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use habit_core::habit::HabitDraft;
    use habit_core::store::MemoryStore;

    /// Sleeps before delegating, standing in for a stalled network store.
    struct SlowStore {
        delay: Duration,
        inner: MemoryStore,
    }

    impl HabitStore for SlowStore {
        fn fetch_all(&self, owner: &OwnerId) -> Result<FetchReport, StoreError> {
            thread::sleep(self.delay);
            self.inner.fetch_all(owner)
        }

        fn upsert(&self, owner: &OwnerId, habit: &Habit) -> Result<(), StoreError> {
            thread::sleep(self.delay);
            self.inner.upsert(owner, habit)
        }

        fn fetch_profile(&self, owner: &OwnerId) -> Result<UserProfile, StoreError> {
            thread::sleep(self.delay);
            self.inner.fetch_profile(owner)
        }

        fn put_profile(&self, owner: &OwnerId, profile: &UserProfile) -> Result<(), StoreError> {
            thread::sleep(self.delay);
            self.inner.put_profile(owner, profile)
        }
    }

    fn settings(ms: u64) -> StoreSettings {
        StoreSettings {
            request_timeout: Duration::from_millis(ms),
        }
    }

    fn habit() -> Habit {
        HabitDraft::new("Run", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
            .into_habit()
            .unwrap()
    }

    #[test]
    fn fast_calls_pass_through() {
        let store = TimedStore::new(MemoryStore::new(), settings(1_000));
        let owner = OwnerId::new("u");
        let run = habit();
        store.upsert(&owner, &run).unwrap();
        assert_eq!(store.fetch_all(&owner).unwrap().habits, vec![run]);
    }

    #[test]
    fn slow_calls_become_failures() {
        let store = TimedStore::new(
            SlowStore {
                delay: Duration::from_millis(500),
                inner: MemoryStore::new(),
            },
            settings(20),
        );
        let owner = OwnerId::new("u");
        match store.fetch_all(&owner) {
            Err(StoreError::ReadFailure { what, reason, .. }) => {
                assert_eq!(what, "habits");
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected read failure, got {other:?}"),
        }
        assert!(matches!(
            store.upsert(&owner, &habit()),
            Err(StoreError::WriteFailure { .. })
        ));
    }

    #[test]
    fn inner_errors_are_not_rewritten() {
        let inner = MemoryStore::new();
        inner.set_offline(true);
        let store = TimedStore::new(inner, settings(1_000));
        let err = store.fetch_all(&OwnerId::new("u")).unwrap_err();
        assert_eq!(
            err,
            StoreError::read(&OwnerId::new("u"), "habits", "store is offline")
        );
    }
}
