use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::habit::Habit;
use crate::profile::UserProfile;

/// Authenticated account that owns a habit collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage failures, already converted from whatever the backend raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no authenticated user")]
    NotAuthenticated,
    #[error("failed to read {what} for `{owner}`: {reason}")]
    ReadFailure {
        owner: OwnerId,
        what: &'static str,
        reason: String,
    },
    #[error("failed to write {what} for `{owner}`: {reason}")]
    WriteFailure {
        owner: OwnerId,
        what: String,
        reason: String,
    },
    #[error(transparent)]
    Decode(#[from] DecodeFailure),
}

impl StoreError {
    pub fn read(owner: &OwnerId, what: &'static str, reason: impl fmt::Display) -> Self {
        Self::ReadFailure {
            owner: owner.clone(),
            what,
            reason: reason.to_string(),
        }
    }

    pub fn write(owner: &OwnerId, what: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::WriteFailure {
            owner: owner.clone(),
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

/// One stored document that did not match the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("document `{document}` does not decode: {reason}")]
pub struct DecodeFailure {
    pub document: String,
    pub reason: String,
}

/// Result of a collection read. Undecodable documents are listed, not fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub habits: Vec<Habit>,
    pub skipped: Vec<DecodeFailure>,
}

/// Identity-keyed document store holding each owner's habits and profile.
pub trait HabitStore: Send + Sync {
    fn fetch_all(&self, owner: &OwnerId) -> Result<FetchReport, StoreError>;
    /// Full-document merge write, idempotent per habit id.
    fn upsert(&self, owner: &OwnerId, habit: &Habit) -> Result<(), StoreError>;
    fn fetch_profile(&self, owner: &OwnerId) -> Result<UserProfile, StoreError>;
    fn put_profile(&self, owner: &OwnerId, profile: &UserProfile) -> Result<(), StoreError>;
}

impl<S: HabitStore + ?Sized> HabitStore for Arc<S> {
    fn fetch_all(&self, owner: &OwnerId) -> Result<FetchReport, StoreError> {
        (**self).fetch_all(owner)
    }

    fn upsert(&self, owner: &OwnerId, habit: &Habit) -> Result<(), StoreError> {
        (**self).upsert(owner, habit)
    }

    fn fetch_profile(&self, owner: &OwnerId) -> Result<UserProfile, StoreError> {
        (**self).fetch_profile(owner)
    }

    fn put_profile(&self, owner: &OwnerId, profile: &UserProfile) -> Result<(), StoreError> {
        (**self).put_profile(owner, profile)
    }
}

/// Supplies the signed-in owner, if any.
pub trait IdentityProvider: Send + Sync {
    fn current_owner(&self) -> Option<OwnerId>;
}

/// Mutable sign-in state for a single app session.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    owner: RwLock<Option<OwnerId>>,
}

impl SessionIdentity {
    pub fn signed_in(owner: OwnerId) -> Self {
        Self {
            owner: RwLock::new(Some(owner)),
        }
    }

    pub fn sign_in(&self, owner: OwnerId) {
        *self.owner.write() = Some(owner);
    }

    pub fn sign_out(&self) {
        *self.owner.write() = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_owner(&self) -> Option<OwnerId> {
        self.owner.read().clone()
    }
}

impl<I: IdentityProvider + ?Sized> IdentityProvider for Arc<I> {
    fn current_owner(&self) -> Option<OwnerId> {
        (**self).current_owner()
    }
}

/// Decode and sanity-check one stored habit document.
pub fn decode_habit(document: &str, value: Value) -> Result<Habit, DecodeFailure> {
    let habit: Habit = serde_json::from_value(value).map_err(|err| DecodeFailure {
        document: document.to_string(),
        reason: err.to_string(),
    })?;
    habit.validate().map_err(|err| DecodeFailure {
        document: document.to_string(),
        reason: err.to_string(),
    })?;
    Ok(habit)
}

/// Overlay `update`'s top-level fields onto `existing`, keeping fields it lacks.
pub fn merge_document(existing: Option<Value>, update: Value) -> Value {
    match (existing, update) {
        (Some(Value::Object(mut base)), Value::Object(fields)) => {
            base.extend(fields);
            Value::Object(base)
        }
        (_, update) => update,
    }
}

/// Whether `update` carries an older `revision` than the stored document.
/// Documents without a revision count as revision 0.
pub fn is_stale_write(existing: Option<&Value>, update: &Value) -> bool {
    let revision = |doc: &Value| doc.get("revision").and_then(Value::as_u64).unwrap_or(0);
    existing.is_some_and(|stored| revision(update) < revision(stored))
}

#[derive(Debug, Default)]
struct OwnerDocuments {
    habits: BTreeMap<String, Value>,
    profile: Option<Value>,
}

/// Process-local store keeping raw JSON documents, used by tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    owners: RwLock<HashMap<OwnerId, OwnerDocuments>>,
    offline: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with a read or write failure.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.write() = offline;
    }

    /// Store a raw document as-is, bypassing encoding.
    pub fn insert_raw(&self, owner: &OwnerId, document: impl Into<String>, value: Value) {
        self.owners
            .write()
            .entry(owner.clone())
            .or_default()
            .habits
            .insert(document.into(), value);
    }

    pub fn raw_document(&self, owner: &OwnerId, document: &str) -> Option<Value> {
        self.owners
            .read()
            .get(owner)
            .and_then(|docs| docs.habits.get(document).cloned())
    }

    fn is_offline(&self) -> bool {
        *self.offline.read()
    }
}

impl HabitStore for MemoryStore {
    fn fetch_all(&self, owner: &OwnerId) -> Result<FetchReport, StoreError> {
        if self.is_offline() {
            return Err(StoreError::read(owner, "habits", "store is offline"));
        }
        let owners = self.owners.read();
        let mut report = FetchReport::default();
        let Some(docs) = owners.get(owner) else {
            return Ok(report);
        };
        for (name, value) in &docs.habits {
            match decode_habit(name, value.clone()) {
                Ok(habit) => report.habits.push(habit),
                Err(failure) => {
                    tracing::warn!(%owner, document = %name, reason = %failure.reason, "skipping undecodable habit");
                    report.skipped.push(failure);
                }
            }
        }
        Ok(report)
    }

    fn upsert(&self, owner: &OwnerId, habit: &Habit) -> Result<(), StoreError> {
        let what = format!("habit `{}`", habit.id);
        if self.is_offline() {
            return Err(StoreError::write(owner, what, "store is offline"));
        }
        let value = serde_json::to_value(habit).map_err(|err| StoreError::write(owner, what, err))?;
        let mut owners = self.owners.write();
        let docs = owners.entry(owner.clone()).or_default();
        let key = habit.id.as_str().to_string();
        if is_stale_write(docs.habits.get(&key), &value) {
            tracing::debug!(%owner, habit_id = %habit.id, revision = habit.revision, "dropping stale habit write");
            return Ok(());
        }
        let merged = merge_document(docs.habits.remove(&key), value);
        docs.habits.insert(key, merged);
        Ok(())
    }

    fn fetch_profile(&self, owner: &OwnerId) -> Result<UserProfile, StoreError> {
        if self.is_offline() {
            return Err(StoreError::read(owner, "profile", "store is offline"));
        }
        let value = self
            .owners
            .read()
            .get(owner)
            .and_then(|docs| docs.profile.clone())
            .ok_or_else(|| StoreError::read(owner, "profile", "no profile document"))?;
        serde_json::from_value(value).map_err(|err| {
            StoreError::Decode(DecodeFailure {
                document: format!("users/{owner}"),
                reason: err.to_string(),
            })
        })
    }

    fn put_profile(&self, owner: &OwnerId, profile: &UserProfile) -> Result<(), StoreError> {
        if self.is_offline() {
            return Err(StoreError::write(owner, "profile", "store is offline"));
        }
        let value =
            serde_json::to_value(profile).map_err(|err| StoreError::write(owner, "profile", err))?;
        let mut owners = self.owners.write();
        let docs = owners.entry(owner.clone()).or_default();
        docs.profile = Some(merge_document(docs.profile.take(), value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::{HabitDraft, HabitId};
    use chrono::NaiveDate;
    use serde_json::json;

    fn habit_ids(report: &FetchReport) -> Vec<HabitId> {
        report.habits.iter().map(|habit| habit.id.clone()).collect()
    }

    fn owner() -> OwnerId {
        OwnerId::new("user-1")
    }

    fn habit(name: &str) -> Habit {
        HabitDraft::new(name, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
            .into_habit()
            .unwrap()
    }

    #[test]
    fn upsert_is_idempotent_per_id() {
        let store = MemoryStore::new();
        let mut run = habit("Run");
        store.upsert(&owner(), &run).unwrap();
        run.current_streak = 3;
        store.upsert(&owner(), &run).unwrap();

        let report = store.fetch_all(&owner()).unwrap();
        assert_eq!(report.habits, vec![run]);
    }

    #[test]
    fn upsert_merges_over_existing_fields() {
        let store = MemoryStore::new();
        let run = habit("Run");
        store.insert_raw(
            &owner(),
            run.id.as_str(),
            json!({"id": run.id, "name": "Old", "startDate": "2024-06-01", "archived": false}),
        );
        store.upsert(&owner(), &run).unwrap();
        let raw = store.raw_document(&owner(), run.id.as_str()).unwrap();
        assert_eq!(raw["name"], "Run");
        assert_eq!(raw["archived"], false);
    }

    #[test]
    fn older_revisions_do_not_overwrite_newer_ones() {
        let store = MemoryStore::new();
        let mut run = habit("Run");
        run.revision = 2;
        run.current_streak = 2;
        store.upsert(&owner(), &run).unwrap();

        let mut stale = run.clone();
        stale.revision = 1;
        stale.current_streak = 1;
        store.upsert(&owner(), &stale).unwrap();
        assert_eq!(store.fetch_all(&owner()).unwrap().habits, vec![run.clone()]);

        run.revision = 3;
        run.current_streak = 3;
        store.upsert(&owner(), &run).unwrap();
        assert_eq!(store.fetch_all(&owner()).unwrap().habits[0].current_streak, 3);
    }

    #[test]
    fn undecodable_documents_are_skipped() {
        let store = MemoryStore::new();
        let run = habit("Run");
        store.upsert(&owner(), &run).unwrap();
        store.insert_raw(&owner(), "broken", json!({"name": 42}));
        store.insert_raw(
            &owner(),
            "backwards",
            json!({"id": "b", "name": "B", "startDate": "2024-06-10", "endDate": "2024-06-01"}),
        );

        let report = store.fetch_all(&owner()).unwrap();
        assert_eq!(habit_ids(&report), vec![run.id]);
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn offline_store_reports_read_and_write_failures() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.fetch_all(&owner()),
            Err(StoreError::ReadFailure { .. })
        ));
        assert!(matches!(
            store.upsert(&owner(), &habit("Run")),
            Err(StoreError::WriteFailure { .. })
        ));
    }

    #[test]
    fn profile_round_trip() {
        let store = MemoryStore::new();
        assert!(store.fetch_profile(&owner()).is_err());
        let profile = UserProfile {
            id: "user-1".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            joined: 1_717_200_000,
        };
        store.put_profile(&owner(), &profile).unwrap();
        assert_eq!(store.fetch_profile(&owner()).unwrap(), profile);
    }

    #[test]
    fn session_identity_tracks_sign_in() {
        let identity = SessionIdentity::default();
        assert_eq!(identity.current_owner(), None);
        identity.sign_in(owner());
        assert_eq!(identity.current_owner(), Some(owner()));
        identity.sign_out();
        assert_eq!(identity.current_owner(), None);
    }
}
