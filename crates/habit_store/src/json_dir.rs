use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use habit_core::habit::Habit;
use habit_core::profile::UserProfile;
use habit_core::store::{
    decode_habit, is_stale_write, merge_document, DecodeFailure, FetchReport, HabitStore, OwnerId, StoreError,
};
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Document store on the local filesystem, one JSON file per document:
///
/// ```text
/// <root>/users/<owner>/profile.json
/// <root>/users/<owner>/habits/<habit-id>.json
/// ```
///
/// Writes are serialised, so a late write can never interleave with a newer
/// one for the same document.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
    writes: Arc<Mutex<()>>,
}

impl JsonDirStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn owner_dir(&self, owner: &OwnerId) -> io::Result<PathBuf> {
        Ok(self.root.join("users").join(safe_segment(owner.as_str())?))
    }

    fn habits_dir(&self, owner: &OwnerId) -> io::Result<PathBuf> {
        Ok(self.owner_dir(owner)?.join("habits"))
    }

    fn habit_path(&self, owner: &OwnerId, habit: &Habit) -> io::Result<PathBuf> {
        let file = format!("{}.json", safe_segment(habit.id.as_str())?);
        Ok(self.habits_dir(owner)?.join(file))
    }

    fn profile_path(&self, owner: &OwnerId) -> io::Result<PathBuf> {
        Ok(self.owner_dir(owner)?.join("profile.json"))
    }
}

impl HabitStore for JsonDirStore {
    fn fetch_all(&self, owner: &OwnerId) -> Result<FetchReport, StoreError> {
        let dir = self
            .habits_dir(owner)
            .map_err(|err| StoreError::read(owner, "habits", err))?;
        let mut report = FetchReport::default();
        if !dir.is_dir() {
            return Ok(report);
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| StoreError::read(owner, "habits", err))?;
            if entry.file_type().is_file() && is_json_file(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        for path in paths {
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
            let raw = fs::read(&path).map_err(|err| StoreError::read(owner, "habits", err))?;
            let decoded = serde_json::from_slice::<Value>(&raw)
                .map_err(|err| DecodeFailure {
                    document: name.clone(),
                    reason: err.to_string(),
                })
                .and_then(|value| decode_habit(&name, value));
            match decoded {
                Ok(habit) => report.habits.push(habit),
                Err(failure) => {
                    tracing::warn!(%owner, path = %path.display(), reason = %failure.reason, "skipping undecodable habit");
                    report.skipped.push(failure);
                }
            }
        }

        Ok(report)
    }

    fn upsert(&self, owner: &OwnerId, habit: &Habit) -> Result<(), StoreError> {
        let what = format!("habit `{}`", habit.id);
        let path = self
            .habit_path(owner, habit)
            .map_err(|err| StoreError::write(owner, what.as_str(), err))?;
        let update =
            serde_json::to_value(habit).map_err(|err| StoreError::write(owner, what.as_str(), err))?;
        let _guard = self.writes.lock();
        let written =
            write_merged(&path, update).map_err(|err| StoreError::write(owner, what, err))?;
        if !written {
            tracing::debug!(%owner, habit_id = %habit.id, revision = habit.revision, "dropping stale habit write");
        }
        Ok(())
    }

    fn fetch_profile(&self, owner: &OwnerId) -> Result<UserProfile, StoreError> {
        let path = self
            .profile_path(owner)
            .map_err(|err| StoreError::read(owner, "profile", err))?;
        let raw = fs::read(&path).map_err(|err| StoreError::read(owner, "profile", err))?;
        serde_json::from_slice(&raw).map_err(|err| {
            StoreError::Decode(DecodeFailure {
                document: path.display().to_string(),
                reason: err.to_string(),
            })
        })
    }

    fn put_profile(&self, owner: &OwnerId, profile: &UserProfile) -> Result<(), StoreError> {
        let path = self
            .profile_path(owner)
            .map_err(|err| StoreError::write(owner, "profile", err))?;
        let update =
            serde_json::to_value(profile).map_err(|err| StoreError::write(owner, "profile", err))?;
        let _guard = self.writes.lock();
        write_merged(&path, update)
            .map(|_| ())
            .map_err(|err| StoreError::write(owner, "profile", err))
    }
}

/// Merge `update` over the document at `path` and replace it atomically.
/// Returns `false` without touching the file when `update` is stale.
fn write_merged(path: &Path, update: Value) -> io::Result<bool> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let existing = match fs::read(path) {
        Ok(raw) => serde_json::from_slice::<Value>(&raw).ok(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(err),
    };
    if is_stale_write(existing.as_ref(), &update) {
        return Ok(false);
    }
    let merged = merge_document(existing, update);

    let mut temp = NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut temp, &merged)?;
    temp.flush()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(true)
}

/// Ids become path segments, so only a conservative character set is allowed.
fn safe_segment(raw: &str) -> io::Result<&str> {
    let valid = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(raw)
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("`{raw}` is not a valid document id"),
        ))
    }
}

fn is_json_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
