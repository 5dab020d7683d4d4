use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::color::ColorTag;
use crate::date_key::DateKey;

/// Longest finite duration the creation form offers.
pub const MAX_DURATION_DAYS: u32 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HabitError {
    #[error("habit name must not be empty")]
    EmptyName,
    #[error("duration of {0} days is outside 1..=365")]
    DurationOutOfRange(u32),
    #[error("end date {end} is before start date {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
    #[error("end date overflows the calendar")]
    DateOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HabitId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtaskId(String);

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn generate(seed: &str) -> Self {
                Self(fresh_id(seed))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(raw: &str) -> Self {
                Self::new(raw)
            }
        }
    };
}

string_id!(HabitId);
string_id!(SubtaskId);

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn fresh_id(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(ID_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Per-subtask completion for one day.
pub type SubtaskStates = BTreeMap<SubtaskId, bool>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub title: String,
}

impl Subtask {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: SubtaskId::generate(&title),
            title,
        }
    }
}

/// Persisted habit document. Unknown fields (such as the old per-subtask
/// `isCompleted` flag) are ignored on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: HabitId,
    pub name: String,
    #[serde(default)]
    pub note: String,
    #[serde(default, rename = "colorHex")]
    pub color: ColorTag,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub completion_by_date: BTreeMap<DateKey, bool>,
    #[serde(default)]
    pub subtask_completion_by_date: BTreeMap<DateKey, SubtaskStates>,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub last_completed_date: Option<NaiveDate>,
    /// Bumped on every committed change. Stores drop writes older than what they hold.
    #[serde(default)]
    pub revision: u64,
}

impl Habit {
    pub fn validate(&self) -> Result<(), HabitError> {
        match self.end_date {
            Some(end) if end < self.start_date => Err(HabitError::EndBeforeStart {
                start: self.start_date,
                end,
            }),
            _ => Ok(()),
        }
    }

    pub fn is_forever(&self) -> bool {
        self.end_date.is_none()
    }

    /// Whether `day` lies inside `[start_date, end_date]`, open-ended when there is no end.
    pub fn is_active_on(&self, day: NaiveDate) -> bool {
        day >= self.start_date && self.end_date.map_or(true, |end| day <= end)
    }

    /// Unrecorded days count as not completed.
    pub fn is_completed_on(&self, key: &DateKey) -> bool {
        self.completion_by_date.get(key).copied().unwrap_or(false)
    }

    pub fn subtask(&self, id: &SubtaskId) -> Option<&Subtask> {
        self.subtasks.iter().find(|subtask| &subtask.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HabitDuration {
    Forever,
    Days(u32),
}

/// Input collected by the "new habit" form.
#[derive(Debug, Clone)]
pub struct HabitDraft {
    name: String,
    note: String,
    color: ColorTag,
    subtask_titles: Vec<String>,
    start_date: NaiveDate,
    duration: HabitDuration,
}

impl HabitDraft {
    pub fn new(name: impl Into<String>, start_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            note: String::new(),
            color: ColorTag::default(),
            subtask_titles: Vec::new(),
            start_date,
            duration: HabitDuration::Days(1),
        }
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn color(mut self, color: ColorTag) -> Self {
        self.color = color;
        self
    }

    pub fn subtask(mut self, title: impl Into<String>) -> Self {
        self.subtask_titles.push(title.into());
        self
    }

    pub fn duration(mut self, duration: HabitDuration) -> Self {
        self.duration = duration;
        self
    }

    pub fn into_habit(self) -> Result<Habit, HabitError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(HabitError::EmptyName);
        }

        let end_date = match self.duration {
            HabitDuration::Forever => None,
            HabitDuration::Days(days) if (1..=MAX_DURATION_DAYS).contains(&days) => Some(
                self.start_date
                    .checked_add_days(Days::new(u64::from(days)))
                    .ok_or(HabitError::DateOverflow)?,
            ),
            HabitDuration::Days(days) => return Err(HabitError::DurationOutOfRange(days)),
        };

        let subtasks = self
            .subtask_titles
            .into_iter()
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .map(Subtask::new)
            .collect();

        Ok(Habit {
            id: HabitId::generate(&name),
            name,
            note: self.note,
            color: self.color,
            subtasks,
            start_date: self.start_date,
            end_date,
            completion_by_date: BTreeMap::new(),
            subtask_completion_by_date: BTreeMap::new(),
            current_streak: 0,
            last_completed_date: None,
            revision: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn draft_with_duration_sets_end_date() {
        let habit = HabitDraft::new("  Read  ", day(2024, 1, 10))
            .subtask("Chapter")
            .subtask("   ")
            .duration(HabitDuration::Days(10))
            .into_habit()
            .expect("valid draft");
        assert_eq!(habit.name, "Read");
        assert_eq!(habit.end_date, Some(day(2024, 1, 20)));
        assert_eq!(habit.subtasks.len(), 1);
        assert_eq!(habit.current_streak, 0);
        assert!(habit.completion_by_date.is_empty());
    }

    #[test]
    fn forever_draft_has_no_end() {
        let habit = HabitDraft::new("Stretch", day(2024, 1, 10))
            .duration(HabitDuration::Forever)
            .into_habit()
            .expect("valid draft");
        assert!(habit.is_forever());
        assert!(habit.is_active_on(day(2030, 1, 1)));
    }

    #[test]
    fn draft_rejects_empty_name_and_bad_duration() {
        assert_eq!(
            HabitDraft::new(" ", day(2024, 1, 1)).into_habit(),
            Err(HabitError::EmptyName)
        );
        assert_eq!(
            HabitDraft::new("Run", day(2024, 1, 1))
                .duration(HabitDuration::Days(0))
                .into_habit(),
            Err(HabitError::DurationOutOfRange(0))
        );
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = HabitId::generate("same");
        let b = HabitId::generate("same");
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn decodes_legacy_document_shape() {
        let raw = r##"{
            "id": "h1",
            "name": "Meditate",
            "colorHex": "#3498DB",
            "subtasks": [{"id": "s1", "title": "Breathe", "isCompleted": true}],
            "startDate": "2024-06-01",
            "completionByDate": {"2024-06-01": true},
            "subtaskCompletionByDate": {"2024-06-01": {"s1": true}},
            "currentStreak": 1
        }"##;
        let habit: Habit = serde_json::from_str(raw).expect("decode");
        assert_eq!(habit.subtasks[0].id, SubtaskId::new("s1"));
        assert!(habit.is_completed_on(&"2024-06-01".parse().unwrap()));
        assert!(!habit.is_completed_on(&"2024-06-02".parse().unwrap()));
        assert_eq!(habit.end_date, None);
        assert_eq!(habit.note, "");
    }

    #[test]
    fn encodes_camel_case_fields() {
        let habit = HabitDraft::new("Run", day(2024, 6, 1))
            .into_habit()
            .expect("valid draft");
        let value = serde_json::to_value(&habit).expect("encode");
        assert_eq!(value["startDate"], "2024-06-01");
        assert_eq!(value["endDate"], "2024-06-02");
        assert_eq!(value["colorHex"], "#FFFFFF");
        assert!(value["completionByDate"].is_object());
    }

    #[test]
    fn validate_checks_window() {
        let mut habit = HabitDraft::new("Run", day(2024, 6, 10))
            .into_habit()
            .expect("valid draft");
        habit.end_date = Some(day(2024, 6, 1));
        assert!(matches!(
            habit.validate(),
            Err(HabitError::EndBeforeStart { .. })
        ));
    }
}
