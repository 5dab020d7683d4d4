use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::date_key::DateKey;
use crate::habit::{Habit, HabitId, SubtaskId, SubtaskStates};
use crate::streak;

pub const DEFAULT_MAX_STREAK_LOOKBACK_DAYS: u32 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub max_streak_lookback_days: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_streak_lookback_days: DEFAULT_MAX_STREAK_LOOKBACK_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("habit `{habit}` has no subtask `{subtask}` on {date}")]
    UnknownSubtask {
        habit: HabitId,
        subtask: SubtaskId,
        date: DateKey,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtaskView {
    pub id: SubtaskId,
    pub title: String,
    pub completed: bool,
}

/// Everything a habit card renders for one day. Returned by every mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionView {
    pub habit_id: HabitId,
    pub date: DateKey,
    pub completion_percentage: f64,
    pub is_completed: bool,
    pub current_streak: u32,
    pub subtasks: Vec<SubtaskView>,
}

/// Working snapshot for `key`: the saved states verbatim, or every current
/// subtask set to `false` when nothing was saved for that day.
pub fn load_subtask_states(habit: &Habit, key: &DateKey) -> SubtaskStates {
    match habit.subtask_completion_by_date.get(key) {
        Some(saved) => saved.clone(),
        None => habit
            .subtasks
            .iter()
            .map(|subtask| (subtask.id.clone(), false))
            .collect(),
    }
}

/// Completion state of one habit as seen on one day.
///
/// The engine owns its habit; callers hand the mutated habit to storage after
/// each toggle (see [`crate::service::HabitTracker`]).
#[derive(Debug, Clone)]
pub struct CompletionEngine {
    habit: Habit,
    key: DateKey,
    snapshot: SubtaskStates,
    settings: EngineSettings,
}

impl CompletionEngine {
    pub fn new(habit: Habit, viewed: NaiveDate, settings: EngineSettings) -> Self {
        let key = DateKey::new(viewed);
        let snapshot = load_subtask_states(&habit, &key);
        Self {
            habit,
            key,
            snapshot,
            settings,
        }
    }

    pub fn habit(&self) -> &Habit {
        &self.habit
    }

    pub fn into_habit(self) -> Habit {
        self.habit
    }

    pub fn viewed_date(&self) -> NaiveDate {
        self.key.date()
    }

    pub fn date_key(&self) -> DateKey {
        self.key
    }

    pub fn snapshot(&self) -> &SubtaskStates {
        &self.snapshot
    }

    /// Switch to another day. The snapshot is always reloaded from the habit.
    pub fn set_viewed_date(&mut self, viewed: NaiveDate) {
        self.key = DateKey::new(viewed);
        self.snapshot = load_subtask_states(&self.habit, &self.key);
    }

    pub fn completion_percentage(&self) -> f64 {
        if self.habit.subtasks.is_empty() {
            return if self.is_completed() { 1.0 } else { 0.0 };
        }
        if self.snapshot.is_empty() {
            return 0.0;
        }
        let done = self.snapshot.values().filter(|done| **done).count();
        done as f64 / self.snapshot.len() as f64
    }

    pub fn is_completed(&self) -> bool {
        self.habit.is_completed_on(&self.key)
    }

    pub fn is_subtask_completed(&self, id: &SubtaskId) -> bool {
        self.snapshot.get(id).copied().unwrap_or(false)
    }

    /// Flip one subtask and derive whole-habit completion from the snapshot.
    /// Unknown ids leave every piece of state untouched.
    pub fn toggle_subtask(&mut self, id: &SubtaskId) -> Result<CompletionView, EngineError> {
        let Some(state) = self.snapshot.get_mut(id) else {
            return Err(EngineError::UnknownSubtask {
                habit: self.habit.id.clone(),
                subtask: id.clone(),
                date: self.key,
            });
        };
        *state = !*state;
        self.store_snapshot();

        let complete = if self.habit.subtasks.is_empty() {
            self.is_completed()
        } else {
            !self.snapshot.is_empty() && self.snapshot.values().all(|done| *done)
        };
        self.habit.completion_by_date.insert(self.key, complete);

        self.after_mutation();
        Ok(self.view())
    }

    /// Flip whole-habit completion and cascade the new state to every subtask.
    pub fn toggle_completion(&mut self) -> CompletionView {
        let new_state = !self.is_completed();
        self.habit.completion_by_date.insert(self.key, new_state);
        self.snapshot.values_mut().for_each(|done| *done = new_state);
        self.store_snapshot();

        self.after_mutation();
        self.view()
    }

    /// Recompute `current_streak` backward from the viewed day.
    pub fn recalculate_streak(&mut self) -> u32 {
        let streak = streak::streak_ending_on(
            &self.habit.completion_by_date,
            self.key.date(),
            self.settings.max_streak_lookback_days,
        );
        self.habit.current_streak = streak;
        streak
    }

    pub fn view(&self) -> CompletionView {
        CompletionView {
            habit_id: self.habit.id.clone(),
            date: self.key,
            completion_percentage: self.completion_percentage(),
            is_completed: self.is_completed(),
            current_streak: self.habit.current_streak,
            subtasks: self
                .habit
                .subtasks
                .iter()
                .map(|subtask| SubtaskView {
                    id: subtask.id.clone(),
                    title: subtask.title.clone(),
                    completed: self.is_subtask_completed(&subtask.id),
                })
                .collect(),
        }
    }

    fn store_snapshot(&mut self) {
        self.habit
            .subtask_completion_by_date
            .insert(self.key, self.snapshot.clone());
    }

    fn after_mutation(&mut self) {
        let streak = self.recalculate_streak();
        self.habit.last_completed_date = self
            .habit
            .completion_by_date
            .iter()
            .rev()
            .find(|(_, done)| **done)
            .map(|(key, _)| key.date());
        tracing::debug!(
            habit_id = %self.habit.id,
            date = %self.key,
            completed = self.is_completed(),
            streak,
            "completion updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::{HabitDraft, HabitDuration};

    fn day(raw: &str) -> NaiveDate {
        raw.parse::<DateKey>().unwrap().date()
    }

    fn habit_with(subtasks: &[&str]) -> Habit {
        let mut draft =
            HabitDraft::new("Morning routine", day("2024-06-01")).duration(HabitDuration::Forever);
        for title in subtasks {
            draft = draft.subtask(*title);
        }
        draft.into_habit().expect("valid draft")
    }

    fn ids(habit: &Habit) -> Vec<SubtaskId> {
        habit.subtasks.iter().map(|s| s.id.clone()).collect()
    }

    #[test]
    fn fresh_day_starts_with_every_subtask_false() {
        let habit = habit_with(&["Stretch", "Water"]);
        let engine = CompletionEngine::new(habit, day("2024-06-03"), EngineSettings::default());
        assert_eq!(engine.snapshot().len(), 2);
        assert!(engine.snapshot().values().all(|done| !done));
        assert_eq!(engine.completion_percentage(), 0.0);
    }

    #[test]
    fn saved_snapshot_is_used_verbatim() {
        let mut habit = habit_with(&["Stretch"]);
        let key: DateKey = "2024-06-03".parse().unwrap();
        let drifted: SubtaskStates = [(SubtaskId::new("gone"), true), (SubtaskId::new("old"), false)]
            .into_iter()
            .collect();
        habit.subtask_completion_by_date.insert(key, drifted.clone());

        let engine = CompletionEngine::new(habit, key.date(), EngineSettings::default());
        assert_eq!(engine.snapshot(), &drifted);
        assert_eq!(engine.completion_percentage(), 0.5);
    }

    #[test]
    fn percentage_without_subtasks_follows_day_completion() {
        let habit = habit_with(&[]);
        let mut engine = CompletionEngine::new(habit, day("2024-06-03"), EngineSettings::default());
        assert_eq!(engine.completion_percentage(), 0.0);
        engine.toggle_completion();
        assert_eq!(engine.completion_percentage(), 1.0);
    }

    #[test]
    fn percentage_counts_true_entries() {
        let habit = habit_with(&["a", "b", "c", "d"]);
        let ids = ids(&habit);
        let mut engine = CompletionEngine::new(habit, day("2024-06-03"), EngineSettings::default());
        engine.toggle_subtask(&ids[0]).unwrap();
        assert_eq!(engine.completion_percentage(), 0.25);
        let view = engine.toggle_subtask(&ids[2]).unwrap();
        assert_eq!(view.completion_percentage, 0.5);
        assert_eq!(view.subtasks.iter().filter(|s| s.completed).count(), 2);
    }

    #[test]
    fn last_subtask_completes_the_day_and_unchecking_reverts() {
        let habit = habit_with(&["a", "b"]);
        let ids = ids(&habit);
        let mut engine = CompletionEngine::new(habit, day("2024-06-03"), EngineSettings::default());

        let view = engine.toggle_subtask(&ids[0]).unwrap();
        assert!(!view.is_completed);
        assert_eq!(engine.habit().completion_by_date.get(&engine.date_key()), Some(&false));

        let view = engine.toggle_subtask(&ids[1]).unwrap();
        assert!(view.is_completed);
        assert_eq!(view.current_streak, 1);
        assert_eq!(engine.habit().last_completed_date, Some(day("2024-06-03")));

        let view = engine.toggle_subtask(&ids[0]).unwrap();
        assert!(!view.is_completed);
        assert_eq!(view.current_streak, 0);
        assert_eq!(engine.habit().last_completed_date, None);
        assert!(engine.habit().subtask_completion_by_date[&engine.date_key()][&ids[1]]);
    }

    #[test]
    fn unknown_subtask_is_rejected_without_changes() {
        let habit = habit_with(&["a"]);
        let before = habit.clone();
        let mut engine = CompletionEngine::new(habit, day("2024-06-03"), EngineSettings::default());
        let err = engine.toggle_subtask(&SubtaskId::new("missing")).unwrap_err();
        assert!(matches!(err, EngineError::UnknownSubtask { .. }));
        assert_eq!(engine.habit(), &before);
    }

    #[test]
    fn drifted_snapshot_on_empty_habit_keeps_day_completion() {
        let mut habit = habit_with(&[]);
        let key: DateKey = "2024-06-03".parse().unwrap();
        habit.completion_by_date.insert(key, true);
        habit
            .subtask_completion_by_date
            .insert(key, [(SubtaskId::new("legacy"), true)].into_iter().collect());

        let mut engine = CompletionEngine::new(habit, key.date(), EngineSettings::default());
        let view = engine.toggle_subtask(&SubtaskId::new("legacy")).unwrap();
        assert!(view.is_completed);
        assert!(!engine.snapshot()[&SubtaskId::new("legacy")]);
    }

    #[test]
    fn toggle_completion_is_an_involution_and_cascades() {
        let habit = habit_with(&["a", "b", "c"]);
        let ids = ids(&habit);
        let mut engine = CompletionEngine::new(habit, day("2024-06-03"), EngineSettings::default());
        engine.toggle_subtask(&ids[1]).unwrap();

        let view = engine.toggle_completion();
        assert!(view.is_completed);
        assert!(engine.snapshot().values().all(|done| *done));
        assert_eq!(view.completion_percentage, 1.0);

        let view = engine.toggle_completion();
        assert!(!view.is_completed);
        assert!(engine.snapshot().values().all(|done| !done));
        let saved = &engine.habit().subtask_completion_by_date[&engine.date_key()];
        assert!(saved.values().all(|done| !done));
        assert_eq!(saved.len(), 3);
    }

    #[test]
    fn date_change_reloads_without_carry_over() {
        let habit = habit_with(&["a"]);
        let ids = ids(&habit);
        let mut engine = CompletionEngine::new(habit, day("2024-06-03"), EngineSettings::default());
        engine.toggle_subtask(&ids[0]).unwrap();
        assert!(engine.is_subtask_completed(&ids[0]));

        engine.set_viewed_date(day("2024-06-04"));
        assert!(!engine.is_subtask_completed(&ids[0]));
        assert!(!engine.is_completed());

        engine.set_viewed_date(day("2024-06-03"));
        assert!(engine.is_subtask_completed(&ids[0]));
        assert!(engine.is_completed());
    }

    #[test]
    fn streak_counts_back_from_viewed_day() {
        let mut habit = habit_with(&[]);
        for (raw, done) in [
            ("2024-06-01", true),
            ("2024-06-02", true),
            ("2024-06-03", false),
        ] {
            habit.completion_by_date.insert(raw.parse().unwrap(), done);
        }

        let mut engine = CompletionEngine::new(habit, day("2024-06-04"), EngineSettings::default());
        assert_eq!(engine.toggle_completion().current_streak, 1);

        engine.set_viewed_date(day("2024-06-02"));
        assert_eq!(engine.recalculate_streak(), 2);

        engine.set_viewed_date(day("2024-06-03"));
        // Backward only: 06-04 is not counted from 06-03.
        assert_eq!(engine.toggle_completion().current_streak, 3);
    }
}
