use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::habit::{Habit, HabitId};

/// User document stored next to the habit collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Unix seconds.
    pub joined: i64,
}

impl UserProfile {
    /// `YYYY-MM-DD` in UTC, or `None` for out-of-range timestamps.
    pub fn joined_date(&self) -> Option<String> {
        DateTime::from_timestamp(self.joined, 0).map(|at| at.format("%Y-%m-%d").to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreakCard {
    pub habit_id: HabitId,
    pub name: String,
    pub current_streak: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub profile: UserProfile,
    pub joined_date: Option<String>,
    pub streaks: Vec<StreakCard>,
}

impl ProfileSummary {
    /// Longest streaks first, ties broken by name.
    pub fn new(profile: UserProfile, habits: &[Habit]) -> Self {
        let mut streaks: Vec<StreakCard> = habits
            .iter()
            .map(|habit| StreakCard {
                habit_id: habit.id.clone(),
                name: habit.name.clone(),
                current_streak: habit.current_streak,
            })
            .collect();
        streaks.sort_by(|a, b| {
            b.current_streak
                .cmp(&a.current_streak)
                .then_with(|| a.name.cmp(&b.name))
        });
        Self {
            joined_date: profile.joined_date(),
            profile,
            streaks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::HabitDraft;
    use chrono::NaiveDate;

    #[test]
    fn summary_orders_streaks() {
        let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut habits: Vec<Habit> = ["Read", "Run", "Walk"]
            .into_iter()
            .map(|name| HabitDraft::new(name, start).into_habit().unwrap())
            .collect();
        habits[0].current_streak = 5;
        habits[1].current_streak = 12;
        habits[2].current_streak = 5;

        let profile = UserProfile {
            id: "u1".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            joined: 1_717_200_000,
        };
        let summary = ProfileSummary::new(profile, &habits);
        let order: Vec<&str> = summary.streaks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(order, ["Run", "Read", "Walk"]);
        assert_eq!(summary.joined_date.as_deref(), Some("2024-06-01"));
    }
}
