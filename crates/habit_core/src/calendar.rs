use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, TimeZone};

use crate::habit::Habit;

/// Habits whose active window contains `day`, in input order.
pub fn active_habits(habits: &[Habit], day: NaiveDate) -> Vec<&Habit> {
    habits.iter().filter(|habit| habit.is_active_on(day)).collect()
}

/// Same as [`active_habits`] for a timestamp, normalised to its calendar day.
pub fn active_habits_at<'a, Tz: TimeZone>(
    habits: &'a [Habit],
    timestamp: &DateTime<Tz>,
) -> Vec<&'a Habit> {
    active_habits(habits, timestamp.date_naive())
}

/// Monday-first dates of the week containing `anchor` shifted by `week_offset` weeks.
pub fn week_dates(anchor: NaiveDate, week_offset: i64) -> Vec<NaiveDate> {
    let Some(shifted) = Duration::try_weeks(week_offset).and_then(|d| anchor.checked_add_signed(d))
    else {
        return Vec::new();
    };
    let back = u64::from(shifted.weekday().num_days_from_monday());
    let Some(monday) = shifted.checked_sub_days(Days::new(back)) else {
        return Vec::new();
    };
    monday.iter_days().take(7).collect()
}
