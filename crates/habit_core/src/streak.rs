use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::date_key::DateKey;

/// Count of consecutive completed days ending at and including `viewed`.
///
/// The walk goes strictly backward and stops at the first day that is absent or
/// `false`, or after `max_lookback_days` days.
pub fn streak_ending_on(
    completion_by_date: &BTreeMap<DateKey, bool>,
    viewed: NaiveDate,
    max_lookback_days: u32,
) -> u32 {
    let mut streak = 0;
    let mut cursor = Some(DateKey::new(viewed));

    while let Some(key) = cursor {
        if completion_by_date.get(&key) != Some(&true) {
            break;
        }
        if streak >= max_lookback_days {
            tracing::warn!(%viewed, max_lookback_days, "streak walk hit lookback limit");
            break;
        }
        streak += 1;
        cursor = key.previous();
    }

    streak
}
