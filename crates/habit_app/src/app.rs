use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate, Utc};
use habit_core::{
    calendar,
    color::ColorTag,
    engine::CompletionView,
    service::Outcome,
    store::SessionIdentity,
    EngineSettings, Habit, HabitDraft, HabitDuration, HabitTracker, OwnerId, StoreError, SubtaskId,
};
use habit_store::{JsonDirStore, StoreSettings, TimedStore};
use serde_json::json;
use tracing::{info, warn};

use crate::cli::{AddArgs, Cli, Command, DayArgs, RegisterArgs, ToggleArgs, WeekArgs};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) store_root: PathBuf,
    pub(crate) owner: Option<OwnerId>,
    pub(crate) engine: EngineSettings,
    pub(crate) store: StoreSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("habit-data"),
            owner: None,
            engine: EngineSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(root) = std::env::var("HABIT_STORE_ROOT") {
            if !root.trim().is_empty() {
                config.store_root = PathBuf::from(root);
            }
        }
        if let Ok(owner) = std::env::var("HABIT_OWNER") {
            config.set_owner(&owner);
        }
        if let Ok(days) = std::env::var("HABIT_MAX_STREAK_LOOKBACK_DAYS") {
            match days.trim().parse::<u32>() {
                Ok(value) if value > 0 => config.engine.max_streak_lookback_days = value,
                _ => warn!(value = %days, "ignoring invalid HABIT_MAX_STREAK_LOOKBACK_DAYS"),
            }
        }
        if let Ok(millis) = std::env::var("HABIT_REQUEST_TIMEOUT_MS") {
            match millis.trim().parse::<u64>() {
                Ok(value) if value > 0 => {
                    config.store.request_timeout = Duration::from_millis(value)
                }
                _ => warn!(value = %millis, "ignoring invalid HABIT_REQUEST_TIMEOUT_MS"),
            }
        }
        Ok(config)
    }

    /// Command-line flags win over the environment.
    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(root) = &cli.root {
            self.store_root = root.clone();
        }
        if let Some(owner) = &cli.owner {
            self.set_owner(owner);
        }
        self
    }

    pub fn store_root(&self) -> &PathBuf {
        &self.store_root
    }

    pub fn owner(&self) -> Option<&OwnerId> {
        self.owner.as_ref()
    }

    fn set_owner(&mut self, raw: &str) {
        let raw = raw.trim();
        self.owner = (!raw.is_empty()).then(|| OwnerId::new(raw));
    }

    /// Tracker over the document directory, already loaded.
    pub fn open_tracker(&self) -> HabitTracker {
        let identity = match &self.owner {
            Some(owner) => SessionIdentity::signed_in(owner.clone()),
            None => SessionIdentity::default(),
        };
        let tracker = HabitTracker::builder()
            .with_store(TimedStore::new(
                JsonDirStore::new(&self.store_root),
                self.store,
            ))
            .with_identity(identity)
            .with_settings(self.engine)
            .build();

        let report = tracker.load();
        for skipped in &report.skipped {
            warn!(document = %skipped.document, reason = %skipped.reason, "habit document skipped");
        }
        if let Some(err) = &report.error {
            warn!(%err, "habits not loaded");
        }
        tracker
    }
}

pub fn run(config: AppConfig, command: Command, json: bool) -> Result<()> {
    info!(root = %config.store_root.display(), owner = ?config.owner, "opening habit store");
    let tracker = config.open_tracker();
    let today = Local::now().date_naive();

    match command {
        Command::List(args) => list(&tracker, day_or(&args, today), json),
        Command::Week(args) => week(&tracker, &args, today, json),
        Command::Add(args) => add(&tracker, args, today, json),
        Command::Toggle(args) => toggle(&tracker, &args, today, json),
        Command::Profile => profile(&tracker, json),
        Command::Register(args) => register(&tracker, &args, json),
    }
}

fn day_or(args: &DayArgs, today: NaiveDate) -> NaiveDate {
    args.date.unwrap_or(today)
}

fn list(tracker: &HabitTracker, day: NaiveDate, json: bool) -> Result<()> {
    let mut views: Vec<(Habit, CompletionView)> = Vec::new();
    for habit in tracker.habits_for(day) {
        let view = tracker.view(&habit.id, day)?;
        views.push((habit, view));
    }

    if json {
        let views: Vec<&CompletionView> = views.iter().map(|(_, view)| view).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if views.is_empty() {
        println!("No habits for {day}.");
        return Ok(());
    }
    println!("Habits for {day}:");
    for (habit, view) in &views {
        println!("{}", habit_line(habit, view));
        for subtask in &view.subtasks {
            let mark = if subtask.completed { "x" } else { " " };
            println!("      [{mark}] {}", subtask.title);
        }
    }
    Ok(())
}

fn habit_line(habit: &Habit, view: &CompletionView) -> String {
    let mark = if view.is_completed { "x" } else { " " };
    format!(
        "  [{mark}] {:<24} {:>3.0}%  streak {:<4} {}  {}",
        habit.name,
        view.completion_percentage * 100.0,
        view.current_streak,
        habit.color,
        habit.id
    )
}

fn week(tracker: &HabitTracker, args: &WeekArgs, today: NaiveDate, json: bool) -> Result<()> {
    let anchor = day_or(&args.day, today);
    let dates = calendar::week_dates(anchor, args.offset);
    if dates.is_empty() {
        bail!("week offset {} is out of range", args.offset);
    }

    let mut rows = Vec::with_capacity(dates.len());
    for date in dates {
        let active = tracker.habits_for(date);
        let done = active
            .iter()
            .filter(|habit| habit.is_completed_on(&date.into()))
            .count();
        rows.push((date, active.len(), done));
    }

    if json {
        let rows: Vec<_> = rows
            .iter()
            .map(|(date, active, done)| json!({"date": date, "active": active, "completed": done}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for (date, active, done) in rows {
        let marker = if date == today { "*" } else { " " };
        println!("{marker} {} {date}  {done}/{active}", date.format("%a"));
    }
    Ok(())
}

fn add(tracker: &HabitTracker, args: AddArgs, today: NaiveDate, json: bool) -> Result<()> {
    let mut draft = HabitDraft::new(args.name, args.start.unwrap_or(today)).note(args.note);
    if let Some(color) = &args.color {
        let color: ColorTag = color.parse().context("invalid --color")?;
        draft = draft.color(color);
    }
    for title in args.subtasks {
        draft = draft.subtask(title);
    }
    draft = draft.duration(if args.forever {
        HabitDuration::Forever
    } else {
        HabitDuration::Days(args.days)
    });

    let outcome = tracker.add_habit(draft).context("could not create habit")?;
    report_write(&outcome);
    let habit = outcome.value;
    if json {
        println!("{}", serde_json::to_string_pretty(&habit)?);
    } else {
        let until = habit
            .end_date
            .map(|end| format!("until {end}"))
            .unwrap_or_else(|| "forever".to_string());
        println!("Created {} ({}), from {} {until}", habit.name, habit.id, habit.start_date);
    }
    Ok(())
}

fn toggle(tracker: &HabitTracker, args: &ToggleArgs, today: NaiveDate, json: bool) -> Result<()> {
    let day = day_or(&args.day, today);
    let habit = find_habit(tracker, &args.habit)?;

    let outcome = match &args.subtask {
        Some(wanted) => {
            let subtask = find_subtask(&habit, wanted)?;
            tracker.toggle_subtask(&habit.id, day, &subtask)?
        }
        None => tracker.toggle_completion(&habit.id, day)?,
    };
    report_write(&outcome);

    let view = &outcome.value;
    if json {
        println!("{}", serde_json::to_string_pretty(view)?);
    } else {
        let habit = tracker.habit(&habit.id).unwrap_or(habit);
        println!("{day}:");
        println!("{}", habit_line(&habit, view));
    }
    Ok(())
}

fn profile(tracker: &HabitTracker, json: bool) -> Result<()> {
    let summary = tracker.profile().context("could not load profile")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let joined = summary.joined_date.as_deref().unwrap_or("unknown");
    println!("{} <{}>, joined {joined}", summary.profile.name, summary.profile.email);
    for card in &summary.streaks {
        println!("  {:<24} {}", card.name, card.current_streak);
    }
    Ok(())
}

fn register(tracker: &HabitTracker, args: &RegisterArgs, json: bool) -> Result<()> {
    let profile = tracker
        .create_profile(&args.name, &args.email, Utc::now())
        .context("could not write profile")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        println!("Registered {} ({})", profile.name, profile.id);
    }
    Ok(())
}

/// Exact id, then case-insensitive name. Ambiguous names are an error.
fn find_habit(tracker: &HabitTracker, wanted: &str) -> Result<Habit> {
    let habits = tracker.habits();
    if let Some(habit) = habits.iter().find(|habit| habit.id.as_str() == wanted) {
        return Ok(habit.clone());
    }
    let mut named = habits
        .into_iter()
        .filter(|habit| habit.name.eq_ignore_ascii_case(wanted.trim()));
    match (named.next(), named.next()) {
        (Some(habit), None) => Ok(habit),
        (Some(_), Some(_)) => bail!("several habits are named `{wanted}`, use the id"),
        (None, _) => Err(anyhow!("no habit `{wanted}`")),
    }
}

fn find_subtask(habit: &Habit, wanted: &str) -> Result<SubtaskId> {
    habit
        .subtasks
        .iter()
        .find(|subtask| {
            subtask.id.as_str() == wanted || subtask.title.eq_ignore_ascii_case(wanted.trim())
        })
        .map(|subtask| subtask.id.clone())
        .ok_or_else(|| anyhow!("habit `{}` has no subtask `{wanted}`", habit.name))
}

fn report_write<T>(outcome: &Outcome<T>) {
    match &outcome.write {
        Ok(()) => {}
        Err(StoreError::NotAuthenticated) => {
            eprintln!("warning: not signed in (set HABIT_OWNER or --owner); change not saved")
        }
        Err(err) => eprintln!("warning: change not saved: {err}"),
    }
}
