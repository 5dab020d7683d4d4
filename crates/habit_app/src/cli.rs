use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "habits: daily habit and streak tracker", long_about = None)]
pub struct Cli {
    /// Directory holding the habit documents (overrides HABIT_STORE_ROOT).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Signed-in account (overrides HABIT_OWNER).
    #[arg(long, global = true)]
    pub owner: Option<String>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List habits active on a day with their completion and streak.
    List(DayArgs),
    /// Show the Monday-first week around a day.
    Week(WeekArgs),
    /// Create a habit.
    Add(AddArgs),
    /// Toggle a habit, or one of its subtasks, on a day.
    Toggle(ToggleArgs),
    /// Show the profile and per-habit streaks.
    Profile,
    /// Create the profile document for the signed-in account.
    Register(RegisterArgs),
}

#[derive(Args, Debug, Default)]
pub struct DayArgs {
    /// Day to show, `YYYY-MM-DD`. Defaults to today.
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub struct WeekArgs {
    #[command(flatten)]
    pub day: DayArgs,

    /// Weeks before (negative) or after the anchor day.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub offset: i64,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub name: String,

    #[arg(long, default_value = "")]
    pub note: String,

    /// `#RRGGBB` card color.
    #[arg(long)]
    pub color: Option<String>,

    /// Subtask title; repeat for several.
    #[arg(short, long = "subtask")]
    pub subtasks: Vec<String>,

    /// Active for this many days after the start date.
    #[arg(long, conflicts_with = "forever", default_value_t = 1)]
    pub days: u32,

    /// Never ends.
    #[arg(long)]
    pub forever: bool,

    /// First active day, `YYYY-MM-DD`. Defaults to today.
    #[arg(long)]
    pub start: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub struct ToggleArgs {
    /// Habit id or name.
    pub habit: String,

    /// Subtask id or title. Without it the whole habit is toggled.
    #[arg(long)]
    pub subtask: Option<String>,

    #[command(flatten)]
    pub day: DayArgs,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub email: String,
}
