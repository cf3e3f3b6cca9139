//! Habit domain types and the streak calculator.
//!
//! Streaks are computed over completion events sorted ascending by calendar
//! day. Only [`now_utc`] and [`today_utc`] read the clock.

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

pub const DEFAULT_FREQUENCY: &str = "daily";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum HabitError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("validation error: {0}")]
    Validation(String),
}

/// A single day on which a habit was (or was not) completed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CompletionEvent {
    pub date: Date,
    pub completed: bool,
}

impl CompletionEvent {
    #[must_use]
    pub fn completed_on(date: Date) -> Self {
        Self {
            date,
            completed: true,
        }
    }
}

/// Stored completion record for one habit on one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HabitLog {
    pub log_id: i64,
    pub habit_id: i64,
    pub completed_on: Date,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

impl HabitLog {
    #[must_use]
    pub fn event(&self) -> CompletionEvent {
        CompletionEvent {
            date: self.completed_on,
            completed: self.completed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Habit {
    pub habit_id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub frequency: String,
    pub color: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HabitInput {
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub frequency: String,
    pub color: Option<String>,
}

impl HabitInput {
    /// Validates a habit payload before insert.
    ///
    /// # Errors
    /// Returns [`HabitError::Validation`] when required fields are missing
    /// or blank.
    pub fn validate(&self) -> Result<(), HabitError> {
        if self.user_id < 1 {
            return Err(HabitError::Validation("user_id MUST be >= 1".to_string()));
        }

        if self.name.trim().is_empty() {
            return Err(HabitError::Validation(
                "name MUST be provided for every habit".to_string(),
            ));
        }

        if self.frequency.trim().is_empty() {
            return Err(HabitError::Validation(
                "frequency MUST NOT be blank".to_string(),
            ));
        }

        validate_optional_fields(&[
            ("description", self.description.as_deref()),
            ("icon", self.icon.as_deref()),
            ("color", self.color.as_deref()),
        ])
    }
}

/// Partial update of a habit. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HabitPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub frequency: Option<String>,
    pub color: Option<String>,
}

impl HabitPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.icon.is_none()
            && self.frequency.is_none()
            && self.color.is_none()
    }

    /// Validates a patch before it is applied.
    ///
    /// # Errors
    /// Returns [`HabitError::Validation`] when the patch is empty or a
    /// provided field is blank.
    pub fn validate(&self) -> Result<(), HabitError> {
        if self.is_empty() {
            return Err(HabitError::Validation(
                "habit update MUST change at least one field".to_string(),
            ));
        }

        validate_optional_fields(&[
            ("name", self.name.as_deref()),
            ("description", self.description.as_deref()),
            ("icon", self.icon.as_deref()),
            ("frequency", self.frequency.as_deref()),
            ("color", self.color.as_deref()),
        ])
    }
}

fn validate_optional_fields(fields: &[(&str, Option<&str>)]) -> Result<(), HabitError> {
    for (name, value) in fields {
        if value.is_some_and(|raw| raw.trim().is_empty()) {
            return Err(HabitError::Validation(format!(
                "{name} MUST NOT be blank when provided"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreakSummary {
    pub streak: u32,
    pub longest_streak: u32,
    pub completed_days: u32,
    pub last_completed_on: Option<Date>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub as_of: Option<Date>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_streak: Option<u32>,
}

/// Computes the trailing run of consecutive completed days that ends at the
/// last event in `events`.
///
/// The run is anchored to the log, not to today: a run that ended last month
/// still reports its length. Two events on the same day leave the streak
/// unchanged, and events with `completed == false` are skipped.
///
/// # Errors
/// Returns [`HabitError::InvalidInput`] when `events` is not sorted ascending
/// by date.
pub fn compute_streak(events: &[CompletionEvent]) -> Result<u32, HabitError> {
    walk_runs(events).map(|walk| walk.trailing)
}

/// Computes the trailing streak together with longest run, distinct
/// completed days and, when `as_of` is given, the streak as seen on that day.
///
/// # Errors
/// Returns [`HabitError::InvalidInput`] for unsorted input, or when `as_of`
/// falls before the last completed day.
pub fn summarize_streak(
    events: &[CompletionEvent],
    as_of: Option<Date>,
) -> Result<StreakSummary, HabitError> {
    let walk = walk_runs(events)?;

    let current_streak = match as_of {
        None => None,
        Some(as_of) => {
            if let Some(last) = walk.last {
                if last > as_of {
                    return Err(HabitError::InvalidInput(format!(
                        "as_of {as_of} precedes last completion {last}"
                    )));
                }
            }

            Some(match walk.last {
                Some(last) if is_streak_current(last, as_of) => walk.trailing,
                _ => 0,
            })
        }
    };

    Ok(StreakSummary {
        streak: walk.trailing,
        longest_streak: walk.longest,
        completed_days: walk.completed_days,
        last_completed_on: walk.last,
        as_of,
        current_streak,
    })
}

/// True when the last completion is on `as_of` or the day before it.
#[must_use]
pub fn is_streak_current(last_completed_on: Date, as_of: Date) -> bool {
    (0..=1).contains(&calendar_days_between(last_completed_on, as_of))
}

/// Whole calendar days from `earlier` to `later`; negative when reversed.
#[must_use]
pub fn calendar_days_between(earlier: Date, later: Date) -> i64 {
    (later - earlier).whole_days()
}

#[derive(Debug, Default)]
struct RunWalk {
    trailing: u32,
    longest: u32,
    completed_days: u32,
    last: Option<Date>,
}

fn walk_runs(events: &[CompletionEvent]) -> Result<RunWalk, HabitError> {
    let mut walk = RunWalk::default();
    let mut last_seen: Option<Date> = None;

    for (index, event) in events.iter().enumerate() {
        if let Some(seen) = last_seen {
            if event.date < seen {
                return Err(HabitError::InvalidInput(format!(
                    "events MUST be sorted ascending by date: event {index} ({}) precedes {seen}",
                    event.date
                )));
            }
        }
        last_seen = Some(event.date);

        if !event.completed {
            continue;
        }

        match walk.last {
            None => {
                walk.trailing = 1;
                walk.completed_days = 1;
            }
            Some(previous) => match calendar_days_between(previous, event.date) {
                0 => continue,
                1 => {
                    walk.trailing = walk.trailing.saturating_add(1);
                    walk.completed_days = walk.completed_days.saturating_add(1);
                }
                _ => {
                    walk.trailing = 1;
                    walk.completed_days = walk.completed_days.saturating_add(1);
                }
            },
        }

        walk.longest = walk.longest.max(walk.trailing);
        walk.last = Some(event.date);
    }

    Ok(walk)
}

/// Parses a calendar day from `YYYY-MM-DD` or an RFC3339 timestamp.
///
/// Timestamps keep the calendar day of their own offset; the time of day is
/// dropped.
///
/// # Errors
/// Returns [`HabitError::InvalidInput`] when neither form parses or the year
/// falls outside `0000..=9999`.
pub fn parse_calendar_date(value: &str) -> Result<Date, HabitError> {
    let trimmed = value.trim();
    let date = match Date::parse(trimmed, format_description!("[year]-[month]-[day]")) {
        Ok(date) => date,
        Err(_) => OffsetDateTime::parse(trimmed, &Rfc3339)
            .map(OffsetDateTime::date)
            .map_err(|err| {
                HabitError::InvalidInput(format!(
                    "invalid calendar date {trimmed:?}: expected YYYY-MM-DD or RFC3339 ({err})"
                ))
            })?,
    };

    if !(0..=9999).contains(&date.year()) {
        return Err(HabitError::InvalidInput(format!(
            "calendar date {trimmed:?} MUST have a four-digit year"
        )));
    }
    Ok(date)
}

/// Formats a calendar day as `YYYY-MM-DD`.
///
/// # Errors
/// Returns [`HabitError::InvalidInput`] when formatting fails.
pub fn format_calendar_date(value: Date) -> Result<String, HabitError> {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|err| HabitError::InvalidInput(format!("failed to format date: {err}")))
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`HabitError::InvalidInput`] when parsing fails or the timestamp
/// is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, HabitError> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|err| HabitError::InvalidInput(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(HabitError::InvalidInput(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`HabitError::InvalidInput`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, HabitError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|err| HabitError::InvalidInput(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[must_use]
pub fn today_utc() -> Date {
    now_utc().date()
}
