//! `SQLite` persistence for habits and their per-day completion logs.
//!
//! Logs are immutable once written and unique per habit and calendar day;
//! [`SqliteHabitStore::streak`] reduces them through `habit_streak_core`.
#![allow(clippy::missing_errors_doc)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use habit_streak_core::{
    format_calendar_date, format_rfc3339, now_utc, parse_calendar_date, parse_rfc3339_utc,
    summarize_streak, CompletionEvent, Habit, HabitError, HabitInput, HabitLog, HabitPatch,
    StreakSummary,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use time::Date;
use tracing::{debug, info, warn};

const HABIT_MIGRATION_VERSION: i64 = 1;

const SCHEMA_HABITS_V1: &str = r"
CREATE TABLE IF NOT EXISTS habits (
  habit_id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id INTEGER NOT NULL CHECK (user_id >= 1),
  name TEXT NOT NULL CHECK (length(trim(name)) > 0),
  description TEXT,
  icon TEXT,
  frequency TEXT NOT NULL DEFAULT 'daily',
  color TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_habits_user
  ON habits(user_id, habit_id);

CREATE TABLE IF NOT EXISTS habit_logs (
  log_id INTEGER PRIMARY KEY AUTOINCREMENT,
  habit_id INTEGER NOT NULL,
  completed_on TEXT NOT NULL CHECK (
    completed_on GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]'
  ),
  completed INTEGER NOT NULL DEFAULT 1 CHECK (completed IN (0, 1)),
  recorded_at TEXT NOT NULL,
  FOREIGN KEY (habit_id) REFERENCES habits(habit_id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_habit_logs_habit_day
  ON habit_logs(habit_id, completed_on);

CREATE TRIGGER IF NOT EXISTS trg_habit_logs_no_update
BEFORE UPDATE ON habit_logs
BEGIN
  SELECT RAISE(FAIL, 'habit_logs rows are immutable');
END;
";

const HABIT_COLUMNS: &str = "habit_id, user_id, name, description, icon, frequency, color, created_at, updated_at";
const LOG_COLUMNS: &str = "log_id, habit_id, completed_on, completed, recorded_at";

/// Lookup failures callers may want to tell apart from storage faults.
///
/// Returned wrapped in [`anyhow::Error`]; use `downcast_ref::<StoreError>()`.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("habit {0} not found")]
    HabitNotFound(i64),
    #[error("habit log {log_id} not found for habit {habit_id}")]
    LogNotFound { habit_id: i64, log_id: i64 },
    #[error("habit {habit_id} already completed on {date}")]
    DuplicateCompletion { habit_id: i64, date: String },
}

pub struct SqliteHabitStore {
    conn: Connection,
}

impl SqliteHabitStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        debug!(path = %path.display(), "opened habit store");
        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_HABITS_V1)
            .context("failed to apply habit schema")?;

        let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![HABIT_MIGRATION_VERSION, now],
            )
            .context("failed to register habit schema migration")?;

        if inserted > 0 {
            info!(version = HABIT_MIGRATION_VERSION, "applied habit schema migration");
        }
        Ok(())
    }

    pub fn create_habit(&self, input: &HabitInput) -> Result<Habit> {
        input
            .validate()
            .map_err(|err| anyhow!("habit validation failed: {err}"))?;

        let now = now_utc();
        let now_raw = format_rfc3339(now).map_err(|err| anyhow!(err.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO habits(
                    user_id, name, description, icon, frequency, color, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    input.user_id,
                    input.name,
                    input.description,
                    input.icon,
                    input.frequency,
                    input.color,
                    now_raw,
                    now_raw,
                ],
            )
            .context("failed to insert habit")?;

        let habit_id = self.conn.last_insert_rowid();
        info!(habit_id, user_id = input.user_id, "created habit");

        Ok(Habit {
            habit_id,
            user_id: input.user_id,
            name: input.name.clone(),
            description: input.description.clone(),
            icon: input.icon.clone(),
            frequency: input.frequency.clone(),
            color: input.color.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_habit(&self, habit_id: i64) -> Result<Option<Habit>> {
        self.conn
            .query_row(
                &format!("SELECT {HABIT_COLUMNS} FROM habits WHERE habit_id = ?1"),
                params![habit_id],
                parse_habit_row,
            )
            .optional()
            .with_context(|| format!("failed to load habit {habit_id}"))
    }

    pub fn list_habits_for_user(&self, user_id: i64) -> Result<Vec<Habit>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {HABIT_COLUMNS} FROM habits WHERE user_id = ?1 ORDER BY habit_id ASC"
            ))
            .context("failed to prepare habit list query")?;
        let rows = stmt
            .query_map(params![user_id], parse_habit_row)
            .with_context(|| format!("failed to query habits for user {user_id}"))?;
        let habits = collect_rows(rows)?;

        debug!(user_id, count = habits.len(), "listed habits");
        Ok(habits)
    }

    pub fn update_habit(&mut self, habit_id: i64, patch: &HabitPatch) -> Result<Habit> {
        patch
            .validate()
            .map_err(|err| anyhow!("habit validation failed: {err}"))?;

        let tx = self
            .conn
            .transaction()
            .context("failed to start habit update transaction")?;

        let Some(mut habit) = load_habit(&tx, habit_id)? else {
            return Err(StoreError::HabitNotFound(habit_id).into());
        };

        if let Some(name) = &patch.name {
            habit.name.clone_from(name);
        }
        if let Some(description) = &patch.description {
            habit.description = Some(description.clone());
        }
        if let Some(icon) = &patch.icon {
            habit.icon = Some(icon.clone());
        }
        if let Some(frequency) = &patch.frequency {
            habit.frequency.clone_from(frequency);
        }
        if let Some(color) = &patch.color {
            habit.color = Some(color.clone());
        }
        habit.updated_at = now_utc();

        tx.execute(
            "UPDATE habits SET
                name = ?2, description = ?3, icon = ?4, frequency = ?5, color = ?6, updated_at = ?7
             WHERE habit_id = ?1",
            params![
                habit_id,
                habit.name,
                habit.description,
                habit.icon,
                habit.frequency,
                habit.color,
                format_rfc3339(habit.updated_at).map_err(|err| anyhow!(err.to_string()))?,
            ],
        )
        .context("failed to update habit")?;
        tx.commit().context("failed to commit habit update")?;

        info!(habit_id, "updated habit");
        Ok(habit)
    }

    /// Deletes a habit and, through the foreign key cascade, all of its logs.
    /// Returns `false` when no such habit existed.
    pub fn delete_habit(&self, habit_id: i64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM habits WHERE habit_id = ?1", params![habit_id])
            .with_context(|| format!("failed to delete habit {habit_id}"))?;

        if removed > 0 {
            info!(habit_id, "deleted habit");
        }
        Ok(removed > 0)
    }

    /// Records a completion of `habit_id` on `date`. At most one log per
    /// habit per calendar day is accepted.
    pub fn track_habit(&mut self, habit_id: i64, date: Date) -> Result<HabitLog> {
        let completed_on = format_calendar_date(date).map_err(|err| anyhow!(err.to_string()))?;
        let recorded_at = now_utc();

        let tx = self
            .conn
            .transaction()
            .context("failed to start habit log transaction")?;

        if load_habit(&tx, habit_id)?.is_none() {
            return Err(StoreError::HabitNotFound(habit_id).into());
        }

        let insert = tx.execute(
            "INSERT INTO habit_logs(habit_id, completed_on, completed, recorded_at)
             VALUES (?1, ?2, 1, ?3)",
            params![
                habit_id,
                completed_on,
                format_rfc3339(recorded_at).map_err(|err| anyhow!(err.to_string()))?,
            ],
        );

        match insert {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                warn!(habit_id, %completed_on, "rejected duplicate completion");
                return Err(StoreError::DuplicateCompletion {
                    habit_id,
                    date: completed_on,
                }
                .into());
            }
            Err(err) => return Err(err).context("failed to insert habit log"),
        }

        let log_id = tx.last_insert_rowid();
        tx.commit().context("failed to commit habit log transaction")?;

        info!(habit_id, log_id, %completed_on, "tracked habit completion");
        Ok(HabitLog {
            log_id,
            habit_id,
            completed_on: date,
            completed: true,
            recorded_at,
        })
    }

    /// Lists logs for a habit ascending by calendar day. An unknown habit
    /// simply has no logs.
    pub fn list_logs(&self, habit_id: i64) -> Result<Vec<HabitLog>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {LOG_COLUMNS} FROM habit_logs
                 WHERE habit_id = ?1
                 ORDER BY completed_on ASC, log_id ASC"
            ))
            .context("failed to prepare habit log query")?;
        let rows = stmt
            .query_map(params![habit_id], parse_log_row)
            .with_context(|| format!("failed to query logs for habit {habit_id}"))?;
        let logs = collect_rows(rows)?;

        debug!(habit_id, count = logs.len(), "listed habit logs");
        Ok(logs)
    }

    pub fn list_completion_events(&self, habit_id: i64) -> Result<Vec<CompletionEvent>> {
        Ok(self
            .list_logs(habit_id)?
            .iter()
            .map(HabitLog::event)
            .collect())
    }

    /// Removes one log of a habit and returns it.
    pub fn delete_log(&mut self, habit_id: i64, log_id: i64) -> Result<HabitLog> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start habit log delete transaction")?;

        if load_habit(&tx, habit_id)?.is_none() {
            return Err(StoreError::HabitNotFound(habit_id).into());
        }

        let log = tx
            .query_row(
                &format!("SELECT {LOG_COLUMNS} FROM habit_logs WHERE log_id = ?1 AND habit_id = ?2"),
                params![log_id, habit_id],
                parse_log_row,
            )
            .optional()
            .with_context(|| format!("failed to load habit log {log_id}"))?
            .ok_or(StoreError::LogNotFound { habit_id, log_id })?;

        tx.execute("DELETE FROM habit_logs WHERE log_id = ?1", params![log_id])
            .context("failed to delete habit log")?;
        tx.commit().context("failed to commit habit log delete")?;

        info!(habit_id, log_id, "deleted habit log");
        Ok(log)
    }

    /// Derives streak statistics for a habit from its ascending log.
    pub fn streak(&self, habit_id: i64, as_of: Option<Date>) -> Result<StreakSummary> {
        let events = self.list_completion_events(habit_id)?;
        let summary = summarize_streak(&events, as_of)
            .map_err(|err| anyhow!("failed computing streak for habit {habit_id}: {err}"))?;

        debug!(
            habit_id,
            events = events.len(),
            streak = summary.streak,
            longest = summary.longest_streak,
            "computed streak"
        );
        Ok(summary)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn load_habit(tx: &Transaction<'_>, habit_id: i64) -> Result<Option<Habit>> {
    tx.query_row(
        &format!("SELECT {HABIT_COLUMNS} FROM habits WHERE habit_id = ?1"),
        params![habit_id],
        parse_habit_row,
    )
    .optional()
    .with_context(|| format!("failed to load habit {habit_id}"))
}

fn parse_habit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Habit> {
    let created_at_raw: String = row.get(7)?;
    let updated_at_raw: String = row.get(8)?;

    Ok(Habit {
        habit_id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        icon: row.get(4)?,
        frequency: row.get(5)?,
        color: row.get(6)?,
        created_at: parse_rfc3339_utc(&created_at_raw).map_err(|err| to_sql_error(7, &err))?,
        updated_at: parse_rfc3339_utc(&updated_at_raw).map_err(|err| to_sql_error(8, &err))?,
    })
}

fn parse_log_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HabitLog> {
    let completed_on_raw: String = row.get(2)?;
    let completed_raw: i64 = row.get(3)?;
    let recorded_at_raw: String = row.get(4)?;

    Ok(HabitLog {
        log_id: row.get(0)?,
        habit_id: row.get(1)?,
        completed_on: parse_calendar_date(&completed_on_raw)
            .map_err(|err| to_sql_error(2, &err))?,
        completed: completed_raw != 0,
        recorded_at: parse_rfc3339_utc(&recorded_at_raw).map_err(|err| to_sql_error(4, &err))?,
    })
}

fn to_sql_error(column: usize, err: &HabitError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

// Only the per-day unique index means "already completed"; CHECK and
// foreign key failures stay plain errors.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
