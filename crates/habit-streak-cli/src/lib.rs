//! Command surface for the habit streak store.
//!
//! Hosts embed the CLI through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_with_db`] for direct [`Command`] execution against a DB path.
//! - [`run_command`] for execution against an existing [`SqliteHabitStore`].
//! - [`execute`] when the JSON result is wanted instead of printed.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use habit_streak_core::{
    parse_calendar_date, today_utc, HabitInput, HabitPatch, DEFAULT_FREQUENCY,
};
use habit_streak_store_sqlite::{SqliteHabitStore, StoreError};
use serde_json::{json, Value};
use time::Date;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hs")]
#[command(about = "Habit tracking and streak CLI")]
pub struct Cli {
    #[arg(long, env = "HABIT_STREAK_DB", default_value = "./habit_streak.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Habit {
        #[command(subcommand)]
        command: Box<HabitCommand>,
    },
    Log {
        #[command(subcommand)]
        command: Box<LogCommand>,
    },
    Streak(StreakArgs),
}

#[derive(Debug, Subcommand)]
pub enum HabitCommand {
    Create(HabitCreateArgs),
    List(HabitListArgs),
    Show(HabitIdArgs),
    Update(HabitUpdateArgs),
    Delete(HabitIdArgs),
}

#[derive(Debug, Args)]
pub struct HabitCreateArgs {
    #[arg(long)]
    user_id: i64,
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    icon: Option<String>,
    #[arg(long, default_value = DEFAULT_FREQUENCY)]
    frequency: String,
    #[arg(long)]
    color: Option<String>,
}

#[derive(Debug, Args)]
pub struct HabitListArgs {
    #[arg(long)]
    user_id: i64,
}

#[derive(Debug, Args)]
pub struct HabitIdArgs {
    #[arg(long)]
    habit_id: i64,
}

#[derive(Debug, Args)]
pub struct HabitUpdateArgs {
    #[arg(long)]
    habit_id: i64,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    icon: Option<String>,
    #[arg(long)]
    frequency: Option<String>,
    #[arg(long)]
    color: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum LogCommand {
    Add(LogAddArgs),
    List(HabitIdArgs),
    Delete(LogDeleteArgs),
}

#[derive(Debug, Args)]
pub struct LogAddArgs {
    #[arg(long)]
    habit_id: i64,
    /// Calendar day (YYYY-MM-DD or RFC3339); defaults to today in UTC.
    #[arg(long)]
    date: Option<String>,
}

#[derive(Debug, Args)]
pub struct LogDeleteArgs {
    #[arg(long)]
    habit_id: i64,
    #[arg(long)]
    log_id: i64,
}

#[derive(Debug, Args)]
pub struct StreakArgs {
    #[arg(long)]
    habit_id: i64,
    /// Also report whether the streak is still alive on this day.
    #[arg(long)]
    as_of: Option<String>,
    #[arg(long)]
    summary: bool,
}

/// Installs the stderr `tracing` subscriber. `RUST_LOG` overrides the
/// default `warn` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when store open/migrate fails or the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    run_with_db(&cli.db, cli.command)
}

/// Executes a parsed command using the provided `SQLite` DB path.
///
/// # Errors
/// Returns an error when store open/migrate fails or the requested command fails.
pub fn run_with_db(db_path: &Path, command: Command) -> Result<()> {
    let mut store = SqliteHabitStore::open(db_path)?;
    store.migrate()?;
    run_command(command, &mut store)
}

/// Executes a parsed command against an existing store handle and prints the
/// JSON result to stdout.
///
/// # Errors
/// Returns an error when argument parsing, validation, or persistence fails.
pub fn run_command(command: Command, store: &mut SqliteHabitStore) -> Result<()> {
    let output = execute(command, store)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Executes a parsed command and returns its JSON result.
///
/// # Errors
/// Returns an error when argument parsing, validation, or persistence fails.
pub fn execute(command: Command, store: &mut SqliteHabitStore) -> Result<Value> {
    match command {
        Command::Habit { command } => execute_habit(*command, store),
        Command::Log { command } => execute_log(*command, store),
        Command::Streak(args) => execute_streak(&args, store),
    }
}

fn execute_habit(command: HabitCommand, store: &mut SqliteHabitStore) -> Result<Value> {
    match command {
        HabitCommand::Create(args) => {
            let input = HabitInput {
                user_id: args.user_id,
                name: args.name,
                description: args.description,
                icon: args.icon,
                frequency: args.frequency,
                color: args.color,
            };
            let habit = store.create_habit(&input)?;
            Ok(serde_json::to_value(habit)?)
        }
        HabitCommand::List(args) => {
            let habits = store.list_habits_for_user(args.user_id)?;
            Ok(serde_json::to_value(habits)?)
        }
        HabitCommand::Show(args) => {
            let Some(habit) = store.get_habit(args.habit_id)? else {
                return Err(StoreError::HabitNotFound(args.habit_id).into());
            };
            Ok(serde_json::to_value(habit)?)
        }
        HabitCommand::Update(args) => {
            let patch = HabitPatch {
                name: args.name,
                description: args.description,
                icon: args.icon,
                frequency: args.frequency,
                color: args.color,
            };
            let habit = store.update_habit(args.habit_id, &patch)?;
            Ok(serde_json::to_value(habit)?)
        }
        HabitCommand::Delete(args) => {
            if !store.delete_habit(args.habit_id)? {
                return Err(StoreError::HabitNotFound(args.habit_id).into());
            }
            Ok(json!({ "message": "Habit deleted successfully" }))
        }
    }
}

fn execute_log(command: LogCommand, store: &mut SqliteHabitStore) -> Result<Value> {
    match command {
        LogCommand::Add(args) => {
            let date = match args.date.as_deref() {
                Some(raw) => parse_date_arg("--date", raw)?,
                None => today_utc(),
            };
            let log = store.track_habit(args.habit_id, date)?;
            Ok(serde_json::to_value(log)?)
        }
        LogCommand::List(args) => {
            let logs = store.list_logs(args.habit_id)?;
            Ok(serde_json::to_value(logs)?)
        }
        LogCommand::Delete(args) => {
            let deleted = store.delete_log(args.habit_id, args.log_id)?;
            Ok(json!({
                "message": "Habit log deleted successfully",
                "deleted_log": deleted,
            }))
        }
    }
}

fn execute_streak(args: &StreakArgs, store: &SqliteHabitStore) -> Result<Value> {
    let as_of = args
        .as_of
        .as_deref()
        .map(|raw| parse_date_arg("--as-of", raw))
        .transpose()?;

    let summary = store.streak(args.habit_id, as_of)?;
    debug!(habit_id = args.habit_id, streak = summary.streak, "streak query");

    if args.summary {
        return Ok(serde_json::to_value(summary)?);
    }

    let mut output = json!({ "streak": summary.streak });
    if let (Some(as_of), Some(current)) = (summary.as_of, summary.current_streak) {
        output["as_of"] = serde_json::to_value(as_of)?;
        output["current_streak"] = json!(current);
    }
    Ok(output)
}

fn parse_date_arg(flag: &str, raw: &str) -> Result<Date> {
    parse_calendar_date(raw).map_err(|err| anyhow!("invalid {flag} value: {err}"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::too_many_lines)]

    use super::*;
    use std::fs;
    use ulid::Ulid;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_store() -> SqliteHabitStore {
        let store = must(SqliteHabitStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn create_habit(store: &mut SqliteHabitStore, name: &str) -> i64 {
        let created = must(execute(
            Command::Habit {
                command: Box::new(HabitCommand::Create(HabitCreateArgs {
                    user_id: 1,
                    name: name.to_string(),
                    description: None,
                    icon: None,
                    frequency: DEFAULT_FREQUENCY.to_string(),
                    color: None,
                })),
            },
            store,
        ));
        match created["habit_id"].as_i64() {
            Some(value) => value,
            None => panic!("habit_id missing from create output: {created}"),
        }
    }

    fn log_day(store: &mut SqliteHabitStore, habit_id: i64, date: &str) -> Result<Value> {
        execute(
            Command::Log {
                command: Box::new(LogCommand::Add(LogAddArgs {
                    habit_id,
                    date: Some(date.to_string()),
                })),
            },
            store,
        )
    }

    fn streak(store: &mut SqliteHabitStore, args: StreakArgs) -> Result<Value> {
        execute(Command::Streak(args), store)
    }

    #[test]
    fn streak_output_is_single_field_object() {
        let mut store = fixture_store();
        let habit_id = create_habit(&mut store, "Read");
        for date in ["2026-02-01", "2026-02-02", "2026-02-05"] {
            must(log_day(&mut store, habit_id, date));
        }

        let output = must(streak(
            &mut store,
            StreakArgs {
                habit_id,
                as_of: None,
                summary: false,
            },
        ));
        assert_eq!(output, json!({ "streak": 1 }));
    }

    #[test]
    fn streak_without_logs_is_zero() {
        let mut store = fixture_store();
        let habit_id = create_habit(&mut store, "Read");
        let output = must(streak(
            &mut store,
            StreakArgs {
                habit_id,
                as_of: None,
                summary: false,
            },
        ));
        assert_eq!(output, json!({ "streak": 0 }));
    }

    #[test]
    fn streak_as_of_adds_current_view() {
        let mut store = fixture_store();
        let habit_id = create_habit(&mut store, "Read");
        for date in ["2026-02-01", "2026-02-02", "2026-02-03"] {
            must(log_day(&mut store, habit_id, date));
        }

        let output = must(streak(
            &mut store,
            StreakArgs {
                habit_id,
                as_of: Some("2026-02-04".to_string()),
                summary: false,
            },
        ));
        assert_eq!(
            output,
            json!({ "streak": 3, "as_of": "2026-02-04", "current_streak": 3 })
        );

        let summary = must(streak(
            &mut store,
            StreakArgs {
                habit_id,
                as_of: Some("2026-02-09".to_string()),
                summary: true,
            },
        ));
        assert_eq!(
            summary,
            json!({
                "streak": 3,
                "longest_streak": 3,
                "completed_days": 3,
                "last_completed_on": "2026-02-03",
                "as_of": "2026-02-09",
                "current_streak": 0
            })
        );
    }

    #[test]
    fn log_add_normalizes_timestamps_to_calendar_day() {
        let mut store = fixture_store();
        let habit_id = create_habit(&mut store, "Read");
        let log = must(log_day(&mut store, habit_id, "2026-02-07T21:15:00Z"));
        assert_eq!(log["completed_on"], json!("2026-02-07"));
        assert_eq!(log["completed"], json!(true));
    }

    #[test]
    fn invalid_dates_are_rejected() {
        let mut store = fixture_store();
        let habit_id = create_habit(&mut store, "Read");
        assert!(log_day(&mut store, habit_id, "not-a-date").is_err());
        assert!(streak(
            &mut store,
            StreakArgs {
                habit_id,
                as_of: Some("02/07/2026".to_string()),
                summary: false,
            },
        )
        .is_err());
    }

    #[test]
    fn duplicate_day_surfaces_store_error() {
        let mut store = fixture_store();
        let habit_id = create_habit(&mut store, "Read");
        must(log_day(&mut store, habit_id, "2026-02-07"));

        let err = match log_day(&mut store, habit_id, "2026-02-07") {
            Ok(_) => panic!("expected duplicate rejection"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::DuplicateCompletion { .. })
        ));
    }

    #[test]
    fn habit_show_update_delete_flow() {
        let mut store = fixture_store();
        let habit_id = create_habit(&mut store, "Read");

        let updated = must(execute(
            Command::Habit {
                command: Box::new(HabitCommand::Update(HabitUpdateArgs {
                    habit_id,
                    name: None,
                    description: Some("before bed".to_string()),
                    icon: None,
                    frequency: None,
                    color: Some("#ffaa00".to_string()),
                })),
            },
            &mut store,
        ));
        assert_eq!(updated["description"], json!("before bed"));
        assert_eq!(updated["color"], json!("#ffaa00"));

        let shown = must(execute(
            Command::Habit {
                command: Box::new(HabitCommand::Show(HabitIdArgs { habit_id })),
            },
            &mut store,
        ));
        assert_eq!(shown, updated);

        let deleted = must(execute(
            Command::Habit {
                command: Box::new(HabitCommand::Delete(HabitIdArgs { habit_id })),
            },
            &mut store,
        ));
        assert_eq!(deleted, json!({ "message": "Habit deleted successfully" }));

        let missing = execute(
            Command::Habit {
                command: Box::new(HabitCommand::Show(HabitIdArgs { habit_id })),
            },
            &mut store,
        );
        assert!(missing.is_err());
    }

    #[test]
    fn log_delete_reports_deleted_row() {
        let mut store = fixture_store();
        let habit_id = create_habit(&mut store, "Read");
        let log = must(log_day(&mut store, habit_id, "2026-02-07"));
        let log_id = match log["log_id"].as_i64() {
            Some(value) => value,
            None => panic!("log_id missing: {log}"),
        };

        let output = must(execute(
            Command::Log {
                command: Box::new(LogCommand::Delete(LogDeleteArgs { habit_id, log_id })),
            },
            &mut store,
        ));
        assert_eq!(output["message"], json!("Habit log deleted successfully"));
        assert_eq!(output["deleted_log"], log);

        let remaining = must(execute(
            Command::Log {
                command: Box::new(LogCommand::List(HabitIdArgs { habit_id })),
            },
            &mut store,
        ));
        assert_eq!(remaining, json!([]));
    }

    #[test]
    fn cli_end_to_end_against_file_db() {
        let db_path = std::env::temp_dir().join(format!("habit-cli-e2e-{}.sqlite3", Ulid::new()));
        let db_path_str = match db_path.to_str() {
            Some(value) => value.to_string(),
            None => panic!("temp db path must be valid UTF-8"),
        };

        let run = |args: &[&str]| -> Result<()> {
            let mut argv = vec!["hs".to_string(), "--db".to_string(), db_path_str.clone()];
            argv.extend(args.iter().map(|item| (*item).to_string()));
            let cli = Cli::try_parse_from(argv)?;
            run_cli(cli)
        };

        must(run(&["habit", "create", "--user-id", "1", "--name", "Read"]));
        for date in ["2026-02-01", "2026-02-02", "2026-02-03"] {
            must(run(&["log", "add", "--habit-id", "1", "--date", date]));
        }
        assert!(run(&["log", "add", "--habit-id", "1", "--date", "2026-02-03"]).is_err());
        must(run(&["streak", "--habit-id", "1"]));

        let store = must(SqliteHabitStore::open(&db_path));
        must(store.migrate());
        assert_eq!(must(store.streak(1, None)).streak, 3);

        let _ = fs::remove_file(&db_path);
    }
}
