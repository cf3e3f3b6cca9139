use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    habit_streak_cli::init_tracing();
    let cli = habit_streak_cli::Cli::parse();
    habit_streak_cli::run_cli(cli)
}
