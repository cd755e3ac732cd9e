use std::path::PathBuf;

use cadence_scheduler::SchedulerConfig;
use clap::{Parser, ValueEnum};
use log::LevelFilter;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Sqlite,
    Memory,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "cadence", version, about = "Recurring and one-off task scheduler")]
pub struct Config {
    /// Task store backend
    #[arg(long, value_enum, default_value_t = DatabaseKind::Sqlite)]
    pub database: DatabaseKind,

    /// SQLite database file, created if missing
    #[arg(long, default_value = "cadence.db")]
    pub sqlite_path: String,

    /// Admin API port
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,

    /// Also append log output to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(flatten)]
    pub scheduler: SchedulerConfig,
}
