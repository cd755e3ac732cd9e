use std::path::Path;

use cadence_models::errors::SendableError;
use log::{LevelFilter, info};

use crate::logger::{self, print_env};

pub fn startup(name: &str, level: LevelFilter, log_file: Option<&Path>) -> Result<(), SendableError> {
    logger::setup_logger(level, log_file)?;
    log_panics::init();

    info!("--- {} ---", name);
    info!("--- Version {} ---", env!("CARGO_PKG_VERSION"));
    print_env()?;

    Ok(())
}
