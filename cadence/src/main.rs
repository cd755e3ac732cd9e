mod config;
mod handlers;

use std::sync::Arc;

use cadence_database::{memory::MemoryDb, sqlite::SqliteDb, TaskStore};
use cadence_models::{core::TaskType, errors::SendableError};
use cadence_scheduler::{HandlerRegistry, TaskScheduler};
use cadence_utilities::startup::startup;
use cadence_ws::run_webserver;
use clap::Parser;
use log::{error, info, warn};
use tokio::sync::Notify;

use crate::{
    config::{Config, DatabaseKind},
    handlers::{ConsoleHandler, MaintenanceHandler},
};

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    let config = Config::parse();
    startup("Cadence", config.log_level, config.log_file.as_deref())?;

    match config.database {
        DatabaseKind::Sqlite => {
            info!("Initialize database {}", config.sqlite_path);
            let store = Arc::new(SqliteDb::new(&config.sqlite_path).await?);
            serve(store, config).await
        }
        DatabaseKind::Memory => {
            warn!("Using the in-memory task store; tasks will not survive a restart");
            serve(Arc::new(MemoryDb::new()), config).await
        }
    }
}

async fn serve<S: TaskStore>(store: Arc<S>, config: Config) -> Result<(), SendableError> {
    let registry = HandlerRegistry::new()
        .with_handler(TaskType::Broadcast, ConsoleHandler)
        .with_handler(TaskType::Maintenance, MaintenanceHandler::new(store.clone()));

    let port = config.port;
    info!("Initialize scheduler");
    let scheduler = TaskScheduler::load(store, registry, config.scheduler).await?;
    let scheduler_task = scheduler.start();

    info!("Initialize web server");
    let notify = Arc::new(Notify::new());
    let ws_scheduler = scheduler.clone();
    let ws_notify = notify.clone();
    let web_server_task = tokio::spawn(async move {
        if let Err(err) = run_webserver(ws_scheduler, ws_notify, port).await {
            error!("Webserver error: {}", err);
        }
    });

    info!("Initialization complete!");

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal. Shutting down...");
    scheduler.stop();
    notify.notify_waiters();

    if let Err(e) = tokio::try_join!(scheduler_task, web_server_task) {
        error!("Error while shutting down: {:?}", e);
    }

    info!("Application shutdown complete.");
    Ok(())
}
