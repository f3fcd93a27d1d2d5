use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use jbdbms_lib::history::HistoryStore;
use jbdbms_lib::SessionConfig;
use log::*;
use std::path::Path;
use std::{ops::Deref, panic};

mod commandline;
mod daemon;

use commandline::{CliArgs, CliCommands};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn load_config(args: &CliArgs) -> Result<SessionConfig> {
    let base = match &args.config_file {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Cannot load config file '{}'", path.display()))?,
        None if Path::new(SessionConfig::DEFAULT_CONFIG_FILE).exists() => {
            SessionConfig::load(SessionConfig::DEFAULT_CONFIG_FILE).with_context(|| {
                format!(
                    "Cannot load config file '{}'",
                    SessionConfig::DEFAULT_CONFIG_FILE
                )
            })?
        }
        None => SessionConfig::default(),
    };
    Ok(args.session_config(base))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let history = args.history_dir.as_ref().map(HistoryStore::new);

    match args.command {
        CliCommands::History => {
            let history = history.with_context(|| "The history command requires --history-dir")?;
            let snapshots = history
                .load(&args.device)
                .with_context(|| format!("Cannot load history of '{}'", args.device))?;
            info!("{} snapshots stored for {}", snapshots.len(), args.device);
            for snapshot in &snapshots {
                daemon::print_snapshot(snapshot, args.format)?;
            }
        }
        CliCommands::Read => {
            let config = load_config(&args)?;
            debug!("Session config: {config:?}");
            let mut session = daemon::open_session(&args, config).await?;
            daemon::read_and_record(&mut session, history.as_ref(), args.format).await?;
        }
        CliCommands::Daemon { interval } => {
            let config = load_config(&args)?;
            debug!("Session config: {config:?}");
            let session = daemon::open_session(&args, config).await?;
            daemon::run(session, history, args.format, interval).await?;
        }
    }

    Ok(())
}
