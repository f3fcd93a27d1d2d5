use anyhow::{Context, Result};
use jbdbms_lib::ble::BleTransport;
use jbdbms_lib::history::HistoryStore;
use jbdbms_lib::{Battery, BmsSession, SessionConfig};
use log::{error, info};
use std::time::Duration;

use crate::commandline::{CliArgs, OutputFormat};

pub type Session = BmsSession<BleTransport, Battery>;

pub async fn open_session(args: &CliArgs, config: SessionConfig) -> Result<Session> {
    let transport = BleTransport::discover(&args.device, args.scan_timeout)
        .await
        .with_context(|| format!("Cannot find BMS '{}'", args.device))?;
    Ok(BmsSession::new(
        transport,
        Battery::new(&args.device),
        config,
    ))
}

pub fn print_snapshot(battery: &Battery, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Debug => println!("{battery:#?}"),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(battery).with_context(|| "Cannot serialize snapshot")?
        ),
    }
    Ok(())
}

/// One read cycle, printed and appended to the history if configured.
pub async fn read_and_record(
    session: &mut Session,
    history: Option<&HistoryStore>,
    format: OutputFormat,
) -> Result<()> {
    let retries = session.config().max_retries;
    session
        .read_once(retries)
        .await
        .with_context(|| "Cannot read BMS")?;
    let battery = session.consumer();
    print_snapshot(battery, format)?;
    if let Some(history) = history {
        history
            .append(&battery.address, battery)
            .with_context(|| "Cannot append snapshot to history")?;
    }
    Ok(())
}

pub async fn run(
    mut session: Session,
    history: Option<HistoryStore>,
    format: OutputFormat,
    interval: Duration,
) -> Result<()> {
    info!("Starting daemon mode: interval={interval:?}, format={format:?}");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping daemon");
                break;
            }
            _ = ticker.tick() => {
                // A failed read does not end the daemon
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted during read, stopping daemon");
                        break;
                    }
                    result = read_and_record(&mut session, history.as_ref(), format) => {
                        if let Err(e) = result {
                            error!("{e:#}");
                        }
                    }
                }
            }
        }
    }
    session.close().await;
    Ok(())
}
