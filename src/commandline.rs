use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use jbdbms_lib::config::MAX_RETRIES;
use jbdbms_lib::SessionConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Read basic info, cell voltages and hardware version once
    Read,
    /// Run in daemon mode, periodically reading the BMS until interrupted with Ctrl-C
    Daemon {
        /// Interval between reads (e.g., "10s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "30s")]
        interval: Duration,
    },
    /// Show the snapshots stored in the history directory
    History,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Debug,
    Json,
}

const fn about_text() -> &'static str {
    "jbd bms bluetooth command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Bluetooth address or advertised name of the BMS (e.g., 70:3E:97:EB:37:16)
    #[arg(short, long)]
    pub device: String,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Optional YAML file with session settings, command line values take precedence
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// How long to scan for the device (e.g., "10s", "1m")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "30s")]
    pub scan_timeout: Duration,

    /// Interval between polls while waiting for a response (e.g., "100ms")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub poll_interval: Option<Duration>,

    /// Number of polls before a request times out
    #[arg(long)]
    pub poll_attempts: Option<u32>,

    /// Number of retries after a connection failure
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=MAX_RETRIES as i64))]
    pub retries: Option<u8>,

    /// Directory for the snapshot history; reads are appended when set
    #[arg(long)]
    pub history_dir: Option<PathBuf>,

    /// Output format of snapshots
    #[arg(long, value_enum, default_value_t = OutputFormat::Debug)]
    pub format: OutputFormat,
}

impl CliArgs {
    /// Applies the command line overrides on top of `base`.
    pub fn session_config(&self, base: SessionConfig) -> SessionConfig {
        SessionConfig {
            poll_interval: self.poll_interval.unwrap_or(base.poll_interval),
            poll_attempts: self.poll_attempts.unwrap_or(base.poll_attempts),
            max_retries: self.retries.unwrap_or(base.max_retries),
            ..base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence() {
        let args = CliArgs::parse_from([
            "jbdbms",
            "--device",
            "70:3E:97:EB:37:16",
            "--poll-attempts",
            "10",
            "--retries",
            "3",
            "read",
        ]);
        let config = args.session_config(SessionConfig::default());
        assert_eq!(config.poll_attempts, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(args.command, CliCommands::Read);
    }

    #[test]
    fn retries_above_cap_are_rejected() {
        let result = CliArgs::try_parse_from([
            "jbdbms", "--device", "AA", "--retries", "4", "read",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn daemon_interval() {
        let args =
            CliArgs::parse_from(["jbdbms", "-d", "AA", "daemon", "--interval", "1m"]);
        assert_eq!(
            args.command,
            CliCommands::Daemon {
                interval: Duration::from_secs(60)
            }
        );
    }
}
