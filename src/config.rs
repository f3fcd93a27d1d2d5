use crate::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Requested retries above this value are ignored.
pub const MAX_RETRIES: u8 = 3;

/// Timing and retry settings of a session.
///
/// Every field is optional in a config file, e.g.
///
/// ```yaml
/// poll_interval: 100ms
/// poll_attempts: 25
/// settle_delay: 200ms
/// max_retries: 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often the state is checked while waiting for a response
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Number of polls before a request times out
    pub poll_attempts: u32,
    /// Pause after subscribing and unsubscribing, the firmware needs it
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Whole-cycle retries after a transport failure, capped at [`MAX_RETRIES`]
    pub max_retries: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            poll_attempts: 25,
            settle_delay: Duration::from_millis(200),
            max_retries: 1,
        }
    }
}

impl SessionConfig {
    pub const DEFAULT_CONFIG_FILE: &'static str = "jbdbms.yaml";

    /// Total time a request may stay unanswered.
    pub fn response_timeout(&self) -> Duration {
        self.poll_interval * self.poll_attempts
    }

    pub fn effective_retries(&self) -> u8 {
        self.max_retries.min(MAX_RETRIES)
    }

    pub fn load<P: AsRef<Path>>(config_file_path: P) -> Result<Self> {
        let config_file_path = config_file_path.as_ref();
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)?;
        let config: Self = serde_yaml::from_reader(&config_file)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_device_timing() {
        let config = SessionConfig::default();
        assert_eq!(config.response_timeout(), Duration::from_millis(2500));
        assert_eq!(config.effective_retries(), 1);
    }

    #[test]
    fn retries_are_capped() {
        let config = SessionConfig {
            max_retries: 10,
            ..Default::default()
        };
        assert_eq!(config.effective_retries(), MAX_RETRIES);
    }

    #[test]
    fn load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval: 50ms").unwrap();
        writeln!(file, "max_retries: 2").unwrap();
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.poll_attempts, 25);
        assert_eq!(config.settle_delay, Duration::from_millis(200));
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn load_rejects_invalid_duration() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "settle_delay: soon").unwrap();
        assert!(matches!(
            SessionConfig::load(file.path()),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn load_missing_file() {
        assert!(matches!(
            SessionConfig::load("/nonexistent/jbdbms.yaml"),
            Err(crate::Error::Io(_))
        ));
    }
}
