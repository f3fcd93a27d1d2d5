use crate::protocol::Command;
use std::time::Duration;

/// Reasons a received frame cannot be turned into a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes than the frame or payload shape requires.
    #[error("Frame truncated - required={required} received={received}")]
    Truncated { required: usize, received: usize },
    /// The checksum field does not match the frame content.
    #[error("Invalid checksum - calculated={calculated:04X} received={received:04X}")]
    BadChecksum { calculated: u16, received: u16 },
    /// The start or end marker byte is wrong.
    #[error("Invalid frame markers - start={start:02X} end={end:02X}")]
    BadMarker { start: u8, end: u8 },
    /// The response belongs to a different command than the one outstanding.
    #[error("Unexpected response - expected={expected:02X} received={received:02X}")]
    UnexpectedCommand { expected: u8, received: u8 },
    /// More payload bytes than the length field declares.
    #[error("Length mismatch - declared={declared} received={received}")]
    LengthMismatch { declared: usize, received: usize },
    /// The device answered with a non-zero status byte.
    #[error("Request rejected by device - status={0:02X}")]
    Rejected(u8),
}

/// Errors returned by the protocol engine and session driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No complete response frame arrived within the poll window.
    #[error("No response to {command} request within {waited:?}")]
    Timeout { command: Command, waited: Duration },
    /// A complete frame arrived but could not be decoded.
    #[error("Cannot decode {command} response: {source}")]
    Decode {
        command: Command,
        #[source]
        source: DecodeError,
    },
    /// The transport collaborator failed (connect, subscribe, write, ...).
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A request was issued while another one is still outstanding.
    #[error("Cannot issue {requested} request while {pending} request is outstanding")]
    RequestPending { requested: Command, pending: Command },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wraps a platform error as a transport failure.
    pub fn transport<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Transport(err.into())
    }

    /// `true` for failures that are expected on a flaky radio link.
    ///
    /// Programmer errors such as [`Error::RequestPending`] are never recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::Decode { .. } | Error::Transport(_)
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
