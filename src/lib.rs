#![cfg_attr(docsrs, feature(doc_cfg))]
//! # jbdbms_lib
//!
//! This crate provides a library for reading JBD BMS (Battery Management System) devices
//! over their Bluetooth Low Energy UART service.
//!
//! Responses arrive as notification fragments. The library reassembles them into frames,
//! validates and decodes them, and drives the request/response cycle with timeouts and retries.
//!
//! ## Features
//!
//! This crate uses a feature-based system to keep dependencies minimal.
//! The protocol engine works with any [`transport::Transport`] implementation.
//!
//! - `default`: No transport, only the protocol engine.
//!
//! ### Transport Features
//! - `ble`: Enables the Bluetooth Low Energy transport using the `bluest` crate.
//!
//! ### Utility Features
//! - `bin-dependencies`: Enables all features required by the `jbdbms` binary executable (currently `ble`).

/// Contains error types for the library.
mod error;
/// Defines the wire protocol of JBD BMS.
pub mod protocol;

/// Collects notification fragments into frames.
pub mod reassembly;
/// The link to the device.
pub mod transport;
/// Session timing and retry settings.
pub mod config;
/// Request/response state machine.
pub mod engine;
/// Read cycles over a transport.
pub mod session;
/// Battery snapshot assembled from responses.
pub mod battery;
/// Snapshot history on disk.
pub mod history;

pub use battery::Battery;
pub use config::SessionConfig;
pub use error::{DecodeError, Error, Result};
pub use session::{BmsSession, SnapshotConsumer};

/// Bluetooth Low Energy transport.
#[cfg_attr(docsrs, doc(cfg(feature = "ble")))]
#[cfg(feature = "ble")]
pub mod ble;
