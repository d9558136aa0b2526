#![cfg_attr(docsrs, feature(doc_cfg))]
//! # jkbms_lib
//!
//! This crate decodes the telemetry frames a JK BMS (Battery Management System) uploads on its
//! half-duplex RS485 port.
//!
//! Bytes arrive in bursts with no alignment to frame boundaries. [`protocol::FrameScanner`]
//! locates a frame header inside a buffer, [`protocol::FrameDecoder`] turns the frame into a
//! [`protocol::BmsState`], [`reader::FrameReader`] carries partial frames over to the next
//! burst and [`monitor::Monitor`] ties a [`monitor::ByteSource`] to an atomically published
//! [`snapshot::Snapshot`].
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `jkbms` command-line tool and pulls in `serialport` and `serde`.
//!
//! ### Link Features
//! - `serialport`: Enables the **synchronous** byte source using the `serialport` crate.
//! - `tokio-serial-async`: Enables the **asynchronous** listener using `tokio` and `tokio-serial`.
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for serializing/deserializing data structures.
//! - `bin-dependencies`: Enables all features required by the `jkbms` binary executable.

/// Contains error types for the library.
mod error;
/// Worker loop feeding bursts from a byte source through the decoder.
pub mod monitor;
/// Defines the telemetry frame layout, scanner and decoder.
pub mod protocol;
/// Carries partial frames across bursts.
pub mod reader;
/// Atomically published battery state.
pub mod snapshot;

pub use error::{DecodeError, Error};

/// Synchronous byte source on a serial port.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

/// Asynchronous listener for JK BMS frames.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;
