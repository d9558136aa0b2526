//! Provides an asynchronous listener for the telemetry frames of a JK BMS
//! using Tokio and the `tokio-serial` crate for serial communication.
//!
//! This module is suitable for applications built on the Tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use jkbms_lib::tokio_serial_async::{JkBms, Error};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut bms = JkBms::new("/dev/ttyUSB0")?;
//!     bms.set_timeout(Duration::from_millis(100));
//!
//!     let decoded = bms.read_state(Duration::from_secs(5)).await?;
//!     println!("Voltage: {:.2}V", decoded.state.voltage);
//!
//!     // The latest state stays available to other tasks
//!     let snapshot = bms.snapshot();
//!     println!("Latest: {:?}", snapshot.latest());
//!
//!     Ok(())
//! }
//! ```

use crate::protocol::{Decoded, FrameConfig, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT};
use crate::reader::{FrameReader, MAX_BUFFER};
use crate::snapshot::Snapshot;
use crate::DecodeError;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio_serial::SerialPortBuilderExt;

/// Errors specific to the asynchronous Tokio serial port listener.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No frame could be decoded before the wait elapsed.
    #[error("No frame decoded within {0:?}")]
    NoFrame(Duration),
    /// An I/O error, typically from the serial port communication.
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    /// An error from the `tokio-serial` crate.
    #[error("Tokio serial error: {0}")]
    TokioSerial(#[from] tokio_serial::Error),
}

/// A specialized `Result` type for operations within the `tokio_serial_async` module.
type Result<T> = std::result::Result<T, Error>;

/// Asynchronous, listen-only connection to a JK BMS.
///
/// The BMS uploads its telemetry frames unsolicited; this struct collects the bursts,
/// decodes them and keeps the newest state in a [`Snapshot`].
#[derive(Debug)]
pub struct JkBms {
    serial: tokio_serial::SerialStream,
    io_timeout: Duration, // Silence that ends a burst
    reader: FrameReader,
    snapshot: Snapshot,
}

impl JkBms {
    /// Opens the serial port at 115200 baud 8N1 with the default frame layout.
    ///
    /// # Arguments
    ///
    /// * `port`: The path to the serial port device (e.g., `/dev/ttyUSB0` on Linux, `COM3` on Windows).
    pub fn new(port: &str) -> Result<Self> {
        Self::with_config(port, DEFAULT_BAUD_RATE, FrameConfig::default())
    }

    /// Opens the serial port with an explicit baud rate and frame layout.
    pub fn with_config(port: &str, baud_rate: u32, config: FrameConfig) -> Result<Self> {
        Ok(Self {
            serial: tokio_serial::new(port, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()?,
            io_timeout: DEFAULT_TIMEOUT,
            reader: FrameReader::new(config),
            snapshot: Snapshot::new(),
        })
    }

    /// Sets how long the link may stay silent before a burst is considered complete.
    pub fn set_timeout(&mut self, timeout: Duration) {
        log::trace!("set timeout to {timeout:?}");
        self.io_timeout = timeout;
    }

    /// Handle for readers of the latest decoded state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }

    /// Reads one burst. An empty burst means the link stayed silent for the whole timeout.
    async fn read_burst(&mut self) -> Result<Vec<u8>> {
        let mut rx_buffer = vec![0; MAX_BUFFER];
        match tokio::time::timeout(self.io_timeout, self.serial.read(&mut rx_buffer)).await {
            Ok(received) => {
                rx_buffer.truncate(received?);
                log::trace!("receive_bytes: {rx_buffer:02X?}");
                Ok(rx_buffer)
            }
            Err(_elapsed) => Ok(Vec::new()),
        }
    }

    /// Waits until a complete frame has been decoded and published.
    ///
    /// Bursts keep being collected until one completes a frame or `wait` elapses. Decode
    /// failures on the way are logged and skipped.
    ///
    /// # Returns
    ///
    /// The decoded frame, or `Error::NoFrame` if nothing could be decoded in time.
    pub async fn read_state(&mut self, wait: Duration) -> Result<Decoded> {
        let deadline = Instant::now() + wait;
        while Instant::now() < deadline {
            let burst = self.read_burst().await?;
            self.reader.extend(&burst);
            loop {
                match self.reader.next_frame() {
                    Ok(decoded) => {
                        self.snapshot.publish(decoded.clone());
                        return Ok(decoded);
                    }
                    Err(DecodeError::NoFrameFound) | Err(DecodeError::Truncated { .. }) => break,
                    Err(err) => log::warn!("Dropping frame: {err}"),
                }
            }
        }
        Err(Error::NoFrame(wait))
    }
}
