use crate::monitor::ByteSource;
use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT};
use crate::Error;
use std::io::{ErrorKind, Read};
use std::time::Duration;

/// Listen-only connection to the BMS RS485 port.
#[derive(Debug)]
pub struct JkBms {
    serial: Box<dyn serialport::SerialPort>,
}

impl JkBms {
    pub fn new(port: &str) -> Result<Self, Error> {
        Self::with_baud_rate(port, DEFAULT_BAUD_RATE)
    }

    pub fn with_baud_rate(port: &str, baud_rate: u32) -> Result<Self, Error> {
        log::debug!("Open serial port '{}' with {} baud", port, baud_rate);
        let serial = serialport::new(port, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(DEFAULT_TIMEOUT)
            .open()
            .map_err(std::io::Error::from)?;
        Ok(Self { serial })
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        log::trace!("set timeout to {:?}", timeout);
        self.serial
            .set_timeout(timeout)
            .map_err(|err| Error::Io(err.into()))
    }

    /// Drops bytes already waiting in the driver, e.g. a stale half frame.
    pub fn clear_input(&mut self) -> Result<(), Error> {
        self.serial
            .clear(serialport::ClearBuffer::Input)
            .map_err(|err| Error::Io(err.into()))
    }
}

impl ByteSource for JkBms {
    fn poll_bytes(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
        match self.serial.read(buffer) {
            Ok(received) => Ok(received),
            Err(err) if err.kind() == ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err),
        }
    }
}
