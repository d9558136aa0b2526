use crate::config::Config;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Wait for one telemetry frame and show the decoded battery state
    Read {
        /// How long to wait for a complete frame (e.g., "5s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "5s")]
        wait: Duration,
    },
    /// Run in daemon mode, continuously decoding and printing every received frame
    Daemon {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Console)]
        format: OutputFormat,
        /// Interval for logging decode statistics (e.g., "1m", "10m")
        #[clap(long, value_parser = humantime::parse_duration, default_value = "1m")]
        stats_interval: Duration,
    },
    /// Decode a captured hex dump, e.g. "0xA5 0x5A 0x5D 0x82 ..." or "a55a5d82..."
    Decode {
        /// The captured bytes
        hex: String,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    /// Human readable output on the console
    Console,
    /// One JSON document per line
    Json,
}

const fn about_text() -> &'static str {
    "jk bms rs485 telemetry command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// YAML configuration file with link and frame settings
    #[arg(short, long)]
    pub config: Option<String>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Baud rate of the RS485 link
    #[arg(long)]
    pub baud_rate: Option<u32>,

    /// Silence on the link that ends a burst (e.g., "100ms", "1s")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub timeout: Option<Duration>,

    /// First header byte of telemetry frames (e.g., 0xA5)
    #[arg(long, value_parser = clap_num::maybe_hex::<u8>)]
    pub header0: Option<u8>,

    /// Second header byte of telemetry frames (e.g., 0x5A)
    #[arg(long, value_parser = clap_num::maybe_hex::<u8>)]
    pub header1: Option<u8>,

    /// Multi-byte fields are big-endian on this device
    #[arg(long, action)]
    pub big_endian: bool,

    /// Do not verify trailing checksums
    #[arg(long, action)]
    pub no_checksum: bool,

    /// Reject frames with out-of-range field values
    #[arg(long, action)]
    pub strict: bool,

    #[command(subcommand)]
    pub command: CliCommands,
}

impl CliArgs {
    /// Applies the commandline overrides on top of the configuration file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(header0) = self.header0 {
            config.frame.header[0] = header0;
        }
        if let Some(header1) = self.header1 {
            config.frame.header[1] = header1;
        }
        if self.big_endian {
            config.frame.byte_order = jkbms_lib::protocol::ByteOrder::Big;
        }
        if self.no_checksum {
            config.frame.verify_checksum = false;
        }
        if self.strict {
            config.frame.strict = true;
        }
    }
}
