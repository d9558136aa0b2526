use anyhow::{bail, Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use jkbms_lib::monitor::Monitor;
use jkbms_lib::protocol::Decoded;
use jkbms_lib::reader::FrameReader;
use jkbms_lib::serialport::JkBms;
use jkbms_lib::DecodeError;
use log::*;
use std::time::{Duration, Instant};
use std::{ops::Deref, panic};

mod commandline;
mod config;
mod daemon;

use commandline::{CliArgs, CliCommands, OutputFormat};

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

/// Accepts dumps like "[ 0xA5 0x5A ... ]", "A5, 5A" or "a55a...".
fn parse_hex_dump(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '[' | ']'))
        .map(|token| token.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    hex::decode(&cleaned).with_context(|| format!("Invalid hex dump {input:?}"))
}

fn decode_dump(bytes: &[u8], frame: jkbms_lib::protocol::FrameConfig) -> Result<Vec<Decoded>> {
    let mut reader = FrameReader::new(frame);
    reader.extend(bytes);
    let mut decoded = Vec::new();
    let mut last_error = DecodeError::NoFrameFound;
    loop {
        match reader.next_frame() {
            Ok(frame) => decoded.push(frame),
            Err(DecodeError::NoFrameFound) => break,
            Err(err @ DecodeError::Truncated { .. }) => {
                last_error = err;
                break;
            }
            Err(err) => {
                warn!("Skipping frame: {err}");
                last_error = err;
            }
        }
    }
    if decoded.is_empty() {
        bail!("No frame decoded: {last_error}");
    }
    Ok(decoded)
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let mut config = config::Config::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);
    debug!("Using configuration: {config:?}");

    let open_bms = || -> Result<JkBms> {
        let mut bms = JkBms::with_baud_rate(&config.device, config.baud_rate)
            .with_context(|| format!("Cannot open serial port '{}'", config.device))?;
        bms.set_timeout(config.timeout)?;
        bms.clear_input()?;
        Ok(bms)
    };

    match args.command {
        CliCommands::Read { wait } => {
            let mut monitor = Monitor::new(open_bms()?, config.frame.clone());
            let deadline = Instant::now() + wait;
            let decoded = loop {
                if let Some(decoded) = monitor
                    .poll_once()
                    .with_context(|| "Cannot read from BMS")?
                    .pop()
                {
                    break decoded;
                }
                if Instant::now() >= deadline {
                    bail!(
                        "No frame decoded within {} ({:?})",
                        humantime::format_duration(wait),
                        monitor.statistics()
                    );
                }
            };
            daemon::print_decoded(OutputFormat::Console, &decoded)?;
        }
        CliCommands::Daemon {
            format,
            stats_interval,
        } => {
            let monitor = Monitor::new(open_bms()?, config.frame.clone());
            daemon::run(
                monitor,
                format,
                stats_interval,
                Duration::max(config.timeout, Duration::from_secs(1)),
            )?;
        }
        CliCommands::Decode { hex } => {
            let bytes = parse_hex_dump(&hex)?;
            for decoded in decode_dump(&bytes, config.frame)? {
                daemon::print_decoded(OutputFormat::Console, &decoded)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jkbms_lib::protocol::FrameConfig;

    const DUMP_HEADER: &str = "[ 0xA5 0x5A 0x5D 0x82 0x10 0x00 0xC8 0x14 0xF1 0xFF ]";

    #[test]
    fn parses_logged_dumps() {
        assert_eq!(
            parse_hex_dump(DUMP_HEADER).unwrap(),
            vec![0xa5, 0x5a, 0x5d, 0x82, 0x10, 0x00, 0xc8, 0x14, 0xf1, 0xff]
        );
        assert_eq!(parse_hex_dump("A5, 5a").unwrap(), vec![0xa5, 0x5a]);
        assert_eq!(parse_hex_dump("a55a5d").unwrap(), vec![0xa5, 0x5a, 0x5d]);
        assert!(parse_hex_dump("a55").is_err());
        assert!(parse_hex_dump("zz").is_err());
    }

    #[test]
    fn decodes_dump() {
        let mut bytes = parse_hex_dump(DUMP_HEADER).unwrap();
        bytes.resize(96, 0);
        let decoded = decode_dump(&bytes, FrameConfig::default()).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].state.voltage, 53.2);
        assert_eq!(decoded[0].state.current, -1.5);
    }

    #[test]
    fn truncated_dump_is_reported() {
        let bytes = parse_hex_dump(DUMP_HEADER).unwrap();
        let err = decode_dump(&bytes, FrameConfig::default()).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }
}
