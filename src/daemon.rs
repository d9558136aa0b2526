use anyhow::Result;
use jkbms_lib::monitor::{ByteSource, Monitor};
use jkbms_lib::protocol::Decoded;
use log::{error, info};
use serde_json::json;
use std::time::{Duration, Instant};

use crate::commandline::OutputFormat;

fn format_console(decoded: &Decoded) -> String {
    let state = &decoded.state;
    let alarms = state.alarms.active();
    let alarms = if alarms.is_empty() {
        "none".to_string()
    } else {
        alarms
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "--- Data at {} ({:?}) ---\n\
         Voltage: {:.2}V, Current: {:.1}A, Level: {}%\n\
         Average cell: {}mV, Max cell diff: {}mV\n\
         MOS temperature: {}°C, Battery temperature: {}°C\n\
         Switches: balance={} charge={} discharge={}\n\
         Cell voltages: {:?}\n\
         Alarms: {}\n\
         --------------------------",
        chrono::Local::now().to_rfc3339(),
        decoded.integrity,
        state.voltage,
        state.current,
        state.battery_level,
        state.average_cell_voltage,
        state.max_cell_voltage_diff,
        state.mos_temperature,
        state.battery_temperature,
        state.balance_switch_on,
        state.charge_switch_on,
        state.discharge_switch_on,
        state.cell_voltages,
        alarms
    )
}

fn format_json(decoded: &Decoded) -> Result<String> {
    let value = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "integrity": decoded.integrity,
        "state": decoded.state,
    });
    Ok(serde_json::to_string(&value)?)
}

pub fn print_decoded(format: OutputFormat, decoded: &Decoded) -> Result<()> {
    match format {
        OutputFormat::Console => println!("{}", format_console(decoded)),
        OutputFormat::Json => println!("{}", format_json(decoded)?),
    }
    Ok(())
}

pub fn run<S: ByteSource>(
    mut monitor: Monitor<S>,
    format: OutputFormat,
    stats_interval: Duration,
    retry_delay: Duration,
) -> Result<()> {
    info!("Starting daemon mode: format={format:?}, stats_interval={stats_interval:?}");
    let mut last_stats = Instant::now();

    loop {
        match monitor.poll_once() {
            Ok(frames) => {
                for decoded in &frames {
                    if let Err(e) = print_decoded(format, decoded) {
                        error!("Failed to output decoded frame: {e}");
                    }
                }
            }
            Err(e) => {
                error!("Error reading from BMS: {e}");
                std::thread::sleep(retry_delay);
            }
        }

        if last_stats.elapsed() >= stats_interval {
            info!("Decode statistics: {:?}", monitor.statistics());
            last_stats = Instant::now();
        }
    }
}
