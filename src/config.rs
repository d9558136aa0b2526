use anyhow::{Context, Result};
use jkbms_lib::protocol::{FrameConfig, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT};
use serde::Deserialize;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_device_name")]
    pub device: String,
    #[serde(default = "Config::default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "Config::default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub frame: FrameConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: default_device_name(),
            baud_rate: Self::default_baud_rate(),
            timeout: Self::default_timeout(),
            frame: FrameConfig::default(),
        }
    }
}

impl Config {
    fn default_baud_rate() -> u32 {
        DEFAULT_BAUD_RATE
    }

    fn default_timeout() -> Duration {
        DEFAULT_TIMEOUT
    }

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        Ok(config)
    }

    /// Loads the given file, or the defaults when no file was named.
    pub fn load_or_default(config_file_path: Option<&str>) -> Result<Self> {
        match config_file_path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
