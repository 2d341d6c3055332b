use crate::serial::{DtrBehavior, FlowControlMode, ParityMode, SerialOptions, StopBitsMode};
use crate::state::{DEFAULT_LOG_CAPACITY, DEFAULT_SAMPLE_CAPACITY, DEFAULT_STALE_AFTER_MS};
use crate::{Error, Result};
use std::path::Path;

pub mod loader;

pub const DEFAULT_DEVICE: &str = "auto";
pub const DEFAULT_BAUD: u32 = 9_600;
pub const DEFAULT_HEARTBEAT_MS: u64 = 1_000;
pub const MIN_HEARTBEAT_MS: u64 = 50;
pub const DEFAULT_JOG_DUTY: u8 = 200;
pub const DEFAULT_JOG_MS: u64 = 400;
const CONFIG_DIR_NAME: &str = ".solartty";
const CONFIG_FILE_NAME: &str = "config.toml";

/// User-supplied settings loaded from the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub device: String,
    pub baud: u32,
    pub flow_control: FlowControlMode,
    pub parity: ParityMode,
    pub stop_bits: StopBitsMode,
    pub dtr_on_open: DtrBehavior,
    pub heartbeat_ms: u64,
    pub stale_after_ms: u64,
    pub sample_capacity: usize,
    pub log_capacity: usize,
    pub jog_duty: u8,
    pub jog_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            baud: DEFAULT_BAUD,
            flow_control: FlowControlMode::default(),
            parity: ParityMode::default(),
            stop_bits: StopBitsMode::default(),
            dtr_on_open: DtrBehavior::default(),
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            sample_capacity: DEFAULT_SAMPLE_CAPACITY,
            log_capacity: DEFAULT_LOG_CAPACITY,
            jog_duty: DEFAULT_JOG_DUTY,
            jog_ms: DEFAULT_JOG_MS,
        }
    }
}

impl Config {
    pub fn load_or_default() -> Result<Self> {
        loader::load_or_default()
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        loader::load_from_path(path)
    }

    pub fn save(&self) -> Result<()> {
        loader::save(self)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        loader::save_to_path(self, path)
    }

    pub fn serial_options(&self) -> SerialOptions {
        SerialOptions {
            baud: self.baud,
            flow_control: self.flow_control,
            parity: self.parity,
            stop_bits: self.stop_bits,
            dtr: self.dtr_on_open,
        }
    }
}

pub(crate) fn validate(cfg: &Config) -> Result<()> {
    if cfg.device.trim().is_empty() {
        return Err(Error::InvalidArgs("device must not be empty".into()));
    }
    if cfg.baud == 0 {
        return Err(Error::InvalidArgs("baud must be greater than zero".into()));
    }
    if cfg.heartbeat_ms < MIN_HEARTBEAT_MS {
        return Err(Error::InvalidArgs(format!(
            "heartbeat_ms must be at least {MIN_HEARTBEAT_MS}"
        )));
    }
    if cfg.stale_after_ms == 0 {
        return Err(Error::InvalidArgs(
            "stale_after_ms must be greater than zero".into(),
        ));
    }
    if cfg.sample_capacity == 0 {
        return Err(Error::InvalidArgs("sample_capacity must be at least 1".into()));
    }
    if cfg.log_capacity == 0 {
        return Err(Error::InvalidArgs("log_capacity must be at least 1".into()));
    }
    if cfg.jog_duty == 0 {
        return Err(Error::InvalidArgs("jog_duty must be within 1..=255".into()));
    }
    Ok(())
}
