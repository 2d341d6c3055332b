use directories::BaseDirs;
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{Error, Result};

use super::{Config, CONFIG_DIR_NAME, CONFIG_FILE_NAME};

pub fn load_or_default() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        let cfg = Config::default();
        cfg.save_to_path(&path)?;
        super::validate(&cfg)?;
        return Ok(cfg);
    }
    load_from_path(&path)
}

pub fn load_from_path(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        super::validate(&cfg)?;
        return Ok(cfg);
    }

    let raw = fs::read_to_string(path)?;
    parse(&raw)
}

pub fn save(config: &Config) -> Result<()> {
    let path = config_path()?;
    save_to_path(config, &path)
}

pub fn save_to_path(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = format!(
        "# solartty config\n\
device = \"{}\"\n\
baud = {}\n\
flow_control = \"{}\"\n\
parity = \"{}\"\n\
stop_bits = \"{}\"\n\
dtr_on_open = \"{}\"\n\
heartbeat_ms = {}\n\
stale_after_ms = {}\n\
sample_capacity = {}\n\
log_capacity = {}\n\
jog_duty = {}\n\
jog_ms = {}\n",
        config.device,
        config.baud,
        config.flow_control,
        config.parity,
        config.stop_bits,
        config.dtr_on_open,
        config.heartbeat_ms,
        config.stale_after_ms,
        config.sample_capacity,
        config.log_capacity,
        config.jog_duty,
        config.jog_ms,
    );
    fs::write(path, contents)?;
    Ok(())
}

pub fn parse(raw: &str) -> Result<Config> {
    let mut cfg = Config::default();

    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (key, value) = trimmed.split_once('=').ok_or_else(|| {
            Error::InvalidArgs(format!("invalid config line {}: '{}'", idx + 1, line))
        })?;

        let key = key.trim();
        let value = value.trim().trim_matches('"');
        let line_no = idx + 1;
        match key {
            "device" => cfg.device = value.to_string(),
            "baud" => cfg.baud = parse_value(key, value, line_no)?,
            "flow_control" => cfg.flow_control = parse_value(key, value, line_no)?,
            "parity" => cfg.parity = parse_value(key, value, line_no)?,
            "stop_bits" => cfg.stop_bits = parse_value(key, value, line_no)?,
            "dtr_on_open" => cfg.dtr_on_open = parse_value(key, value, line_no)?,
            "heartbeat_ms" => cfg.heartbeat_ms = parse_value(key, value, line_no)?,
            "stale_after_ms" => cfg.stale_after_ms = parse_value(key, value, line_no)?,
            "sample_capacity" => cfg.sample_capacity = parse_value(key, value, line_no)?,
            "log_capacity" => cfg.log_capacity = parse_value(key, value, line_no)?,
            "jog_duty" => cfg.jog_duty = parse_value(key, value, line_no)?,
            "jog_ms" => cfg.jog_ms = parse_value(key, value, line_no)?,
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown config key '{}' on line {}",
                    other, line_no
                )));
            }
        }
    }

    super::validate(&cfg)?;
    Ok(cfg)
}

fn parse_value<T>(key: &str, value: &str, line_no: usize) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| {
        Error::InvalidArgs(format!("invalid {key} on line {line_no}: {e}"))
    })
}

fn config_path() -> Result<PathBuf> {
    let base = BaseDirs::new()
        .ok_or_else(|| Error::InvalidArgs("HOME not set; cannot locate config directory".into()))?;
    Ok(base.home_dir().join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
