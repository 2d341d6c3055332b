use crate::{
    cli::RunOptions,
    config::{Config, MIN_HEARTBEAT_MS},
    payload::MAX_LINE_BYTES,
    serial::{
        discovery, DtrBehavior, FlowControlMode, ParityMode, SerialConnector, SerialOptions,
        StopBitsMode,
    },
    Error, Result,
};
use std::io::IsTerminal;
use std::{str::FromStr, sync::Arc, time::Duration};

mod commands;
mod console;
mod diagnostics;
mod lifecycle;
mod logger;
mod session;

pub use commands::{CommandChannel, COMMAND_QUEUE_CAPACITY};
pub use console::{Console, ConsoleCommand, ConsoleSettings};
pub use diagnostics::{Diagnostic, Diagnostics, Resource};
pub use logger::{LogLevel, Logger};
pub use session::{ConnectOutcome, ConnectionState, Session, SessionSettings};

/// Effective settings: config file values with CLI overrides applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
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
    pub log_level: LogLevel,
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_sources(Config::default(), RunOptions::default())
    }
}

impl AppConfig {
    pub fn from_sources(config: Config, opts: RunOptions) -> Self {
        Self {
            device: opts.device.unwrap_or_else(|| config.device.clone()),
            baud: opts.baud.unwrap_or(config.baud),
            flow_control: config.flow_control,
            parity: config.parity,
            stop_bits: config.stop_bits,
            dtr_on_open: config.dtr_on_open,
            heartbeat_ms: opts.heartbeat_ms.unwrap_or(config.heartbeat_ms),
            stale_after_ms: config.stale_after_ms,
            sample_capacity: config.sample_capacity,
            log_capacity: config.log_capacity,
            jog_duty: config.jog_duty,
            jog_ms: config.jog_ms,
            log_level: opts
                .log_level
                .as_deref()
                .and_then(|s| LogLevel::from_str(s).ok())
                .unwrap_or_default(),
            log_file: opts.log_file,
        }
    }

    /// CLI overrides bypass the config loader, so check them here.
    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(Error::InvalidArgs("device must not be empty".into()));
        }
        if self.baud == 0 {
            return Err(Error::InvalidArgs("baud must be greater than zero".into()));
        }
        if self.heartbeat_ms < MIN_HEARTBEAT_MS {
            return Err(Error::InvalidArgs(format!(
                "heartbeat must be at least {MIN_HEARTBEAT_MS} ms"
            )));
        }
        Ok(())
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

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            device: self.device.clone(),
            serial: self.serial_options(),
            heartbeat: Duration::from_millis(self.heartbeat_ms),
            sample_capacity: self.sample_capacity,
            log_capacity: self.log_capacity,
            max_line: MAX_LINE_BYTES,
        }
    }

    pub fn console_settings(&self) -> ConsoleSettings {
        ConsoleSettings {
            stale_after: Duration::from_millis(self.stale_after_ms),
            jog_duty: self.jog_duty,
            jog_hold: Duration::from_millis(self.jog_ms),
        }
    }
}

pub struct App {
    config: AppConfig,
    logger: Arc<Logger>,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let logger = Arc::new(Logger::new(config.log_level, config.log_file.clone()));
        Ok(Self { config, logger })
    }

    pub fn from_options(opts: RunOptions) -> Result<Self> {
        let cfg_file = Config::load_or_default()?;
        let merged = AppConfig::from_sources(cfg_file, opts);
        Self::new(merged)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run the console until the operator quits or ctrl-c arrives.
    pub fn run(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let shutdown = lifecycle::install_shutdown_handler()?;

        self.logger.info(format!(
            "console start (device={}, baud={}, heartbeat={}ms)",
            self.config.device, self.config.baud, self.config.heartbeat_ms
        ));

        let interactive = std::io::stdin().is_terminal();
        let connector = Arc::new(SerialConnector::new(interactive));
        let session = Session::new(
            connector,
            self.config.session_settings(),
            self.logger.clone(),
        );
        let mut console = Console::new(
            session,
            self.config.console_settings(),
            std::io::stdout(),
        );

        let result = runtime.block_on(async {
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            console.run(input, shutdown).await
        });
        // tokio's stdin reader may still be parked in a blocking read.
        runtime.shutdown_timeout(Duration::from_millis(100));
        result
    }
}

/// Print the serial ports the OS reports, one per line.
pub fn print_ports() -> Result<()> {
    let ports = discovery::list_ports()?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let config = Config {
            device: "/dev/ttyUSB0".into(),
            baud: 19_200,
            heartbeat_ms: 2_000,
            jog_duty: 120,
            ..Config::default()
        };
        let opts = RunOptions {
            device: Some("/dev/ttyACM1".into()),
            heartbeat_ms: Some(250),
            log_level: Some("debug".into()),
            ..RunOptions::default()
        };
        let merged = AppConfig::from_sources(config, opts);
        assert_eq!(merged.device, "/dev/ttyACM1");
        assert_eq!(merged.baud, 19_200);
        assert_eq!(merged.heartbeat_ms, 250);
        assert_eq!(merged.jog_duty, 120);
        assert_eq!(merged.log_level, LogLevel::Debug);

        let settings = merged.session_settings();
        assert_eq!(settings.heartbeat, Duration::from_millis(250));
        assert_eq!(settings.serial.baud, 19_200);
        assert_eq!(merged.console_settings().jog_duty, 120);
    }

    #[test]
    fn defaults_follow_config_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.device, "auto");
        assert_eq!(cfg.baud, 9_600);
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_too_fast_heartbeat_override() {
        let cfg = AppConfig::from_sources(
            Config::default(),
            RunOptions {
                heartbeat_ms: Some(10),
                ..RunOptions::default()
            },
        );
        let err = App::new(cfg).err().unwrap();
        assert!(err.to_string().contains("heartbeat"));
    }
}
