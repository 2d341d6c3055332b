//! Transport seam between the session and whatever carries the bytes.

use async_trait::async_trait;
use std::{fmt, str::FromStr};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::Result;

pub mod r#async;
pub mod discovery;
pub mod errors;
pub mod fake;

pub use r#async::SerialConnector;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Handle on the underlying device, released independently of the streams.
pub trait PortControl: Send {
    fn describe(&self) -> String;
    fn close(&mut self) -> Result<()>;
}

/// An open link: inbound stream, outbound stream and the device handle.
pub struct Transport {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub port: Box<dyn PortControl>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("port", &self.port.describe())
            .finish_non_exhaustive()
    }
}

/// Opens transports. `Error::Cancelled` means the operator backed out of
/// device selection; `Error::Unsupported` means no transport is available.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, device: &str, options: &SerialOptions) -> Result<Transport>;
}

/// Serial line settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialOptions {
    pub baud: u32,
    pub flow_control: FlowControlMode,
    pub parity: ParityMode,
    pub stop_bits: StopBitsMode,
    pub dtr: DtrBehavior,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            baud: crate::config::DEFAULT_BAUD,
            flow_control: FlowControlMode::default(),
            parity: ParityMode::default(),
            stop_bits: StopBitsMode::default(),
            dtr: DtrBehavior::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControlMode {
    #[default]
    None,
    Software,
    Hardware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParityMode {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBitsMode {
    #[default]
    One,
    Two,
}

/// What to do with the DTR line when the port opens. Many Arduino-class
/// boards reset when DTR is asserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DtrBehavior {
    #[default]
    Preserve,
    Assert,
    Deassert,
}

impl FromStr for FlowControlMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "software" | "xonxoff" => Ok(Self::Software),
            "hardware" | "rtscts" => Ok(Self::Hardware),
            other => Err(format!("expected none/software/hardware, got '{other}'")),
        }
    }
}

impl fmt::Display for FlowControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Software => "software",
            Self::Hardware => "hardware",
        })
    }
}

impl FromStr for ParityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "odd" => Ok(Self::Odd),
            "even" => Ok(Self::Even),
            other => Err(format!("expected none/odd/even, got '{other}'")),
        }
    }
}

impl fmt::Display for ParityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Odd => "odd",
            Self::Even => "even",
        })
    }
}

impl FromStr for StopBitsMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "1" | "one" => Ok(Self::One),
            "2" | "two" => Ok(Self::Two),
            other => Err(format!("expected 1 or 2, got '{other}'")),
        }
    }
}

impl fmt::Display for StopBitsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::One => "1",
            Self::Two => "2",
        })
    }
}

impl FromStr for DtrBehavior {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preserve" => Ok(Self::Preserve),
            "assert" | "on" => Ok(Self::Assert),
            "deassert" | "off" => Ok(Self::Deassert),
            other => Err(format!("expected preserve/assert/deassert, got '{other}'")),
        }
    }
}

impl fmt::Display for DtrBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preserve => "preserve",
            Self::Assert => "assert",
            Self::Deassert => "deassert",
        })
    }
}
