pub mod app;
pub mod cli;
pub mod config;
pub mod display;
pub mod payload;
pub mod serial;
pub mod state;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    InvalidArgs(String),
    Io(std::io::Error),
    /// No usable transport (no serial ports, or the platform lacks support).
    Unsupported(String),
    /// The operator backed out of device selection.
    Cancelled,
    /// A connection is already open or being opened.
    Busy(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgs(msg) => write!(f, "invalid arguments: {msg}"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Unsupported(msg) => write!(f, "transport unavailable: {msg}"),
            Error::Cancelled => write!(f, "device selection cancelled"),
            Error::Busy(msg) => write!(f, "busy: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}
