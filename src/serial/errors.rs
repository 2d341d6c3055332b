use crate::Error;
use serde::Serialize;
use std::fmt;
use std::io::{self, ErrorKind};

/// Why a link could not be opened or kept, as far as the operator cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialFailureKind {
    /// Open refused: the user is not in the tty's group.
    PermissionDenied,
    /// No such port, or the board vanished before open.
    DeviceMissing,
    /// Another process holds the port exclusively.
    Busy,
    /// The board went away mid-session (unplugged, reset).
    Disconnected,
    Config,
    Cancelled,
    Unknown,
}

impl SerialFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerialFailureKind::PermissionDenied => "permission_denied",
            SerialFailureKind::DeviceMissing => "device_missing",
            SerialFailureKind::Busy => "busy",
            SerialFailureKind::Disconnected => "disconnected",
            SerialFailureKind::Config => "config",
            SerialFailureKind::Cancelled => "cancelled",
            SerialFailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SerialFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify_error(err: &Error) -> SerialFailureKind {
    match err {
        Error::InvalidArgs(_) => SerialFailureKind::Config,
        Error::Io(io_err) => classify_io_error(io_err),
        Error::Unsupported(_) => SerialFailureKind::DeviceMissing,
        Error::Cancelled => SerialFailureKind::Cancelled,
        Error::Busy(_) => SerialFailureKind::Busy,
    }
}

/// Classify an I/O error coming off a serial link. Open errors arrive via
/// `map_serial_error` (tokio-serial's `NoDevice` becomes `NotFound`); read
/// and write errors come straight from the tty.
pub fn classify_io_error(err: &io::Error) -> SerialFailureKind {
    #[cfg(unix)]
    {
        if let Some(kind) = err.raw_os_error().and_then(classify_tty_errno) {
            return kind;
        }
    }
    match err.kind() {
        ErrorKind::PermissionDenied => SerialFailureKind::PermissionDenied,
        ErrorKind::NotFound => SerialFailureKind::DeviceMissing,
        ErrorKind::InvalidInput => SerialFailureKind::Config,
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => SerialFailureKind::Disconnected,
        _ => SerialFailureKind::Unknown,
    }
}

/// Errnos a USB tty reports that have no stable `ErrorKind`. The values are
/// shared by Linux and macOS.
#[cfg(unix)]
fn classify_tty_errno(code: i32) -> Option<SerialFailureKind> {
    const EIO: i32 = 5;
    const ENXIO: i32 = 6;
    const EBUSY: i32 = 16;
    const ENODEV: i32 = 19;

    match code {
        // Reads on an unplugged USB-serial adapter.
        EIO => Some(SerialFailureKind::Disconnected),
        ENXIO | ENODEV => Some(SerialFailureKind::DeviceMissing),
        // tokio-serial opens with TIOCEXCL.
        EBUSY => Some(SerialFailureKind::Busy),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_errors() {
        let denied = io::Error::new(ErrorKind::PermissionDenied, "denied");
        assert_eq!(classify_io_error(&denied), SerialFailureKind::PermissionDenied);
        let missing = io::Error::new(ErrorKind::NotFound, "no such device");
        assert_eq!(classify_io_error(&missing), SerialFailureKind::DeviceMissing);
        let bad_baud = io::Error::new(ErrorKind::InvalidInput, "bad baud");
        assert_eq!(classify_io_error(&bad_baud), SerialFailureKind::Config);
    }

    #[test]
    fn lost_link() {
        let broken = io::Error::new(ErrorKind::BrokenPipe, "broken");
        assert_eq!(classify_io_error(&broken), SerialFailureKind::Disconnected);
        let odd = io::Error::other("odd");
        assert_eq!(classify_io_error(&odd), SerialFailureKind::Unknown);
    }

    #[test]
    fn crate_errors() {
        let err = Error::InvalidArgs("bad".into());
        assert_eq!(classify_error(&err), SerialFailureKind::Config);
        let busy = Error::Busy("connected".into());
        assert_eq!(classify_error(&busy), SerialFailureKind::Busy);
        let missing = Error::Unsupported("no ports".into());
        assert_eq!(classify_error(&missing), SerialFailureKind::DeviceMissing);
        assert_eq!(classify_error(&Error::Cancelled), SerialFailureKind::Cancelled);
    }

    #[cfg(unix)]
    #[test]
    fn tty_errnos() {
        let unplugged = io::Error::from_raw_os_error(5);
        assert_eq!(classify_io_error(&unplugged), SerialFailureKind::Disconnected);
        let held = io::Error::from_raw_os_error(16);
        assert_eq!(classify_io_error(&held), SerialFailureKind::Busy);
        let gone = io::Error::from_raw_os_error(19);
        assert_eq!(classify_io_error(&gone), SerialFailureKind::DeviceMissing);
        // EACCES has a stable kind.
        let denied = io::Error::from_raw_os_error(13);
        assert_eq!(classify_io_error(&denied), SerialFailureKind::PermissionDenied);
    }
}
