//! tokio-serial backed connector used by the console binary.

use async_trait::async_trait;
use std::io;
use std::sync::Mutex;
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};

use super::{
    discovery, Connector, DtrBehavior, FlowControlMode, ParityMode, PortControl, SerialOptions,
    StopBitsMode, Transport,
};
use crate::{Error, Result};

/// Device name that asks for port discovery instead of a fixed path.
pub const AUTO_DEVICE: &str = "auto";

/// Opens real serial ports. With `device = "auto"` the available ports are
/// listed and, when there is more than one, the operator picks on stdin.
/// The pick is remembered so later reconnects do not prompt again.
#[derive(Debug, Default)]
pub struct SerialConnector {
    interactive: bool,
    chosen: Mutex<Option<String>>,
}

impl SerialConnector {
    pub fn new(interactive: bool) -> Self {
        Self {
            interactive,
            chosen: Mutex::new(None),
        }
    }

    fn remembered(&self) -> Option<String> {
        self.chosen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self, device: &str, options: &SerialOptions) -> Result<Transport> {
        let device = if device.eq_ignore_ascii_case(AUTO_DEVICE) {
            match self.remembered() {
                Some(previous) => previous,
                None => {
                    let interactive = self.interactive;
                    let picked = tokio::task::spawn_blocking(move || choose_port(interactive))
                        .await
                        .map_err(|e| Error::Io(io::Error::other(e)))??;
                    *self.chosen.lock().unwrap_or_else(|p| p.into_inner()) = Some(picked.clone());
                    picked
                }
            }
        } else {
            device.to_string()
        };

        let stream = connect(&device, options)?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Transport {
            reader: Box::new(reader),
            writer: Box::new(writer),
            port: Box::new(SerialControl { device }),
        })
    }
}

fn choose_port(interactive: bool) -> Result<String> {
    let ports = discovery::list_ports()?;
    if !interactive && ports.len() > 1 {
        return Err(Error::InvalidArgs(format!(
            "{} serial ports found; pass --device to pick one",
            ports.len()
        )));
    }
    let mut input = io::stdin().lock();
    let mut output = io::stderr();
    discovery::select_device(&ports, &mut input, &mut output)
}

/// Open and configure the device at the given line settings.
pub fn connect(device: &str, options: &SerialOptions) -> Result<SerialStream> {
    if device.is_empty() {
        return Err(Error::InvalidArgs(
            "device path cannot be empty".to_string(),
        ));
    }

    let builder = tokio_serial::new(device, options.baud)
        .data_bits(DataBits::Eight)
        .parity(to_tokio_parity(options.parity))
        .stop_bits(to_tokio_stop_bits(options.stop_bits))
        .flow_control(to_tokio_flow(options.flow_control));

    let mut port = builder.open_native_async().map_err(map_serial_error)?;

    if let Some(level) = desired_dtr(options.dtr) {
        port.write_data_terminal_ready(level)
            .map_err(map_serial_error)?;
    }

    Ok(port)
}

/// The stream halves own the descriptor, which is freed when the second
/// half drops. Session teardown drops both halves (awaiting aborted tasks
/// if it has to) before calling `close`, so nothing is left to release here.
struct SerialControl {
    device: String,
}

impl PortControl for SerialControl {
    fn describe(&self) -> String {
        self.device.clone()
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn map_serial_error(err: tokio_serial::Error) -> Error {
    use tokio_serial::ErrorKind;

    let kind = match err.kind() {
        ErrorKind::NoDevice => io::ErrorKind::NotFound,
        ErrorKind::InvalidInput => io::ErrorKind::InvalidInput,
        ErrorKind::Io(inner) => inner,
        ErrorKind::Unknown => io::ErrorKind::Other,
    };

    Error::Io(io::Error::new(kind, err))
}

fn to_tokio_flow(mode: FlowControlMode) -> FlowControl {
    match mode {
        FlowControlMode::None => FlowControl::None,
        FlowControlMode::Software => FlowControl::Software,
        FlowControlMode::Hardware => FlowControl::Hardware,
    }
}

fn to_tokio_parity(mode: ParityMode) -> Parity {
    match mode {
        ParityMode::None => Parity::None,
        ParityMode::Odd => Parity::Odd,
        ParityMode::Even => Parity::Even,
    }
}

fn to_tokio_stop_bits(mode: StopBitsMode) -> StopBits {
    match mode {
        StopBitsMode::One => StopBits::One,
        StopBitsMode::Two => StopBits::Two,
    }
}

fn desired_dtr(mode: DtrBehavior) -> Option<bool> {
    match mode {
        DtrBehavior::Preserve => None,
        DtrBehavior::Assert => Some(true),
        DtrBehavior::Deassert => Some(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_device() {
        let err = connect("", &SerialOptions::default()).unwrap_err();
        assert!(format!("{err}").contains("device path cannot be empty"));
    }

    #[tokio::test]
    async fn missing_device_maps_to_io_error() {
        let res = connect("/dev/solartty-does-not-exist", &SerialOptions::default());
        match res {
            Err(Error::Io(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a device that should not exist"),
        }
    }

    #[test]
    fn dtr_mapping() {
        assert_eq!(desired_dtr(DtrBehavior::Preserve), None);
        assert_eq!(desired_dtr(DtrBehavior::Assert), Some(true));
        assert_eq!(desired_dtr(DtrBehavior::Deassert), Some(false));
    }
}
