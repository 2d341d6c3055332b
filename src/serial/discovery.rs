use serialport::SerialPortType;
use std::io::{BufRead, Write};

use crate::{Error, Result};

/// A serial port the OS reports, reduced to what the operator needs to pick one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSummary {
    pub name: String,
    pub kind: String,
}

impl std::fmt::Display for PortSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

pub fn list_ports() -> Result<Vec<PortSummary>> {
    let ports = serialport::available_ports().map_err(|e| {
        Error::Unsupported(format!("cannot enumerate serial ports: {e}"))
    })?;
    Ok(ports
        .into_iter()
        .map(|p| PortSummary {
            kind: describe_kind(&p.port_type),
            name: p.port_name,
        })
        .collect())
}

fn describe_kind(kind: &SerialPortType) -> String {
    match kind {
        SerialPortType::UsbPort(info) => {
            let mut label = format!("usb {:04x}:{:04x}", info.vid, info.pid);
            if let Some(product) = &info.product {
                label.push(' ');
                label.push_str(product);
            }
            label
        }
        SerialPortType::PciPort => "pci".into(),
        SerialPortType::BluetoothPort => "bluetooth".into(),
        SerialPortType::Unknown => "unknown".into(),
    }
}

/// Pick a device. One port is taken as-is; several prompt on `input`.
/// An empty answer (or EOF, or `q`) cancels.
pub fn select_device<I, W>(ports: &[PortSummary], input: &mut I, output: &mut W) -> Result<String>
where
    I: BufRead,
    W: Write,
{
    match ports {
        [] => Err(Error::Unsupported("no serial ports found".into())),
        [only] => Ok(only.name.clone()),
        many => {
            writeln!(output, "Select the tracker's serial port:")?;
            for (idx, port) in many.iter().enumerate() {
                writeln!(output, "  {}) {port}", idx + 1)?;
            }
            write!(output, "port [1-{}, empty to cancel]: ", many.len())?;
            output.flush()?;

            let mut answer = String::new();
            input.read_line(&mut answer)?;
            let answer = answer.trim();
            if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
                return Err(Error::Cancelled);
            }
            let choice: usize = answer
                .parse()
                .map_err(|_| Error::InvalidArgs(format!("'{answer}' is not a port number")))?;
            many.get(choice.wrapping_sub(1))
                .map(|p| p.name.clone())
                .ok_or_else(|| Error::InvalidArgs(format!("no port numbered {choice}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ports(names: &[&str]) -> Vec<PortSummary> {
        names
            .iter()
            .map(|n| PortSummary {
                name: n.to_string(),
                kind: "usb 2341:0043 Arduino Uno".into(),
            })
            .collect()
    }

    #[test]
    fn no_ports_is_unsupported() {
        let mut input = Cursor::new("");
        let mut out = Vec::new();
        let err = select_device(&[], &mut input, &mut out).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn single_port_needs_no_prompt() {
        let mut input = Cursor::new("");
        let mut out = Vec::new();
        let chosen = select_device(&ports(&["/dev/ttyACM0"]), &mut input, &mut out).unwrap();
        assert_eq!(chosen, "/dev/ttyACM0");
        assert!(out.is_empty());
    }

    #[test]
    fn prompt_picks_numbered_port() {
        let mut input = Cursor::new("2\n");
        let mut out = Vec::new();
        let chosen = select_device(
            &ports(&["/dev/ttyACM0", "/dev/ttyUSB0"]),
            &mut input,
            &mut out,
        )
        .unwrap();
        assert_eq!(chosen, "/dev/ttyUSB0");
        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("1) /dev/ttyACM0"));
        assert!(shown.contains("2) /dev/ttyUSB0"));
    }

    #[test]
    fn empty_answer_cancels() {
        let list = ports(&["/dev/ttyACM0", "/dev/ttyUSB0"]);
        for answer in ["\n", "", "q\n"] {
            let mut input = Cursor::new(answer);
            let mut out = Vec::new();
            let err = select_device(&list, &mut input, &mut out).unwrap_err();
            assert!(matches!(err, Error::Cancelled), "answer {answer:?}");
        }
    }

    #[test]
    fn out_of_range_is_rejected() {
        let list = ports(&["/dev/ttyACM0", "/dev/ttyUSB0"]);
        for answer in ["0\n", "3\n", "x\n"] {
            let mut input = Cursor::new(answer);
            let mut out = Vec::new();
            let err = select_device(&list, &mut input, &mut out).unwrap_err();
            assert!(matches!(err, Error::InvalidArgs(_)), "answer {answer:?}");
        }
    }
}
