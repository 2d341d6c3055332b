use bytes::{BufMut, BytesMut};
use std::{fmt, io, str::FromStr};
use tokio_util::codec::Encoder;

pub const HEARTBEAT_TOKEN: &str = "HEARTBEAT";

/// Outbound control token. Sent verbatim with a trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ModeAuto,
    ModeManual,
    /// Motor duty cycle; negative drives west, positive east, zero halts.
    Duty(i16),
    Clean,
    Stop,
    Resume,
    Heartbeat,
    Raw(String),
}

/// Jog direction for the tracking motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    West,
    East,
}

impl Command {
    pub fn halt() -> Self {
        Command::Duty(0)
    }

    pub fn jog(direction: Direction, duty: u8) -> Self {
        let duty = i16::from(duty);
        match direction {
            Direction::West => Command::Duty(-duty),
            Direction::East => Command::Duty(duty),
        }
    }

    /// The emergency button sends RESUME while latched, STOP otherwise.
    pub fn emergency_toggle(emergency_active: bool) -> Self {
        if emergency_active {
            Command::Resume
        } else {
            Command::Stop
        }
    }

    pub fn token(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ModeAuto => f.write_str("MODE:AUTO"),
            Command::ModeManual => f.write_str("MODE:MANUAL"),
            Command::Duty(duty) => write!(f, "DC:{duty}"),
            Command::Clean => f.write_str("CLEAN:1"),
            Command::Stop => f.write_str("STOP"),
            Command::Resume => f.write_str("RESUME"),
            Command::Heartbeat => f.write_str(HEARTBEAT_TOKEN),
            Command::Raw(token) => f.write_str(token),
        }
    }
}

impl FromStr for Command {
    type Err = String;

    /// Parse a wire token. Unrecognised tokens become `Raw`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token.is_empty() {
            return Err("empty command".into());
        }
        if token.contains('\n') || token.contains('\r') {
            return Err("command must be a single line".into());
        }
        let cmd = match token {
            "MODE:AUTO" => Command::ModeAuto,
            "MODE:MANUAL" => Command::ModeManual,
            "CLEAN:1" => Command::Clean,
            "STOP" => Command::Stop,
            "RESUME" => Command::Resume,
            HEARTBEAT_TOKEN => Command::Heartbeat,
            other => match other.strip_prefix("DC:") {
                Some(duty) => Command::Duty(
                    duty.parse()
                        .map_err(|_| format!("invalid duty cycle '{duty}'"))?,
                ),
                None => Command::Raw(other.to_string()),
            },
        };
        Ok(cmd)
    }
}

/// Encodes commands as newline-terminated tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandCodec;

impl Encoder<Command> for CommandCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), io::Error> {
        let token = item.token();
        if token.contains('\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "command token contains a newline",
            ));
        }
        dst.reserve(token.len() + 1);
        dst.put_slice(token.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_match_firmware_vocabulary() {
        assert_eq!(Command::ModeAuto.token(), "MODE:AUTO");
        assert_eq!(Command::ModeManual.token(), "MODE:MANUAL");
        assert_eq!(Command::jog(Direction::West, 200).token(), "DC:-200");
        assert_eq!(Command::jog(Direction::East, 200).token(), "DC:200");
        assert_eq!(Command::halt().token(), "DC:0");
        assert_eq!(Command::Clean.token(), "CLEAN:1");
        assert_eq!(Command::Heartbeat.token(), "HEARTBEAT");
    }

    #[test]
    fn emergency_toggle_depends_on_latch() {
        assert_eq!(Command::emergency_toggle(true), Command::Resume);
        assert_eq!(Command::emergency_toggle(false), Command::Stop);
    }

    #[test]
    fn parses_known_and_raw_tokens() {
        assert_eq!("DC:-120".parse::<Command>().unwrap(), Command::Duty(-120));
        assert_eq!(" STOP ".parse::<Command>().unwrap(), Command::Stop);
        assert_eq!(
            "CALIBRATE".parse::<Command>().unwrap(),
            Command::Raw("CALIBRATE".into())
        );
        assert!("DC:fast".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn encoder_appends_newline() {
        let mut codec = CommandCodec;
        let mut buf = BytesMut::new();
        codec.encode(Command::Stop, &mut buf).unwrap();
        codec.encode(Command::Duty(0), &mut buf).unwrap();
        assert_eq!(&buf[..], b"STOP\nDC:0\n");
    }

    #[test]
    fn encoder_rejects_embedded_newline() {
        let mut codec = CommandCodec;
        let mut buf = BytesMut::new();
        let err = codec
            .encode(Command::Raw("A\nB".into()), &mut buf)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }
}
