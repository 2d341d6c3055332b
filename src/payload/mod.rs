mod command;
mod framer;
mod parser;

pub use command::{Command, CommandCodec, Direction, HEARTBEAT_TOKEN};
pub use framer::{Frame, LineFramer, MAX_LINE_BYTES};
pub use parser::{decode_line, Decoded, TelemetryMessage};

pub const FIELD_LDR_LEFT: &str = "LDR_L";
pub const FIELD_LDR_RIGHT: &str = "LDR_R";
pub const FIELD_MANUAL: &str = "Manual";
pub const FIELD_LIMIT_LEFT: &str = "LimitL";
pub const FIELD_LIMIT_RIGHT: &str = "LimitR";
pub const FIELD_EMERGENCY: &str = "Emergency";
pub const FIELD_DIFF: &str = "Diff";
pub const FIELD_ACTION: &str = "Action";
pub const FIELD_LOG: &str = "Log";
