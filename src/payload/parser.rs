use serde_json::{Map, Value};

use super::{FIELD_LDR_LEFT, FIELD_LDR_RIGHT, FIELD_LOG};

/// A JSON object received from the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    fields: Map<String, Value>,
}

impl TelemetryMessage {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Text of a log payload, if this message is one.
    ///
    /// The firmware marks log lines with a `Log` key; a falsy value
    /// (`""`, `false`, `0`, `null`) does not count.
    pub fn log_text(&self) -> Option<String> {
        match self.fields.get(FIELD_LOG)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Bool(true) => Some("true".to_string()),
            Value::Number(n) if n.as_f64().is_some_and(|v| v != 0.0) => Some(n.to_string()),
            Value::Array(_) | Value::Object(_) => self.fields.get(FIELD_LOG).map(Value::to_string),
            _ => None,
        }
    }

    /// Left/right LDR pair when both readings are present and numeric.
    pub fn ldr_pair(&self) -> Option<(f64, f64)> {
        let left = self.fields.get(FIELD_LDR_LEFT)?.as_f64()?;
        let right = self.fields.get(FIELD_LDR_RIGHT)?.as_f64()?;
        Some((left, right))
    }
}

/// Result of decoding one framed line.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Blank line.
    Empty,
    /// Free text from the device (boot banners, debug prints).
    Text(String),
    /// Looked like an object but did not parse as one.
    Malformed { line: String, reason: String },
    Message(TelemetryMessage),
}

/// Decode a complete line. Never fails; problems come back as variants.
pub fn decode_line(raw: &str) -> Decoded {
    let line = raw.trim();
    if line.is_empty() {
        return Decoded::Empty;
    }
    if !(line.starts_with('{') && line.ends_with('}')) {
        return Decoded::Text(line.to_string());
    }
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(fields)) => Decoded::Message(TelemetryMessage::new(fields)),
        Ok(other) => Decoded::Malformed {
            line: line.to_string(),
            reason: format!("expected object, got {}", value_kind(&other)),
        },
        Err(err) => Decoded::Malformed {
            line: line.to_string(),
            reason: format!("json: {err}"),
        },
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ldr_object() {
        let decoded = decode_line(r#"{"LDR_L":10,"LDR_R":20}"#);
        let Decoded::Message(msg) = decoded else {
            panic!("expected message, got {decoded:?}");
        };
        assert_eq!(msg.get("LDR_L"), Some(&Value::from(10)));
        assert_eq!(msg.get("LDR_R"), Some(&Value::from(20)));
        assert_eq!(msg.ldr_pair(), Some((10.0, 20.0)));
        assert_eq!(msg.fields().len(), 2);
    }

    #[test]
    fn garbage_is_plain_text() {
        assert_eq!(decode_line("garbage"), Decoded::Text("garbage".into()));
        assert_eq!(decode_line("   "), Decoded::Empty);
    }

    #[test]
    fn unterminated_object_is_text() {
        // `{not json` does not end with `}` so it never reaches the parser.
        assert_eq!(decode_line("{not json"), Decoded::Text("{not json".into()));
    }

    #[test]
    fn braced_garbage_is_malformed() {
        match decode_line("{not json}") {
            Decoded::Malformed { line, reason } => {
                assert_eq!(line, "{not json}");
                assert!(reason.starts_with("json:"));
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn trims_whitespace_and_carriage_return() {
        let decoded = decode_line("  {\"Manual\":true}\r");
        assert!(matches!(decoded, Decoded::Message(_)));
    }

    #[test]
    fn log_text_follows_truthiness() {
        let msg = |raw: &str| match decode_line(raw) {
            Decoded::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        };
        assert_eq!(
            msg(r#"{"Log":"cycle done"}"#).log_text().as_deref(),
            Some("cycle done")
        );
        assert_eq!(msg(r#"{"Log":""}"#).log_text(), None);
        assert_eq!(msg(r#"{"Log":0}"#).log_text(), None);
        assert_eq!(msg(r#"{"Log":null}"#).log_text(), None);
        assert_eq!(msg(r#"{"Log":7}"#).log_text().as_deref(), Some("7"));
        assert_eq!(msg(r#"{"LDR_L":1}"#).log_text(), None);
    }

    #[test]
    fn ldr_pair_requires_both_numbers() {
        let Decoded::Message(msg) = decode_line(r#"{"LDR_L":5}"#) else {
            panic!("expected message");
        };
        assert_eq!(msg.ldr_pair(), None);
        let Decoded::Message(msg) = decode_line(r#"{"LDR_L":5,"LDR_R":"x"}"#) else {
            panic!("expected message");
        };
        assert_eq!(msg.ldr_pair(), None);
    }
}
