use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::logger::{LogLevel, Logger};
use crate::serial::errors::SerialFailureKind;

const CHANNEL_CAPACITY: usize = 64;

/// Which part of a link failed to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Writer,
    Reader,
    Port,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Writer => "writer",
            Resource::Reader => "reader",
            Resource::Port => "port",
        })
    }
}

/// Something worth telling the operator that never stops the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Diagnostic {
    IgnoredText { line: String },
    MalformedLine { line: String, reason: String },
    OversizedLine { discarded: usize },
    WriteFailed { command: String, reason: String },
    QueueFull { command: String },
    ReadFailed { kind: SerialFailureKind, reason: String },
    StreamEnded,
    ConnectFailed { kind: SerialFailureKind, reason: String },
    CloseFailed { resource: Resource, reason: String },
}

impl Diagnostic {
    pub fn level(&self) -> LogLevel {
        match self {
            Diagnostic::IgnoredText { .. } => LogLevel::Debug,
            Diagnostic::MalformedLine { .. } | Diagnostic::OversizedLine { .. } => LogLevel::Warn,
            Diagnostic::StreamEnded | Diagnostic::QueueFull { .. } => LogLevel::Warn,
            Diagnostic::WriteFailed { .. }
            | Diagnostic::ReadFailed { .. }
            | Diagnostic::ConnectFailed { .. }
            | Diagnostic::CloseFailed { .. } => LogLevel::Error,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"event\":\"{self}\"}}"))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::IgnoredText { line } => write!(f, "ignored device text: {line}"),
            Diagnostic::MalformedLine { line, reason } => {
                write!(f, "malformed telemetry ({reason}): {line}")
            }
            Diagnostic::OversizedLine { discarded } => {
                write!(f, "discarded oversized line ({discarded} bytes)")
            }
            Diagnostic::WriteFailed { command, reason } => {
                write!(f, "failed to send {command}: {reason}")
            }
            Diagnostic::QueueFull { command } => {
                write!(f, "command queue full, dropped {command}")
            }
            Diagnostic::ReadFailed { kind, reason } => write!(f, "read failed [{kind}]: {reason}"),
            Diagnostic::StreamEnded => f.write_str("device closed the stream"),
            Diagnostic::ConnectFailed { kind, reason } => {
                write!(f, "connect failed [{kind}]: {reason}")
            }
            Diagnostic::CloseFailed { resource, reason } => {
                write!(f, "failed to release {resource}: {reason}")
            }
        }
    }
}

/// Logs every diagnostic and fans it out to subscribers.
#[derive(Clone)]
pub struct Diagnostics {
    logger: Arc<Logger>,
    tx: broadcast::Sender<Diagnostic>,
}

impl Diagnostics {
    pub fn new(logger: Arc<Logger>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { logger, tx }
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        self.logger.log(diagnostic.level(), diagnostic.to_string());
        // No subscribers is fine.
        let _ = self.tx.send(diagnostic);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.tx.subscribe()
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }
}
