use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use super::commands::{spawn_heartbeat, CommandChannel};
use super::diagnostics::{Diagnostic, Diagnostics, Resource};
use super::logger::Logger;
use crate::payload::{decode_line, Command, Decoded, Direction, Frame, LineFramer, MAX_LINE_BYTES};
use crate::serial::errors::{classify_error, classify_io_error};
use crate::serial::{BoxedReader, BoxedWriter, Connector, PortControl, SerialOptions, Transport};
use crate::state::{Applied, TelemetryState, DEFAULT_LOG_CAPACITY, DEFAULT_SAMPLE_CAPACITY};
use crate::{Error, Result};

const RELEASE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// The operator backed out of device selection.
    Cancelled,
}

/// Everything a session needs to know about the link it manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub device: String,
    pub serial: SerialOptions,
    pub heartbeat: Duration,
    pub sample_capacity: usize,
    pub log_capacity: usize,
    pub max_line: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            device: crate::config::DEFAULT_DEVICE.to_string(),
            serial: SerialOptions::default(),
            heartbeat: Duration::from_millis(crate::config::DEFAULT_HEARTBEAT_MS),
            sample_capacity: DEFAULT_SAMPLE_CAPACITY,
            log_capacity: DEFAULT_LOG_CAPACITY,
            max_line: MAX_LINE_BYTES,
        }
    }
}

struct Link {
    device: String,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<BoxedWriter>,
    heartbeat: JoinHandle<()>,
    port: Box<dyn PortControl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Operator,
    ReadLoop,
}

struct Inner {
    connector: Arc<dyn Connector>,
    settings: SessionSettings,
    connection: watch::Sender<ConnectionState>,
    telemetry: watch::Sender<TelemetryState>,
    commands: Arc<CommandChannel>,
    diagnostics: Diagnostics,
    link: Mutex<Option<Link>>,
}

/// One controller link: owns the telemetry state and the command queue,
/// and moves between Disconnected, Connecting and Connected.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: SessionSettings,
        logger: Arc<Logger>,
    ) -> Self {
        let telemetry = TelemetryState::new(settings.sample_capacity, settings.log_capacity);
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (telemetry, _) = watch::channel(telemetry);
        Self {
            inner: Arc::new(Inner {
                connector,
                settings,
                connection,
                telemetry,
                commands: Arc::new(CommandChannel::new()),
                diagnostics: Diagnostics::new(logger),
                link: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.connection.borrow()
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    pub fn telemetry(&self) -> watch::Receiver<TelemetryState> {
        self.inner.telemetry.subscribe()
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.inner.diagnostics.subscribe()
    }

    /// Queue a command; `false` when not connected or the queue is full.
    pub fn send(&self, command: Command) -> bool {
        self.inner.commands.send(command)
    }

    pub async fn jog(&self, direction: Direction, duty: u8, hold: Duration) -> bool {
        self.inner.commands.jog(direction, duty, hold).await
    }

    /// STOP, or RESUME when the controller reports the emergency latch set.
    pub fn emergency_toggle(&self) -> bool {
        let latched = self.inner.telemetry.borrow().snapshot.emergency();
        self.send(Command::emergency_toggle(latched))
    }

    pub async fn connect(&self) -> Result<ConnectOutcome> {
        let claimed = self.inner.connection.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(Error::Busy(format!("session is {}", self.state())));
        }
        let mut pending = PendingConnect {
            connection: &self.inner.connection,
            armed: true,
        };

        let settings = &self.inner.settings;
        let logger = self.inner.diagnostics.logger();
        logger.info(format!(
            "connecting to {} at {} baud",
            settings.device, settings.serial.baud
        ));

        match self
            .inner
            .connector
            .open(&settings.device, &settings.serial)
            .await
        {
            Ok(transport) => {
                self.inner.attach(transport).await;
                pending.armed = false;
                Ok(ConnectOutcome::Connected)
            }
            Err(Error::Cancelled) => {
                logger.debug("device selection cancelled");
                Ok(ConnectOutcome::Cancelled)
            }
            Err(err) => {
                self.inner.diagnostics.report(Diagnostic::ConnectFailed {
                    kind: classify_error(&err),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Tear the link down. Safe to call in any state; returns whether this
    /// call released a link.
    pub async fn disconnect(&self) -> bool {
        if self.inner.teardown(Origin::Operator).await {
            return true;
        }
        // A read-loop teardown may be mid-flight; wait for it to land.
        let mut rx = self.inner.connection.subscribe();
        let _ = rx
            .wait_for(|state| *state != ConnectionState::Connected)
            .await;
        false
    }
}

/// Returns the session to Disconnected if a connect attempt is abandoned
/// before the link is attached.
struct PendingConnect<'a> {
    connection: &'a watch::Sender<ConnectionState>,
    armed: bool,
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.connection.send_replace(ConnectionState::Disconnected);
        }
    }
}

impl Inner {
    /// The lock is the only await point. Everything after it runs without
    /// yielding, so a connect dropped while waiting leaves nothing behind.
    async fn attach(self: &Arc<Self>, transport: Transport) {
        // Held until Connected is published so an immediate end of stream
        // cannot tear down a half-built link.
        let mut link = self.link.lock().await;
        let Transport {
            reader,
            writer,
            port,
        } = transport;
        let device = port.describe();
        let cancel = CancellationToken::new();

        self.telemetry.send_modify(|state| state.series.clear());
        let writer = self.commands.attach(writer, self.diagnostics.clone());
        let heartbeat = spawn_heartbeat(
            self.commands.clone(),
            self.settings.heartbeat,
            cancel.child_token(),
        );
        let reader = tokio::spawn(read_loop(Arc::clone(self), reader, cancel.clone()));
        self.diagnostics
            .logger()
            .info(format!("connected to {device}"));
        *link = Some(Link {
            device,
            cancel,
            reader,
            writer,
            heartbeat,
            port,
        });
        self.connection.send_replace(ConnectionState::Connected);
    }

    fn ingest(&self, frame: Frame) {
        let line = match frame {
            Frame::Line(line) => line,
            Frame::Overflow { discarded } => {
                self.diagnostics
                    .report(Diagnostic::OversizedLine { discarded });
                return;
            }
        };
        match decode_line(&line) {
            Decoded::Empty => {}
            Decoded::Text(text) => self
                .diagnostics
                .report(Diagnostic::IgnoredText { line: text }),
            Decoded::Malformed { line, reason } => self
                .diagnostics
                .report(Diagnostic::MalformedLine { line, reason }),
            Decoded::Message(message) => {
                let mut applied = Applied::Telemetry { sampled: false };
                self.telemetry
                    .send_modify(|state| applied = state.apply(&message));
                if applied == Applied::Log {
                    if let Some(text) = message.log_text() {
                        self.diagnostics.logger().debug(format!("device log: {text}"));
                    }
                }
            }
        }
    }

    async fn teardown(&self, origin: Origin) -> bool {
        let Some(link) = self.link.lock().await.take() else {
            return false;
        };
        let Link {
            device,
            cancel,
            reader,
            mut writer,
            heartbeat,
            mut port,
        } = link;

        cancel.cancel();
        let _ = heartbeat.await;

        // Dropping the sender lets the writer drain what is queued and
        // hand the stream back.
        self.commands.detach();
        match tokio::time::timeout(RELEASE_TIMEOUT, &mut writer).await {
            Ok(Ok(mut stream)) => {
                if let Err(err) = stream.shutdown().await {
                    self.close_failed(Resource::Writer, err.to_string());
                }
            }
            Ok(Err(err)) => self.close_failed(Resource::Writer, err.to_string()),
            Err(_) => {
                writer.abort();
                let _ = writer.await;
                self.close_failed(Resource::Writer, "timed out flushing queued commands".into());
            }
        }

        // The read loop tearing itself down has already dropped its stream.
        if origin == Origin::Operator {
            let mut reader = reader;
            match tokio::time::timeout(RELEASE_TIMEOUT, &mut reader).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.close_failed(Resource::Reader, err.to_string()),
                Err(_) => {
                    reader.abort();
                    let _ = reader.await;
                    self.close_failed(Resource::Reader, "read loop did not stop".into());
                }
            }
        }

        // Both stream halves are gone by now, so the descriptor is free once
        // the port lets go.
        if let Err(err) = port.close() {
            self.close_failed(Resource::Port, err.to_string());
        }

        self.connection.send_replace(ConnectionState::Disconnected);
        self.diagnostics
            .logger()
            .info(format!("disconnected from {device}"));
        true
    }

    fn close_failed(&self, resource: Resource, reason: String) {
        self.diagnostics
            .report(Diagnostic::CloseFailed { resource, reason });
    }
}

async fn read_loop(inner: Arc<Inner>, reader: BoxedReader, cancel: CancellationToken) {
    let mut frames = FramedRead::new(reader, LineFramer::with_max_line(inner.settings.max_line));
    let ended = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(frame)) => inner.ingest(frame),
            Some(Err(err)) => {
                break Diagnostic::ReadFailed {
                    kind: classify_io_error(&err),
                    reason: err.to_string(),
                }
            }
            None => break Diagnostic::StreamEnded,
        }
    };
    drop(frames);
    if cancel.is_cancelled() {
        return;
    }
    inner.diagnostics.report(ended);
    inner.teardown(Origin::ReadLoop).await;
}
