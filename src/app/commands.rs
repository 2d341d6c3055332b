use futures::SinkExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use super::diagnostics::{Diagnostic, Diagnostics};
use crate::payload::{Command, CommandCodec, Direction};
use crate::serial::BoxedWriter;

/// Commands that may wait behind a stalled writer before new ones are refused.
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

struct Outbound {
    tx: mpsc::Sender<Command>,
    diagnostics: Diagnostics,
}

/// Fire-and-forget outbound queue. Commands issued while no link is
/// attached, or while the queue is full, are dropped.
#[derive(Default)]
pub struct CommandChannel {
    tx: Mutex<Option<Outbound>>,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command. Returns `false` when there is no link to send it on
    /// or the queue is full; the latter is reported as `QueueFull`.
    pub fn send(&self, command: Command) -> bool {
        let guard = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        let Some(out) = guard.as_ref() else {
            return false;
        };
        match out.tx.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                out.diagnostics.report(Diagnostic::QueueFull {
                    command: command.token(),
                });
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Like `send`, but waits for room instead of dropping.
    async fn send_waiting(&self, command: Command) -> bool {
        let tx = match self.tx.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            Some(out) => out.tx.clone(),
            None => return false,
        };
        tx.send(command).await.is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    /// Press-and-release jog: drive at `duty`, hold, then halt. The halt
    /// waits for queue room rather than being dropped.
    pub async fn jog(&self, direction: Direction, duty: u8, hold: Duration) -> bool {
        if !self.send(Command::jog(direction, duty)) {
            return false;
        }
        tokio::time::sleep(hold).await;
        self.send_waiting(Command::halt()).await;
        true
    }

    /// Start a writer task draining the queue into `writer`. The task hands
    /// the writer back once the queue is detached and drained.
    pub(crate) fn attach(
        &self,
        writer: BoxedWriter,
        diagnostics: Diagnostics,
    ) -> JoinHandle<BoxedWriter> {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        *self.tx.lock().unwrap_or_else(|p| p.into_inner()) = Some(Outbound {
            tx,
            diagnostics: diagnostics.clone(),
        });
        tokio::spawn(run_writer(rx, writer, diagnostics))
    }

    pub(crate) fn detach(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .is_some()
    }
}

async fn run_writer(
    mut rx: mpsc::Receiver<Command>,
    writer: BoxedWriter,
    diagnostics: Diagnostics,
) -> BoxedWriter {
    let mut sink = FramedWrite::new(writer, CommandCodec);
    while let Some(command) = rx.recv().await {
        let token = command.token();
        diagnostics.logger().trace(format!("tx {token}"));
        if let Err(err) = sink.send(command).await {
            diagnostics.report(Diagnostic::WriteFailed {
                command: token,
                reason: err.to_string(),
            });
        }
    }
    sink.into_inner()
}

/// Send `HEARTBEAT` every `period`, first beat one period from now.
pub(crate) fn spawn_heartbeat(
    channel: Arc<CommandChannel>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !channel.is_attached() {
                        break;
                    }
                    channel.send(Command::Heartbeat);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::logger::Logger;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};

    fn diagnostics() -> Diagnostics {
        Diagnostics::new(Arc::new(Logger::quiet()))
    }

    async fn next_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    }

    #[test]
    fn send_without_link_is_a_noop() {
        let channel = CommandChannel::new();
        assert!(!channel.is_attached());
        assert!(!channel.send(Command::ModeAuto));
        assert!(!channel.detach());
    }

    #[tokio::test]
    async fn commands_go_out_in_call_order() {
        let (host, far) = tokio::io::duplex(1024);
        let channel = CommandChannel::new();
        let writer = channel.attach(Box::new(host), diagnostics());

        assert!(channel.send(Command::ModeManual));
        assert!(channel.send(Command::Duty(-200)));
        assert!(channel.send(Command::halt()));

        let mut far = BufReader::new(far);
        assert_eq!(next_line(&mut far).await, "MODE:MANUAL\n");
        assert_eq!(next_line(&mut far).await, "DC:-200\n");
        assert_eq!(next_line(&mut far).await, "DC:0\n");

        assert!(channel.detach());
        assert!(!channel.send(Command::Stop));
        writer.await.unwrap();
    }

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn write_failures_are_reported_not_raised() {
        let diagnostics = diagnostics();
        let mut rx = diagnostics.subscribe();
        let channel = CommandChannel::new();
        let writer = channel.attach(Box::new(BrokenPipe), diagnostics);

        assert!(channel.send(Command::Clean));
        match rx.recv().await.unwrap() {
            Diagnostic::WriteFailed { command, .. } => assert_eq!(command, "CLEAN:1"),
            other => panic!("unexpected diagnostic {other:?}"),
        }
        assert!(channel.is_attached());
        channel.detach();
        writer.await.unwrap();
    }

    /// Accepts nothing, ever.
    struct Stalled;

    impl AsyncWrite for Stalled {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn stalled_writer_bounds_the_queue() {
        let diagnostics = diagnostics();
        let mut rx = diagnostics.subscribe();
        let channel = CommandChannel::new();
        let writer = channel.attach(Box::new(Stalled), diagnostics);

        let accepted = (0..COMMAND_QUEUE_CAPACITY + 2)
            .filter(|_| channel.send(Command::Heartbeat))
            .count();
        assert!(accepted <= COMMAND_QUEUE_CAPACITY + 1, "accepted {accepted}");
        assert!(accepted >= COMMAND_QUEUE_CAPACITY);
        assert_eq!(
            rx.recv().await.unwrap(),
            Diagnostic::QueueFull {
                command: "HEARTBEAT".into()
            }
        );
        // Still attached: a full queue is not a lost link.
        assert!(channel.is_attached());

        channel.detach();
        writer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_beats_each_period_until_cancelled() {
        let (host, far) = tokio::io::duplex(1024);
        let channel = Arc::new(CommandChannel::new());
        let writer = channel.attach(Box::new(host), diagnostics());
        let cancel = CancellationToken::new();
        let beat = spawn_heartbeat(channel.clone(), Duration::from_millis(1_000), cancel.clone());
        let mut far = BufReader::new(far);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        for _ in 0..3 {
            assert_eq!(next_line(&mut far).await, "HEARTBEAT\n");
        }

        cancel.cancel();
        beat.await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        channel.send(Command::Resume);
        assert_eq!(next_line(&mut far).await, "RESUME\n");

        channel.detach();
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn jog_releases_after_hold() {
        let (host, far) = tokio::io::duplex(1024);
        let channel = CommandChannel::new();
        let writer = channel.attach(Box::new(host), diagnostics());
        assert!(
            channel
                .jog(Direction::West, 180, Duration::from_millis(400))
                .await
        );
        let mut far = BufReader::new(far);
        assert_eq!(next_line(&mut far).await, "DC:-180\n");
        assert_eq!(next_line(&mut far).await, "DC:0\n");
        channel.detach();
        writer.await.unwrap();
    }
}
