//! In-memory connector for tests: every open hands the far end of a duplex
//! pipe to the test as a [`FakeDevice`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::task::{Context, Poll};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf,
    ReadHalf, WriteHalf,
};
use tokio::sync::{mpsc, oneshot};

use super::{Connector, PortControl, SerialOptions, Transport};
use crate::{Error, Result};

const PIPE_CAPACITY: usize = 8 * 1024;

#[derive(Default)]
struct Script {
    failures: VecDeque<Error>,
    gate: Option<oneshot::Receiver<()>>,
    fail_close: bool,
    fail_reads: Option<io::ErrorKind>,
    opened: Vec<(String, u32)>,
}

pub struct FakeConnector {
    script: Mutex<Script>,
    devices: mpsc::UnboundedSender<FakeDevice>,
}

impl FakeConnector {
    /// Returns the connector and the stream of device ends it will create.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeDevice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Mutex::new(Script::default()),
                devices: tx,
            },
            rx,
        )
    }

    /// Make the next open fail with `err`.
    pub fn fail_next(&self, err: Error) {
        self.with_script(|s| s.failures.push_back(err));
    }

    /// Park the next open until the returned sender fires (or is dropped).
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.with_script(|s| s.gate = Some(rx));
        tx
    }

    /// Ports opened from now on fail to close.
    pub fn fail_close(&self) {
        self.with_script(|s| s.fail_close = true);
    }

    /// The next opened link fails its first read with `kind`.
    pub fn fail_reads(&self, kind: io::ErrorKind) {
        self.with_script(|s| s.fail_reads = Some(kind));
    }

    /// Device and baud of every successful open.
    pub fn opened(&self) -> Vec<(String, u32)> {
        self.with_script(|s| s.opened.clone())
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut guard = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, device: &str, options: &SerialOptions) -> Result<Transport> {
        let gate = self.with_script(|s| s.gate.take());
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if let Some(err) = self.with_script(|s| s.failures.pop_front()) {
            return Err(err);
        }

        let (host, far) = tokio::io::duplex(PIPE_CAPACITY);
        let (reader, writer) = tokio::io::split(host);
        let (far_reader, far_writer) = tokio::io::split(far);
        let closed = Arc::new(AtomicBool::new(false));
        let live = Arc::new(AtomicUsize::new(2));
        let open_at_close = Arc::new(AtomicUsize::new(NOT_CLOSED));
        let (fail_close, fail_reads) = self.with_script(|s| {
            s.opened.push((device.to_string(), options.baud));
            (s.fail_close, s.fail_reads.take())
        });

        let fake = FakeDevice {
            reader: BufReader::new(far_reader),
            writer: far_writer,
            port_closed: closed.clone(),
            open_at_close: open_at_close.clone(),
        };
        self.devices
            .send(fake)
            .map_err(|_| Error::Io(io::Error::other("fake device receiver dropped")))?;

        Ok(Transport {
            reader: Box::new(Tracked {
                inner: reader,
                fail: fail_reads,
                live: live.clone(),
            }),
            writer: Box::new(Tracked {
                inner: writer,
                fail: None,
                live: live.clone(),
            }),
            port: Box::new(FakePort {
                name: device.to_string(),
                closed,
                fail_close,
                live,
                open_at_close,
            }),
        })
    }
}

const NOT_CLOSED: usize = usize::MAX;

/// A stream half that counts itself in `live` until dropped, the way a
/// real descriptor stays busy while either half is alive.
struct Tracked<T> {
    inner: T,
    fail: Option<io::ErrorKind>,
    live: Arc<AtomicUsize>,
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Tracked<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(kind) = self.fail {
            return Poll::Ready(Err(io::Error::new(kind, "fake line fault")));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Tracked<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

struct FakePort {
    name: String,
    closed: Arc<AtomicBool>,
    fail_close: bool,
    live: Arc<AtomicUsize>,
    open_at_close: Arc<AtomicUsize>,
}

impl PortControl for FakePort {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.open_at_close
            .store(self.live.load(Ordering::SeqCst), Ordering::SeqCst);
        if self.fail_close {
            return Err(Error::Io(io::Error::other("port close failed")));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The controller's side of a fake link.
pub struct FakeDevice {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    port_closed: Arc<AtomicBool>,
    open_at_close: Arc<AtomicUsize>,
}

impl FakeDevice {
    /// Write raw text towards the console.
    pub async fn send(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await
    }

    /// Next line the console wrote, without its terminator. `None` on EOF.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches('\n').to_string()))
    }

    pub fn port_closed(&self) -> bool {
        self.port_closed.load(Ordering::SeqCst)
    }

    /// How many console-side stream halves were still alive when the port
    /// was closed. `None` if it never was.
    pub fn streams_open_at_close(&self) -> Option<usize> {
        match self.open_at_close.load(Ordering::SeqCst) {
            NOT_CLOSED => None,
            open => Some(open),
        }
    }

    /// Drop the link, which the console sees as end of stream.
    pub fn hang_up(self) {}
}
