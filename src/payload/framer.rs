use bytes::BytesMut;
use std::io;
use tokio_util::codec::Decoder;

/// Longest line the framer will buffer before discarding it.
pub const MAX_LINE_BYTES: usize = 1024;

/// One unit produced by [`LineFramer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, terminator removed.
    Line(String),
    /// A line longer than the limit was dropped through its terminator.
    Overflow { discarded: usize },
}

/// Splits an inbound byte stream on `\n`, carrying partial lines across reads.
///
/// The carry-over lives in the codec buffer, so a line is only produced once
/// its terminator has arrived, however the stream was chunked. UTF-8 is
/// decoded per line, after framing.
#[derive(Debug, Clone)]
pub struct LineFramer {
    max_line: usize,
    // Bytes already scanned for a terminator.
    next_index: usize,
    // Bytes dropped so far from an oversized line.
    discarding: Option<usize>,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            max_line: max_line.max(1),
            next_index: 0,
            discarding: None,
        }
    }

    pub fn max_line(&self) -> usize {
        self.max_line
    }
}

impl Decoder for LineFramer {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (Some(dropped), Some(idx)) => {
                    let _ = buf.split_to(idx + 1);
                    self.next_index = 0;
                    self.discarding = None;
                    return Ok(Some(Frame::Overflow {
                        discarded: dropped + idx,
                    }));
                }
                (Some(dropped), None) => {
                    self.discarding = Some(dropped + buf.len());
                    buf.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (None, Some(idx)) => {
                    let raw = buf.split_to(idx + 1);
                    self.next_index = 0;
                    if idx > self.max_line {
                        return Ok(Some(Frame::Overflow { discarded: idx }));
                    }
                    let line = String::from_utf8_lossy(&raw[..idx]).into_owned();
                    return Ok(Some(Frame::Line(line)));
                }
                (None, None) => {
                    if buf.len() > self.max_line {
                        // Oversized and still unterminated: drop what we have and
                        // keep dropping until the next newline.
                        self.discarding = Some(0);
                        continue;
                    }
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // An unterminated tail is never emitted.
                buf.clear();
                self.next_index = 0;
                self.discarding = None;
                Ok(None)
            }
        }
    }
}
