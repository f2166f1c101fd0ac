//! Newline-delimited framing for the peer notification channel.
//!
//! Each frame is one line of UTF-8: either a JSON notification record
//! `{"id", "info", "time"}` or the heartbeat token. Blank lines are skipped.
//! A line longer than the frame limit is reported once as malformed and the
//! rest of it is discarded up to the next newline.

use bytes::BytesMut;
use tagtrack_core::{Notification, TagError};
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 1024;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Heartbeat,
    Notification(Notification),
}

/// Result of reading the next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Frame(Frame),
    /// The line could not be decoded. The stream is still usable.
    Malformed(TagError),
    /// The peer closed the stream.
    Closed,
}

/// Stateless line decoder.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    heartbeat_token: String,
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub fn new(heartbeat_token: impl Into<String>, max_frame_bytes: usize) -> Self {
        Self {
            heartbeat_token: heartbeat_token.into(),
            max_frame_bytes,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Decode one line, without its terminator.
    pub fn decode(&self, line: &[u8]) -> Result<Frame, TagError> {
        if line.len() > self.max_frame_bytes {
            return Err(oversize(line.len(), self.max_frame_bytes));
        }
        let text = std::str::from_utf8(line)
            .map_err(|e| TagError::protocol_decode(format!("invalid UTF-8: {e}")))?
            .trim();
        if text == self.heartbeat_token {
            return Ok(Frame::Heartbeat);
        }
        serde_json::from_str::<Notification>(text)
            .map(Frame::Notification)
            .map_err(TagError::protocol_decode)
    }
}

fn oversize(len: usize, limit: usize) -> TagError {
    TagError::protocol_decode(format!("frame of {len} bytes exceeds limit of {limit}"))
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Reads frames off a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    codec: FrameCodec,
    buf: BytesMut,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, codec: FrameCodec) -> Self {
        Self {
            reader,
            codec,
            buf: BytesMut::with_capacity(READ_CHUNK),
            discarding: false,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Err(ConnectionLost)` on any transport error other than a
    /// clean end of stream.
    pub async fn next(&mut self) -> Result<ReadOutcome, TagError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                let body = &line[..pos];
                if is_blank(body) {
                    continue;
                }
                return Ok(self.outcome(body));
            }

            if self.discarding {
                self.buf.clear();
            } else if self.buf.len() > self.codec.max_frame_bytes {
                let seen = self.buf.len();
                self.buf.clear();
                self.discarding = true;
                return Ok(ReadOutcome::Malformed(oversize(
                    seen,
                    self.codec.max_frame_bytes,
                )));
            }

            self.buf.reserve(READ_CHUNK);
            let read = self
                .reader
                .read_buf(&mut self.buf)
                .await
                .map_err(TagError::connection_lost)?;
            if read == 0 {
                // Trailing line without a terminator still counts.
                let rest = self.buf.split();
                if self.discarding || is_blank(&rest) {
                    return Ok(ReadOutcome::Closed);
                }
                return Ok(self.outcome(&rest));
            }
        }
    }

    fn outcome(&self, body: &[u8]) -> ReadOutcome {
        match self.codec.decode(body) {
            Ok(frame) => ReadOutcome::Frame(frame),
            Err(e) => ReadOutcome::Malformed(e),
        }
    }
}
