//! NDJSON line framing for poller frames.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so that a poller which forwards an unterminated or enormous line
//! cannot make the session allocate without bound.
//!
//! The poller sends text frames over a message-oriented transport, and one
//! frame may carry several NDJSON lines. [`LineSplitter`] feeds frames into
//! the codec and yields complete lines. A frame that does not end in `\n` is
//! treated as terminated at the frame boundary.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default maximum line length accepted by [`NdjsonCodec`]: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line codec for NDJSON transcripts.
///
/// Inbound lines longer than the configured limit return
/// [`AppError::Protocol`]`("line too long: …")` rather than allocating;
/// the codec then discards input up to the next newline and resumes.
#[derive(Debug)]
pub struct NdjsonCodec {
    inner: LinesCodec,
    max_line_bytes: usize,
}

impl NdjsonCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with an explicit maximum line length.
    #[must_use]
    pub fn with_max_length(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let limit = self.max_line_bytes;
        self.inner
            .decode(src)
            .map_err(|e| map_codec_error(e, limit))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let limit = self.max_line_bytes;
        self.inner
            .decode_eof(src)
            .map_err(|e| map_codec_error(e, limit))
    }
}

/// Splits transport frames into NDJSON lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    codec: NdjsonCodec,
    buf: BytesMut,
}

impl LineSplitter {
    /// Create a splitter enforcing `max_line_bytes` per line.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            codec: NdjsonCodec::with_max_length(max_line_bytes),
            buf: BytesMut::new(),
        }
    }

    /// Feed one frame and return every line it completes, in order.
    ///
    /// Over-long lines surface as `Err` entries in the returned list so the
    /// caller can log them and keep going with the following lines.
    pub fn push_frame(&mut self, frame: &str) -> Vec<Result<String>> {
        self.buf.extend_from_slice(frame.as_bytes());
        if !frame.ends_with('\n') {
            self.buf.extend_from_slice(b"\n");
        }

        let mut lines = Vec::new();
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(line)) => lines.push(Ok(line)),
                Ok(None) => break,
                Err(err) => lines.push(Err(err)),
            }
        }
        lines
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

fn map_codec_error(e: LinesCodecError, limit: usize) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {limit} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
