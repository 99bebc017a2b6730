//! Streaming extractor for inline `<thinking>` commentary spans.
//!
//! Text deltas arrive split at arbitrary points, so a tag may straddle two
//! (or more) chunks. The scanner keeps a trailing buffer that never holds
//! more than one tag's worth of bytes: whenever no complete tag is visible,
//! the longest buffer suffix that is a prefix of the awaited tag is held
//! back and everything before it is emitted immediately.
//!
//! Tag text is never emitted as content.

/// Tag that opens a commentary span.
pub const OPEN_TAG: &str = "<thinking>";
/// Tag that closes a commentary span.
pub const CLOSE_TAG: &str = "</thinking>";

/// Which audience a chunk of text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Commentary inside a `<thinking>` span.
    Thinking,
    /// Ordinary reply text.
    Text,
}

/// A contiguous run of text attributed to one [`ChunkKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingChunk {
    /// Audience of the text.
    pub kind: ChunkKind,
    /// Text with tags removed.
    pub content: String,
}

/// Stateful `<thinking>` tag scanner; one instance per stream.
#[derive(Debug, Default)]
pub struct ThinkingParser {
    in_thinking: bool,
    buffer: String,
    accumulated_all: String,
    accumulated_thinking: String,
    accumulated_clean: String,
}

impl ThinkingParser {
    /// Create a scanner in reply-text mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of streamed text.
    ///
    /// Returns the chunks that can be attributed with certainty so far.
    pub fn process(&mut self, chunk: &str) -> Vec<ThinkingChunk> {
        self.accumulated_all.push_str(chunk);
        self.buffer.push_str(chunk);

        let mut out = Vec::new();
        loop {
            let tag = self.awaited_tag();
            if let Some(pos) = self.buffer.find(tag) {
                let before: String = self.buffer.drain(..pos).collect();
                self.emit(before, &mut out);
                self.buffer.drain(..tag.len());
                self.in_thinking = !self.in_thinking;
                continue;
            }

            let held = partial_tag_len(&self.buffer, tag);
            let ready = self.buffer.len() - held;
            if ready > 0 {
                let text: String = self.buffer.drain(..ready).collect();
                self.emit(text, &mut out);
            }
            break;
        }
        out
    }

    /// Drain the held-back partial tag at end of stream.
    ///
    /// The remainder is attributed to the current mode, since it never
    /// became a tag.
    pub fn flush(&mut self) -> Vec<ThinkingChunk> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.buffer);
        self.emit(rest, &mut out);
        out
    }

    /// Everything fed so far, tags included.
    #[must_use]
    pub fn accumulated_all(&self) -> &str {
        &self.accumulated_all
    }

    /// Commentary text only.
    #[must_use]
    pub fn accumulated_thinking(&self) -> &str {
        &self.accumulated_thinking
    }

    /// Reply text with every commentary span removed.
    #[must_use]
    pub fn accumulated_clean(&self) -> &str {
        &self.accumulated_clean
    }

    /// Whether the scanner is currently inside a commentary span.
    #[must_use]
    pub fn in_thinking(&self) -> bool {
        self.in_thinking
    }

    /// Return to the initial state, discarding all accumulators.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn awaited_tag(&self) -> &'static str {
        if self.in_thinking {
            CLOSE_TAG
        } else {
            OPEN_TAG
        }
    }

    fn emit(&mut self, content: String, out: &mut Vec<ThinkingChunk>) {
        if content.is_empty() {
            return;
        }
        let kind = if self.in_thinking {
            self.accumulated_thinking.push_str(&content);
            ChunkKind::Thinking
        } else {
            self.accumulated_clean.push_str(&content);
            ChunkKind::Text
        };
        out.push(ThinkingChunk { kind, content });
    }
}

/// Length of the longest suffix of `buffer` that is a proper prefix of `tag`.
fn partial_tag_len(buffer: &str, tag: &str) -> usize {
    let longest = tag.len().saturating_sub(1).min(buffer.len());
    (1..=longest)
        .rev()
        .find(|&n| {
            let start = buffer.len() - n;
            buffer.is_char_boundary(start) && tag.starts_with(&buffer[start..])
        })
        .unwrap_or(0)
}
