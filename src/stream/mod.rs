//! Incremental parsing of the poller's NDJSON transcript.
//!
//! Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing of transport frames into lines.
//! - `control`: `init` / `error` / `complete` envelopes that sit outside the transcript grammar.
//! - `thinking`: streaming `<thinking>` tag scanner.
//! - `markers`: embedded JSON marker extraction from tool results.
//! - `tools`: tool call / result correlation.
//! - `event`: the closed [`ParsedEvent`](event::ParsedEvent) type.
//! - `parser`: the line dispatcher tying the above together.

pub mod codec;
pub mod control;
pub mod event;
pub mod markers;
pub mod parser;
pub mod thinking;
pub mod tools;

pub use event::ParsedEvent;
pub use parser::LineParser;
