#![forbid(unsafe_code)]

//! Streaming protocol processor for headless LLM CLI turns.
//!
//! A poller connects over a duplex channel, sends an `init` envelope, then
//! relays the CLI's NDJSON transcript. The [`stream`] layer turns lines into
//! typed events, the [`session`] layer runs one turn with bounded buffering,
//! and an [`emitter`] delivers the turn to users and collaborators.

pub mod config;
pub mod emitter;
pub mod errors;
pub mod server;
pub mod services;
pub mod session;
pub mod stream;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
