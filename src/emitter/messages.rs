//! User-facing text for terminal session errors.

/// The poller could not keep up and the stream was cut.
pub const BACKPRESSURE: &str = "backpressure";
/// The poller disconnected before finishing the turn.
pub const CONNECTION_LOST: &str = "connection_lost";
/// The CLI process failed.
pub const CLI_ERROR: &str = "cli_error";
/// The CLI took too long.
pub const TIMEOUT: &str = "timeout";
/// Upstream rate limiting.
pub const RATE_LIMITED: &str = "rate_limited";
/// Anything else, including internal failures.
pub const UNKNOWN: &str = "unknown";

const GENERIC: &str = "Something went wrong while I was answering. Please try again.";

/// Map an error code to the message shown to the user.
///
/// Unknown codes fall back to a generic message.
#[must_use]
pub fn user_message(code: &str) -> &'static str {
    match code {
        BACKPRESSURE => "I was answering faster than I could deliver, so the reply was cut short. Please try again.",
        CONNECTION_LOST => "I lost my connection while answering. Please try again.",
        CLI_ERROR => "I ran into a problem while working on that. Please try again.",
        TIMEOUT => "That took longer than I'm allowed to spend on one answer. Try a narrower question.",
        RATE_LIMITED => "I'm getting too many requests right now. Please wait a moment and try again.",
        _ => GENERIC,
    }
}
