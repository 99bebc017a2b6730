//! Stream session lifecycle: transport, state and the producer/consumer loop.

pub mod manager;
pub mod state;
pub mod transport;

pub use manager::StreamSession;
pub use state::{SessionContext, SessionOutcome, SessionReport, SessionState, SessionStats};
pub use transport::{ChannelPeer, ChannelTransport, CloseFrame, Transport};
