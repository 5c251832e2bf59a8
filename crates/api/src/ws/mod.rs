//! WebSocket delivery of job status events.
//!
//! Provides the HTTP upgrade handler and the heartbeat task. Connection
//! bookkeeping lives in [`docpipe_events::ConnectionRegistry`].

mod handler;
mod heartbeat;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
