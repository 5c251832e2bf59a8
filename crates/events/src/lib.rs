//! Real-time status delivery for docpipe jobs.
//!
//! - [`ConnectionRegistry`] tracks the live delivery channels of every user.
//! - [`StatusMessage`] is the wire envelope pushed to clients.
//! - [`StatusBroadcaster`] resolves a job's owner and fans a status event out
//!   to all of that user's channels.
//!
//! Delivery is best effort: nothing here ever changes a job's state.

pub mod broadcaster;
pub mod message;
pub mod registry;

pub use broadcaster::StatusBroadcaster;
pub use message::{StatusEvent, StatusKind, StatusMessage};
pub use registry::{ChannelHandle, ConnectionRegistry, DeliveryError, Frame};
