//! # Live Backend Integration
//!
//! Everything upstream-facing: the wire protocol spoken to the realtime
//! voice backend and the session pump that owns the outbound WebSocket.

pub mod protocol;
pub mod session;

pub use session::{connect, LiveEvent, LiveHandle};
