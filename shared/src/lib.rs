//! Shared wire protocol, framing, and byte-bridging for the subway relay.
//!
//! Both `subway-relay` and `subway-client` depend on this crate so the
//! control-channel protocol is defined in exactly one place.

pub mod bridge;
pub mod error;
pub mod frame;
pub mod protocol;

pub use error::{Error, Result};
pub use protocol::{Message, MessageType};
