//! Client engine for a lightweight embedded message bus.
//!
//! thinbus drives method calls, signals and session negotiation against a
//! native bus layer that owns the wire encoding and the transport.
//!
//! # Crate Structure
//!
//! - [`message`]: identifiers, messages, typed arguments and signatures
//! - [`transport`]: the native bus boundary and an in-memory loopback bus
//! - [`engine`]: handler registry, poll loop, sessions, invocation and the host bridge
//!
//! ```
//! use thinbus::message::MessageId;
//!
//! let id = MessageId::encode(2, 0, 1, 3);
//! assert_eq!(id.reply().request(), id);
//! ```

/// Re-export message types.
pub mod message {
    pub use thinbus_message::*;
}

/// Re-export transport types.
pub mod transport {
    pub use thinbus_transport::*;
}

/// Re-export engine types.
pub mod engine {
    pub use thinbus_engine::*;
}
