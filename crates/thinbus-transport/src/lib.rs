//! Native transport boundary for thinbus.
//!
//! The engine never touches a socket or a wire layout. Everything below the
//! message level (router discovery, authentication, byte framing, argument
//! layout) belongs to a native bus library reached through the [`NativeBus`]
//! trait defined here.
//!
//! [`LoopbackBus`] is a scripted in-memory implementation for tests and
//! tooling: inbound traffic is queued by hand, outbound traffic is recorded.

pub mod error;
pub mod loopback;
pub mod traits;

pub use error::{Result, TransportError};
pub use loopback::{BusCall, LoopbackBus, Operation};
pub use traits::{FindOp, NativeBus, RuleOp};
