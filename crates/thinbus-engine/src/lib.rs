//! Protocol engine for thinbus.
//!
//! Sits on top of a [`NativeBus`](thinbus_transport::NativeBus) and provides:
//! - [`HandlerRegistry`]: identifier-keyed one-shot continuations
//! - [`PollLoop`]: drains inbound frames and routes them to continuations
//!   or to the native bus handlers
//! - [`codec`]: signature-driven argument marshaling
//! - Session discovery and join on [`BusConnection`]
//! - Method invocation with asynchronous replies
//! - [`Bridge`]: positional JSON requests from a host runtime
//!
//! # Example
//!
//! ```
//! use std::sync::{mpsc, Arc};
//!
//! use thinbus_engine::{BusConnection, CallbackId, EngineConfig, PollLoop, TickOutcome};
//! use thinbus_message::{Argument, Message, MessageId};
//! use thinbus_transport::LoopbackBus;
//!
//! let (tx, rx) = mpsc::channel();
//! let bus = Arc::new(LoopbackBus::new());
//! let conn = BusConnection::connect(bus, None, EngineConfig::default(), Arc::new(tx)).unwrap();
//! let conn = Arc::new(conn);
//!
//! conn.start_discovery(CallbackId(1), "org.example").unwrap();
//! conn.bus().push_inbound(
//!     Message::signal(MessageId::FOUND_ADVERTISED_NAME)
//!         .with_sender(":1.2")
//!         .with_arg(Argument::String("org.example.tv".into())),
//! );
//!
//! let poller = PollLoop::new(Arc::clone(&conn));
//! assert_eq!(poller.tick(), TickOutcome::Dispatched(MessageId::FOUND_ADVERTISED_NAME));
//! assert!(rx.recv().unwrap().is_success());
//! ```

pub mod bridge;
pub mod codec;
pub mod completion;
pub mod config;
pub mod connection;
pub mod error;
pub mod invoker;
pub mod poll;
pub mod registry;
pub mod session;

pub use bridge::{Bridge, Request};
pub use completion::{CallbackId, Completion, CompletionSink, Reply};
pub use config::{EngineConfig, PollConfig};
pub use connection::BusConnection;
pub use error::{EngineError, Result};
pub use invoker::{InvokeRequest, OWN_SESSION};
pub use poll::{PollHandle, PollLoop, TickOutcome};
pub use registry::{Continuation, HandlerRegistry};
pub use session::{JoinReplyCode, SessionCoordinator, SessionState};
