use std::time::Duration;

use thinbus_message::{Argument, Message, MessageId, ObjectDescriptor, TypeCode};

use crate::error::Result;

/// Start or stop looking for an advertised name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindOp {
    Start,
    Stop,
}

/// Add or remove a signal match rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    Remove,
    Add,
}

impl RuleOp {
    /// Host encoding: `1` adds, `0` removes.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(RuleOp::Remove),
            1 => Some(RuleOp::Add),
            _ => None,
        }
    }
}

/// Primitives supplied by a native bus library.
///
/// Implementations are shared between the poll loop and request callers, so
/// every method takes `&self` and any internal state must be synchronized by
/// the implementation.
///
/// Inbound messages returned by [`NativeBus::unmarshal_msg`] hold native
/// buffers until [`NativeBus::close_msg`] is called on them; the engine
/// guarantees that call on every path.
pub trait NativeBus: Send + Sync {
    /// Find a router (optionally by service name) and connect to it.
    fn connect(&self, service_name: Option<&str>, timeout: Duration) -> Result<()>;

    /// Advertise the local object set and install the proxy object set.
    fn register_objects(&self, local: &[ObjectDescriptor], proxy: &[ObjectDescriptor])
        -> Result<()>;

    /// Ask the router to report names matching `prefix`.
    fn find_advertised_name(&self, prefix: &str, op: FindOp) -> Result<()>;

    /// Add or remove a signal match rule.
    fn set_signal_rule(&self, rule: &str, op: RuleOp) -> Result<()>;

    /// Send a join-session request. The reply arrives as inbound traffic.
    fn join_session(&self, name: &str, port: u16) -> Result<()>;

    /// Leave a joined session.
    fn leave_session(&self, session_id: u32) -> Result<()>;

    /// Bind a concrete object path to the proxy object addressed by `id`.
    fn set_proxy_object_path(&self, id: MessageId, path: &str) -> Result<()>;

    /// Unmarshal one pending frame, waiting at most `timeout`.
    ///
    /// Returns [`TransportError::Timeout`](crate::TransportError::Timeout) when
    /// nothing arrived and [`TransportError::NoMatch`](crate::TransportError::NoMatch)
    /// when a frame arrived for nothing this client knows about.
    fn unmarshal_msg(&self, timeout: Duration) -> Result<Message>;

    /// Hand a frame nobody claimed to the built-in bus message handlers
    /// (introspection, ping, and similar bookkeeping).
    fn handle_bus_message(&self, msg: &mut Message) -> Result<()>;

    /// Release the native resources held by a message.
    fn close_msg(&self, msg: &mut Message);

    /// Start an outbound method-call envelope.
    fn marshal_method_call(
        &self,
        id: MessageId,
        destination: &str,
        session_id: u32,
        flags: u8,
        timeout: Duration,
    ) -> Result<Message>;

    /// Append one typed argument to an outbound message.
    fn marshal_arg(&self, msg: &mut Message, arg: Argument) -> Result<()>;

    /// Read the next argument of an inbound message as `code`.
    fn unmarshal_arg(&self, msg: &mut Message, code: TypeCode) -> Result<Argument>;

    /// Send a fully marshaled message.
    fn deliver_msg(&self, msg: Message) -> Result<()>;
}
