use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::arg::Argument;
use crate::id::MessageId;

/// What a unit of bus traffic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    MethodCall,
    MethodReply,
    Error,
    Signal,
}

/// Argument body of a message.
///
/// Arguments are appended in marshal order and consumed front to back.
/// The layout of the body on the wire belongs to the native layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    args: VecDeque<Argument>,
}

impl Payload {
    pub fn push(&mut self, arg: Argument) {
        self.args.push_back(arg);
    }

    /// Take the next unread argument.
    pub fn next_arg(&mut self) -> Option<Argument> {
        self.args.pop_front()
    }

    pub fn remaining(&self) -> usize {
        self.args.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.args.iter()
    }

    pub fn clear(&mut self) {
        self.args.clear();
    }
}

/// An inbound or outbound unit of bus traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub id: MessageId,
    pub sender: Option<String>,
    pub destination: Option<String>,
    pub signature: Option<String>,
    pub iface: Option<String>,
    pub session_id: u32,
    pub flags: u8,
    pub payload: Payload,
}

impl Message {
    /// Create an empty message.
    pub fn new(kind: MessageKind, id: MessageId) -> Self {
        Self {
            kind,
            id,
            sender: None,
            destination: None,
            signature: None,
            iface: None,
            session_id: 0,
            flags: 0,
            payload: Payload::default(),
        }
    }

    /// Create a method-call envelope.
    pub fn method_call(id: MessageId, destination: impl Into<String>, session_id: u32) -> Self {
        let destination = destination.into();
        let mut msg = Self::new(MessageKind::MethodCall, id);
        msg.destination = (!destination.is_empty()).then_some(destination);
        msg.session_id = session_id;
        msg
    }

    /// Create a signal.
    pub fn signal(id: MessageId) -> Self {
        Self::new(MessageKind::Signal, id)
    }

    /// Create the reply to a method call with the given identifier.
    pub fn method_reply(request: MessageId) -> Self {
        Self::new(MessageKind::MethodReply, request.reply())
    }

    /// Create an error reply to a method call with the given identifier.
    pub fn error_reply(request: MessageId) -> Self {
        Self::new(MessageKind::Error, request.reply())
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = session_id;
        self
    }

    /// Append an argument and extend the signature to match.
    pub fn with_arg(mut self, arg: Argument) -> Self {
        self.push_arg(arg);
        self
    }

    /// Append an argument and extend the signature to match.
    pub fn push_arg(&mut self, arg: Argument) {
        self.signature
            .get_or_insert_with(String::new)
            .push(arg.type_code().as_char());
        self.payload.push(arg);
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }

    /// Header summary reported to hosts alongside decoded values.
    pub fn info(&self) -> MessageInfo {
        MessageInfo {
            sender: self.sender.clone(),
            signature: self.signature.clone(),
            iface: self.iface.clone(),
        }
    }
}

/// Header fields of a message that hosts see with every result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iface: Option<String>,
}
