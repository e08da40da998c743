//! Message model for the thinbus protocol.
//!
//! This is the leaf layer of thinbus. It defines:
//! - The dense 32-bit [`MessageId`] that addresses a member by
//!   list, object, interface and member position
//! - The [`Message`] envelope handed back and forth with the native layer
//! - Typed [`Argument`]s selected by one-character [`TypeCode`]s
//! - [`Signature`] strings that drive argument marshaling
//! - [`ObjectDescriptor`]s whose declaration order assigns identifier indices
//!
//! Nothing here performs I/O.

pub mod arg;
pub mod error;
pub mod id;
pub mod message;
pub mod object;
pub mod signature;

pub use arg::{Argument, TypeCode};
pub use error::{MessageError, Result};
pub use id::{MessageId, APP_ID_FLAG, BUS_ID_FLAG, PROXY_ID_FLAG, REPLY_ID_FLAG};
pub use message::{Message, MessageInfo, MessageKind, Payload};
pub use object::{
    InterfaceDescription, MemberDescription, MemberKind, ObjectDescriptor, ObjectTable,
    ResolvedMember,
};
pub use signature::Signature;
