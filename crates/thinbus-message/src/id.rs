use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MessageError, Result};

/// List index of the built-in bus objects.
pub const BUS_ID_FLAG: u8 = 0x00;
/// List index of the objects this client exposes.
pub const APP_ID_FLAG: u8 = 0x01;
/// List index of the remote objects this client calls into.
pub const PROXY_ID_FLAG: u8 = 0x02;
/// Flag OR-ed into the list byte to mark a reply identifier.
pub const REPLY_ID_FLAG: u8 = 0x80;

/// A dense 32-bit member address.
///
/// Layout:
/// ```text
/// ┌────────────┬─────────────┬────────────────┬─────────────┐
/// │ List (8b)  │ Object (8b) │ Interface (8b) │ Member (8b) │
/// │ bits 24-31 │ bits 16-23  │ bits 8-15      │ bits 0-7    │
/// └────────────┴─────────────┴────────────────┴─────────────┘
/// ```
///
/// Indices follow declaration order of the registered objects, so the order
/// in which objects and interfaces are registered is part of the address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u32);

impl MessageId {
    /// Signal broadcast by the bus when an advertised name is found.
    pub const FOUND_ADVERTISED_NAME: MessageId = MessageId::encode(BUS_ID_FLAG, 1, 0, 1);
    /// Bus method used to join a session.
    pub const JOIN_SESSION: MessageId = MessageId::encode(BUS_ID_FLAG, 1, 0, 10);

    /// Pack four 8-bit indices into an identifier.
    pub const fn encode(list: u8, object: u8, interface: u8, member: u8) -> Self {
        Self(
            ((list as u32) << 24)
                | ((object as u32) << 16)
                | ((interface as u32) << 8)
                | member as u32,
        )
    }

    /// Build an identifier from host-supplied indices, validating each one.
    ///
    /// Exactly four indices are required and each must lie in `0..=255`.
    pub fn try_from_indices(indices: &[i64]) -> Result<Self> {
        if indices.len() != 4 {
            return Err(MessageError::IndexCount(indices.len()));
        }
        let mut packed = [0u8; 4];
        for (position, (&value, slot)) in indices.iter().zip(packed.iter_mut()).enumerate() {
            *slot = u8::try_from(value)
                .map_err(|_| MessageError::IndexOutOfRange { position, value })?;
        }
        Ok(Self::encode(packed[0], packed[1], packed[2], packed[3]))
    }

    /// Wrap a raw 32-bit value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw 32-bit value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Split into `(list, object, interface, member)`.
    pub const fn decode(self) -> (u8, u8, u8, u8) {
        (
            (self.0 >> 24) as u8,
            (self.0 >> 16) as u8,
            (self.0 >> 8) as u8,
            self.0 as u8,
        )
    }

    pub const fn list_index(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn object_index(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn interface_index(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn member_index(self) -> u8 {
        self.0 as u8
    }

    /// The identifier a reply to this request carries.
    ///
    /// This is an OR against a fixed bit, so applying it twice is a no-op.
    pub const fn reply(self) -> Self {
        Self(self.0 | ((REPLY_ID_FLAG as u32) << 24))
    }

    /// True if the reply flag is set.
    pub const fn is_reply(self) -> bool {
        self.0 & ((REPLY_ID_FLAG as u32) << 24) != 0
    }

    /// The request identifier with the reply flag cleared.
    pub const fn request(self) -> Self {
        Self(self.0 & !((REPLY_ID_FLAG as u32) << 24))
    }

    /// The same object, interface and member under another list index.
    pub const fn with_list_index(self, list: u8) -> Self {
        Self((self.0 & 0x00FF_FFFF) | ((list as u32) << 24))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (list, object, interface, member) = self.decode();
        write!(
            f,
            "MessageId(0x{:08x} = {list}.{object}.{interface}.{member})",
            self.0
        )
    }
}

impl From<MessageId> for u32 {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// Parses `0x`-prefixed hex, plain decimal, or dotted `list.object.interface.member`.
impl FromStr for MessageId {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let invalid = || MessageError::InvalidId(s.to_string());

        if text.contains('.') {
            let indices = text
                .split('.')
                .map(|part| part.trim().parse::<i64>().map_err(|_| invalid()))
                .collect::<Result<Vec<_>>>()?;
            return Self::try_from_indices(&indices);
        }

        let raw = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => text.parse::<u32>(),
        };
        raw.map(Self).map_err(|_| invalid())
    }
}
