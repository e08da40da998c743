use crate::arg::TypeCode;

/// Errors raised while building identifiers, signatures or typed arguments.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    /// A signature contains a character outside the supported alphabet.
    #[error("unsupported signature character '{code}' at position {position}")]
    UnsupportedType { code: char, position: usize },

    /// A generic value cannot be read as the requested type.
    #[error("invalid {code} value: {reason}")]
    InvalidValue { code: TypeCode, reason: String },

    /// A numeric value does not fit the requested width or signedness.
    #[error("{value} is out of range for {code}")]
    OutOfRange { code: TypeCode, value: String },

    /// A double cannot be carried by the generic value model (NaN or infinite).
    #[error("double value {0} cannot be represented")]
    NonFinite(f64),

    /// An argument's type does not match the signature character expected for it.
    #[error("argument type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: TypeCode, found: TypeCode },

    /// Identifier index lists must have exactly four entries.
    #[error("message identifier needs 4 indices, got {0}")]
    IndexCount(usize),

    /// An identifier index does not fit in 8 bits.
    #[error("index {value} at position {position} does not fit in 8 bits")]
    IndexOutOfRange { position: usize, value: i64 },

    /// An object, interface or member description is malformed.
    #[error("invalid description '{text}': {reason}")]
    InvalidDescription { text: String, reason: String },

    /// Text could not be parsed as a message identifier.
    #[error("invalid message identifier '{0}'")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, MessageError>;
