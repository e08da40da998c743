use std::fmt;

use serde_json::{Number, Value};

use crate::error::{MessageError, Result};

/// One-character wire type selected by a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Byte,
    Boolean,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    String,
    ObjectPath,
    Signature,
}

impl TypeCode {
    /// Every supported code, in signature-character order.
    pub const ALL: [TypeCode; 12] = [
        TypeCode::Byte,
        TypeCode::Boolean,
        TypeCode::Int16,
        TypeCode::UInt16,
        TypeCode::Int32,
        TypeCode::UInt32,
        TypeCode::Int64,
        TypeCode::UInt64,
        TypeCode::Double,
        TypeCode::String,
        TypeCode::ObjectPath,
        TypeCode::Signature,
    ];

    /// Map a signature character to its type, or `None` if unsupported.
    pub fn from_char(code: char) -> Option<Self> {
        match code {
            'y' => Some(TypeCode::Byte),
            'b' => Some(TypeCode::Boolean),
            'n' => Some(TypeCode::Int16),
            'q' => Some(TypeCode::UInt16),
            'i' => Some(TypeCode::Int32),
            'u' => Some(TypeCode::UInt32),
            'x' => Some(TypeCode::Int64),
            't' => Some(TypeCode::UInt64),
            'd' => Some(TypeCode::Double),
            's' => Some(TypeCode::String),
            'o' => Some(TypeCode::ObjectPath),
            'g' => Some(TypeCode::Signature),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            TypeCode::Byte => 'y',
            TypeCode::Boolean => 'b',
            TypeCode::Int16 => 'n',
            TypeCode::UInt16 => 'q',
            TypeCode::Int32 => 'i',
            TypeCode::UInt32 => 'u',
            TypeCode::Int64 => 'x',
            TypeCode::UInt64 => 't',
            TypeCode::Double => 'd',
            TypeCode::String => 's',
            TypeCode::ObjectPath => 'o',
            TypeCode::Signature => 'g',
        }
    }

    /// Human-readable type name.
    pub fn name(self) -> &'static str {
        match self {
            TypeCode::Byte => "byte",
            TypeCode::Boolean => "boolean",
            TypeCode::Int16 => "int16",
            TypeCode::UInt16 => "uint16",
            TypeCode::Int32 => "int32",
            TypeCode::UInt32 => "uint32",
            TypeCode::Int64 => "int64",
            TypeCode::UInt64 => "uint64",
            TypeCode::Double => "double",
            TypeCode::String => "string",
            TypeCode::ObjectPath => "object path",
            TypeCode::Signature => "signature",
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ('{}')", self.name(), self.as_char())
    }
}

/// One typed value carried by a message.
///
/// The active variant is chosen by the signature character at marshal time,
/// never by inspecting the generic value.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    ObjectPath(String),
    Signature(String),
}

impl Argument {
    pub fn type_code(&self) -> TypeCode {
        match self {
            Argument::Byte(_) => TypeCode::Byte,
            Argument::Boolean(_) => TypeCode::Boolean,
            Argument::Int16(_) => TypeCode::Int16,
            Argument::UInt16(_) => TypeCode::UInt16,
            Argument::Int32(_) => TypeCode::Int32,
            Argument::UInt32(_) => TypeCode::UInt32,
            Argument::Int64(_) => TypeCode::Int64,
            Argument::UInt64(_) => TypeCode::UInt64,
            Argument::Double(_) => TypeCode::Double,
            Argument::String(_) => TypeCode::String,
            Argument::ObjectPath(_) => TypeCode::ObjectPath,
            Argument::Signature(_) => TypeCode::Signature,
        }
    }

    /// Build a typed argument from a generic value.
    ///
    /// Integers accept JSON numbers or decimal text. Values that do not fit
    /// the target width are rejected, never clamped.
    pub fn from_value(code: TypeCode, value: &Value) -> Result<Self> {
        Ok(match code {
            TypeCode::Byte => Argument::Byte(integer(code, value)?),
            TypeCode::Int16 => Argument::Int16(integer(code, value)?),
            TypeCode::UInt16 => Argument::UInt16(integer(code, value)?),
            TypeCode::Int32 => Argument::Int32(integer(code, value)?),
            TypeCode::UInt32 => Argument::UInt32(integer(code, value)?),
            TypeCode::Int64 => Argument::Int64(integer(code, value)?),
            TypeCode::UInt64 => Argument::UInt64(integer(code, value)?),
            TypeCode::Boolean => Argument::Boolean(boolean(value)?),
            TypeCode::Double => Argument::Double(double(value)?),
            TypeCode::String => Argument::String(text(code, value)?),
            TypeCode::ObjectPath => Argument::ObjectPath(text(code, value)?),
            TypeCode::Signature => Argument::Signature(text(code, value)?),
        })
    }

    /// Convert back into a generic value, keeping full numeric width.
    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            Argument::Byte(v) => Value::from(*v),
            Argument::Boolean(v) => Value::from(*v),
            Argument::Int16(v) => Value::from(*v),
            Argument::UInt16(v) => Value::from(*v),
            Argument::Int32(v) => Value::from(*v),
            Argument::UInt32(v) => Value::from(*v),
            Argument::Int64(v) => Value::from(*v),
            Argument::UInt64(v) => Value::from(*v),
            Argument::Double(v) => Number::from_f64(*v)
                .map(Value::Number)
                .ok_or(MessageError::NonFinite(*v))?,
            Argument::String(v) | Argument::ObjectPath(v) | Argument::Signature(v) => {
                Value::String(v.clone())
            }
        })
    }

    /// Borrow the text of a string-like argument.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Argument::String(v) | Argument::ObjectPath(v) | Argument::Signature(v) => Some(v),
            _ => None,
        }
    }
}

fn integer<T: TryFrom<i128>>(code: TypeCode, value: &Value) -> Result<T> {
    let wide = match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .ok_or_else(|| MessageError::InvalidValue {
                code,
                reason: format!("{n} is not an integer"),
            })?,
        Value::String(s) => s
            .trim()
            .parse::<i128>()
            .map_err(|_| MessageError::InvalidValue {
                code,
                reason: format!("'{s}' is not an integer"),
            })?,
        other => {
            return Err(MessageError::InvalidValue {
                code,
                reason: format!("expected an integer, got {}", json_kind(other)),
            })
        }
    };

    T::try_from(wide).map_err(|_| MessageError::OutOfRange {
        code,
        value: wide.to_string(),
    })
}

fn boolean(value: &Value) -> Result<bool> {
    let invalid = |reason: String| MessageError::InvalidValue {
        code: TypeCode::Boolean,
        reason,
    };
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid(format!("{n} is not 0 or 1"))),
        },
        Value::String(s) => match s.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(invalid(format!("'{other}' is not a boolean"))),
        },
        other => Err(invalid(format!("expected a boolean, got {}", json_kind(other)))),
    }
}

fn double(value: &Value) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| MessageError::InvalidValue {
            code: TypeCode::Double,
            reason: format!("{n} is not a double"),
        })?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| MessageError::InvalidValue {
                code: TypeCode::Double,
                reason: format!("'{s}' is not a number"),
            })?,
        other => {
            return Err(MessageError::InvalidValue {
                code: TypeCode::Double,
                reason: format!("expected a number, got {}", json_kind(other)),
            })
        }
    };

    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(MessageError::NonFinite(parsed))
    }
}

fn text(code: TypeCode, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(MessageError::InvalidValue {
            code,
            reason: format!("expected a string, got {}", json_kind(other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
