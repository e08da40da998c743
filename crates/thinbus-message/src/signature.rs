use std::fmt;
use std::str::FromStr;

use crate::arg::TypeCode;
use crate::error::{MessageError, Result};

/// A validated argument signature: one [`TypeCode`] per character.
///
/// Unknown characters are rejected at parse time so that no message is
/// marshaled against a signature the codec cannot honor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    text: String,
    codes: Vec<TypeCode>,
}

impl Signature {
    /// Parse a signature string.
    pub fn parse(text: &str) -> Result<Self> {
        let codes = text
            .chars()
            .enumerate()
            .map(|(position, code)| {
                TypeCode::from_char(code)
                    .ok_or(MessageError::UnsupportedType { code, position })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            text: text.to_string(),
            codes,
        })
    }

    /// Parse a host-supplied signature where absence may be spelled as
    /// `None`, an empty string, or the literal `"null"`.
    pub fn parse_optional(text: Option<&str>) -> Result<Option<Self>> {
        match text {
            None | Some("") | Some("null") => Ok(None),
            Some(text) => Self::parse(text).map(Some),
        }
    }

    pub fn codes(&self) -> &[TypeCode] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for Signature {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_maps_each_character() {
        let sig = Signature::parse("iuxys").unwrap();
        assert_eq!(
            sig.codes(),
            &[
                TypeCode::Int32,
                TypeCode::UInt32,
                TypeCode::Int64,
                TypeCode::Byte,
                TypeCode::String
            ]
        );
        assert_eq!(sig.as_str(), "iuxys");
        assert_eq!(sig.len(), 5);
    }

    #[test]
    fn unknown_character_reports_position() {
        let err = Signature::parse("iu s").unwrap_err();
        assert_eq!(
            err,
            MessageError::UnsupportedType {
                code: ' ',
                position: 2
            }
        );
        assert!(Signature::parse("a{sv}").is_err());
    }

    #[test]
    fn optional_treats_null_spellings_as_absent() {
        assert_eq!(Signature::parse_optional(None).unwrap(), None);
        assert_eq!(Signature::parse_optional(Some("")).unwrap(), None);
        assert_eq!(Signature::parse_optional(Some("null")).unwrap(), None);
        assert_eq!(
            Signature::parse_optional(Some("uu")).unwrap().unwrap().len(),
            2
        );
    }

    #[test]
    fn empty_signature_is_valid() {
        assert!(Signature::parse("").unwrap().is_empty());
    }
}
