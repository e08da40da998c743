//! Bus-addressable objects and their interface descriptions.
//!
//! Hosts describe objects as JSON:
//!
//! ```text
//! { "path": "/org/example/player",
//!   "interfaces": [
//!     ["$org.example.Player", "?Play track<s >b", "!Stopped >u", "@Volume=q"],
//!     null
//!   ] }
//! ```
//!
//! The first string of an interface is its name (`$` marks it secure). Every
//! further string is a member whose first character gives its kind:
//! `?` method, `!` signal, `@` property. Object, interface and member
//! positions become the indices of a [`MessageId`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{MessageError, Result};
use crate::id::{MessageId, APP_ID_FLAG, PROXY_ID_FLAG};

/// Kind of an interface member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Method,
    Signal,
    Property,
}

impl MemberKind {
    fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            '?' => Some(MemberKind::Method),
            '!' => Some(MemberKind::Signal),
            '@' => Some(MemberKind::Property),
            _ => None,
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKind::Method => f.write_str("method"),
            MemberKind::Signal => f.write_str("signal"),
            MemberKind::Property => f.write_str("property"),
        }
    }
}

/// One member line of an interface description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberDescription {
    pub kind: MemberKind,
    pub name: String,
    /// Arguments sent to the member: method inputs, or a writable property's type.
    pub in_signature: String,
    /// Arguments produced by the member: method outputs, signal arguments,
    /// or a readable property's type.
    pub out_signature: String,
    /// The description text as registered.
    pub raw: String,
}

impl MemberDescription {
    /// Parse a member line such as `?Join name<s port<q >u` or `@Volume=q`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| MessageError::InvalidDescription {
            text: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut chars = raw.chars();
        let kind = chars
            .next()
            .and_then(MemberKind::from_prefix)
            .ok_or_else(|| invalid("member must start with '?', '!' or '@'"))?;
        let body = chars.as_str();

        let mut in_signature = String::new();
        let mut out_signature = String::new();

        let name = if kind == MemberKind::Property {
            let split = body
                .find(['=', '<', '>'])
                .ok_or_else(|| invalid("property needs an access marker '=', '<' or '>'"))?;
            let (name, access) = body.split_at(split);
            let mut access_chars = access.chars();
            let marker = access_chars.next();
            let ty = access_chars.as_str().trim();
            match marker {
                Some('=') => {
                    in_signature.push_str(ty);
                    out_signature.push_str(ty);
                }
                Some('<') => in_signature.push_str(ty),
                _ => out_signature.push_str(ty),
            }
            name.trim()
        } else {
            let mut tokens = body.split_whitespace();
            let name = tokens.next().unwrap_or_default();
            for token in tokens {
                let Some(split) = token.find(['<', '>']) else {
                    return Err(invalid("argument needs a direction marker '<' or '>'"));
                };
                let (marker, ty) = token[split..].split_at(1);
                // Signal arguments are always outbound from the emitter.
                if marker == "<" && kind == MemberKind::Method {
                    in_signature.push_str(ty);
                } else {
                    out_signature.push_str(ty);
                }
            }
            name
        };

        if name.is_empty() {
            return Err(invalid("member name is empty"));
        }

        Ok(Self {
            kind,
            name: name.to_string(),
            in_signature,
            out_signature,
            raw: raw.to_string(),
        })
    }
}

/// An interface: a name plus ordered member descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceDescription {
    pub name: String,
    pub secure: bool,
    pub members: Vec<MemberDescription>,
}

impl InterfaceDescription {
    /// Build from the host's string list; empty member strings are skipped.
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Result<Self> {
        let (first, rest) = lines
            .split_first()
            .ok_or_else(|| MessageError::InvalidDescription {
                text: String::new(),
                reason: "interface description is empty".to_string(),
            })?;

        let first = first.as_ref();
        let (name, secure) = match first.strip_prefix('$') {
            Some(name) => (name, true),
            None => (first, false),
        };
        if name.is_empty() {
            return Err(MessageError::InvalidDescription {
                text: first.to_string(),
                reason: "interface name is empty".to_string(),
            });
        }

        let members = rest
            .iter()
            .map(|line| line.as_ref())
            .filter(|line| !line.is_empty())
            .map(MemberDescription::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            secure,
            members,
        })
    }
}

impl<'de> Deserialize<'de> for InterfaceDescription {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let lines = Vec::<String>::deserialize(deserializer)?;
        Self::from_lines(&lines).map_err(serde::de::Error::custom)
    }
}

/// A bus-addressable object: a path and its interfaces in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub path: String,
    #[serde(default, deserialize_with = "skip_null_entries")]
    pub interfaces: Vec<InterfaceDescription>,
}

impl ObjectDescriptor {
    pub fn new(path: impl Into<String>, interfaces: Vec<InterfaceDescription>) -> Self {
        Self {
            path: path.into(),
            interfaces,
        }
    }

    /// Parse a host object list. Null entries (list terminators) are dropped.
    pub fn list_from_value(value: &serde_json::Value) -> Result<Vec<Self>> {
        let entries = Vec::<Option<ObjectDescriptor>>::deserialize(value).map_err(|err| {
            MessageError::InvalidDescription {
                text: value.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(entries.into_iter().flatten().collect())
    }
}

fn skip_null_entries<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let entries = Vec::<Option<T>>::deserialize(deserializer)?;
    Ok(entries.into_iter().flatten().collect())
}

/// A member located by identifier.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedMember<'a> {
    pub path: &'a str,
    pub interface: &'a InterfaceDescription,
    pub member: &'a MemberDescription,
}

/// The registered local and proxy object sets.
///
/// Built once at registration and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectTable {
    local: Vec<ObjectDescriptor>,
    proxy: Vec<ObjectDescriptor>,
}

impl ObjectTable {
    pub fn new(local: Vec<ObjectDescriptor>, proxy: Vec<ObjectDescriptor>) -> Self {
        Self { local, proxy }
    }

    pub fn local(&self) -> &[ObjectDescriptor] {
        &self.local
    }

    pub fn proxy(&self) -> &[ObjectDescriptor] {
        &self.proxy
    }

    /// Objects addressed by a list index. Bus built-ins are owned by the
    /// native layer and are not part of this table.
    pub fn objects(&self, list: u8) -> Option<&[ObjectDescriptor]> {
        match list {
            APP_ID_FLAG => Some(&self.local),
            PROXY_ID_FLAG => Some(&self.proxy),
            _ => None,
        }
    }

    /// Locate the member an identifier addresses. Reply flags are ignored.
    pub fn resolve(&self, id: MessageId) -> Option<ResolvedMember<'_>> {
        let (list, object, interface, member) = id.request().decode();
        let object = self.objects(list)?.get(usize::from(object))?;
        let interface = object.interfaces.get(usize::from(interface))?;
        let member = interface.members.get(usize::from(member))?;
        Some(ResolvedMember {
            path: &object.path,
            interface,
            member,
        })
    }
}
