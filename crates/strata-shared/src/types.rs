use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IdentifierError;

fn validate(s: &str, sigil: Option<char>, needs_server: bool) -> Result<(), IdentifierError> {
    if s.is_empty() {
        return Err(IdentifierError::Empty);
    }
    if let Some(sigil) = sigil {
        if !s.starts_with(sigil) || s.len() == 1 {
            return Err(IdentifierError::MissingSigil(s.to_string(), sigil));
        }
    }
    if needs_server {
        match s.split_once(':') {
            Some((_, server)) if !server.is_empty() => {}
            _ => return Err(IdentifierError::MissingServerName(s.to_string())),
        }
    }
    Ok(())
}

// Identifiers are opaque strings validated once at the boundary. The macro
// keeps the five newtypes identical apart from their validation rule.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $sigil:expr, $needs_server:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(s: impl Into<String>) -> Result<Self, IdentifierError> {
                let s = s.into();
                validate(&s, $sigil, $needs_server)?;
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdentifierError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = IdentifierError;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// `!opaque:server`
    RoomId, Some('!'), true
);
string_id!(
    /// `$opaque`, room versions 3+ drop the server part.
    EventId, Some('$'), false
);
string_id!(
    /// `@localpart:server`
    UserId, Some('@'), true
);
string_id!(DeviceId, None, false);
string_id!(
    /// Client-chosen id used for idempotent sends and local echo correlation.
    TransactionId, None, false
);

impl UserId {
    pub fn localpart(&self) -> &str {
        self.0[1..].split_once(':').map(|(l, _)| l).unwrap_or_default()
    }

    pub fn server_name(&self) -> &str {
        self.0.split_once(':').map(|(_, s)| s).unwrap_or_default()
    }
}

impl RoomId {
    pub fn server_name(&self) -> &str {
        self.0.split_once(':').map(|(_, s)| s).unwrap_or_default()
    }
}

impl TransactionId {
    /// A fresh random transaction id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

/// Our membership in a room, as seen from the section of the sync payload
/// that names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Membership {
    Joined,
    Invited,
    Left,
}

impl Membership {
    pub fn as_str(&self) -> &'static str {
        match self {
            Membership::Joined => "join",
            Membership::Invited => "invite",
            Membership::Left => "leave",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "join" => Some(Membership::Joined),
            "invite" => Some(Membership::Invited),
            "leave" | "ban" => Some(Membership::Left),
            _ => None,
        }
    }
}

/// Lifecycle of a locally created event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendState {
    Sending,
    Sent,
    Synced,
    Undelivered,
}

impl SendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendState::Sending => "sending",
            SendState::Sent => "sent",
            SendState::Synced => "synced",
            SendState::Undelivered => "undelivered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(SendState::Sending),
            "sent" => Some(SendState::Sent),
            "synced" => Some(SendState::Synced),
            "undelivered" => Some(SendState::Undelivered),
            _ => None,
        }
    }
}
