//! Identifier newtypes
//!
//! Session and client identifiers arrive from the wire and are validated
//! once at the boundary; everything past the router works with the
//! newtypes and never re-checks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum identifier length in characters.
pub const MAX_ID_LEN: usize = 64;

/// Rejected identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identifier must be 1-64 characters of [A-Za-z0-9_-]")]
pub struct IdError;

/// Accepts `[A-Za-z0-9_-]{1,64}`.
fn valid_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_ID_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

macro_rules! identifier {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a raw identifier.
            ///
            /// # Errors
            /// Returns [`IdError`] if the string is empty, over-long, or
            /// contains characters outside `[A-Za-z0-9_-]`.
            pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
                let raw = raw.into();
                if valid_identifier(&raw) {
                    Ok(Self(raw))
                } else {
                    Err(IdError)
                }
            }

            /// Identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::parse(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

identifier! {
    /// Name of a playback session shared by its members.
    SessionId
}

identifier! {
    /// Stable identity of a user across reconnects.
    ClientId
}

/// Transient identity of a single transport connection.
///
/// Assigned by the transport adapter from a process-wide counter; never
/// reused within a process lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
