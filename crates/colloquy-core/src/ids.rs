//! Branded ID newtypes.
//!
//! Sessions accept caller-supplied IDs (any non-empty string), so every
//! branded type round-trips arbitrary raw strings via [`from_raw`] while
//! [`new`] generates a prefixed uuid-v7.
//!
//! [`from_raw`]: SessionId::from_raw
//! [`new`]: SessionId::new

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        /// Branded identifier newtype.
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh, prefixed uuid-v7 ID.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap an existing raw string (e.g. a caller-supplied ID).
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// The raw string form.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(SessionId, "sess");
branded_id!(EventId, "evt");
branded_id!(InvocationId, "inv");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_prefix() {
        let id = SessionId::new();
        assert!(id.as_str().starts_with("sess_"), "got: {id}");
    }

    #[test]
    fn event_id_has_prefix() {
        let id = EventId::new();
        assert!(id.as_str().starts_with("evt_"), "got: {id}");
    }

    #[test]
    fn invocation_id_has_prefix() {
        let id = InvocationId::new();
        assert!(id.as_str().starts_with("inv_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = SessionId::from_raw("my-custom-session");
        assert_eq!(id.as_str(), "my-custom-session");
    }

    #[test]
    fn serde_is_transparent() {
        let id = EventId::from_raw("evt_abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"evt_abc\"");
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
