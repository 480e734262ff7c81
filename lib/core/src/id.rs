//! Strongly-typed identifiers.
//!
//! Ids wrap a ULID and are written with a short type prefix (`wf_…`,
//! `exec_…`) both in `Display` and on the wire. Because ULIDs sort by
//! creation time, so do the ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when an id string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Name of the id type being parsed.
    pub id_type: &'static str,
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Accepts `<prefix>_<ulid>` or a bare ULID. Any other prefix is rejected.
fn parse_prefixed(s: &str, prefix: &str, id_type: &'static str) -> Result<Ulid, ParseIdError> {
    let raw = match s.split_once('_') {
        Some((found, rest)) if found == prefix => rest,
        Some((found, _)) => {
            return Err(ParseIdError {
                id_type,
                reason: format!("expected prefix {prefix}_, found {found}_"),
            });
        }
        None => s,
    };
    Ulid::from_string(raw).map_err(|e| ParseIdError {
        id_type,
        reason: e.to_string(),
    })
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(into = "String", try_from = "String")]
        pub struct $name(Ulid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generates a fresh id.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn ulid(self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_prefixed(s, Self::PREFIX, stringify!($name)).map(Self)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseIdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }
    };
}

define_id!(
    /// Identifies a stored workflow definition.
    WorkflowId,
    "wf"
);

define_id!(
    /// Identifies one call of the engine against a workflow graph.
    ExecutionId,
    "exec"
);
