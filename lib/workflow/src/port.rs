//! Port system for workflow nodes.
//!
//! Ports are named connection points on nodes. Each port carries one semantic
//! type. An edge is valid when the two types are equal, when either side is
//! `any`, or when a coercion between them is registered (see
//! [`crate::coercion`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic type of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// Binary payload, carried as base64.
    File,
    Any,
}

impl PortType {
    /// Returns the wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::File => "file",
            Self::Any => "any",
        }
    }

    /// Checks whether an output of this type may feed an input of `target`.
    #[must_use]
    pub fn is_compatible_with(self, target: Self) -> bool {
        if self == target || self == Self::Any || target == Self::Any {
            return true;
        }

        match (self, target) {
            (Self::File, _) | (_, Self::File) => false,
            (Self::String, Self::Number) | (Self::Number, Self::String) => true,
            (Self::Object, Self::String) | (Self::String, Self::Object) => true,
            (_, Self::Array) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input port on a workflow node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPort {
    /// The name of this port.
    pub name: String,
    /// Type of values accepted.
    pub port_type: PortType,
}

impl InputPort {
    #[must_use]
    pub fn new(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
        }
    }
}

/// An output port on a workflow node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPort {
    /// The name of this port.
    pub name: String,
    /// Type of values produced.
    pub port_type: PortType,
}

impl OutputPort {
    #[must_use]
    pub fn new(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PortType; 7] = [
        PortType::String,
        PortType::Number,
        PortType::Boolean,
        PortType::Object,
        PortType::Array,
        PortType::File,
        PortType::Any,
    ];

    #[test]
    fn any_is_compatible_both_ways() {
        for ty in ALL {
            assert!(PortType::Any.is_compatible_with(ty), "any -> {ty}");
            assert!(ty.is_compatible_with(PortType::Any), "{ty} -> any");
        }
    }

    #[test]
    fn registered_coercions() {
        assert!(PortType::String.is_compatible_with(PortType::Number));
        assert!(PortType::Number.is_compatible_with(PortType::String));
        assert!(PortType::Object.is_compatible_with(PortType::String));
        assert!(PortType::String.is_compatible_with(PortType::Object));
        assert!(PortType::Boolean.is_compatible_with(PortType::Array));
        assert!(PortType::Object.is_compatible_with(PortType::Array));
    }

    #[test]
    fn file_only_matches_itself_or_any() {
        for ty in ALL {
            let expected = matches!(ty, PortType::File | PortType::Any);
            assert_eq!(PortType::File.is_compatible_with(ty), expected, "file -> {ty}");
        }
        assert!(!PortType::String.is_compatible_with(PortType::File));
    }

    #[test]
    fn unregistered_pairs_are_rejected() {
        assert!(!PortType::Boolean.is_compatible_with(PortType::String));
        assert!(!PortType::Array.is_compatible_with(PortType::String));
        assert!(!PortType::Number.is_compatible_with(PortType::Boolean));
        assert!(!PortType::Array.is_compatible_with(PortType::Object));
    }

    #[test]
    fn wire_names() {
        let json = serde_json::to_string(&PortType::File).expect("serialize");
        assert_eq!(json, "\"file\"");
        assert_eq!(PortType::Boolean.to_string(), "boolean");
    }
}
