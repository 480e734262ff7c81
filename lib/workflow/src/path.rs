//! A small JSON path dialect.
//!
//! Supported: `$` (root), `.key`, `['key']` / `["key"]`, `[index]`. The
//! leading `$` is optional, so `user.name` and `$.user.name` are the same
//! path. There are no wildcards, filters or slices.

use std::fmt;
use std::str::FromStr;

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

/// A path expression that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathError {
    pub expression: String,
    pub reason: String,
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid path '{}': {}", self.expression, self.reason)
    }
}

impl std::error::Error for PathError {}

impl JsonPath {
    /// Parses a path expression.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] for empty keys, unclosed brackets or bracket
    /// contents that are neither an index nor a quoted key.
    pub fn parse(expression: &str) -> Result<Self, PathError> {
        let err = |reason: &str| PathError {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = expression.trim();
        let mut rest = trimmed.strip_prefix('$').unwrap_or(trimmed);
        let mut segments = Vec::new();
        let mut first = true;

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                if end == 0 {
                    return Err(err("empty key after '.'"));
                }
                segments.push(Segment::Key(after[..end].to_string()));
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let close = after.find(']').ok_or_else(|| err("unclosed '['"))?;
                let inner = after[..close].trim();
                let segment = match strip_quotes(inner) {
                    Some(key) => Segment::Key(key.to_string()),
                    None => Segment::Index(
                        inner
                            .parse()
                            .map_err(|_| err("brackets must hold an index or a quoted key"))?,
                    ),
                };
                segments.push(segment);
                rest = &after[close + 1..];
            } else if first {
                let end = rest.find(['.', '[']).unwrap_or(rest.len());
                segments.push(Segment::Key(rest[..end].to_string()));
                rest = &rest[end..];
            } else {
                return Err(err("expected '.' or '['"));
            }
            first = false;
        }

        Ok(Self { segments })
    }

    /// Returns true for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Resolves the path against `value`.
    #[must_use]
    pub fn select<'a>(&self, value: &'a JsonValue) -> Option<&'a JsonValue> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| match segment {
                Segment::Key(key) => current.get(key.as_str()),
                Segment::Index(index) => current.get(*index),
            })
    }
}

impl FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn strip_quotes(s: &str) -> Option<&str> {
    ['\'', '"']
        .into_iter()
        .find_map(|q| s.strip_prefix(q)?.strip_suffix(q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> JsonValue {
        json!({
            "text": "hello",
            "user": {"name": "Ada", "tags": ["a", "b"]},
            "odd key": 1,
        })
    }

    #[test]
    fn root_selects_everything() {
        let path = JsonPath::parse("$").unwrap();
        assert!(path.is_root());
        assert_eq!(path.select(&doc()), Some(&doc()));
        assert!(JsonPath::parse("").unwrap().is_root());
    }

    #[test]
    fn dotted_and_bracketed_paths() {
        let value = doc();
        assert_eq!(
            JsonPath::parse("$.user.name").unwrap().select(&value),
            Some(&json!("Ada"))
        );
        assert_eq!(
            JsonPath::parse("user.tags[1]").unwrap().select(&value),
            Some(&json!("b"))
        );
        assert_eq!(
            JsonPath::parse("$['odd key']").unwrap().select(&value),
            Some(&json!(1))
        );
        assert_eq!(
            JsonPath::parse(r#"$["user"]["name"]"#).unwrap().select(&value),
            Some(&json!("Ada"))
        );
    }

    #[test]
    fn missing_segments_select_nothing() {
        let value = doc();
        assert_eq!(JsonPath::parse("$.nope").unwrap().select(&value), None);
        assert_eq!(JsonPath::parse("$.user.tags[9]").unwrap().select(&value), None);
        assert_eq!(JsonPath::parse("$.text[0]").unwrap().select(&value), None);
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert!(JsonPath::parse("$.").is_err());
        assert!(JsonPath::parse("$.a[").is_err());
        assert!(JsonPath::parse("$[x]").is_err());
        assert!(JsonPath::parse("$[0]x").is_err());
        let err = JsonPath::parse("$..a").unwrap_err();
        assert!(err.to_string().contains("empty key"));
    }
}
