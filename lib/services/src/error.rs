//! Error type shared by every service adapter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure reported by a service adapter.
///
/// `transient` failures (timeouts, rate limits, 5xx responses) may succeed on
/// a later attempt. Everything else is a rejection: bad credentials, invalid
/// payloads, 4xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    /// Whether another attempt may succeed.
    pub transient: bool,
    /// Provider-supplied description.
    pub message: String,
}

impl ServiceError {
    /// A failure worth retrying.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    /// A failure that will not change on retry.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.transient {
            write!(f, "transient service failure: {}", self.message)
        } else {
            write!(f, "service rejected request: {}", self.message)
        }
    }
}

impl std::error::Error for ServiceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_display() {
        let err = ServiceError::transient("503 from provider");
        assert!(err.transient);
        assert!(err.to_string().contains("transient"));
        assert!(err.to_string().contains("503 from provider"));
    }

    #[test]
    fn rejected_display() {
        let err = ServiceError::rejected("invalid api key");
        assert!(!err.transient);
        assert!(err.to_string().contains("rejected"));
    }

    #[test]
    fn wire_format() {
        let err = ServiceError::transient("timeout");
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json, serde_json::json!({"transient": true, "message": "timeout"}));
    }
}
