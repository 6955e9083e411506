use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error reported by driver code. Crosses the plugin ABI as JSON.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,

    /// Five-character SQLSTATE when the driver knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlstate: Option<String>,

    /// Full diagnostic text (cause chain, server detail, backtrace).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sqlstate: None,
            details: None,
        }
    }

    pub fn unsupported(feature: &str) -> Self {
        Self::new(format!("{feature} is not supported by this driver")).with_sqlstate("0A000")
    }

    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Build from any error, keeping its `source()` chain as details.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        let mut out = Self::new(err.to_string());
        if !chain.is_empty() {
            out.details = Some(chain.join("\n"));
        }
        out
    }

    /// Message followed by details, the way a diagnostic is printed.
    pub fn full_text(&self) -> String {
        let mut text = self.message.clone();
        if let Some(state) = &self.sqlstate {
            text.push_str(&format!(" (SQLSTATE {state})"));
        }
        if let Some(details) = &self.details {
            text.push('\n');
            text.push_str(details);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Outer(Inner);
    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connect failed")
        }
    }
    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connection refused")
        }
    }
    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }
    impl std::error::Error for Inner {}

    #[test]
    fn from_error_keeps_cause_chain() {
        let err = DriverError::from_error(&Outer(Inner));
        assert_eq!(err.message, "connect failed");
        assert_eq!(err.details.as_deref(), Some("caused by: connection refused"));
    }

    #[test]
    fn full_text_includes_sqlstate_and_details() {
        let err = DriverError::new("password authentication failed")
            .with_sqlstate("28P01")
            .with_details("user \"bob\"");
        assert_eq!(
            err.full_text(),
            "password authentication failed (SQLSTATE 28P01)\nuser \"bob\""
        );
    }

    #[test]
    fn json_omits_empty_fields() {
        let json = serde_json::to_string(&DriverError::new("boom")).unwrap();
        assert_eq!(json, r#"{"message":"boom"}"#);
    }
}
