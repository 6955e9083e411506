//! The structured failure value handed back across the caller boundary.

use crate::error::{BridgeError, ErrorCategory};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescription {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl FailureDescription {
    /// JSON form used as the diagnostic string at the native boundary.
    pub fn to_diagnostic(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}

impl From<&BridgeError> for FailureDescription {
    fn from(err: &BridgeError) -> Self {
        Self {
            category: err.category(),
            message: err.message().to_string(),
            details: err.details().map(str::to_string),
        }
    }
}

impl From<BridgeError> for FailureDescription {
    fn from(err: BridgeError) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for FailureDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)?;
        if let Some(details) = &self.details {
            write!(f, "\n{details}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_is_json() {
        let failure = FailureDescription::from(
            BridgeError::new(ErrorCategory::Execution, "no such table: t").with_details("SQLSTATE 42P01"),
        );
        let value: serde_json::Value = serde_json::from_str(&failure.to_diagnostic()).unwrap();
        assert_eq!(value["category"], "ExecutionError");
        assert_eq!(value["message"], "no such table: t");
        assert_eq!(value["details"], "SQLSTATE 42P01");
    }

    #[test]
    fn display_puts_details_on_next_line() {
        let failure = FailureDescription::from(BridgeError::driver_load("bad path"));
        assert_eq!(failure.to_string(), "DriverLoadError: bad path");
        let detailed = FailureDescription::from(BridgeError::driver_load("bad path").with_details("not an ELF file"));
        assert_eq!(detailed.to_string(), "DriverLoadError: bad path\nnot an ELF file");
        let parsed: FailureDescription = serde_json::from_str(&failure.to_diagnostic()).unwrap();
        assert_eq!(parsed, failure);
    }
}
