//! Error types for rowbridge.
//!
//! Every failure the bridge can produce falls into one [`ErrorCategory`].

use rowbridge_driver::DriverError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable category names reported to the native caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    #[serde(rename = "DriverLoadError")]
    DriverLoad,
    #[serde(rename = "ConnectionError")]
    Connection,
    #[serde(rename = "TimeoutConfigError")]
    TimeoutConfig,
    #[serde(rename = "ExecutionError")]
    Execution,
    #[serde(rename = "IterationError")]
    Iteration,
    #[serde(rename = "ReleaseError")]
    Release,
    #[serde(rename = "InvalidOptions")]
    InvalidOptions,
    #[serde(rename = "InvalidState")]
    InvalidState,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DriverLoad => "DriverLoadError",
            Self::Connection => "ConnectionError",
            Self::TimeoutConfig => "TimeoutConfigError",
            Self::Execution => "ExecutionError",
            Self::Iteration => "IterationError",
            Self::Release => "ReleaseError",
            Self::InvalidOptions => "InvalidOptions",
            Self::InvalidState => "InvalidState",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for bridge operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Bad library path, missing class, unsupported ABI, failed instantiation.
    #[error("Driver load error: {message}")]
    DriverLoad {
        message: String,
        details: Option<String>,
    },

    /// Authentication, network, malformed URL.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        details: Option<String>,
    },

    /// The driver refused the statement timeout. Never surfaced to callers.
    #[error("Timeout configuration error: {message}")]
    TimeoutConfig {
        message: String,
        details: Option<String>,
    },

    /// Statement creation or the query itself failed.
    #[error("Execution error: {message}")]
    Execution {
        message: String,
        details: Option<String>,
    },

    #[error("Iteration error: {message}")]
    Iteration {
        message: String,
        details: Option<String>,
    },

    /// Close or cancel could not release a resource.
    #[error("Release error: {message}")]
    Release {
        message: String,
        details: Option<String>,
    },

    #[error("Invalid options: {message}")]
    InvalidOptions {
        message: String,
        details: Option<String>,
    },

    #[error("Invalid state: {message}")]
    InvalidState {
        message: String,
        details: Option<String>,
    },
}

impl BridgeError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        let message = message.into();
        let details = None;
        match category {
            ErrorCategory::DriverLoad => Self::DriverLoad { message, details },
            ErrorCategory::Connection => Self::Connection { message, details },
            ErrorCategory::TimeoutConfig => Self::TimeoutConfig { message, details },
            ErrorCategory::Execution => Self::Execution { message, details },
            ErrorCategory::Iteration => Self::Iteration { message, details },
            ErrorCategory::Release => Self::Release { message, details },
            ErrorCategory::InvalidOptions => Self::InvalidOptions { message, details },
            ErrorCategory::InvalidState => Self::InvalidState { message, details },
        }
    }

    pub fn driver_load(msg: impl Into<String>) -> Self {
        Self::new(ErrorCategory::DriverLoad, msg)
    }

    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidOptions, msg)
    }

    /// Wrap a driver error as `"{context}: {driver message}"`, keeping the
    /// driver's SQLSTATE and details as the diagnostic.
    pub fn from_driver(category: ErrorCategory, context: impl fmt::Display, err: DriverError) -> Self {
        let message = format!("{context}: {}", err.message);
        let mut details = Vec::new();
        if let Some(state) = &err.sqlstate {
            details.push(format!("SQLSTATE {state}"));
        }
        if let Some(more) = err.details {
            details.push(more);
        }
        let out = Self::new(category, message);
        if details.is_empty() {
            out
        } else {
            out.with_details(details.join("\n"))
        }
    }

    /// Fold several release failures into one `Release` error.
    pub fn combine(errors: Vec<BridgeError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.into_iter().next(),
            _ => {
                let message = errors
                    .iter()
                    .map(|e| e.message().to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                let details = errors
                    .iter()
                    .filter_map(|e| e.details().map(str::to_string))
                    .collect::<Vec<_>>();
                let out = Self::new(ErrorCategory::Release, message);
                if details.is_empty() {
                    Some(out)
                } else {
                    Some(out.with_details(details.join("\n")))
                }
            }
        }
    }

    pub fn with_details(mut self, more: impl Into<String>) -> Self {
        match &mut self {
            Self::DriverLoad { details, .. }
            | Self::Connection { details, .. }
            | Self::TimeoutConfig { details, .. }
            | Self::Execution { details, .. }
            | Self::Iteration { details, .. }
            | Self::Release { details, .. }
            | Self::InvalidOptions { details, .. }
            | Self::InvalidState { details, .. } => *details = Some(more.into()),
        }
        self
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DriverLoad { .. } => ErrorCategory::DriverLoad,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::TimeoutConfig { .. } => ErrorCategory::TimeoutConfig,
            Self::Execution { .. } => ErrorCategory::Execution,
            Self::Iteration { .. } => ErrorCategory::Iteration,
            Self::Release { .. } => ErrorCategory::Release,
            Self::InvalidOptions { .. } => ErrorCategory::InvalidOptions,
            Self::InvalidState { .. } => ErrorCategory::InvalidState,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::DriverLoad { message, .. }
            | Self::Connection { message, .. }
            | Self::TimeoutConfig { message, .. }
            | Self::Execution { message, .. }
            | Self::Iteration { message, .. }
            | Self::Release { message, .. }
            | Self::InvalidOptions { message, .. }
            | Self::InvalidState { message, .. } => message,
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            Self::DriverLoad { details, .. }
            | Self::Connection { details, .. }
            | Self::TimeoutConfig { details, .. }
            | Self::Execution { details, .. }
            | Self::Iteration { details, .. }
            | Self::Release { details, .. }
            | Self::InvalidOptions { details, .. }
            | Self::InvalidState { details, .. } => details.as_deref(),
        }
    }
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
