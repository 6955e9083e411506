//! rowbridge_core: run SQL through driver plugins picked at runtime.
//! - `registry` caches driver classes loaded from shared libraries
//! - `session` owns one query from connect to close
//! - `boundary` is the string-typed surface for native callers

pub mod boundary;
pub mod config;
pub mod error;
pub mod failure;
pub mod loader;
pub mod native;
pub mod options;
pub mod registry;
pub mod session;

pub use boundary::{Bridge, BridgeSession, InitializeReply};
pub use config::{BridgeConfig, ScanOverrides};
pub use error::{BridgeError, ErrorCategory, Result};
pub use failure::FailureDescription;
pub use options::ScanOptions;
pub use registry::{DriverClassHandle, DriverRegistry};
pub use session::{QuerySession, SessionRequest, SessionState};
