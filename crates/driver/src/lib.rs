#![deny(unsafe_op_in_unsafe_fn)]
//! rowbridge_driver: the capability surface every database driver exposes to the bridge.
//! - `Driver`, `Connection`, `Statement` and `Cursor` traits
//! - `DriverError`, the error value drivers report
//! - the v1 JSON ABI a driver plugin exports from its shared library (see [`abi`])

pub mod abi;
mod error;

pub use error::DriverError;
pub use libc as __libc;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Connection properties handed to [`Driver::connect`] (`user`, `password`, ...).
pub type Properties = BTreeMap<String, String>;

/// One result row; `None` is SQL NULL.
pub type Row = [Option<String>];

/// Entry point a plugin registers for each driver class it exports.
pub type DriverConstructor = fn() -> Result<Box<dyn Driver>, DriverError>;

/// What a connection reports about the database on the other end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    pub product_name: Option<String>,
    pub product_version: Option<String>,
}

impl ConnectionMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            product_name: Some(name.into()),
            product_version: Some(version.into()),
        }
    }
}

/// An instantiated driver class.
pub trait Driver: Send + Sync {
    /// Open a connection to `url`. Credentials travel in `properties`.
    fn connect(&self, url: &str, properties: &Properties)
    -> Result<Box<dyn Connection>, DriverError>;
}

pub trait Connection: Send {
    fn metadata(&self) -> ConnectionMetadata {
        ConnectionMetadata::default()
    }

    /// Create a forward-only, read-only statement.
    fn create_statement(&mut self) -> Result<Box<dyn Statement>, DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;
}

pub trait Statement: Send {
    /// Drivers without statement timeouts keep the default, which refuses.
    fn set_query_timeout(&mut self, timeout: Duration) -> Result<(), DriverError> {
        let _ = timeout;
        Err(DriverError::unsupported("statement query timeout"))
    }

    fn execute_query(&mut self, query: &str) -> Result<Box<dyn Cursor>, DriverError>;

    /// Ask the server to abort the running query. Advisory.
    fn cancel(&mut self) -> Result<(), DriverError> {
        Err(DriverError::unsupported("statement cancel"))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// A forward-only result cursor.
pub trait Cursor: Send {
    fn column_count(&self) -> usize;

    /// Advance one row and write its values into `row`, which holds exactly
    /// `column_count()` slots. Returns `false` once the cursor is exhausted.
    fn fetch_into(&mut self, row: &mut Row) -> Result<bool, DriverError>;

    fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}
