//! How driver libraries are opened and what the registry sees of them.

use crate::error::Result;
use crate::native::NativeLibrary;
use rowbridge_driver::{Driver, DriverError};
use std::path::Path;
use std::sync::Arc;

/// A driver class found in a library, ready to be instantiated.
pub trait DriverClass: Send + Sync {
    fn name(&self) -> &str;
    fn instantiate(&self) -> std::result::Result<Box<dyn Driver>, DriverError>;
}

/// An opened driver library.
pub trait DriverLibrary: Send + Sync {
    fn path(&self) -> &Path;
    fn class_names(&self) -> Vec<String>;
    fn class(&self, name: &str) -> Option<Arc<dyn DriverClass>>;
}

/// Opens driver libraries by path. The registry owns one.
pub trait LibraryLoader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn DriverLibrary>>;
}

/// Loads shared libraries exporting the v1 driver ABI.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl LibraryLoader for NativeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn DriverLibrary>> {
        Ok(Box::new(NativeLibrary::open(path)?))
    }
}
