use crate::error::{BridgeError, Result};
use crate::loader::{DriverClass, DriverLibrary, LibraryLoader, NativeLoader};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// A loaded driver class, shared by every session that uses it.
pub type DriverClassHandle = Arc<dyn DriverClass>;

#[derive(Default)]
struct RegistryState {
    search_path: Vec<PathBuf>,             // each library path at most once, in load order
    libraries: Vec<Box<dyn DriverLibrary>>, // parallel to search_path
    classes: HashMap<String, DriverClassHandle>,
}

/// A cache of driver classes shared across sessions.
///
/// Libraries are opened at most once and never unloaded. A class, once
/// resolved, is handed out again without touching the loader.
pub struct DriverRegistry {
    loader: Box<dyn LibraryLoader>,
    state: RwLock<RegistryState>,
}

impl DriverRegistry {
    pub fn new(loader: impl LibraryLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// A registry that opens shared libraries exporting the v1 driver ABI.
    pub fn native() -> Self {
        Self::new(NativeLoader)
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve `class_name`, extending the search path with `library_paths` on a miss.
    pub fn resolve(&self, library_paths: &[PathBuf], class_name: &str) -> Result<DriverClassHandle> {
        {
            let state = self.read();
            if let Some(class) = state.classes.get(class_name) {
                debug!(class = class_name, "driver class cache hit");
                return Ok(class.clone());
            }
        }
        // Upgrade to write and double-check
        let mut state = self.write();
        if let Some(class) = state.classes.get(class_name) {
            return Ok(class.clone());
        }

        for path in library_paths {
            let key = path.canonicalize().unwrap_or_else(|_| path.clone());
            if state.search_path.contains(&key) {
                continue;
            }
            let library = self.loader.open(path)?;
            info!(
                path = %key.display(),
                classes = ?library.class_names(),
                "loaded driver library"
            );
            state.search_path.push(key);
            state.libraries.push(library);
        }

        if state.libraries.is_empty() {
            return Err(BridgeError::driver_load(format!(
                "no driver library given for class '{class_name}'"
            )));
        }
        let class = state
            .libraries
            .iter()
            .find_map(|lib| lib.class(class_name))
            .ok_or_else(|| {
                BridgeError::driver_load(format!(
                    "driver class '{class_name}' not found in {}",
                    display_paths(&state.search_path)
                ))
            })?;
        info!(class = class_name, "driver class loaded");
        state.classes.insert(class_name.to_string(), class.clone());
        Ok(class)
    }

    pub fn is_loaded(&self, class_name: &str) -> bool {
        self.read().classes.contains_key(class_name)
    }

    pub fn search_path(&self) -> Vec<PathBuf> {
        self.read().search_path.clone()
    }

    pub fn loaded_classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().classes.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::native()
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
