//! Host-side half of the v1 driver ABI: open a plugin with libloading and
//! expose its handles through the `Driver`/`Connection`/`Statement`/`Cursor`
//! traits.

use crate::error::{BridgeError, Result};
use crate::loader::{DriverClass, DriverLibrary};
use libloading::Library;
use rowbridge_driver::abi::wire::{
    ConnectArgs, ConnectReply, Empty, ExecuteArgs, ExecuteReply, FetchReply, Handle, HandleArgs,
    HandleReply, TimeoutArgs,
};
use rowbridge_driver::abi::{
    ABI_VERSION, DriverBuf, DriverCallV1, DriverFreeV1, DriverRegisterV1Fn, DriverVTableV1,
    REGISTER_SYMBOL,
};
use rowbridge_driver::{
    Connection, ConnectionMetadata, Cursor, Driver, DriverError, Properties, Row, Statement,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::CStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Copy)]
struct NativeApi {
    vtable: DriverVTableV1,
    free_fn: DriverFreeV1,
}

impl NativeApi {
    /// One JSON call into the plugin. The reply buffer is always handed back to `free_fn`.
    fn call<A, R>(&self, f: DriverCallV1, args: &A) -> std::result::Result<R, DriverError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let bytes = serde_json::to_vec(args)
            .map_err(|e| DriverError::new(format!("failed to encode driver call: {e}")))?;
        let res = f(DriverBuf::borrowed(&bytes));
        // SAFETY: the plugin owns the reply buffer until we pass it to free_fn below
        let data = unsafe { res.data.as_slice() };
        let decoded = if res.ok {
            serde_json::from_slice::<R>(data)
                .map_err(|e| DriverError::new(format!("malformed driver reply: {e}")))
        } else {
            Err(serde_json::from_slice::<DriverError>(data).unwrap_or_else(|_| {
                DriverError::new(format!("driver call failed with code {}", res.code))
            }))
        };
        (self.free_fn)(res.data.ptr, res.data.len);
        decoded
    }
}

/// A plugin-side object. Released exactly once, on close or on drop.
struct Remote {
    api: NativeApi,
    handle: Handle,
    released: bool,
}

impl Remote {
    fn new(api: NativeApi, handle: Handle) -> Self {
        Self {
            api,
            handle,
            released: false,
        }
    }

    fn call<A: Serialize, R: DeserializeOwned>(
        &self,
        f: DriverCallV1,
        args: &A,
    ) -> std::result::Result<R, DriverError> {
        if self.released {
            return Err(DriverError::new(format!(
                "handle {} was already released",
                self.handle
            )));
        }
        self.api.call(f, args)
    }

    fn args(&self) -> HandleArgs {
        HandleArgs {
            handle: self.handle,
        }
    }

    fn release(&mut self) -> std::result::Result<(), DriverError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.api
            .call::<_, Empty>(self.api.vtable.release, &self.args())
            .map(|_| ())
    }
}

impl Drop for Remote {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(handle = self.handle, error = %e, "failed to release driver handle");
        }
    }
}

pub struct NativeLibrary {
    path: PathBuf,
    classes: Vec<Arc<NativeClass>>,
}

impl NativeLibrary {
    /// Open a driver library and read its class table.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(BridgeError::driver_load(format!(
                "driver library {} does not exist",
                path.display()
            )));
        }
        unsafe {
            let lib = Library::new(path).map_err(|e| {
                BridgeError::driver_load(format!("failed to load {}", path.display()))
                    .with_details(e.to_string())
            })?;
            let reg = match lib.get::<DriverRegisterV1Fn>(REGISTER_SYMBOL) {
                Ok(register) => register(),
                Err(_) => {
                    return Err(BridgeError::driver_load(format!(
                        "missing rowbridge_register_v1 in {}",
                        path.display()
                    )));
                }
            };
            if reg.abi_version != ABI_VERSION || reg.classes.is_null() || reg.len == 0 {
                return Err(BridgeError::driver_load(format!(
                    "unsupported driver ABI version {} or empty class table in {}",
                    reg.abi_version,
                    path.display()
                )));
            }
            let api = NativeApi {
                vtable: reg.vtable,
                free_fn: reg.free_fn,
            };
            let slice = std::slice::from_raw_parts(reg.classes, reg.len);
            let mut classes = Vec::with_capacity(slice.len());
            for desc in slice {
                if desc.name.is_null() {
                    continue;
                }
                let Ok(name) = CStr::from_ptr(desc.name).to_str() else {
                    continue;
                };
                classes.push(Arc::new(NativeClass {
                    name: name.to_string(),
                    instantiate: desc.instantiate,
                    api,
                }));
            }
            // Safety: leak the lib to keep it resident for the process lifetime;
            // the vtable pointers above stay valid only while it is loaded
            let _: &'static mut Library = Box::leak(Box::new(lib));
            Ok(Self {
                path: path.to_path_buf(),
                classes,
            })
        }
    }
}

impl DriverLibrary for NativeLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn class_names(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.name.clone()).collect()
    }

    fn class(&self, name: &str) -> Option<Arc<dyn DriverClass>> {
        self.classes
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.clone() as Arc<dyn DriverClass>)
    }
}

struct NativeClass {
    name: String,
    instantiate: DriverCallV1,
    api: NativeApi,
}

impl DriverClass for NativeClass {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self) -> std::result::Result<Box<dyn Driver>, DriverError> {
        let reply: HandleReply = self.api.call(self.instantiate, &Empty {})?;
        Ok(Box::new(NativeDriver {
            remote: Remote::new(self.api, reply.handle),
        }))
    }
}

struct NativeDriver {
    remote: Remote,
}

impl Driver for NativeDriver {
    fn connect(
        &self,
        url: &str,
        properties: &Properties,
    ) -> std::result::Result<Box<dyn Connection>, DriverError> {
        let args = ConnectArgs {
            driver: self.remote.handle,
            url: url.to_string(),
            properties: properties.clone(),
        };
        let reply: ConnectReply = self.remote.call(self.remote.api.vtable.connect, &args)?;
        Ok(Box::new(NativeConnection {
            remote: Remote::new(self.remote.api, reply.handle),
            metadata: reply.metadata,
        }))
    }
}

struct NativeConnection {
    remote: Remote,
    metadata: ConnectionMetadata,
}

impl Connection for NativeConnection {
    fn metadata(&self) -> ConnectionMetadata {
        self.metadata.clone()
    }

    fn create_statement(&mut self) -> std::result::Result<Box<dyn Statement>, DriverError> {
        let reply: HandleReply = self
            .remote
            .call(self.remote.api.vtable.create_statement, &self.remote.args())?;
        Ok(Box::new(NativeStatement {
            remote: Remote::new(self.remote.api, reply.handle),
        }))
    }

    fn close(&mut self) -> std::result::Result<(), DriverError> {
        self.remote.release()
    }
}

struct NativeStatement {
    remote: Remote,
}

impl Statement for NativeStatement {
    fn set_query_timeout(&mut self, timeout: Duration) -> std::result::Result<(), DriverError> {
        let args = TimeoutArgs {
            handle: self.remote.handle,
            seconds: timeout.as_secs(),
        };
        let _: Empty = self
            .remote
            .call(self.remote.api.vtable.set_query_timeout, &args)?;
        Ok(())
    }

    fn execute_query(&mut self, query: &str) -> std::result::Result<Box<dyn Cursor>, DriverError> {
        let args = ExecuteArgs {
            handle: self.remote.handle,
            query: query.to_string(),
        };
        let reply: ExecuteReply = self
            .remote
            .call(self.remote.api.vtable.execute_query, &args)?;
        Ok(Box::new(NativeCursor {
            remote: Remote::new(self.remote.api, reply.handle),
            columns: reply.columns,
        }))
    }

    fn cancel(&mut self) -> std::result::Result<(), DriverError> {
        let _: Empty = self
            .remote
            .call(self.remote.api.vtable.cancel, &self.remote.args())?;
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), DriverError> {
        self.remote.release()
    }
}

struct NativeCursor {
    remote: Remote,
    columns: usize,
}

impl Cursor for NativeCursor {
    fn column_count(&self) -> usize {
        self.columns
    }

    fn fetch_into(&mut self, row: &mut Row) -> std::result::Result<bool, DriverError> {
        let reply: FetchReply = self
            .remote
            .call(self.remote.api.vtable.fetch, &self.remote.args())?;
        let Some(values) = reply.row else {
            return Ok(false);
        };
        if values.len() != row.len() {
            return Err(DriverError::new(format!(
                "driver returned {} columns, expected {}",
                values.len(),
                row.len()
            )));
        }
        for (slot, value) in row.iter_mut().zip(values) {
            *slot = value;
        }
        Ok(true)
    }

    fn close(&mut self) -> std::result::Result<(), DriverError> {
        self.remote.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use std::io::Write;

    #[test]
    fn missing_file_is_a_driver_load_error() {
        let err = NativeLibrary::open(Path::new("/nonexistent/libdriver.so")).err().unwrap();
        assert_eq!(err.category(), ErrorCategory::DriverLoad);
        assert!(err.message().contains("does not exist"));
    }

    #[test]
    fn non_library_file_is_a_driver_load_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is not a shared object").unwrap();
        let err = NativeLibrary::open(file.path()).err().unwrap();
        assert_eq!(err.category(), ErrorCategory::DriverLoad);
        assert!(err.message().starts_with("failed to load"));
        assert!(err.details().is_some());
    }
}
