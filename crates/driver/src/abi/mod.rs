//! v1 ABI: JSON-in/JSON-out between the bridge and a driver plugin.
//!
//! A plugin exports `rowbridge_register_v1`, which returns the classes it
//! provides and one shared vtable. Objects live in the plugin and are
//! addressed by opaque handles. Use [`export_driver_v1!`](crate::export_driver_v1)
//! instead of writing these by hand.

pub mod export;
pub mod wire;

use crate::DriverError;
use libc::{c_char, c_uchar};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const ABI_VERSION: u32 = 1;

/// Symbol the host looks up in every driver library.
pub const REGISTER_SYMBOL: &[u8] = b"rowbridge_register_v1";

pub const CODE_OK: i32 = 0;
pub const CODE_DRIVER_ERROR: i32 = 1;
pub const CODE_INVALID_ARGS: i32 = 2;
pub const CODE_BAD_HANDLE: i32 = 3;
pub const CODE_PANIC: i32 = 4;

#[repr(C)]
pub struct DriverBuf {
    pub ptr: *const c_uchar,
    pub len: usize,
}

impl DriverBuf {
    /// Borrow `bytes` for the duration of one call.
    pub fn borrowed(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    /// # Safety
    /// `ptr`/`len` must describe live memory for the returned lifetime.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.ptr.is_null() || self.len == 0 {
            return &[];
        }
        // SAFETY: upheld by the caller
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

#[repr(C)]
pub struct DriverCallResult {
    pub ok: bool,
    pub data: DriverBuf,
    pub code: i32,
}

pub type DriverCallV1 = extern "C" fn(DriverBuf) -> DriverCallResult;
pub type DriverFreeV1 = extern "C" fn(*const c_uchar, usize);

#[repr(C)]
pub struct DriverClassDescV1 {
    pub name: *const c_char,
    pub instantiate: DriverCallV1,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct DriverVTableV1 {
    pub connect: DriverCallV1,
    pub create_statement: DriverCallV1,
    pub set_query_timeout: DriverCallV1,
    pub execute_query: DriverCallV1,
    pub fetch: DriverCallV1,
    pub cancel: DriverCallV1,
    pub release: DriverCallV1,
}

#[repr(C)]
pub struct DriverRegisterV1 {
    pub abi_version: u32, // must be 1
    pub classes: *const DriverClassDescV1,
    pub len: usize,
    pub vtable: DriverVTableV1,
    pub free_fn: DriverFreeV1,
}

pub type DriverRegisterV1Fn = unsafe extern "C" fn() -> DriverRegisterV1;

fn boxed_result(ok: bool, bytes: Vec<u8>, code: i32) -> DriverCallResult {
    let len = bytes.len();
    let ptr = Box::into_raw(bytes.into_boxed_slice()) as *const c_uchar;
    DriverCallResult {
        ok,
        data: DriverBuf { ptr, len },
        code,
    }
}

/// Allocate a JSON payload from any Serialize value.
pub fn ok_json<T: Serialize>(val: &T) -> DriverCallResult {
    match serde_json::to_vec(val) {
        Ok(bytes) => boxed_result(true, bytes, CODE_OK),
        Err(e) => err_json(
            &DriverError::new(format!("failed to encode reply: {e}")),
            CODE_INVALID_ARGS,
        ),
    }
}

/// Return an error whose payload is the JSON form of `err`.
pub fn err_json(err: &DriverError, code: i32) -> DriverCallResult {
    let bytes = serde_json::to_vec(err).unwrap_or_default();
    boxed_result(false, bytes, code)
}

/// Free function to release buffers allocated by ok_json/err_json
pub extern "C" fn free_v1(ptr: *const c_uchar, len: usize) {
    if !ptr.is_null() && len > 0 {
        // SAFETY: caller guarantees ptr/len from Box<[u8]> allocation
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                ptr as *mut u8,
                len,
            )))
        }
    }
}

/// Decode the JSON arguments of one call.
pub fn parse_args<T: DeserializeOwned>(buf: &DriverBuf) -> Result<T, DriverError> {
    // SAFETY: the host keeps the argument buffer alive until the call returns
    let slice = unsafe { buf.as_slice() };
    serde_json::from_slice(slice).map_err(|e| DriverError::new(format!("invalid arguments: {e}")))
}

/// Create a NUL-terminated static C string from a Rust &'static str.
#[macro_export]
macro_rules! cstr {
    ($s:expr) => {{ concat!($s, "\0").as_ptr() as *const $crate::__libc::c_char }};
}

/// Export a v1 driver registry with the given class table.
/// Usage: export_driver_v1!(
///   "vendor.Driver" => fn() -> Result<Box<dyn Driver>, DriverError>,
///   ...
/// )
#[macro_export]
macro_rules! export_driver_v1 {
    ($($name:expr => $ctor:path),+ $(,)?) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn rowbridge_register_v1() -> $crate::abi::DriverRegisterV1 {
            let boxed: Box<[$crate::abi::DriverClassDescV1]> = vec![
                $( {
                    extern "C" fn instantiate(
                        buf: $crate::abi::DriverBuf,
                    ) -> $crate::abi::DriverCallResult {
                        $crate::abi::export::instantiate(buf, $ctor)
                    }
                    $crate::abi::DriverClassDescV1 { name: $crate::cstr!($name), instantiate }
                }, )+
            ].into_boxed_slice();
            let len = boxed.len();
            let classes = Box::into_raw(boxed) as *const $crate::abi::DriverClassDescV1;
            $crate::abi::DriverRegisterV1 {
                abi_version: $crate::abi::ABI_VERSION,
                classes,
                len,
                vtable: $crate::abi::export::VTABLE_V1,
                free_fn: $crate::abi::free_v1,
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take(res: DriverCallResult) -> (bool, serde_json::Value) {
        // SAFETY: buffer was produced by boxed_result just above
        let bytes = unsafe { res.data.as_slice() }.to_vec();
        free_v1(res.data.ptr, res.data.len);
        (res.ok, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn ok_json_round_trips_payload() {
        let (ok, value) = take(ok_json(&serde_json::json!({"handle": 7})));
        assert!(ok);
        assert_eq!(value["handle"], 7);
    }

    #[test]
    fn err_json_carries_driver_error() {
        let (ok, value) = take(err_json(&DriverError::new("no such table"), CODE_DRIVER_ERROR));
        assert!(!ok);
        assert_eq!(value["message"], "no such table");
    }

    #[test]
    fn parse_args_rejects_malformed_json() {
        let raw = b"{not json";
        let err = parse_args::<wire::HandleArgs>(&DriverBuf::borrowed(raw)).unwrap_err();
        assert!(err.message.starts_with("invalid arguments"));
    }

    #[test]
    fn empty_buffer_reads_as_empty_slice() {
        let buf = DriverBuf {
            ptr: std::ptr::null(),
            len: 0,
        };
        assert!(unsafe { buf.as_slice() }.is_empty());
    }
}
