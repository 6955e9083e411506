//! Plugin-side half of the v1 ABI: a handle table of live driver objects and
//! the `extern "C"` entry points that dispatch JSON calls onto them.
//!
//! Every entry point catches panics so driver bugs come back to the host as a
//! `CODE_PANIC` error instead of unwinding across the FFI boundary.

use super::wire::{
    ConnectArgs, ConnectReply, Empty, ExecuteArgs, ExecuteReply, FetchReply, Handle, HandleArgs,
    HandleReply, TimeoutArgs,
};
use super::{
    CODE_BAD_HANDLE, CODE_DRIVER_ERROR, CODE_INVALID_ARGS, CODE_PANIC, DriverBuf,
    DriverCallResult, DriverVTableV1, err_json, ok_json, parse_args,
};
use crate::{Connection, Cursor, Driver, DriverConstructor, DriverError, Statement};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const VTABLE_V1: DriverVTableV1 = DriverVTableV1 {
    connect,
    create_statement,
    set_query_timeout,
    execute_query,
    fetch,
    cancel,
    release,
};

enum Object {
    Driver(Box<dyn Driver>),
    Connection(Box<dyn Connection>),
    Statement(Box<dyn Statement>),
    Cursor {
        cursor: Box<dyn Cursor>,
        row: Vec<Option<String>>,
    },
}

impl Object {
    fn kind(&self) -> &'static str {
        match self {
            Object::Driver(_) => "driver",
            Object::Connection(_) => "connection",
            Object::Statement(_) => "statement",
            Object::Cursor { .. } => "cursor",
        }
    }
}

// Each object has its own lock so a blocking fetch never holds the table.
type Slot = Arc<Mutex<Object>>;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
static OBJECTS: Lazy<Mutex<HashMap<Handle, Slot>>> = Lazy::new(|| Mutex::new(HashMap::new()));

struct CallError {
    code: i32,
    error: DriverError,
}

impl From<DriverError> for CallError {
    fn from(error: DriverError) -> Self {
        Self {
            code: CODE_DRIVER_ERROR,
            error,
        }
    }
}

fn table() -> MutexGuard<'static, HashMap<Handle, Slot>> {
    OBJECTS.lock().unwrap_or_else(PoisonError::into_inner)
}

fn insert(object: Object) -> Handle {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    table().insert(handle, Arc::new(Mutex::new(object)));
    handle
}

fn with_object<R>(
    handle: Handle,
    f: impl FnOnce(&mut Object) -> Result<R, CallError>,
) -> Result<R, CallError> {
    let slot = table().get(&handle).cloned().ok_or_else(|| CallError {
        code: CODE_BAD_HANDLE,
        error: DriverError::new(format!("unknown handle {handle}")),
    })?;
    let mut object = slot.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut object)
}

fn wrong_kind(handle: Handle, expected: &str, found: &Object) -> CallError {
    CallError {
        code: CODE_BAD_HANDLE,
        error: DriverError::new(format!(
            "handle {handle} is a {}, expected a {expected}",
            found.kind()
        )),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "driver panicked".to_string()
    }
}

/// Decode arguments, run `f`, encode its reply; never unwinds.
fn dispatch<A, R, F>(buf: DriverBuf, f: F) -> DriverCallResult
where
    A: DeserializeOwned,
    R: Serialize,
    F: FnOnce(A) -> Result<R, CallError>,
{
    let args = match parse_args::<A>(&buf) {
        Ok(a) => a,
        Err(e) => return err_json(&e, CODE_INVALID_ARGS),
    };
    match catch_unwind(AssertUnwindSafe(|| f(args))) {
        Ok(Ok(reply)) => ok_json(&reply),
        Ok(Err(CallError { code, error })) => err_json(&error, code),
        Err(payload) => err_json(
            &DriverError::new(format!("driver panicked: {}", panic_message(&*payload))),
            CODE_PANIC,
        ),
    }
}

/// Instantiate a driver class. Called from code generated by `export_driver_v1!`.
pub fn instantiate(buf: DriverBuf, ctor: DriverConstructor) -> DriverCallResult {
    dispatch(buf, |_: Empty| {
        let driver = ctor()?;
        Ok(HandleReply {
            handle: insert(Object::Driver(driver)),
        })
    })
}

extern "C" fn connect(buf: DriverBuf) -> DriverCallResult {
    dispatch(buf, |args: ConnectArgs| {
        let conn = with_object(args.driver, |obj| match obj {
            Object::Driver(driver) => Ok(driver.connect(&args.url, &args.properties)?),
            other => Err(wrong_kind(args.driver, "driver", other)),
        })?;
        let metadata = conn.metadata();
        Ok(ConnectReply {
            handle: insert(Object::Connection(conn)),
            metadata,
        })
    })
}

extern "C" fn create_statement(buf: DriverBuf) -> DriverCallResult {
    dispatch(buf, |args: HandleArgs| {
        let stmt = with_object(args.handle, |obj| match obj {
            Object::Connection(conn) => Ok(conn.create_statement()?),
            other => Err(wrong_kind(args.handle, "connection", other)),
        })?;
        Ok(HandleReply {
            handle: insert(Object::Statement(stmt)),
        })
    })
}

extern "C" fn set_query_timeout(buf: DriverBuf) -> DriverCallResult {
    dispatch(buf, |args: TimeoutArgs| {
        with_object(args.handle, |obj| match obj {
            Object::Statement(stmt) => {
                stmt.set_query_timeout(Duration::from_secs(args.seconds))?;
                Ok(Empty {})
            }
            other => Err(wrong_kind(args.handle, "statement", other)),
        })
    })
}

extern "C" fn execute_query(buf: DriverBuf) -> DriverCallResult {
    dispatch(buf, |args: ExecuteArgs| {
        let cursor = with_object(args.handle, |obj| match obj {
            Object::Statement(stmt) => Ok(stmt.execute_query(&args.query)?),
            other => Err(wrong_kind(args.handle, "statement", other)),
        })?;
        let columns = cursor.column_count();
        let handle = insert(Object::Cursor {
            cursor,
            row: vec![None; columns],
        });
        Ok(ExecuteReply { handle, columns })
    })
}

extern "C" fn fetch(buf: DriverBuf) -> DriverCallResult {
    dispatch(buf, |args: HandleArgs| {
        with_object(args.handle, |obj| match obj {
            Object::Cursor { cursor, row } => {
                let more = cursor.fetch_into(row)?;
                Ok(FetchReply {
                    row: more.then(|| row.clone()),
                })
            }
            other => Err(wrong_kind(args.handle, "cursor", other)),
        })
    })
}

extern "C" fn cancel(buf: DriverBuf) -> DriverCallResult {
    dispatch(buf, |args: HandleArgs| {
        with_object(args.handle, |obj| match obj {
            Object::Statement(stmt) => {
                stmt.cancel()?;
                Ok(Empty {})
            }
            other => Err(wrong_kind(args.handle, "statement", other)),
        })
    })
}

/// Close and forget a handle. Unknown handles are already released.
extern "C" fn release(buf: DriverBuf) -> DriverCallResult {
    dispatch(buf, |args: HandleArgs| {
        let Some(slot) = table().remove(&args.handle) else {
            return Ok(Empty {});
        };
        let mut object = slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *object {
            Object::Driver(_) => {}
            Object::Connection(conn) => conn.close()?,
            Object::Statement(stmt) => stmt.close()?,
            Object::Cursor { cursor, .. } => cursor.close()?,
        }
        Ok(Empty {})
    })
}
