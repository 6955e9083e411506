pub mod sqlite;

use once_cell::sync::OnceCell;
use rowbridge_driver::DriverError;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

/// SQLSTATE reported when a query is cancelled or runs out of time.
pub const SQLSTATE_QUERY_CANCELED: &str = "57014";
pub const SQLSTATE_CONNECTION_FAILURE: &str = "08001";

static RT: OnceCell<Runtime> = OnceCell::new();

/// The plugin's private current-thread runtime. Spawned tasks only make
/// progress while some call is inside [`block_on`].
pub fn runtime() -> Result<&'static Runtime, DriverError> {
    RT.get_or_try_init(|| Builder::new_current_thread().enable_all().build())
        .map_err(|e| DriverError::new(format!("cannot start sqlx runtime: {e}")))
}

pub fn block_on<F: Future>(fut: F) -> Result<F::Output, DriverError> {
    Ok(runtime()?.block_on(fut))
}

/// Run `fut` with an optional deadline.
pub fn block_on_timeout<F: Future>(
    timeout: Option<Duration>,
    fut: F,
) -> Result<F::Output, DriverError> {
    let Some(limit) = timeout else {
        return block_on(fut);
    };
    // the timer has to be created on the runtime, not before entering it
    block_on(async move { tokio::time::timeout(limit, fut).await })?.map_err(|_| {
        DriverError::new(format!("query timed out after {}s", limit.as_secs()))
            .with_sqlstate(SQLSTATE_QUERY_CANCELED)
    })
}

pub fn sqlx_error(err: &sqlx::Error) -> DriverError {
    DriverError::from_error(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_that_holds_returns_the_output() {
        let out = block_on_timeout(Some(Duration::from_secs(5)), async { 7 }).unwrap();
        assert_eq!(out, 7);
    }

    #[test]
    fn elapsed_deadline_is_a_cancel_error() {
        let err = block_on_timeout(
            Some(Duration::from_millis(10)),
            async { tokio::time::sleep(Duration::from_secs(5)).await },
        )
        .unwrap_err();
        assert_eq!(err.sqlstate.as_deref(), Some(SQLSTATE_QUERY_CANCELED));
        assert!(err.message.starts_with("query timed out"));
    }
}
