//! One query's lifecycle: initialize, iterate, then close or cancel.

use crate::config::DEFAULT_QUERY_TIMEOUT_SECS;
use crate::error::{BridgeError, ErrorCategory};
use crate::failure::FailureDescription;
use crate::registry::DriverRegistry;
use rowbridge_driver::{Connection, Cursor, DriverError, Properties, Statement};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a caller asks a session to run.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    pub query: String,
    pub driver_class: String,
    pub library_paths: Vec<PathBuf>,
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// `None` or `Some(0)` selects the session's default timeout.
    pub timeout_secs: Option<u64>,
}

impl SessionRequest {
    pub fn new(
        query: impl Into<String>,
        driver_class: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            driver_class: driver_class.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_paths.push(path.into());
        self
    }

    pub fn with_library_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.library_paths.extend(paths);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Connection properties. Absent credentials are left out.
    pub fn properties(&self) -> Properties {
        let mut props = Properties::new();
        if let Some(user) = &self.user {
            props.insert("user".to_string(), user.clone());
        }
        if let Some(password) = &self.password {
            props.insert("password".to_string(), password.clone());
        }
        props
    }
}

impl fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRequest")
            .field("query", &self.query)
            .field("driver_class", &self.driver_class)
            .field("library_paths", &self.library_paths)
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Connected,
    Executing,
    Iterating,
    Closed,
    Cancelled,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Connected => "connected",
            Self::Executing => "executing",
            Self::Iterating => "iterating",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// All three are open together or not at all.
struct Open {
    connection: Box<dyn Connection>,
    statement: Box<dyn Statement>,
    cursor: Box<dyn Cursor>,
}

/// Owns the connection, statement and cursor of a single query.
///
/// Driven by one thread at a time. Rows are staged in a buffer that is reused
/// from one [`next_row`](Self::next_row) call to the next.
pub struct QuerySession {
    registry: Arc<DriverRegistry>,
    default_timeout: Duration,
    state: SessionState,
    open: Option<Open>,
    exhausted: bool,
    row: Vec<Option<String>>,
    rows_fetched: u64,
    last_error: Option<FailureDescription>,
}

impl QuerySession {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            registry,
            default_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            state: SessionState::New,
            open: None,
            exhausted: false,
            row: Vec::new(),
            rows_fetched: 0,
            last_error: None,
        }
    }

    /// Zero keeps the built-in default; a session always has a timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.default_timeout = timeout;
        }
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Columns of the current result, 0 before a successful `initialize`.
    pub fn column_count(&self) -> usize {
        self.row.len()
    }

    pub fn rows_fetched(&self) -> u64 {
        self.rows_fetched
    }

    /// The most recent initialization or iteration failure.
    pub fn last_error(&self) -> Option<&FailureDescription> {
        self.last_error.as_ref()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn effective_timeout(&self, secs: Option<u64>) -> Duration {
        match secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => self.default_timeout,
        }
    }

    /// Load the driver, connect, and run `request.query`. Returns the column count.
    pub fn initialize(&mut self, request: &SessionRequest) -> Result<usize, FailureDescription> {
        if self.state != SessionState::New {
            return Err(BridgeError::new(
                ErrorCategory::InvalidState,
                format!("cannot initialize a session that is {}", self.state),
            )
            .into());
        }

        match self.open_all(request) {
            Ok(open) => {
                let columns = open.cursor.column_count();
                self.row = vec![None; columns];
                self.open = Some(open);
                info!(
                    class = %request.driver_class,
                    columns,
                    "query started"
                );
                Ok(columns)
            }
            Err(err) => {
                warn!(class = %request.driver_class, error = %err, "session initialization failed");
                self.state = SessionState::Failed;
                let failure = FailureDescription::from(err);
                self.last_error = Some(failure.clone());
                Err(failure)
            }
        }
    }

    fn open_all(&mut self, request: &SessionRequest) -> Result<Open, BridgeError> {
        let class = self
            .registry
            .resolve(&request.library_paths, &request.driver_class)?;
        let driver = class.instantiate().map_err(|e| {
            BridgeError::from_driver(
                ErrorCategory::DriverLoad,
                format!("cannot instantiate driver class '{}'", request.driver_class),
                e,
            )
        })?;

        let mut connection = driver
            .connect(&request.url, &request.properties())
            .map_err(|e| {
                BridgeError::from_driver(ErrorCategory::Connection, "could not connect to database", e)
            })?;
        let metadata = connection.metadata();
        info!(
            class = %request.driver_class,
            product = metadata.product_name.as_deref().unwrap_or("unknown"),
            version = metadata.product_version.as_deref().unwrap_or("unknown"),
            "connected"
        );
        self.state = SessionState::Connected;

        let mut statement = match connection.create_statement() {
            Ok(statement) => statement,
            Err(e) => {
                discard("connection", connection.close());
                return Err(BridgeError::from_driver(
                    ErrorCategory::Execution,
                    "could not create statement",
                    e,
                ));
            }
        };

        let timeout = self.effective_timeout(request.timeout_secs);
        if let Err(e) = statement.set_query_timeout(timeout) {
            let err = BridgeError::from_driver(ErrorCategory::TimeoutConfig, "query timeout ignored", e);
            warn!(timeout_secs = timeout.as_secs(), error = %err, "driver refused query timeout");
        }

        self.state = SessionState::Executing;
        debug!(query = %request.query, "executing");
        let cursor = match statement.execute_query(&request.query) {
            Ok(cursor) => cursor,
            Err(e) => {
                discard("statement", statement.close());
                discard("connection", connection.close());
                return Err(BridgeError::from_driver(ErrorCategory::Execution, "query failed", e));
            }
        };

        Ok(Open {
            connection,
            statement,
            cursor,
        })
    }

    /// Advance one row. `None` once the result is exhausted, the session is
    /// closed, or fetching failed (see [`last_error`](Self::last_error)).
    pub fn next_row(&mut self) -> Option<&[Option<String>]> {
        if self.exhausted {
            return None;
        }
        let open = self.open.as_mut()?;
        match open.cursor.fetch_into(&mut self.row) {
            Ok(true) => {
                self.state = SessionState::Iterating;
                self.rows_fetched += 1;
                Some(self.row.as_slice())
            }
            Ok(false) => {
                self.exhausted = true;
                debug!(rows = self.rows_fetched, "end of data");
                None
            }
            Err(e) => {
                let err = BridgeError::from_driver(
                    ErrorCategory::Iteration,
                    format!("failed to fetch row {}", self.rows_fetched + 1),
                    e,
                );
                warn!(error = %err, "iteration stopped");
                self.exhausted = true;
                self.last_error = Some(err.into());
                None
            }
        }
    }

    /// Release cursor, statement and connection. A no-op once released.
    pub fn close(&mut self) -> Result<(), FailureDescription> {
        let result = self.release();
        if self.is_live() {
            self.state = SessionState::Closed;
        }
        result
    }

    /// Ask the driver to abort the query, then release like [`close`](Self::close).
    pub fn cancel(&mut self) -> Result<(), FailureDescription> {
        if let Some(open) = self.open.as_mut() {
            match open.statement.cancel() {
                Ok(()) => debug!("cancel requested"),
                Err(e) => warn!(error = %e.full_text(), "driver refused cancel"),
            }
        }
        let result = self.release();
        match self.state {
            SessionState::New => self.state = SessionState::Closed,
            SessionState::Connected | SessionState::Executing | SessionState::Iterating => {
                self.state = SessionState::Cancelled
            }
            _ => {}
        }
        result
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            SessionState::New
                | SessionState::Connected
                | SessionState::Executing
                | SessionState::Iterating
        )
    }

    fn release(&mut self) -> Result<(), FailureDescription> {
        self.exhausted = true;
        let Some(mut open) = self.open.take() else {
            return Ok(());
        };
        let mut errors = Vec::new();
        if let Err(e) = open.cursor.close() {
            errors.push(BridgeError::from_driver(ErrorCategory::Release, "closing cursor", e));
        }
        if let Err(e) = open.statement.close() {
            errors.push(BridgeError::from_driver(ErrorCategory::Release, "closing statement", e));
        }
        if let Err(e) = open.connection.close() {
            errors.push(BridgeError::from_driver(ErrorCategory::Release, "closing connection", e));
        }
        debug!(rows = self.rows_fetched, "session released");
        match BridgeError::combine(errors) {
            None => Ok(()),
            Some(err) => {
                warn!(error = %err, "release incomplete");
                Err(err.into())
            }
        }
    }
}

impl Drop for QuerySession {
    fn drop(&mut self) {
        if self.open.is_some() {
            let _ = self.release();
        }
    }
}

fn discard(what: &str, result: Result<(), DriverError>) {
    if let Err(e) = result {
        warn!(error = %e.full_text(), "failed to close {what}");
    }
}
