use super::{
    SQLSTATE_CONNECTION_FAILURE, SQLSTATE_QUERY_CANCELED, block_on, block_on_timeout, runtime,
    sqlx_error,
};
use futures::StreamExt;
use rowbridge_driver::{
    Connection, ConnectionMetadata, Cursor, Driver, DriverError, Properties, Row, Statement,
};
use sqlx::sqlite::{Sqlite, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Pool, Row as _, Statement as _, ValueRef};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

type RowResult = Result<Vec<Option<String>>, DriverError>;

/// Constructor registered for `rowbridge.sqlx.SqliteDriver`.
pub fn create() -> Result<Box<dyn Driver>, DriverError> {
    runtime()?;
    Ok(Box::new(SqliteDriver))
}

pub struct SqliteDriver;

/// Accept `sqlite:` URLs as well as plain paths and `:memory:`.
fn normalize_url(url: &str) -> String {
    if url.starts_with("sqlite:") {
        url.to_string()
    } else if url == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite:{url}")
    }
}

impl Driver for SqliteDriver {
    // SQLite has no authentication; user and password are ignored.
    fn connect(&self, url: &str, _properties: &Properties) -> Result<Box<dyn Connection>, DriverError> {
        if url.is_empty() {
            return Err(DriverError::new("missing database url").with_sqlstate(SQLSTATE_CONNECTION_FAILURE));
        }
        let url = normalize_url(url);
        let pool = block_on(async {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect(url.as_str())
                .await
        })?
        .map_err(|e| sqlx_error(&e).with_sqlstate(SQLSTATE_CONNECTION_FAILURE))?;

        let version = block_on(async {
            sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                .fetch_one(&pool)
                .await
        })?
        .map_err(|e| sqlx_error(&e))?;
        Ok(Box::new(SqliteConnection {
            pool,
            metadata: ConnectionMetadata::new("SQLite", version),
        }))
    }
}

struct SqliteConnection {
    pool: Pool<Sqlite>,
    metadata: ConnectionMetadata,
}

impl Connection for SqliteConnection {
    fn metadata(&self) -> ConnectionMetadata {
        self.metadata.clone()
    }

    fn create_statement(&mut self) -> Result<Box<dyn Statement>, DriverError> {
        Ok(Box::new(SqliteStatement {
            pool: self.pool.clone(),
            timeout: None,
            running: Arc::new(Running::default()),
        }))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        block_on(async { self.pool.close().await })
    }
}

/// Shared between a statement and the cursor it produced.
#[derive(Default)]
struct Running {
    cancelled: AtomicBool,
    task: Mutex<Option<AbortHandle>>,
}

impl Running {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct SqliteStatement {
    pool: Pool<Sqlite>,
    timeout: Option<Duration>,
    running: Arc<Running>,
}

impl Statement for SqliteStatement {
    fn set_query_timeout(&mut self, timeout: Duration) -> Result<(), DriverError> {
        // zero means no limit
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        Ok(())
    }

    fn execute_query(&mut self, query: &str) -> Result<Box<dyn Cursor>, DriverError> {
        let prepared = block_on_timeout(self.timeout, async { self.pool.prepare(query).await })?
            .map_err(|e| sqlx_error(&e))?;
        let columns = prepared.columns().len();

        let (tx, rx) = mpsc::channel::<RowResult>(1);
        let pool = self.pool.clone();
        let sql = query.to_string();
        let task = runtime()?.spawn(async move {
            let mut rows = sqlx::query(&sql).fetch(&pool);
            while let Some(item) = rows.next().await {
                let item = item.map(|row| row_values(&row)).map_err(|e| sqlx_error(&e));
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });
        *self.running.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());

        Ok(Box::new(SqliteCursor {
            columns,
            rows: rx,
            task: Some(task),
            timeout: self.timeout,
            running: self.running.clone(),
        }))
    }

    fn cancel(&mut self) -> Result<(), DriverError> {
        self.running.cancel();
        Ok(())
    }
}

struct SqliteCursor {
    columns: usize,
    rows: mpsc::Receiver<RowResult>,
    task: Option<JoinHandle<()>>,
    timeout: Option<Duration>,
    running: Arc<Running>,
}

impl SqliteCursor {
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // wait for the producer to drop its pool connection
            let _ = block_on(task);
        }
    }
}

impl Cursor for SqliteCursor {
    fn column_count(&self) -> usize {
        self.columns
    }

    fn fetch_into(&mut self, row: &mut Row) -> Result<bool, DriverError> {
        if self.running.is_cancelled() {
            return Err(DriverError::new("canceling statement due to user request")
                .with_sqlstate(SQLSTATE_QUERY_CANCELED));
        }
        match block_on_timeout(self.timeout, self.rows.recv())? {
            Some(Ok(values)) => {
                for (slot, value) in row.iter_mut().zip(values) {
                    *slot = value;
                }
                Ok(true)
            }
            Some(Err(e)) => Err(e),
            None => {
                self.task = None;
                Ok(false)
            }
        }
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.rows.close();
        self.stop();
        Ok(())
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Text form of every column; `None` for NULL.
fn row_values(row: &SqliteRow) -> Vec<Option<String>> {
    (0..row.len()).map(|i| column_text(row, i)).collect()
}

fn column_text(row: &SqliteRow, index: usize) -> Option<String> {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return None,
        Ok(_) => {}
        Err(_) => return None,
    }
    row.try_get::<i64, _>(index)
        .map(|v| v.to_string())
        // Debug keeps the fraction, so REAL 1.0 stays distinct from INTEGER 1
        .or_else(|_| row.try_get::<f64, _>(index).map(|v| format!("{v:?}")))
        .or_else(|_| row.try_get::<String, _>(index))
        .or_else(|_| {
            row.try_get::<Vec<u8>, _>(index)
                .map(|v| String::from_utf8_lossy(&v).into_owned())
        })
        .ok()
}
