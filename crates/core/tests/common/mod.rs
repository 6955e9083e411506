#![allow(dead_code)]

use rowbridge_core::loader::{DriverClass, DriverLibrary, LibraryLoader};
use rowbridge_core::{BridgeError, DriverRegistry};
use rowbridge_driver::{Connection, Cursor, Driver, DriverError, Properties, Row, Statement};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FIXTURE_LIB: &str = "/drivers/fixture.so";
pub const FIXTURE_CLASS: &str = "test.FixtureDriver";
pub const FIXTURE_URL: &str = "fake:fixture";
pub const FIXTURE_QUERY: &str = "SELECT id, name FROM t";
pub const NULLABLE_QUERY: &str = "SELECT name, nickname FROM t";
pub const NUMBERS_QUERY: &str = "SELECT n FROM numbers";
pub const WRONG_PASSWORD: &str = "wrong";

/// Knobs that make a fake driver misbehave.
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    pub fail_instantiate: bool,
    pub refuse_timeout: bool,
    pub refuse_cancel: bool,
    pub fail_fetch_at: Option<usize>,
    pub fail_cursor_close: bool,
    pub fail_connection_close: bool,
}

/// Everything the fakes did, in order.
#[derive(Default)]
pub struct Journal {
    opens: Mutex<Vec<PathBuf>>,
    events: Mutex<Vec<String>>,
    live_connections: AtomicUsize,
}

impl Journal {
    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn opens(&self) -> Vec<PathBuf> {
        self.opens.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }

    pub fn live_connections(&self) -> usize {
        self.live_connections.load(Ordering::SeqCst)
    }
}

/// A `LibraryLoader` over in-memory libraries that counts every open.
pub struct FakeLoader {
    journal: Arc<Journal>,
    libraries: HashMap<PathBuf, Vec<(String, Behaviour)>>,
}

impl FakeLoader {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            libraries: HashMap::new(),
        }
    }

    pub fn library(mut self, path: &str, classes: &[(&str, Behaviour)]) -> Self {
        let classes = classes
            .iter()
            .map(|(name, behaviour)| (name.to_string(), behaviour.clone()))
            .collect();
        self.libraries.insert(PathBuf::from(path), classes);
        self
    }
}

impl LibraryLoader for FakeLoader {
    fn open(&self, path: &Path) -> rowbridge_core::Result<Box<dyn DriverLibrary>> {
        self.journal.opens.lock().unwrap().push(path.to_path_buf());
        let Some(classes) = self.libraries.get(path) else {
            return Err(BridgeError::driver_load(format!(
                "driver library {} does not exist",
                path.display()
            )));
        };
        let classes = classes
            .iter()
            .map(|(name, behaviour)| {
                Arc::new(FakeClass {
                    name: name.clone(),
                    behaviour: behaviour.clone(),
                    journal: self.journal.clone(),
                })
            })
            .collect();
        Ok(Box::new(FakeLibrary {
            path: path.to_path_buf(),
            classes,
        }))
    }
}

struct FakeLibrary {
    path: PathBuf,
    classes: Vec<Arc<FakeClass>>,
}

impl DriverLibrary for FakeLibrary {
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

struct FakeClass {
    name: String,
    behaviour: Behaviour,
    journal: Arc<Journal>,
}

impl DriverClass for FakeClass {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self) -> Result<Box<dyn Driver>, DriverError> {
        if self.behaviour.fail_instantiate {
            return Err(DriverError::new("constructor threw"));
        }
        Ok(Box::new(FakeDriver {
            behaviour: self.behaviour.clone(),
            journal: self.journal.clone(),
        }))
    }
}

struct FakeDriver {
    behaviour: Behaviour,
    journal: Arc<Journal>,
}

impl Driver for FakeDriver {
    fn connect(&self, url: &str, properties: &Properties) -> Result<Box<dyn Connection>, DriverError> {
        self.journal.record(format!("connect {url}"));
        if !url.starts_with("fake:") {
            return Err(DriverError::new(format!("malformed URL \"{url}\"")).with_sqlstate("08001"));
        }
        if properties.get("password").map(String::as_str) == Some(WRONG_PASSWORD) {
            let user = properties.get("user").cloned().unwrap_or_default();
            return Err(
                DriverError::new(format!("password authentication failed for user \"{user}\""))
                    .with_sqlstate("28P01"),
            );
        }
        self.journal.live_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            behaviour: self.behaviour.clone(),
            journal: self.journal.clone(),
        }))
    }
}

struct FakeConnection {
    behaviour: Behaviour,
    journal: Arc<Journal>,
}

impl Connection for FakeConnection {
    fn create_statement(&mut self) -> Result<Box<dyn Statement>, DriverError> {
        Ok(Box::new(FakeStatement {
            behaviour: self.behaviour.clone(),
            journal: self.journal.clone(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.journal.record("close connection");
        self.journal.live_connections.fetch_sub(1, Ordering::SeqCst);
        if self.behaviour.fail_connection_close {
            return Err(DriverError::new("connection reset by peer"));
        }
        Ok(())
    }
}

struct FakeStatement {
    behaviour: Behaviour,
    journal: Arc<Journal>,
    cancelled: Arc<AtomicBool>,
}

fn text(value: &str) -> Option<String> {
    Some(value.to_string())
}

fn result_set(query: &str) -> Option<(usize, Vec<Vec<Option<String>>>)> {
    match query {
        FIXTURE_QUERY => Some((
            2,
            vec![vec![text("1"), text("Alice")], vec![text("2"), text("Bob")]],
        )),
        NULLABLE_QUERY => Some((
            2,
            vec![vec![text("Alice"), None], vec![text("Bob"), text("bobby")]],
        )),
        NUMBERS_QUERY => Some((1, (1..=100).map(|n| vec![Some(n.to_string())]).collect())),
        _ => None,
    }
}

impl Statement for FakeStatement {
    fn set_query_timeout(&mut self, timeout: Duration) -> Result<(), DriverError> {
        if self.behaviour.refuse_timeout {
            return Err(DriverError::unsupported("statement query timeout"));
        }
        self.journal.record(format!("timeout {}", timeout.as_secs()));
        Ok(())
    }

    fn execute_query(&mut self, query: &str) -> Result<Box<dyn Cursor>, DriverError> {
        self.journal.record(format!("execute {query}"));
        let Some((columns, rows)) = result_set(query) else {
            return Err(DriverError::new("relation does not exist").with_sqlstate("42P01"));
        };
        Ok(Box::new(FakeCursor {
            columns,
            rows: rows.into(),
            fetched: 0,
            behaviour: self.behaviour.clone(),
            journal: self.journal.clone(),
            cancelled: self.cancelled.clone(),
        }))
    }

    fn cancel(&mut self) -> Result<(), DriverError> {
        if self.behaviour.refuse_cancel {
            return Err(DriverError::unsupported("statement cancel"));
        }
        self.journal.record("cancel");
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.journal.record("close statement");
        Ok(())
    }
}

struct FakeCursor {
    columns: usize,
    rows: VecDeque<Vec<Option<String>>>,
    fetched: usize,
    behaviour: Behaviour,
    journal: Arc<Journal>,
    cancelled: Arc<AtomicBool>,
}

impl Cursor for FakeCursor {
    fn column_count(&self) -> usize {
        self.columns
    }

    fn fetch_into(&mut self, row: &mut Row) -> Result<bool, DriverError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(DriverError::new("canceling statement due to user request").with_sqlstate("57014"));
        }
        if self.behaviour.fail_fetch_at == Some(self.fetched) {
            return Err(DriverError::new("server closed the connection unexpectedly"));
        }
        let Some(values) = self.rows.pop_front() else {
            return Ok(false);
        };
        for (slot, value) in row.iter_mut().zip(values) {
            *slot = value;
        }
        self.fetched += 1;
        Ok(true)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.journal.record("close cursor");
        if self.behaviour.fail_cursor_close {
            return Err(DriverError::new("broken pipe"));
        }
        Ok(())
    }
}

/// A registry whose only library is the fixture library with `behaviour`.
pub fn fixture_registry(behaviour: Behaviour) -> (Arc<DriverRegistry>, Arc<Journal>) {
    let journal = Arc::new(Journal::default());
    let loader = FakeLoader::new(journal.clone()).library(FIXTURE_LIB, &[(FIXTURE_CLASS, behaviour)]);
    (Arc::new(DriverRegistry::new(loader)), journal)
}
