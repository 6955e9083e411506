//! Runs the built plugin through the native loader, the same way the CLI does.

use pretty_assertions::assert_eq;
use rowbridge_core::{Bridge, BridgeConfig, DriverRegistry, ErrorCategory, SessionState};
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const CLASS: &str = "rowbridge.sqlx.SqliteDriver";

/// `ROWBRIDGE_SQLX_LIB` wins; otherwise look beside the test binary.
fn plugin_path() -> PathBuf {
    if let Some(path) = std::env::var_os("ROWBRIDGE_SQLX_LIB") {
        return PathBuf::from(path);
    }
    let file = format!("{DLL_PREFIX}rowbridge_ext_sqlx{DLL_SUFFIX}");
    let exe = std::env::current_exe().unwrap();
    let deps = exe.parent().unwrap();
    [deps, deps.parent().unwrap()]
        .iter()
        .map(|dir| dir.join(&file))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| panic!("{file} not found near {}", deps.display()))
}

struct Fixture {
    _dir: TempDir,
    lib: String,
    url: String,
    bridge: Bridge,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("fixture.db").display());
        let lib = plugin_path().display().to_string();
        let bridge = Bridge::with_registry(Arc::new(DriverRegistry::native()), BridgeConfig::default());
        let fixture = Self {
            _dir: dir,
            lib,
            url,
            bridge,
        };
        fixture.run_all("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, nickname TEXT)");
        fixture.run_all("INSERT INTO t (id, name, nickname) VALUES (1, 'Alice', NULL), (2, 'Bob', 'bobby')");
        fixture
    }

    fn rows(&self, sql: &str, timeout: Option<u64>) -> Vec<Vec<Option<String>>> {
        let mut session = self.bridge.session();
        let reply = session.initialize(sql, CLASS, &self.lib, &self.url, None, None, timeout);
        assert_eq!(reply.diagnostic, None);
        let mut out = Vec::new();
        while let Some(row) = session.next_row() {
            out.push(row);
        }
        assert_eq!(session.last_error(), None);
        assert_eq!(session.close(), None);
        out
    }

    // statements run once the first row is requested
    fn run_all(&self, sql: &str) {
        assert!(self.rows(sql, None).is_empty());
    }
}

fn text(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

#[test]
fn fixture_table_through_the_loaded_library() {
    let fixture = Fixture::new();
    assert_eq!(
        fixture.rows("SELECT id, name FROM t ORDER BY id", None),
        vec![text(&["1", "Alice"]), text(&["2", "Bob"])]
    );

    let registry = fixture.bridge.registry();
    assert!(registry.is_loaded(CLASS));
    // every session above resolved through the same cached library
    assert_eq!(registry.search_path(), vec![PathBuf::from(&fixture.lib)]);
}

#[test]
fn explicit_timeout_still_returns_rows() {
    let fixture = Fixture::new();
    assert_eq!(
        fixture.rows("SELECT name FROM t WHERE id = 2", Some(30)),
        vec![text(&["Bob"])]
    );
}

#[test]
fn null_column_is_none() {
    let fixture = Fixture::new();
    assert_eq!(
        fixture.rows("SELECT nickname FROM t ORDER BY id", Some(0)),
        vec![vec![None], text(&["bobby"])]
    );
}

#[test]
fn cancel_mid_iteration() {
    let fixture = Fixture::new();
    let mut session = fixture.bridge.session();
    let reply = session.initialize(
        "WITH RECURSIVE c(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM c WHERE n < 1000) SELECT n FROM c",
        CLASS,
        &fixture.lib,
        &fixture.url,
        None,
        None,
        None,
    );
    assert_eq!(reply.column_count, Some(1));
    assert_eq!(session.next_row(), Some(text(&["1"])));

    assert_eq!(session.cancel(), None);
    assert_eq!(session.next_row(), None);
    assert_eq!(session.session().state(), SessionState::Cancelled);
}

#[test]
fn missing_table_is_an_execution_error() {
    let fixture = Fixture::new();
    let mut session = fixture.bridge.session();
    let reply = session.initialize(
        "SELECT * FROM missing",
        CLASS,
        &fixture.lib,
        &fixture.url,
        None,
        None,
        None,
    );
    assert_eq!(reply.column_count, None);
    let failure = session.last_error().unwrap();
    assert_eq!(failure.category, ErrorCategory::Execution);
    assert!(failure.message.contains("no such table"), "{}", failure.message);
}

#[test]
fn unknown_class_in_a_real_library() {
    let fixture = Fixture::new();
    let mut session = fixture.bridge.session();
    let reply = session.initialize(
        "SELECT 1",
        "rowbridge.sqlx.Nope",
        &fixture.lib,
        &fixture.url,
        None,
        None,
        None,
    );
    assert_eq!(reply.column_count, None);
    assert_eq!(session.last_error().unwrap().category, ErrorCategory::DriverLoad);
}
