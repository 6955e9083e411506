//! Validation of the generic options that describe a foreign scan.
//!
//! Options arrive in three contexts, the way a foreign-data wrapper receives
//! them: the server (`drivername`, `driverpath`, `url`), the user mapping
//! (`username`, `password`) and the table (`query`, `table`, `querytimeout`).

use crate::error::{BridgeError, Result};
use crate::session::SessionRequest;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionContext {
    Server,
    UserMapping,
    Table,
}

const VALID_OPTIONS: &[(&str, OptionContext)] = &[
    ("drivername", OptionContext::Server),
    ("driverpath", OptionContext::Server),
    ("url", OptionContext::Server),
    ("username", OptionContext::UserMapping),
    ("password", OptionContext::UserMapping),
    ("query", OptionContext::Table),
    ("table", OptionContext::Table),
    ("querytimeout", OptionContext::Table),
];

pub fn is_valid_option(name: &str, context: OptionContext) -> bool {
    VALID_OPTIONS
        .iter()
        .any(|(opt, ctx)| *ctx == context && *opt == name)
}

fn valid_names(context: OptionContext) -> String {
    let names: Vec<&str> = VALID_OPTIONS
        .iter()
        .filter(|(_, ctx)| *ctx == context)
        .map(|(opt, _)| *opt)
        .collect();
    if names.is_empty() {
        "<none>".to_string()
    } else {
        names.join(", ")
    }
}

/// Check that only known options for `context` are given, none twice, and
/// that `query` and `table` are not combined.
pub fn validate(options: &[(String, String)], context: OptionContext) -> Result<()> {
    let mut seen: Vec<&str> = Vec::new();
    for (name, value) in options {
        if !is_valid_option(name, context) {
            return Err(BridgeError::invalid_options(format!("invalid option \"{name}\""))
                .with_details(format!(
                    "Valid options in this context are: {}",
                    valid_names(context)
                )));
        }
        if name == "query" && seen.contains(&"table") {
            return Err(BridgeError::invalid_options(
                "conflicting options: query cannot be used with table",
            ));
        }
        if name == "table" && seen.contains(&"query") {
            return Err(BridgeError::invalid_options(
                "conflicting options: table cannot be used with query",
            ));
        }
        if seen.contains(&name.as_str()) {
            let message = if name == "password" {
                "conflicting or redundant options: password".to_string()
            } else {
                format!("conflicting or redundant options: {name} ({value})")
            };
            return Err(BridgeError::invalid_options(message));
        }
        seen.push(name.as_str());
    }
    Ok(())
}

/// Everything needed to run one scan, merged from all three contexts.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub driver_name: String,
    pub driver_path: Option<String>,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub query: Option<String>,
    pub table: Option<String>,
    pub query_timeout: Option<u64>,
}

impl fmt::Debug for ScanOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOptions")
            .field("driver_name", &self.driver_name)
            .field("driver_path", &self.driver_path)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("query", &self.query)
            .field("table", &self.table)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

impl ScanOptions {
    /// Validate each context, then merge them. Fails when the driver name,
    /// the URL, or both query and table are missing.
    pub fn from_contexts(
        server: &[(String, String)],
        user_mapping: &[(String, String)],
        table: &[(String, String)],
    ) -> Result<Self> {
        validate(server, OptionContext::Server)?;
        validate(user_mapping, OptionContext::UserMapping)?;
        validate(table, OptionContext::Table)?;

        let mut opts = Self::default();
        let mut driver_name = None;
        let mut url = None;
        for (name, value) in server.iter().chain(user_mapping).chain(table) {
            match name.as_str() {
                "drivername" => driver_name = Some(value.clone()),
                "driverpath" => opts.driver_path = Some(value.clone()),
                "url" => url = Some(value.clone()),
                "username" => opts.username = Some(value.clone()),
                "password" => opts.password = Some(value.clone()),
                "query" => opts.query = Some(value.clone()),
                "table" => opts.table = Some(value.clone()),
                "querytimeout" => {
                    let secs = value.trim().parse::<u64>().map_err(|_| {
                        BridgeError::invalid_options(format!(
                            "querytimeout must be a whole number of seconds, got \"{value}\""
                        ))
                    })?;
                    opts.query_timeout = Some(secs);
                }
                _ => {}
            }
        }

        if opts.table.is_none() && opts.query.is_none() {
            return Err(BridgeError::invalid_options(
                "either a table or a query must be specified",
            ));
        }
        opts.driver_name = driver_name
            .ok_or_else(|| BridgeError::invalid_options("Driver name must be specified"))?;
        opts.url = url.ok_or_else(|| BridgeError::invalid_options("URL must be specified"))?;
        Ok(opts)
    }

    /// The query to run: the explicit query, or a full scan of the table.
    pub fn query_text(&self) -> String {
        match (&self.query, &self.table) {
            (Some(query), _) => query.clone(),
            (None, Some(table)) => format!("SELECT * FROM {table}"),
            (None, None) => String::new(),
        }
    }

    pub fn explain_query(&self) -> String {
        format!("EXPLAIN {}", self.query_text())
    }

    /// `driverpath` may list several libraries joined by the platform path separator.
    pub fn library_paths(&self) -> Vec<PathBuf> {
        self.driver_path
            .as_deref()
            .map(split_library_paths)
            .unwrap_or_default()
    }

    pub fn to_request(&self) -> SessionRequest {
        SessionRequest {
            query: self.query_text(),
            driver_class: self.driver_name.clone(),
            library_paths: self.library_paths(),
            url: self.url.clone(),
            user: self.username.clone(),
            password: self.password.clone(),
            timeout_secs: self.query_timeout,
        }
    }
}

pub fn split_library_paths(paths: &str) -> Vec<PathBuf> {
    std::env::split_paths(paths)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}
