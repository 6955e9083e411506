//! The flat, string-typed surface a native caller drives.
//!
//! Every failure comes back as a diagnostic string (the JSON form of
//! [`FailureDescription`]) instead of a Rust error type.

use crate::config::BridgeConfig;
use crate::failure::FailureDescription;
use crate::options::split_library_paths;
use crate::registry::DriverRegistry;
use crate::session::{QuerySession, SessionRequest};
use std::sync::Arc;

/// Process-level entry point: one registry shared by all sessions.
pub struct Bridge {
    registry: Arc<DriverRegistry>,
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_registry(Arc::new(DriverRegistry::native()), config)
    }

    pub fn with_registry(registry: Arc<DriverRegistry>, config: BridgeConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn session(&self) -> BridgeSession {
        let inner = QuerySession::new(self.registry.clone())
            .with_default_timeout(self.config.default_query_timeout());
        BridgeSession { inner }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeReply {
    pub column_count: Option<usize>,
    pub diagnostic: Option<String>,
}

impl InitializeReply {
    pub fn is_success(&self) -> bool {
        self.diagnostic.is_none()
    }
}

pub struct BridgeSession {
    inner: QuerySession,
}

impl BridgeSession {
    /// `library_path` may join several libraries with the platform path separator.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        &mut self,
        query: &str,
        driver_class: &str,
        library_path: &str,
        url: &str,
        user: Option<&str>,
        password: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> InitializeReply {
        let request = SessionRequest {
            query: query.to_string(),
            driver_class: driver_class.to_string(),
            library_paths: split_library_paths(library_path),
            url: url.to_string(),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
            timeout_secs,
        };
        self.initialize_request(&request)
    }

    pub fn initialize_request(&mut self, request: &SessionRequest) -> InitializeReply {
        match self.inner.initialize(request) {
            Ok(columns) => InitializeReply {
                column_count: Some(columns),
                diagnostic: None,
            },
            Err(failure) => InitializeReply {
                column_count: None,
                diagnostic: Some(failure.to_diagnostic()),
            },
        }
    }

    /// An owned copy of the next row.
    pub fn next_row(&mut self) -> Option<Vec<Option<String>>> {
        self.inner.next_row().map(<[Option<String>]>::to_vec)
    }

    pub fn close(&mut self) -> Option<String> {
        self.inner.close().err().map(|f| f.to_diagnostic())
    }

    pub fn cancel(&mut self) -> Option<String> {
        self.inner.cancel().err().map(|f| f.to_diagnostic())
    }

    pub fn last_error(&self) -> Option<&FailureDescription> {
        self.inner.last_error()
    }

    pub fn session(&self) -> &QuerySession {
        &self.inner
    }
}
