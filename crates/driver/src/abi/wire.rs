//! JSON messages carried by the v1 vtable calls.

use crate::{ConnectionMetadata, Properties};
use serde::{Deserialize, Serialize};

/// Opaque id of a plugin-side object (driver, connection, statement, cursor).
pub type Handle = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleArgs {
    pub handle: Handle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectArgs {
    pub driver: Handle,
    pub url: String,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutArgs {
    pub handle: Handle,
    pub seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteArgs {
    pub handle: Handle,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleReply {
    pub handle: Handle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectReply {
    pub handle: Handle,
    #[serde(default)]
    pub metadata: ConnectionMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteReply {
    pub handle: Handle,
    pub columns: usize,
}

/// `row` is absent once the cursor is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchReply {
    #[serde(default)]
    pub row: Option<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}
