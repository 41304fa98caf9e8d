//! Capability traits for the underlying directory client.
//!
//! The pool never speaks the directory protocol itself. It asks a
//! [`ConnectionFactory`] for a [`DirectoryConnection`] to one endpoint and
//! then drives it through bind, unbind and execute. An adapter over a real
//! client library implements these traits; tests use in-memory mocks.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::DirectoryError;

/// Search scope relative to the base DN.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Scope {
    /// Only the base entry itself.
    #[default]
    Base,
    /// Immediate children of the base entry.
    OneLevel,
    /// The base entry and everything below it.
    Subtree,
}

/// Kind of change applied to one attribute by a modify operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModifyOp {
    Add,
    Replace,
    Delete,
}

/// A single attribute change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modification {
    pub op: ModifyOp,
    pub attribute: String,
    pub values: Vec<Vec<u8>>,
}

impl Modification {
    pub fn replace(attribute: &str, values: Vec<Vec<u8>>) -> Self {
        Self {
            op: ModifyOp::Replace,
            attribute: attribute.to_string(),
            values,
        }
    }
}

/// A directory entry returned by a search.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    /// First value of `attribute`, if present.
    pub fn first(&self, attribute: &str) -> Option<&[u8]> {
        self.attributes
            .get(attribute)
            .and_then(|values| values.first())
            .map(Vec::as_slice)
    }
}

/// A read or write request passed through to the directory connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Search {
        base: String,
        scope: Scope,
        filter: String,
        attributes: Vec<String>,
    },
    Add {
        dn: String,
        attributes: Vec<(String, Vec<Vec<u8>>)>,
    },
    Modify {
        dn: String,
        changes: Vec<Modification>,
    },
    Delete {
        dn: String,
    },
}

impl Operation {
    /// Short operation name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Search { .. } => "search",
            Operation::Add { .. } => "add",
            Operation::Modify { .. } => "modify",
            Operation::Delete { .. } => "delete",
        }
    }
}

/// Result of an executed [`Operation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Entries matched by a search.
    Entries(Vec<Entry>),
    /// A write completed.
    Done,
}

impl Response {
    /// The entries of a search response; empty for write responses.
    pub fn into_entries(self) -> Vec<Entry> {
        match self {
            Response::Entries(entries) => entries,
            Response::Done => Vec::new(),
        }
    }
}

/// Options forwarded to the factory for every new connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Network timeout for connection operations; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Reconnect attempts the client may make on its own.
    pub retry_max: u32,
    /// Delay between the client's own reconnect attempts.
    pub retry_delay: Duration,
}

/// One live connection to a single directory server.
pub trait DirectoryConnection: Send + std::fmt::Debug {
    /// Upgrade the transport to TLS before binding.
    fn start_tls(&mut self) -> Result<(), DirectoryError>;
    /// Authenticate as `identity`. An empty identity is an anonymous bind.
    fn bind(&mut self, identity: &str, credential: &[u8]) -> Result<(), DirectoryError>;
    /// Drop the current authentication.
    fn unbind(&mut self) -> Result<(), DirectoryError>;
    /// Run a read or write operation.
    fn execute(&mut self, operation: &Operation) -> Result<Response, DirectoryError>;
    /// Whether the transport is still usable.
    fn is_connected(&self) -> bool;
}

/// Factory for creating new connections — injected by the caller.
pub trait ConnectionFactory: Send + Sync {
    /// Open a connection to `endpoint` without binding it.
    fn connect(
        &self,
        endpoint: &str,
        options: &ConnectOptions,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryError>;
}

/// Split a configured endpoint list on commas and whitespace.
pub fn split_endpoints(endpoints: &str) -> Vec<&str> {
    endpoints
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|endpoint| !endpoint.is_empty())
        .collect()
}
